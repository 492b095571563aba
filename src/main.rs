use std::sync::Arc;
use std::thread;

use slab_logger::{define_log_category, log_record, log_structured, Level, LoggerConfig, LoggerContext};
use tracing_subscriber::EnvFilter;

define_log_category!(LOG_DEMO, "Demo");

const THREADS: usize = 4;
const MESSAGES_PER_THREAD: usize = 25;

fn main() -> slab_logger::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let log_file = std::env::temp_dir().join("slab_logger_demo.log");
    let config = LoggerConfig::from_env()
        .with_log_file(&log_file, true)
        .with_console(true);
    let context = LoggerContext::create(config);

    log_record!(context, LOG_DEMO, Level::Info, "logged before start, replayed once the pool exists");
    context.start()?;
    slab_logger::log_bridge::install(Arc::clone(&context), log::LevelFilter::Info)
        .unwrap_or_else(|err| tracing::warn!(error = %err, "log bridge not installed"));

    let workers: Vec<_> = (0..THREADS)
        .map(|worker| {
            let context = Arc::clone(&context);
            thread::spawn(move || {
                for i in 0..MESSAGES_PER_THREAD {
                    log_record!(context, LOG_DEMO, Level::Info, "worker {worker} message {i}");
                }
                log_structured!(
                    context,
                    LOG_DEMO,
                    Level::Verbose,
                    { "worker": worker, "sent": MESSAGES_PER_THREAD },
                    "worker {worker} done"
                );
            })
        })
        .collect();
    for worker in workers {
        if worker.join().is_err() {
            tracing::error!("demo worker panicked");
        }
    }

    log::info!("hello through the log crate");
    log_record!(context, LOG_DEMO, Level::Warning, "all {} workers finished", THREADS);
    context.flush(true);
    context.shutdown()?;

    tracing::info!(path = %log_file.display(), "demo log written");
    Ok(())
}
