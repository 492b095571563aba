use log::LevelFilter;
use slab_logger::{LoggerConfig, LoggerContext, MemorySink};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[test]
fn test_bridge_installs_alongside_tracing_subscriber() {
    // Same setup as the demo binary.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn"))
        .try_init()
        .unwrap();

    let context = LoggerContext::create(LoggerConfig::default().with_debugger_attached(false));
    let memory = Arc::new(MemorySink::new());
    context.register_logger(memory.clone(), false);
    context.start().unwrap();

    slab_logger::log_bridge::install(context.clone(), LevelFilter::Info).unwrap();
    log::info!("hello through the log crate");
    log::debug!("filtered by the max level");
    context.flush(true);

    assert!(memory.contains("hello through the log crate"));
    assert!(!memory.contains("filtered by the max level"));
    context.shutdown().unwrap();
}
