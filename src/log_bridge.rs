use std::sync::Arc;

use log::{LevelFilter, Metadata, SetLoggerError};

use crate::category::{Level, LOG_BRIDGE};
use crate::context::LoggerContext;
use crate::site::SiteInfo;

/// Maps `log` levels onto ours. `trace` is our Debug, `debug` our Verbose.
pub fn level_from_log(level: log::Level) -> Level {
    match level {
        log::Level::Error => Level::Error,
        log::Level::Warn => Level::Warning,
        log::Level::Info => Level::Info,
        log::Level::Debug => Level::Verbose,
        log::Level::Trace => Level::Debug,
    }
}

/// Routes records of the `log` crate into a [`LoggerContext`] under the
/// `Log` category.
pub struct LogBridge {
    context: Arc<LoggerContext>,
}

impl LogBridge {
    pub fn new(context: Arc<LoggerContext>) -> Self {
        Self { context }
    }
}

impl log::Log for LogBridge {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.context
            .is_enabled(&LOG_BRIDGE, level_from_log(metadata.level()))
    }

    fn log(&self, record: &log::Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let site = SiteInfo::new(
            record.file_static().unwrap_or("<unknown>"),
            record.line().unwrap_or(0),
        );
        self.context
            .log_fmt(&LOG_BRIDGE, level_from_log(record.level()), site, *record.args());
    }

    fn flush(&self) {
        self.context.flush(true);
    }
}

/// Installs a [`LogBridge`] over `context` as the process-wide `log` logger.
pub fn install(context: Arc<LoggerContext>, max_level: LevelFilter) -> Result<(), SetLoggerError> {
    let bridge: &'static LogBridge = Box::leak(Box::new(LogBridge::new(context)));
    log::set_logger(bridge)?;
    log::set_max_level(max_level);
    Ok(())
}
