use super::Sink;
use crate::category::Level;
use crate::message::Message;

/// Forwards messages to the `tracing` dispatcher, the system trace facility
/// of this crate.
///
/// Severity picks the event level; Fatal goes out as an error event tagged
/// `fatal = true`.
#[derive(Debug, Default)]
pub struct TraceSink;

impl TraceSink {
    pub fn new() -> Self {
        Self
    }
}

impl Sink for TraceSink {
    fn log_message(&self, message: &Message) {
        let category = message.category().name();
        let site = message.site();
        let text = message.text();
        match message.level() {
            Level::Debug => tracing::trace!(category, file = site.file, line = site.line, "{text}"),
            Level::Verbose => tracing::debug!(category, file = site.file, line = site.line, "{text}"),
            Level::Info => tracing::info!(category, file = site.file, line = site.line, "{text}"),
            Level::Warning => tracing::warn!(category, file = site.file, line = site.line, "{text}"),
            Level::Error => tracing::error!(category, file = site.file, line = site.line, "{text}"),
            Level::Fatal => {
                tracing::error!(category, file = site.file, line = site.line, fatal = true, "{text}")
            }
        }
    }

    fn flush(&self, _synchronous: bool) {}
}
