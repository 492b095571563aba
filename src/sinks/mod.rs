//! Sinks: the outputs a message is finally rendered into.

use std::fmt;
use std::io;

use crate::category::{Level, LogCategory};
use crate::message::Message;
use crate::site::SiteInfo;

mod console;
mod file;
mod json;
mod memory;
mod trace;

pub use console::ConsoleSink;
pub use file::{rolled_path, FileSink};
pub use json::JsonSink;
pub use memory::{CapturedMessage, MemorySink};
pub use trace::TraceSink;

/// A concrete output for log messages.
///
/// Sinks are called from whatever thread performs the write: the producer for
/// immediate messages, a pool worker otherwise. Implementations synchronise
/// internally.
pub trait Sink: Send + Sync {
    /// Renders and writes one message.
    fn log_message(&self, message: &Message);

    /// Pushes buffered output out. `synchronous` asks for the data to reach
    /// its destination before returning.
    fn flush(&self, synchronous: bool);

    /// Final flush before the sink is dropped by its owner.
    fn close(&self) {
        self.flush(true);
    }
}

/// `[elapsed][thread][level][category] ` prefix of a text line.
pub struct LineHeader<'a> {
    pub category: &'a LogCategory,
    pub level: Level,
    pub site: &'a SiteInfo,
}

impl<'a> LineHeader<'a> {
    pub fn of(message: &'a Message) -> Self {
        Self {
            category: message.category(),
            level: message.level(),
            site: message.site(),
        }
    }
}

impl fmt::Display for LineHeader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:10.4}][{:5}][{:<9}][{}] ",
            self.site.elapsed_seconds(),
            self.site.thread_hash,
            self.level,
            self.category.name()
        )
    }
}

/// Writes `header + text + '\n'`.
pub fn write_text_line<W: io::Write>(out: &mut W, header: &LineHeader<'_>, text: &str) -> io::Result<()> {
    writeln!(out, "{header}{text}")
}

/// Renders a message the way the plain-text file sink does, without the newline.
pub fn format_text_line(message: &Message) -> String {
    format!("{}{}", LineHeader::of(message), message.text())
}
