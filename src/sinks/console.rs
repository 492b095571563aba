use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use anstyle::{AnsiColor, Style};

use super::{LineHeader, Sink};
use crate::category::Level;
use crate::message::Message;

fn level_style(level: Level) -> Style {
    match level {
        Level::Debug | Level::Verbose => Style::new().fg_color(Some(AnsiColor::BrightBlack.into())),
        Level::Info => Style::new(),
        Level::Warning => Style::new().fg_color(Some(AnsiColor::Yellow.into())),
        Level::Error => Style::new().fg_color(Some(AnsiColor::Red.into())).bold(),
        Level::Fatal => Style::new()
            .fg_color(Some(AnsiColor::White.into()))
            .bg_color(Some(AnsiColor::Red.into()))
            .bold(),
    }
}

/// Writes messages to stdout, coloured by level when stdout is a terminal.
pub struct ConsoleSink {
    colored: bool,
    available: AtomicBool,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::with_colors(io::stdout().is_terminal())
    }

    pub fn with_colors(colored: bool) -> Self {
        Self {
            colored,
            available: AtomicBool::new(true),
        }
    }

    /// False once a write to stdout failed; the sink is silent from then on.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    fn write_line(&self, message: &Message) -> io::Result<()> {
        let mut out = io::stdout().lock();
        let header = LineHeader::of(message);
        if self.colored {
            let style = level_style(message.level());
            writeln!(
                out,
                "{}{header}{}{}",
                style.render(),
                message.text(),
                style.render_reset()
            )
        } else {
            writeln!(out, "{header}{}", message.text())
        }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for ConsoleSink {
    fn log_message(&self, message: &Message) {
        if !self.is_available() {
            return;
        }
        if self.write_line(message).is_err() {
            self.available.store(false, Ordering::Relaxed);
        }
    }

    fn flush(&self, _synchronous: bool) {
        if self.is_available() && io::stdout().flush().is_err() {
            self.available.store(false, Ordering::Relaxed);
        }
    }
}
