use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::{format_text_line, Sink};
use crate::category::Level;
use crate::message::{Message, StructuredData};

/// A message as seen by a [`MemorySink`].
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedMessage {
    pub category: &'static str,
    pub level: Level,
    pub text: String,
    pub line: String,
    pub data: Option<StructuredData>,
}

/// Keeps every message it receives in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: Mutex<Vec<CapturedMessage>>,
    flushes: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<CapturedMessage> {
        self.messages.lock().clone()
    }

    /// Just the texts, in arrival order.
    pub fn texts(&self) -> Vec<String> {
        self.messages.lock().iter().map(|m| m.text.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, text: &str) -> bool {
        self.messages.lock().iter().any(|m| m.text == text)
    }

    /// Number of flush calls received.
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

impl Sink for MemorySink {
    fn log_message(&self, message: &Message) {
        let captured = CapturedMessage {
            category: message.category().name(),
            level: message.level(),
            text: message.text().to_owned(),
            line: format_text_line(message),
            data: message.data().cloned(),
        };
        self.messages.lock().push(captured);
    }

    fn flush(&self, _synchronous: bool) {
        self.flushes.fetch_add(1, Ordering::AcqRel);
    }
}
