use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::file::LogFile;
use super::Sink;
use crate::category::Level;
use crate::error::Result;
use crate::message::{Message, StructuredData};

/// One line of the JSON sink.
#[derive(Debug, Serialize)]
pub(crate) struct JsonRecord<'a> {
    pub timestamp: DateTime<Utc>,
    pub tid: u16,
    pub category: &'a str,
    pub severity: Level,
    pub message: &'a str,
    pub data: Option<&'a StructuredData>,
}

impl<'a> JsonRecord<'a> {
    pub(crate) fn of(message: &'a Message) -> Self {
        Self {
            timestamp: message.site().timestamp,
            tid: message.site().thread_hash,
            category: message.category().name(),
            severity: message.level(),
            message: message.text(),
            data: message.data(),
        }
    }
}

/// JSON-lines file sink: one compact object per message.
pub struct JsonSink {
    file: LogFile,
}

impl JsonSink {
    pub fn try_open(path: impl AsRef<Path>, roll_existing: bool) -> Result<Self> {
        LogFile::try_open(path, roll_existing).map(|file| Self { file })
    }

    pub fn open(path: impl AsRef<Path>, roll_existing: bool) -> Self {
        Self {
            file: LogFile::open(path, roll_existing),
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn is_open(&self) -> bool {
        self.file.is_open()
    }
}

impl Sink for JsonSink {
    fn log_message(&self, message: &Message) {
        let record = JsonRecord::of(message);
        self.file.write_with(|out| {
            serde_json::to_writer(&mut *out, &record)?;
            out.write_all(b"\n")
        });
    }

    fn flush(&self, synchronous: bool) {
        self.file.flush(synchronous);
    }

    fn close(&self) {
        self.file.close();
    }
}
