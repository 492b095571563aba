use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Local};
use parking_lot::Mutex;

use super::{write_text_line, LineHeader, Sink};
use crate::error::{LoggerError, Result};
use crate::message::Message;

const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Name an existing log file is moved to when rolling:
/// `<stem>-<YYYY.MM.DD-HH.MM.SS><.ext>`.
pub fn rolled_path(path: &Path, at: DateTime<Local>) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stamp = at.format("%Y.%m.%d-%H.%M.%S");
    let name = match path.extension() {
        Some(ext) => format!("{stem}-{stamp}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{stamp}"),
    };
    path.with_file_name(name)
}

/// `base` with `_<attempt>` inserted before the extension, if it has one.
/// The stamp contains dots, so a name without extension is kept whole.
fn numbered_path(base: &Path, has_extension: bool, attempt: u32) -> PathBuf {
    let whole = if has_extension { base.file_stem() } else { base.file_name() };
    let mut name = whole.unwrap_or_default().to_os_string();
    name.push(format!("_{attempt}"));
    if let Some(ext) = base.extension().filter(|_| has_extension) {
        name.push(".");
        name.push(ext);
    }
    base.with_file_name(name)
}

fn roll(path: &Path) -> Result<()> {
    let base = rolled_path(path, Local::now());
    let mut target = base.clone();
    let mut attempt = 1;
    while target.exists() {
        target = numbered_path(&base, path.extension().is_some(), attempt);
        attempt += 1;
    }
    fs::rename(path, &target).map_err(|source| LoggerError::Roll {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(from = %path.display(), to = %target.display(), "rolled log file");
    Ok(())
}

/// Buffered append-only log file shared by the text and JSON sinks.
///
/// Opening failures are reported by the constructor. Write failures are
/// reported once; after that the file keeps swallowing output.
pub(crate) struct LogFile {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
    write_failed: AtomicBool,
}

impl LogFile {
    pub(crate) fn try_open(path: impl AsRef<Path>, roll_existing: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| LoggerError::Open {
                path: path.clone(),
                source,
            })?;
        }
        if roll_existing && path.exists() {
            roll(&path)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| LoggerError::Open {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            writer: Mutex::new(Some(BufWriter::with_capacity(WRITE_BUFFER_SIZE, file))),
            write_failed: AtomicBool::new(false),
        })
    }

    /// Like `try_open`, but a failure leaves an inert file behind.
    pub(crate) fn open(path: impl AsRef<Path>, roll_existing: bool) -> Self {
        let path = path.as_ref();
        match Self::try_open(path, roll_existing) {
            Ok(file) => file,
            Err(err) => {
                tracing::error!(error = %err, "log file sink disabled");
                Self {
                    path: path.to_path_buf(),
                    writer: Mutex::new(None),
                    write_failed: AtomicBool::new(true),
                }
            }
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn is_open(&self) -> bool {
        self.writer.lock().is_some()
    }

    pub(crate) fn write_with<F>(&self, f: F)
    where
        F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
    {
        let mut guard = self.writer.lock();
        let Some(writer) = guard.as_mut() else {
            return;
        };
        if let Err(err) = f(writer) {
            self.report(err);
        }
    }

    pub(crate) fn flush(&self, synchronous: bool) {
        let mut guard = self.writer.lock();
        let Some(writer) = guard.as_mut() else {
            return;
        };
        let result = writer.flush().and_then(|()| {
            if synchronous {
                writer.get_ref().sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(err) = result {
            self.report(err);
        }
    }

    pub(crate) fn close(&self) {
        self.flush(true);
        self.writer.lock().take();
    }

    fn report(&self, err: io::Error) {
        if !self.write_failed.swap(true, Ordering::Relaxed) {
            tracing::warn!(path = %self.path.display(), error = %err, "writing to log file failed");
        }
    }
}

/// Plain-text file sink.
///
/// Each message becomes one line:
/// `[elapsed][thread][level][category] text`.
pub struct FileSink {
    file: LogFile,
}

impl FileSink {
    /// Opens (appending) the file at `path`, moving an existing file out of
    /// the way first when `roll_existing` is set.
    pub fn try_open(path: impl AsRef<Path>, roll_existing: bool) -> Result<Self> {
        LogFile::try_open(path, roll_existing).map(|file| Self { file })
    }

    /// Opens the file, reporting a failure once and writing nothing after it.
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

impl Sink for FileSink {
    fn log_message(&self, message: &Message) {
        let header = LineHeader::of(message);
        self.file
            .write_with(|out| write_text_line(out, &header, message.text()));
    }

    fn flush(&self, synchronous: bool) {
        self.file.flush(synchronous);
    }

    fn close(&self) {
        self.file.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_rolled_path() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(
            rolled_path(Path::new("logs/game.log"), at),
            PathBuf::from("logs/game-2024.03.09-07.05.01.log")
        );
        assert_eq!(
            rolled_path(Path::new("trace"), at),
            PathBuf::from("trace-2024.03.09-07.05.01")
        );
    }

    #[test]
    fn test_numbered_path_keeps_the_stamp() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let with_ext = rolled_path(Path::new("logs/game.log"), at);
        assert_eq!(
            numbered_path(&with_ext, true, 2),
            PathBuf::from("logs/game-2024.03.09-07.05.01_2.log")
        );
        let bare = rolled_path(Path::new("trace"), at);
        assert_eq!(
            numbered_path(&bare, false, 1),
            PathBuf::from("trace-2024.03.09-07.05.01_1")
        );
    }

    #[test]
    fn test_open_failure_is_inert() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for appending.
        let sink = FileSink::open(dir.path(), false);
        assert!(!sink.is_open());
        sink.flush(true);
        sink.close();
    }
}
