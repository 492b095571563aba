use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::slab::DEFAULT_SLAB_SIZE;

/// Startup options of a [`LoggerContext`](crate::LoggerContext).
///
/// Defaults match a release build: asynchronous dispatch on, no break hooks,
/// JSON file output when a log file is configured.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Hand non-critical messages to the background pool.
    pub asynchronous: bool,
    pub break_on_error: bool,
    pub break_on_warning: bool,
    /// Write the log file as plain text instead of JSON lines.
    pub text_output: bool,
    pub worker_threads: usize,
    pub slab_size: usize,
    /// How many times a synchronous flush waits on the pool.
    pub flush_retries: u32,
    pub flush_retry_interval: Duration,
    /// `None` detects a tracer at startup.
    pub debugger_attached: Option<bool>,
    pub log_file: Option<PathBuf>,
    pub roll_on_start: bool,
    pub console: bool,
    pub system_trace: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            asynchronous: true,
            break_on_error: false,
            break_on_warning: false,
            text_output: false,
            worker_threads: 2,
            slab_size: DEFAULT_SLAB_SIZE,
            flush_retries: 5,
            flush_retry_interval: Duration::from_millis(500),
            debugger_attached: None,
            log_file: None,
            roll_on_start: false,
            console: false,
            system_trace: false,
        }
    }
}

impl LoggerConfig {
    /// Applies the `-LOG*` switches found in `args` on top of the defaults.
    ///
    /// Recognised (case-insensitive): `-LOGBreakOnError`, `-LOGBreakOnWarning`,
    /// `-LOGTxt`, `-LOGAsync`, `-LOGNoAsync`. Everything else is ignored.
    ///
    /// ```
    /// # use slab_logger::LoggerConfig;
    /// let config = LoggerConfig::from_args(["game", "-LOGTxt", "-lognoasync", "-windowed"]);
    /// assert!(config.text_output);
    /// assert!(!config.asynchronous);
    /// ```
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::default().with_args(args)
    }

    /// [`from_args`](Self::from_args) over the process command line.
    pub fn from_env() -> Self {
        Self::from_args(std::env::args())
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            let arg = arg.as_ref();
            if arg.eq_ignore_ascii_case("-LOGBreakOnError") {
                self.break_on_error = true;
            } else if arg.eq_ignore_ascii_case("-LOGBreakOnWarning") {
                self.break_on_warning = true;
            } else if arg.eq_ignore_ascii_case("-LOGTxt") {
                self.text_output = true;
            } else if arg.eq_ignore_ascii_case("-LOGAsync") {
                self.asynchronous = true;
            } else if arg.eq_ignore_ascii_case("-LOGNoAsync") {
                self.asynchronous = false;
            }
        }
        self
    }

    pub fn with_asynchronous(mut self, asynchronous: bool) -> Self {
        self.asynchronous = asynchronous;
        self
    }

    pub fn with_worker_threads(mut self, workers: usize) -> Self {
        self.worker_threads = workers;
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>, roll_on_start: bool) -> Self {
        self.log_file = Some(path.into());
        self.roll_on_start = roll_on_start;
        self
    }

    pub fn with_text_output(mut self, text_output: bool) -> Self {
        self.text_output = text_output;
        self
    }

    pub fn with_console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }

    pub fn with_system_trace(mut self, system_trace: bool) -> Self {
        self.system_trace = system_trace;
        self
    }

    pub fn with_debugger_attached(mut self, attached: bool) -> Self {
        self.debugger_attached = Some(attached);
        self
    }

    pub fn with_flush_retries(mut self, retries: u32, interval: Duration) -> Self {
        self.flush_retries = retries;
        self.flush_retry_interval = interval;
        self
    }

    /// Longest a synchronous flush waits on background tasks.
    pub fn flush_budget(&self) -> Duration {
        self.flush_retry_interval * self.flush_retries
    }

    pub fn with_break_on(mut self, error: bool, warning: bool) -> Self {
        self.break_on_error = error;
        self.break_on_warning = warning;
        self
    }

    /// Resolved debugger state.
    pub fn is_debugger_attached(&self) -> bool {
        self.debugger_attached.unwrap_or_else(debugger_present)
    }
}

/// Checks whether a tracer is attached to this process.
///
/// Linux reports the tracer in `/proc/self/status`; other platforms answer no.
pub fn debugger_present() -> bool {
    fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| {
            status
                .lines()
                .find_map(|line| line.strip_prefix("TracerPid:"))
                .and_then(|pid| pid.trim().parse::<u32>().ok())
        })
        .is_some_and(|pid| pid != 0)
}
