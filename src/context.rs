//! Process-wide logger state, passed around explicitly.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::category::{CategoryFlags, Level, LogCategory, VerbosityMask};
use crate::config::LoggerConfig;
use crate::error::{LoggerError, Result};
use crate::low_level::{
    AccumulatingLogger, BackgroundLogger, DebuggingLogger, DevNullLogger, LoggerKind, LowLevelLogger,
};
use crate::message::{Payload, Record, StructuredData};
use crate::sinks::{ConsoleSink, FileSink, JsonSink, Sink, TraceSink};
use crate::site::{self, SiteInfo};
use crate::user_logger::{SinkId, UserLogger};

/// Called with the message text after a Fatal record has been flushed,
/// right before the process aborts.
pub type FatalHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Called after an Error or Warning record when breaking is requested.
pub type BreakHook = Arc<dyn Fn(Level, &str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggerStage {
    BeforeMain,
    Running,
    AfterMain,
}

/// Owner of the active [`LowLevelLogger`] and the sink composite.
///
/// Created once per process with [`create`](Self::create), moved to the
/// running state with [`start`](Self::start) and torn down with
/// [`shutdown`](Self::shutdown). Messages logged before `start` are kept and
/// replayed in order once the background dispatcher exists.
///
/// ```
/// use std::sync::Arc;
/// use slab_logger::{log_record, Level, LoggerConfig, LoggerContext, MemorySink, LOG_GENERAL};
///
/// let context = LoggerContext::create(LoggerConfig::default().with_debugger_attached(false));
/// let memory = Arc::new(MemorySink::new());
/// context.register_logger(memory.clone(), false);
///
/// log_record!(context, LOG_GENERAL, Level::Info, "before start");
/// context.start().unwrap();
/// log_record!(context, LOG_GENERAL, Level::Info, "after start {}", 1);
/// context.flush(true);
///
/// assert_eq!(memory.texts(), vec!["before start", "after start 1"]);
/// context.shutdown().unwrap();
/// ```
pub struct LoggerContext {
    config: LoggerConfig,
    debugger_attached: bool,
    active: RwLock<Arc<dyn LowLevelLogger>>,
    user: Arc<UserLogger>,
    stage: Mutex<LoggerStage>,
    verbosity: AtomicU32,
    fatal_hook: RwLock<Option<FatalHook>>,
    break_hook: RwLock<Option<BreakHook>>,
}

impl LoggerContext {
    /// Creates the context in the `BeforeMain` stage.
    ///
    /// With a debugger attached every record goes straight to stderr;
    /// otherwise records are accumulated until [`start`](Self::start).
    pub fn create(config: LoggerConfig) -> Arc<Self> {
        site::start_clock();
        let debugger_attached = config.is_debugger_attached();
        let initial: Arc<dyn LowLevelLogger> = if debugger_attached {
            Arc::new(DebuggingLogger::new())
        } else {
            Arc::new(AccumulatingLogger::new())
        };
        tracing::debug!(kind = ?initial.kind(), "logger context created");

        Arc::new(Self {
            config,
            debugger_attached,
            active: RwLock::new(initial),
            user: Arc::new(UserLogger::new()),
            stage: Mutex::new(LoggerStage::BeforeMain),
            verbosity: AtomicU32::new(VerbosityMask::ALL.bits()),
            fatal_hook: RwLock::new(None),
            break_hook: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    pub fn stage(&self) -> LoggerStage {
        *self.stage.lock()
    }

    /// Kind of the logger currently receiving records.
    pub fn active_kind(&self) -> LoggerKind {
        self.active.read_recursive().kind()
    }

    pub fn is_debugger_attached(&self) -> bool {
        self.debugger_attached
    }

    /// Registers the configured sinks and swaps in the background dispatcher,
    /// replaying everything logged so far.
    pub fn start(&self) -> Result<()> {
        let mut stage = self.stage.lock();
        match *stage {
            LoggerStage::BeforeMain => {}
            LoggerStage::Running => return Err(LoggerError::AlreadyStarted),
            LoggerStage::AfterMain => return Err(LoggerError::ShutDown),
        }

        for sink in self.default_sinks() {
            self.user.add(sink, true);
        }
        let next: Arc<dyn LowLevelLogger> =
            Arc::new(BackgroundLogger::new(&self.config, Arc::clone(&self.user)));
        self.swap(next);
        *stage = LoggerStage::Running;
        tracing::info!(
            asynchronous = self.config.asynchronous,
            sinks = self.user.len(),
            "logger started"
        );
        Ok(())
    }

    fn default_sinks(&self) -> Vec<Arc<dyn Sink>> {
        let config = &self.config;
        let mut sinks: Vec<Arc<dyn Sink>> = Vec::new();
        if let Some(path) = &config.log_file {
            if config.text_output {
                sinks.push(Arc::new(FileSink::open(path, config.roll_on_start)));
            } else {
                sinks.push(Arc::new(JsonSink::open(path, config.roll_on_start)));
            }
        }
        if config.console {
            sinks.push(Arc::new(ConsoleSink::new()));
        }
        if config.system_trace {
            sinks.push(Arc::new(TraceSink::new()));
        }
        sinks
    }

    /// Flushes and releases the dispatcher, then closes every sink.
    ///
    /// Later records go to stderr when a debugger is attached and nowhere
    /// otherwise.
    pub fn shutdown(&self) -> Result<()> {
        let mut stage = self.stage.lock();
        if *stage == LoggerStage::AfterMain {
            return Err(LoggerError::ShutDown);
        }

        self.flush(true);
        let terminal: Arc<dyn LowLevelLogger> = if self.debugger_attached {
            Arc::new(DebuggingLogger::new())
        } else {
            Arc::new(DevNullLogger::new())
        };
        self.swap(terminal);
        if !self.user.clear_within(self.config.flush_budget()) {
            tracing::warn!("sinks still busy at shutdown, left registered");
        }
        *stage = LoggerStage::AfterMain;
        tracing::info!("logger shut down");
        Ok(())
    }

    fn swap(&self, next: Arc<dyn LowLevelLogger>) {
        let previous = {
            let mut active = self.active.write();
            mem::replace(&mut *active, Arc::clone(&next))
        };
        tracing::debug!(from = ?previous.kind(), to = ?next.kind(), "swapping low-level logger");
        previous.on_release(&next);
    }

    pub fn flush(&self, synchronous: bool) {
        self.active.read_recursive().flush(synchronous);
    }

    /// Adds a sink to the composite. With `auto_delete` the context owns it
    /// and closes it on removal or shutdown.
    pub fn register_logger(&self, sink: Arc<dyn Sink>, auto_delete: bool) -> SinkId {
        self.user.add(sink, auto_delete)
    }

    pub fn unregister_logger(&self, id: SinkId) -> Option<Arc<dyn Sink>> {
        self.user.remove(id)
    }

    pub fn sink_count(&self) -> usize {
        self.user.len()
    }

    /// Filter applied on top of every category's own verbosity.
    pub fn set_global_verbosity(&self, mask: VerbosityMask) {
        self.verbosity.store(mask.bits(), Ordering::Relaxed);
    }

    pub fn global_verbosity(&self) -> VerbosityMask {
        VerbosityMask::from_bits_truncate(self.verbosity.load(Ordering::Relaxed))
    }

    /// Whether a record of `level` in `category` gets through. Fatal always does.
    pub fn is_enabled(&self, category: &LogCategory, level: Level) -> bool {
        level == Level::Fatal || (category.allows(level) && self.global_verbosity().allows(level))
    }

    /// Replaces the action taken after a Fatal record is flushed. The process
    /// aborts once the hook returns.
    pub fn set_fatal_hook<F>(&self, hook: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.fatal_hook.write() = Some(Arc::new(hook));
    }

    pub fn set_break_hook<F>(&self, hook: F)
    where
        F: Fn(Level, &str) + Send + Sync + 'static,
    {
        *self.break_hook.write() = Some(Arc::new(hook));
    }

    fn should_break(&self, category: &LogCategory, level: Level) -> bool {
        let flags = category.flags();
        let on_error = self.config.break_on_error || flags.contains(CategoryFlags::BREAK_ON_ERROR);
        let on_warning =
            self.config.break_on_warning || flags.contains(CategoryFlags::BREAK_ON_WARNING);
        match level {
            Level::Error => on_error || on_warning,
            Level::Warning => on_warning,
            _ => false,
        }
    }

    /// Logs one record through the active logger.
    pub fn log(&self, record: Record<'_>) {
        let category = record.category;
        let level = record.level;
        if !self.is_enabled(category, level) {
            return;
        }

        let fatal = level == Level::Fatal;
        let breaking = !fatal && self.should_break(category, level);
        let text = (fatal || breaking).then(|| record.text());

        self.active.read_recursive().log(record);

        if let Some(text) = text {
            if fatal {
                self.on_fatal(&text);
            }
            self.on_break(level, &text);
        }
    }

    fn on_fatal(&self, text: &str) -> ! {
        self.flush(true);
        let hook = self.fatal_hook.read().clone();
        if let Some(hook) = hook {
            hook(text);
        }
        std::process::abort()
    }

    fn on_break(&self, level: Level, text: &str) {
        self.flush(true);
        let hook = self.break_hook.read().clone();
        match hook {
            Some(hook) => hook(level, text),
            None if self.debugger_attached => {
                tracing::warn!(%level, message = text, "break requested by log record");
            }
            None => {}
        }
    }

    pub fn log_static(&self, category: &'static LogCategory, level: Level, site: SiteInfo, text: &'static str) {
        self.log(Record {
            category,
            level,
            site,
            payload: Payload::Static(text),
        });
    }

    /// Logs a copy of `text`.
    pub fn log_text(&self, category: &'static LogCategory, level: Level, site: SiteInfo, text: &str) {
        self.log(Record {
            category,
            level,
            site,
            payload: Payload::Text(text),
        });
    }

    pub fn log_fmt(&self, category: &'static LogCategory, level: Level, site: SiteInfo, args: fmt::Arguments<'_>) {
        self.log(Record {
            category,
            level,
            site,
            payload: Payload::Args(args),
        });
    }

    pub fn log_structured(
        &self,
        category: &'static LogCategory,
        level: Level,
        site: SiteInfo,
        text: fmt::Arguments<'_>,
        data: StructuredData,
    ) {
        self.log(Record {
            category,
            level,
            site,
            payload: Payload::Structured { text, data },
        });
    }

    /// Logs a `{name}` template; `fields` fill the placeholders and travel
    /// with the message as structured data.
    pub fn log_record_args(
        &self,
        category: &'static LogCategory,
        level: Level,
        site: SiteInfo,
        template: &str,
        fields: StructuredData,
    ) {
        self.log(Record {
            category,
            level,
            site,
            payload: Payload::Template { template, fields },
        });
    }
}

impl Drop for LoggerContext {
    fn drop(&mut self) {
        if *self.stage.get_mut() != LoggerStage::AfterMain {
            let _ = self.shutdown();
        }
    }
}

impl fmt::Debug for LoggerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggerContext")
            .field("stage", &self.stage())
            .field("active", &self.active_kind())
            .field("sinks", &self.sink_count())
            .field("verbosity", &self.global_verbosity())
            .finish()
    }
}

/// Logs a formatted message through a [`LoggerContext`].
///
/// The call site is only captured when the record passes the filters.
///
/// ```
/// # use slab_logger::{log_record, Level, LoggerConfig, LoggerContext, LOG_GENERAL};
/// let context = LoggerContext::create(LoggerConfig::default());
/// log_record!(context, LOG_GENERAL, Level::Warning, "disk at {}%", 93);
/// ```
#[macro_export]
macro_rules! log_record {
    ($ctx:expr, $category:expr, $level:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        let category: &'static $crate::LogCategory = &$category;
        let level: $crate::Level = $level;
        if ctx.is_enabled(category, level) {
            ctx.log_fmt(category, level, $crate::site!(), ::std::format_args!($($arg)+));
        }
    }};
}

/// Logs a formatted message with a JSON object attached.
///
/// ```
/// # use slab_logger::{log_structured, Level, LoggerConfig, LoggerContext, LOG_GENERAL};
/// let context = LoggerContext::create(LoggerConfig::default());
/// log_structured!(context, LOG_GENERAL, Level::Info, { "user": "ana", "retries": 2 }, "login ok");
/// ```
#[macro_export]
macro_rules! log_structured {
    ($ctx:expr, $category:expr, $level:expr, $data:tt, $($arg:tt)+) => {{
        let ctx = &$ctx;
        let category: &'static $crate::LogCategory = &$category;
        let level: $crate::Level = $level;
        if ctx.is_enabled(category, level) {
            let data = match $crate::__serde_json::json!($data) {
                $crate::__serde_json::Value::Object(map) => map,
                other => {
                    let mut map = $crate::StructuredData::new();
                    map.insert(::std::string::String::from("value"), other);
                    map
                }
            };
            ctx.log_structured(category, level, $crate::site!(), ::std::format_args!($($arg)+), data);
        }
    }};
}
