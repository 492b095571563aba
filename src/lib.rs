//! # Slab Logger
//!
//! An asynchronous log message bus built around a bucketed slab allocator:
//!
//! * **Cheap producers**: a message is one slab block holding a header and its
//!   rendered text, taken from one of eight independently locked buckets
//! * **Asynchronous writes**: ordinary messages are written by a small worker
//!   pool; Error, Fatal and immediate categories are written on the caller
//! * **Explicit lifecycle**: a [`LoggerContext`] accumulates messages until
//!   it is started, then replays them in order
//!
//! ## Main Components
//!
//! * `LoggerContext`: process-wide state, the logging facade and its macros
//! * `low_level`: the swappable dispatchers (debugging, accumulating,
//!   background, dev-null)
//! * `UserLogger`: fan-out over the registered [`Sink`]s
//! * `slab`: the bucket ring the messages live in
//! * `SparseArray`: generation-checked slot container used for pages and sinks
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use slab_logger::{define_log_category, log_record, Level, LoggerConfig, LoggerContext, MemorySink};
//!
//! define_log_category!(LOG_NET, "Net");
//!
//! let context = LoggerContext::create(LoggerConfig::from_args(["-LOGNoAsync"]));
//! let memory = Arc::new(MemorySink::new());
//! context.register_logger(memory.clone(), false);
//! context.start().unwrap();
//!
//! log_record!(context, LOG_NET, Level::Info, "connected to {}", "10.0.0.1");
//! log_record!(context, LOG_NET, Level::Warning, "retrying in {} ms", 250);
//! context.flush(true);
//!
//! assert_eq!(memory.len(), 2);
//! context.shutdown().unwrap();
//! ```

pub mod bitmask;
pub mod category;
pub mod config;
pub mod context;
pub mod error;
pub mod log_bridge;
pub mod low_level;
pub mod message;
pub mod sinks;
pub mod site;
pub mod slab;
pub mod sparse_array;
pub mod task_pool;
pub mod user_logger;

pub use category::{CategoryFlags, Level, LogCategory, VerbosityMask, LOG_BRIDGE, LOG_GENERAL};
pub use config::LoggerConfig;
pub use context::{LoggerContext, LoggerStage};
pub use error::{LoggerError, Result};
pub use low_level::{LoggerKind, LowLevelLogger};
pub use message::{Message, MessageRef, Payload, Record, StructuredData};
pub use sinks::{ConsoleSink, FileSink, JsonSink, MemorySink, Sink, TraceSink};
pub use site::SiteInfo;
pub use slab::SlabAllocator;
pub use sparse_array::{SparseArray, SparseId};
pub use user_logger::{SinkId, UserLogger};

#[doc(hidden)]
pub use serde_json as __serde_json;
