// SPDX-License-Identifier: Apache-2.0 OR MIT
//! High-throughput in-process logging engine.
//!
//! Producer threads hand records to a lock-free pool and a priority-ordered
//! worker pool formats and delivers them to sinks. See [`Manager`] for the
//! process-wide entry point, or wire a [`Logger`] to a [`RecordPool`] and
//! [`DispatchPool`] directly.

pub mod cow;
pub mod data;
pub mod dispatch;
pub mod error;
pub mod format;
pub mod hazard;
pub mod level;
pub mod logger;
mod macros;
pub mod manager;
pub mod pool;
pub mod record;
pub mod registry;
pub mod sink;
pub mod storage;

// Public exports
pub use cow::{CowList, ReadHandle};
pub use data::{FieldValue, StructuredData};
pub use dispatch::{default_worker_count, DispatchPool};
pub use error::{Error, Result};
pub use format::{
    CustomFormatter, Format, FormatKind, PatternFormatter, StructuredFormatter, StructuredOptions,
};
pub use hazard::{HazardDomain, HazardGuard};
pub use level::Level;
pub use logger::Logger;
pub use manager::{Manager, ManagerState, DEFAULT_SHUTDOWN_TIMEOUT};
pub use pool::{RecordPool, RecordRef};
pub use record::{Record, RecordState, SourceLocation};
pub use registry::Registry;
pub use sink::{
    ConsoleOptions, ConsoleSink, ConsoleTarget, FileOptions, FileSink, RotationRule,
    RotationTimeUnit, Sink,
};
pub use storage::{AtomicName, MessageStorage};
