// SPDX-License-Identifier: Apache-2.0 OR MIT
// Sink interface: terminal adapters fed by the dispatch workers

mod console;
mod file;

pub use console::{ConsoleOptions, ConsoleSink, ConsoleTarget};
pub use file::{FileOptions, FileSink, RotationRule, RotationTimeUnit};

use crate::error::Result;
use crate::format::Format;
use crate::pool::RecordRef;

/// A terminal output adapter (console, file, ...).
///
/// `emit` must be safe to call concurrently from any worker thread and must
/// not block indefinitely. A sink may clone the handed `RecordRef` to keep
/// the record alive past the call; the slot returns to the pool when the
/// last clone drops.
pub trait Sink: Send + Sync {
    /// Render `record` with `format` and write it out. Failures are counted
    /// by the sink and never abort the pipeline.
    fn emit(&self, record: &RecordRef, format: &Format) -> Result<()>;

    /// Flush buffered output
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
