// SPDX-License-Identifier: Apache-2.0 OR MIT
// The record: the unit of work on the logging pipeline

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use crate::data::StructuredData;
use crate::level::Level;
use crate::logger::Logger;
use crate::storage::MessageStorage;

/// Record lifecycle states.
///
/// A slot moves `Pooled -> Active` on acquire, `Active -> Releasing` on
/// release, and `Releasing -> Pooled` when the last reference drops.
/// Transitions are single-step and monotone within one lifecycle.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// In the pool, not in use
    Pooled = 0,
    /// Filled and flowing through the pipeline
    Active = 1,
    /// Marked for release; references may still exist
    Releasing = 2,
}

impl RecordState {
    #[inline]
    pub(crate) const fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) const fn from_u8(value: u8) -> Self {
        match value {
            1 => RecordState::Active,
            2 => RecordState::Releasing,
            _ => RecordState::Pooled,
        }
    }
}

/// Call site captured when a record is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: &'static str,
    pub line: u32,
    /// Module path when captured by the `log_*!` macros; empty for the
    /// `#[track_caller]` convenience methods.
    pub function: &'static str,
}

impl SourceLocation {
    pub const fn new(file: &'static str, line: u32, function: &'static str) -> Self {
        Self {
            file,
            line,
            function,
        }
    }

    /// Capture the immediate caller's file and line
    #[track_caller]
    pub fn caller() -> Self {
        let location = std::panic::Location::caller();
        Self {
            file: location.file(),
            line: location.line(),
            function: "",
        }
    }
}

impl Default for SourceLocation {
    fn default() -> Self {
        Self::new("", 0, "")
    }
}

/// A single log event flowing through the pipeline.
///
/// Records live in pool-owned slots. Plain fields are written only while the
/// producer holds the sole reference (between acquire and enqueue) or during
/// finalize, when the last reference holder has exclusive access; workers
/// and sinks read them through shared references while the record is Active.
#[derive(Debug)]
pub struct Record {
    pub(crate) timestamp: SystemTime,
    pub(crate) level: Level,
    pub(crate) storage: MessageStorage,
    pub(crate) location: SourceLocation,
    pub(crate) logger: Option<Arc<Logger>>,
    pub(crate) data: StructuredData,
    pub(crate) ref_count: AtomicU32,
    pub(crate) state: AtomicU8,
}

impl Record {
    pub(crate) fn new() -> Self {
        Self {
            timestamp: SystemTime::UNIX_EPOCH,
            level: Level::Info,
            storage: MessageStorage::default(),
            location: SourceLocation::default(),
            logger: None,
            data: StructuredData::new(),
            ref_count: AtomicU32::new(0),
            state: AtomicU8::new(RecordState::Pooled.as_u8()),
        }
    }

    /// Wall-clock instant captured at `log()` time
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn level(&self) -> Level {
        self.level
    }

    /// Borrowed view over the message storage
    pub fn message(&self) -> &str {
        self.storage.view()
    }

    /// The owning logger's stable name, or "" when the record is pooled
    pub fn logger_name(&self) -> &str {
        self.logger.as_deref().map(Logger::name).unwrap_or("")
    }

    pub fn location(&self) -> SourceLocation {
        self.location
    }

    pub fn logger(&self) -> Option<&Arc<Logger>> {
        self.logger.as_ref()
    }

    pub fn data(&self) -> &StructuredData {
        &self.data
    }

    pub fn state(&self) -> RecordState {
        RecordState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.state() == RecordState::Active
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    /// Reset all payload fields for return to the pool. The state and
    /// reference count are stored by the pool with the orderings the slot
    /// handoff requires.
    pub(crate) fn reset(&mut self) {
        self.timestamp = SystemTime::UNIX_EPOCH;
        self.level = Level::Info;
        self.storage = MessageStorage::default();
        self.location = SourceLocation::default();
        self.logger = None;
        self.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_pooled() {
        let record = Record::new();
        assert_eq!(record.state(), RecordState::Pooled);
        assert_eq!(record.ref_count(), 0);
        assert_eq!(record.message(), "");
        assert_eq!(record.logger_name(), "");
    }

    #[test]
    fn test_reset_clears_payload() {
        let mut record = Record::new();
        record.level = Level::Error;
        record.storage = MessageStorage::new("boom");
        record.data.add("k", 1i64);

        record.reset();
        assert_eq!(record.level(), Level::Info);
        assert_eq!(record.message(), "");
        assert!(record.data().is_empty());
    }

    #[test]
    fn test_state_roundtrip() {
        assert_eq!(RecordState::from_u8(RecordState::Active.as_u8()), RecordState::Active);
        assert_eq!(RecordState::from_u8(RecordState::Releasing.as_u8()), RecordState::Releasing);
        assert_eq!(RecordState::from_u8(9), RecordState::Pooled);
    }

    #[test]
    fn test_caller_location() {
        let location = SourceLocation::caller();
        assert!(location.file.ends_with("record.rs"));
        assert!(location.line > 0);
    }
}
