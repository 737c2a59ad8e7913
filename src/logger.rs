// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logger: admission, record fill, enqueue, and the worker-side process path

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use arc_swap::ArcSwap;

use crate::cow::CowList;
use crate::data::StructuredData;
use crate::dispatch::DispatchPool;
use crate::error::Result;
use crate::format::Format;
use crate::hazard::HazardDomain;
use crate::level::Level;
use crate::pool::{RecordPool, RecordRef};
use crate::record::SourceLocation;
use crate::sink::Sink;
use crate::storage::MessageStorage;

/// A named log channel with its own threshold, formatter, and sink set.
///
/// Loggers are cheap to share (`Arc`); all configuration is safe to change
/// while other threads are logging through them.
pub struct Logger {
    name: Arc<str>,
    level: AtomicU8,
    format: ArcSwap<Format>,
    sinks: CowList<Arc<dyn Sink>>,
    dropped: AtomicU64,
    processed: AtomicU64,
    pool: Arc<RecordPool>,
    dispatch: Arc<DispatchPool>,
}

impl Logger {
    pub fn new(
        name: &str,
        level: Level,
        pool: Arc<RecordPool>,
        dispatch: Arc<DispatchPool>,
        domain: Arc<HazardDomain>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: Arc::from(name),
            level: AtomicU8::new(level.as_u8()),
            format: ArcSwap::from_pointee(Format::default()),
            sinks: CowList::with_domain(domain),
            dropped: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            pool,
            dispatch,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Log a message. Returns `false` without touching the pool when the
    /// message is empty or the level is not enabled; returns `false` and
    /// counts a drop when the record could not be acquired or enqueued.
    pub fn log(self: &Arc<Self>, msg: &str, level: Level, location: SourceLocation) -> bool {
        if msg.is_empty() || !self.is_level_enabled(level) {
            return false;
        }
        let Some(record) = self.fill(msg, level, location, None) else {
            return false;
        };
        self.enqueue(record, level)
    }

    /// Log a message with structured data copied onto the record
    pub fn log_with(
        self: &Arc<Self>,
        msg: &str,
        data: &StructuredData,
        level: Level,
        location: SourceLocation,
    ) -> bool {
        if msg.is_empty() || !self.is_level_enabled(level) {
            return false;
        }
        let Some(record) = self.fill(msg, level, location, Some(data)) else {
            return false;
        };
        self.enqueue(record, level)
    }

    fn fill(
        self: &Arc<Self>,
        msg: &str,
        level: Level,
        location: SourceLocation,
        data: Option<&StructuredData>,
    ) -> Option<RecordRef> {
        let Some(mut record) = self.pool.acquire() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let fields = record.record_mut();
        fields.timestamp = SystemTime::now();
        fields.level = level;
        fields.location = location;
        fields.storage = MessageStorage::new(msg);
        fields.logger = Some(Arc::clone(self));
        if let Some(data) = data {
            fields.data = data.clone();
        }
        Some(record)
    }

    fn enqueue(&self, record: RecordRef, level: Level) -> bool {
        if self.dispatch.enqueue(record, level.as_u8()) {
            self.processed.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Worker entry point: deliver `record` to every sink in the current
    /// snapshot, then release it back to the pool.
    pub(crate) fn process(&self, record: &RecordRef) {
        if record.is_active() {
            let format = self.format.load();
            if let Ok(sinks) = self.sinks.read_handle() {
                for sink in sinks.iter() {
                    // A failing sink counts its own error; siblings still run.
                    let _ = sink.emit(record, &format);
                }
            }
        }
        self.pool.release(record);
    }

    /// Ask every sink in the current snapshot to flush its buffers
    pub fn flush(&self) {
        if let Ok(sinks) = self.sinks.read_handle() {
            for sink in sinks.iter() {
                let _ = sink.flush();
            }
        }
    }

    pub fn register_sink(&self, sink: Arc<dyn Sink>) -> Result<()> {
        self.sinks.add(sink)
    }

    pub fn register_sinks(&self, sinks: &[Arc<dyn Sink>]) -> Result<()> {
        self.sinks.add_range(sinks)
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.estimated_len()
    }

    pub fn level(&self) -> Level {
        Level::from_u8(self.level.load(Ordering::Relaxed)).unwrap_or(Level::Off)
    }

    pub fn set_level(&self, level: Level) {
        self.level.store(level.as_u8(), Ordering::Relaxed);
    }

    pub fn is_level_enabled(&self, level: Level) -> bool {
        level.as_u8() >= self.level.load(Ordering::Acquire) && level < Level::Off
    }

    pub fn format(&self) -> Arc<Format> {
        self.format.load_full()
    }

    pub fn set_format(&self, format: Format) {
        self.format.store(Arc::new(format));
    }

    /// Records this logger could not hand to the pipeline
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Records this logger accepted onto the pipeline
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    #[track_caller]
    pub fn trace(self: &Arc<Self>, msg: &str) -> bool {
        self.log(msg, Level::Trace, SourceLocation::caller())
    }

    #[track_caller]
    pub fn debug(self: &Arc<Self>, msg: &str) -> bool {
        self.log(msg, Level::Debug, SourceLocation::caller())
    }

    #[track_caller]
    pub fn info(self: &Arc<Self>, msg: &str) -> bool {
        self.log(msg, Level::Info, SourceLocation::caller())
    }

    #[track_caller]
    pub fn warn(self: &Arc<Self>, msg: &str) -> bool {
        self.log(msg, Level::Warn, SourceLocation::caller())
    }

    #[track_caller]
    pub fn error(self: &Arc<Self>, msg: &str) -> bool {
        self.log(msg, Level::Error, SourceLocation::caller())
    }

    #[track_caller]
    pub fn fatal(self: &Arc<Self>, msg: &str) -> bool {
        self.log(msg, Level::Fatal, SourceLocation::caller())
    }

    #[track_caller]
    pub fn trace_with(self: &Arc<Self>, msg: &str, data: &StructuredData) -> bool {
        self.log_with(msg, data, Level::Trace, SourceLocation::caller())
    }

    #[track_caller]
    pub fn debug_with(self: &Arc<Self>, msg: &str, data: &StructuredData) -> bool {
        self.log_with(msg, data, Level::Debug, SourceLocation::caller())
    }

    #[track_caller]
    pub fn info_with(self: &Arc<Self>, msg: &str, data: &StructuredData) -> bool {
        self.log_with(msg, data, Level::Info, SourceLocation::caller())
    }

    #[track_caller]
    pub fn warn_with(self: &Arc<Self>, msg: &str, data: &StructuredData) -> bool {
        self.log_with(msg, data, Level::Warn, SourceLocation::caller())
    }

    #[track_caller]
    pub fn error_with(self: &Arc<Self>, msg: &str, data: &StructuredData) -> bool {
        self.log_with(msg, data, Level::Error, SourceLocation::caller())
    }

    #[track_caller]
    pub fn fatal_with(self: &Arc<Self>, msg: &str, data: &StructuredData) -> bool {
        self.log_with(msg, data, Level::Fatal, SourceLocation::caller())
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.name)
            .field("level", &self.level())
            .field("sinks", &self.sink_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    struct CollectingSink {
        entries: Mutex<Vec<(Level, String)>>,
    }

    impl CollectingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                entries: Mutex::new(Vec::new()),
            })
        }

        fn entries(&self) -> Vec<(Level, String)> {
            self.entries.lock().unwrap().clone()
        }
    }

    impl Sink for CollectingSink {
        fn emit(&self, record: &RecordRef, _format: &Format) -> Result<()> {
            self.entries
                .lock()
                .unwrap()
                .push((record.level(), record.message().to_string()));
            Ok(())
        }
    }

    fn pipeline() -> (Arc<RecordPool>, Arc<DispatchPool>, Arc<Logger>) {
        let pool = RecordPool::new();
        let dispatch = DispatchPool::new(1);
        let logger = Logger::new(
            "test",
            Level::Info,
            Arc::clone(&pool),
            Arc::clone(&dispatch),
            HazardDomain::new(),
        );
        (pool, dispatch, logger)
    }

    #[test]
    fn test_empty_message_rejected() {
        let (pool, dispatch, logger) = pipeline();
        assert!(!logger.log("", Level::Info, SourceLocation::caller()));
        assert_eq!(pool.size(), 0);
        dispatch.shutdown(true, Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn test_off_level_rejected() {
        let (pool, dispatch, logger) = pipeline();
        assert!(!logger.log("msg", Level::Off, SourceLocation::caller()));
        assert_eq!(pool.size(), 0);
        dispatch.shutdown(true, Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn test_below_threshold_does_not_allocate() {
        let (pool, dispatch, logger) = pipeline();
        logger.set_level(Level::Warn);

        assert!(!logger.log("quiet", Level::Info, SourceLocation::caller()));
        assert_eq!(pool.size(), 0);
        assert_eq!(logger.dropped(), 0);
        dispatch.shutdown(true, Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn test_is_level_enabled() {
        let (_pool, dispatch, logger) = pipeline();
        logger.set_level(Level::Warn);

        assert!(!logger.is_level_enabled(Level::Info));
        assert!(logger.is_level_enabled(Level::Warn));
        assert!(logger.is_level_enabled(Level::Fatal));
        assert!(!logger.is_level_enabled(Level::Off));
        dispatch.shutdown(true, Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn test_delivery_to_sink() {
        let (_pool, dispatch, logger) = pipeline();
        let sink = CollectingSink::new();
        logger.register_sink(sink.clone()).unwrap();

        assert!(logger.info("delivered"));
        dispatch.flush(Duration::from_secs(2)).unwrap();

        assert_eq!(sink.entries(), vec![(Level::Info, "delivered".to_string())]);
        assert_eq!(logger.processed(), 1);
        dispatch.shutdown(true, Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn test_structured_data_copied_onto_record() {
        let (_pool, dispatch, logger) = pipeline();

        struct FieldSink {
            seen: Mutex<Vec<String>>,
        }
        impl Sink for FieldSink {
            fn emit(&self, record: &RecordRef, _format: &Format) -> Result<()> {
                if let Some(crate::FieldValue::String(v)) = record.data().get("iface") {
                    self.seen.lock().unwrap().push(v.clone());
                }
                Ok(())
            }
        }
        let sink = Arc::new(FieldSink {
            seen: Mutex::new(Vec::new()),
        });
        logger.register_sink(sink.clone()).unwrap();

        let mut data = StructuredData::new();
        data.add("iface", "eth0");
        assert!(logger.info_with("link up", &data));
        dispatch.flush(Duration::from_secs(2)).unwrap();

        assert_eq!(sink.seen.lock().unwrap().as_slice(), &["eth0".to_string()]);
        // Caller keeps its own copy.
        assert!(data.has_field("iface"));
        dispatch.shutdown(true, Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn test_dropped_counter_on_pool_exhaustion() {
        let pool = RecordPool::bounded(2, 2);
        let dispatch = DispatchPool::new(1);
        let logger = Logger::new(
            "starved",
            Level::Trace,
            Arc::clone(&pool),
            Arc::clone(&dispatch),
            HazardDomain::new(),
        );

        let held: Vec<_> = (0..2).map(|_| pool.acquire().unwrap()).collect();
        assert!(!logger.info("no slots"));
        assert_eq!(logger.dropped(), 1);

        for record in &held {
            pool.release(record);
        }
        drop(held);
        dispatch.shutdown(true, Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn test_dropped_counter_after_shutdown() {
        let (_pool, dispatch, logger) = pipeline();
        dispatch.shutdown(true, Duration::from_secs(1)).unwrap();

        assert!(!logger.info("too late"));
        assert_eq!(logger.dropped(), 1);
    }
}
