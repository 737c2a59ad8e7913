// File sink with size- and time-based rotation

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::Sink;
use crate::error::Result;
use crate::format::Format;
use crate::pool::RecordRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RotationRule {
    /// Rotation disabled even when `enable_rotation` is set
    None,
    /// Rotate when the live file reaches `max_file_size`
    #[default]
    Size,
    /// Rotate every `time_value` `time_unit`s
    Time,
    /// Rotate on whichever of size or time triggers first
    SizeAndTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RotationTimeUnit {
    Minute,
    Hour,
    #[default]
    Day,
    Week,
    Month,
    Year,
}

impl RotationTimeUnit {
    const fn seconds(self) -> u64 {
        match self {
            RotationTimeUnit::Minute => 60,
            RotationTimeUnit::Hour => 3_600,
            RotationTimeUnit::Day => 86_400,
            RotationTimeUnit::Week => 7 * 86_400,
            RotationTimeUnit::Month => 30 * 86_400,
            RotationTimeUnit::Year => 365 * 86_400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOptions {
    pub path: PathBuf,
    /// Create the parent directory if it does not exist
    pub create_dir: bool,
    pub truncate_on_open: bool,
    /// Flush after every write
    pub auto_flush: bool,
    pub buffer_size: usize,
    pub enable_rotation: bool,
    pub rotation_rule: RotationRule,
    pub max_file_size: u64,
    pub time_unit: RotationTimeUnit,
    pub time_value: u32,
    /// Rotated files kept before the oldest are pruned
    pub max_files: u32,
}

impl FileOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            create_dir: true,
            truncate_on_open: false,
            auto_flush: false,
            buffer_size: 8192,
            enable_rotation: false,
            rotation_rule: RotationRule::Size,
            max_file_size: 10 * 1024 * 1024,
            time_unit: RotationTimeUnit::Day,
            time_value: 1,
            max_files: 5,
        }
    }

    pub fn with_rotation(mut self, rule: RotationRule) -> Self {
        self.enable_rotation = true;
        self.rotation_rule = rule;
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn with_time_rotation(mut self, unit: RotationTimeUnit, value: u32) -> Self {
        self.time_unit = unit;
        self.time_value = value;
        self
    }

    pub fn with_max_files(mut self, count: u32) -> Self {
        self.max_files = count;
        self
    }

    pub fn with_auto_flush(mut self, enabled: bool) -> Self {
        self.auto_flush = enabled;
        self
    }

    pub fn with_truncate(mut self, enabled: bool) -> Self {
        self.truncate_on_open = enabled;
        self
    }
}

struct FileState {
    writer: BufWriter<File>,
    current_size: u64,
    opened_at: SystemTime,
}

/// Buffered file sink with optional rotation.
///
/// Rotated files are named `{basename}.{timestamp}.{ext}` next to the live
/// file; the oldest are pruned past `max_files`.
pub struct FileSink {
    options: FileOptions,
    state: Mutex<FileState>,
    errors: AtomicU64,
}

impl FileSink {
    pub fn new(options: FileOptions) -> Result<Self> {
        if options.create_dir {
            if let Some(parent) = options.path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
        }

        let file = Self::open_live(&options, options.truncate_on_open)?;
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            state: Mutex::new(FileState {
                writer: BufWriter::with_capacity(options.buffer_size, file),
                current_size,
                opened_at: SystemTime::now(),
            }),
            options,
            errors: AtomicU64::new(0),
        })
    }

    fn open_live(options: &FileOptions, truncate: bool) -> std::io::Result<File> {
        let mut open = OpenOptions::new();
        open.create(true).write(true);
        if truncate {
            open.truncate(true);
        } else {
            open.append(true);
        }
        open.open(&options.path)
    }

    pub fn options(&self) -> &FileOptions {
        &self.options
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.options.time_unit.seconds() * u64::from(self.options.time_value.max(1)))
    }

    /// Size and time triggers apply independently; each requires rotation
    /// to be enabled AND the rule to cover it.
    fn should_rotate(&self, state: &FileState) -> bool {
        if !self.options.enable_rotation {
            return false;
        }
        let by_size = matches!(
            self.options.rotation_rule,
            RotationRule::Size | RotationRule::SizeAndTime
        ) && state.current_size >= self.options.max_file_size;

        let by_time = matches!(
            self.options.rotation_rule,
            RotationRule::Time | RotationRule::SizeAndTime
        ) && state
            .opened_at
            .elapsed()
            .map(|elapsed| elapsed >= self.rotation_interval())
            .unwrap_or(false);

        by_size || by_time
    }

    fn rotate(&self, state: &mut FileState) -> Result<()> {
        state.writer.flush()?;

        let stamp: DateTime<Local> = SystemTime::now().into();
        let rotated = self.rotated_path(&stamp.format("%Y%m%d-%H%M%S%.3f").to_string());
        fs::rename(&self.options.path, &rotated)?;

        let file = Self::open_live(&self.options, true)?;
        state.writer = BufWriter::with_capacity(self.options.buffer_size, file);
        state.current_size = 0;
        state.opened_at = SystemTime::now();

        self.prune_rotated();
        Ok(())
    }

    fn rotated_path(&self, stamp: &str) -> PathBuf {
        let stem = self
            .options
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("log");
        let name = match self.options.path.extension().and_then(|s| s.to_str()) {
            Some(ext) => format!("{stem}.{stamp}.{ext}"),
            None => format!("{stem}.{stamp}"),
        };
        self.options.path.with_file_name(name)
    }

    /// Keep the newest `max_files` rotated files; zero disables pruning
    fn prune_rotated(&self) {
        if self.options.max_files == 0 {
            return;
        }
        let Some(dir) = self.options.path.parent() else {
            return;
        };
        let dir = if dir.as_os_str().is_empty() {
            std::path::Path::new(".")
        } else {
            dir
        };
        let stem = self
            .options
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("log");
        let live_name = self.options.path.file_name();
        let prefix = format!("{stem}.");

        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        let mut rotated: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.file_name() != live_name)
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(&prefix))
                    .unwrap_or(false)
            })
            .collect();

        // Timestamped names sort chronologically.
        rotated.sort();
        while rotated.len() > self.options.max_files as usize {
            let _ = fs::remove_file(rotated.remove(0));
        }
    }
}

impl Sink for FileSink {
    fn emit(&self, record: &RecordRef, format: &Format) -> Result<()> {
        let line = format.format(record);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let write = (|| -> Result<()> {
            if self.should_rotate(&state) {
                self.rotate(&mut state)?;
            }
            state.writer.write_all(line.as_bytes())?;
            state.writer.write_all(b"\n")?;
            state.current_size += line.len() as u64 + 1;
            if self.options.auto_flush {
                state.writer.flush()?;
            }
            Ok(())
        })();

        if write.is_err() {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        write
    }

    fn flush(&self) -> Result<()> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .writer
            .flush()
            .map_err(|e| {
                self.errors.fetch_add(1, Ordering::Relaxed);
                e.into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::RecordPool;
    use crate::storage::MessageStorage;

    fn record_ref_for(msg: &str) -> RecordRef {
        let pool = RecordPool::new();
        let mut record = pool.acquire().unwrap();
        record.record_mut().storage = MessageStorage::new(msg);
        record
    }

    fn message_only_format() -> Format {
        let mut format = Format::default();
        format.pattern_mut().set_pattern("{message}");
        format
    }

    #[test]
    fn test_write_and_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let sink = FileSink::new(FileOptions::new(&path)).unwrap();
        let format = message_only_format();

        sink.emit(&record_ref_for("first"), &format).unwrap();
        sink.emit(&record_ref_for("second"), &format).unwrap();
        sink.flush().unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "first\nsecond\n");
        assert_eq!(sink.error_count(), 0);
    }

    #[test]
    fn test_append_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        fs::write(&path, "existing\n").unwrap();

        let sink = FileSink::new(FileOptions::new(&path)).unwrap();
        sink.emit(&record_ref_for("appended"), &message_only_format())
            .unwrap();
        sink.flush().unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "existing\nappended\n");
    }

    #[test]
    fn test_truncate_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        fs::write(&path, "stale\n").unwrap();

        let sink = FileSink::new(FileOptions::new(&path).with_truncate(true)).unwrap();
        sink.emit(&record_ref_for("fresh"), &message_only_format())
            .unwrap();
        sink.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "fresh\n");
    }

    #[test]
    fn test_size_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rotating.log");
        let sink = FileSink::new(
            FileOptions::new(&path)
                .with_rotation(RotationRule::Size)
                .with_max_file_size(32)
                .with_auto_flush(true),
        )
        .unwrap();
        let format = message_only_format();

        for i in 0..8 {
            sink.emit(&record_ref_for(&format!("line number {i} padding")), &format)
                .unwrap();
        }
        sink.flush().unwrap();

        let rotated: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name() != "rotating.log")
            .collect();
        assert!(!rotated.is_empty(), "expected at least one rotated file");

        // The live file was reopened below the size limit at least once.
        let live = fs::metadata(&path).unwrap().len();
        assert!(live < 32 * 8);
    }

    #[test]
    fn test_rotation_disabled_without_enable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.log");
        let mut options = FileOptions::new(&path).with_max_file_size(8);
        options.rotation_rule = RotationRule::Size;
        // enable_rotation stays false.
        let sink = FileSink::new(options).unwrap();
        let format = message_only_format();

        for _ in 0..4 {
            sink.emit(&record_ref_for("a long enough line"), &format)
                .unwrap();
        }
        sink.flush().unwrap();

        let others: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name() != "plain.log")
            .collect();
        assert!(others.is_empty());
    }

    #[test]
    fn test_rule_none_never_rotates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("none.log");
        let mut options = FileOptions::new(&path).with_rotation(RotationRule::None);
        options.max_file_size = 8;
        let sink = FileSink::new(options).unwrap();
        let format = message_only_format();

        for _ in 0..4 {
            sink.emit(&record_ref_for("a long enough line"), &format)
                .unwrap();
        }
        sink.flush().unwrap();

        let others: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name() != "none.log")
            .collect();
        assert!(others.is_empty());
    }

    #[test]
    fn test_prune_keeps_max_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pruned.log");
        let sink = FileSink::new(
            FileOptions::new(&path)
                .with_rotation(RotationRule::Size)
                .with_max_file_size(1)
                .with_max_files(2)
                .with_auto_flush(true),
        )
        .unwrap();
        let format = message_only_format();

        for i in 0..8 {
            sink.emit(&record_ref_for(&format!("entry {i}")), &format)
                .unwrap();
            // Distinct rotation stamps.
            std::thread::sleep(Duration::from_millis(5));
        }
        sink.flush().unwrap();

        let rotated: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name() != "pruned.log")
            .collect();
        assert!(rotated.len() <= 2, "kept {} rotated files", rotated.len());
    }

    #[test]
    fn test_zero_max_files_disables_pruning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unpruned.log");
        let sink = FileSink::new(
            FileOptions::new(&path)
                .with_rotation(RotationRule::Size)
                .with_max_file_size(1)
                .with_max_files(0)
                .with_auto_flush(true),
        )
        .unwrap();
        let format = message_only_format();

        for i in 0..6 {
            sink.emit(&record_ref_for(&format!("entry {i}")), &format)
                .unwrap();
            std::thread::sleep(Duration::from_millis(5));
        }
        sink.flush().unwrap();

        // Every rotation after the first writes a rotated file; none are
        // removed.
        let rotated: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name() != "unpruned.log")
            .collect();
        assert!(rotated.len() >= 4, "found {} rotated files", rotated.len());
    }

    #[test]
    fn test_create_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deep/out.log");
        let sink = FileSink::new(FileOptions::new(&path)).unwrap();
        sink.emit(&record_ref_for("created"), &message_only_format())
            .unwrap();
        sink.flush().unwrap();
        assert!(path.exists());
    }
}
