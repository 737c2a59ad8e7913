// Console sink with optional per-level coloring

use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::Sink;
use crate::error::Result;
use crate::format::Format;
use crate::level::Level;
use crate::pool::RecordRef;

const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConsoleTarget {
    #[default]
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleOptions {
    pub target: ConsoleTarget,
    /// Color by level when the target stream is a terminal
    pub color: bool,
    /// Rendered lines longer than this are truncated
    pub max_line_length: usize,
}

impl Default for ConsoleOptions {
    fn default() -> Self {
        Self {
            target: ConsoleTarget::Stdout,
            color: true,
            max_line_length: 16384,
        }
    }
}

enum ConsoleStream {
    Stdout(io::Stdout),
    Stderr(io::Stderr),
}

impl Write for ConsoleStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ConsoleStream::Stdout(s) => s.write(buf),
            ConsoleStream::Stderr(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ConsoleStream::Stdout(s) => s.flush(),
            ConsoleStream::Stderr(s) => s.flush(),
        }
    }
}

/// Writes rendered records to stdout or stderr.
///
/// Terminal detection happens once at construction; workers contend only on
/// the short write lock.
pub struct ConsoleSink {
    options: ConsoleOptions,
    stream: Mutex<ConsoleStream>,
    is_terminal: bool,
    errors: AtomicU64,
}

impl ConsoleSink {
    pub fn new(options: ConsoleOptions) -> Self {
        let (stream, is_terminal) = match options.target {
            ConsoleTarget::Stdout => {
                let stdout = io::stdout();
                let is_terminal = stdout.is_terminal();
                (ConsoleStream::Stdout(stdout), is_terminal)
            }
            ConsoleTarget::Stderr => {
                let stderr = io::stderr();
                let is_terminal = stderr.is_terminal();
                (ConsoleStream::Stderr(stderr), is_terminal)
            }
        };

        Self {
            options,
            stream: Mutex::new(stream),
            is_terminal,
            errors: AtomicU64::new(0),
        }
    }

    pub fn stdout() -> Self {
        Self::new(ConsoleOptions::default())
    }

    pub fn stderr() -> Self {
        Self::new(ConsoleOptions {
            target: ConsoleTarget::Stderr,
            ..ConsoleOptions::default()
        })
    }

    pub fn options(&self) -> &ConsoleOptions {
        &self.options
    }

    /// Emit failures observed so far
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    const fn color_code(level: Level) -> &'static str {
        match level {
            Level::Trace => "\x1b[90m",
            Level::Debug => "\x1b[36m",
            Level::Info => "\x1b[32m",
            Level::Warn => "\x1b[33m",
            Level::Error => "\x1b[31m",
            Level::Fatal => "\x1b[1;31m",
            Level::Off => "",
        }
    }
}

impl Sink for ConsoleSink {
    fn emit(&self, record: &RecordRef, format: &Format) -> Result<()> {
        let mut line = format.format(record);
        if line.len() > self.options.max_line_length {
            let mut cut = self.options.max_line_length;
            while !line.is_char_boundary(cut) {
                cut -= 1;
            }
            line.truncate(cut);
        }

        let mut stream = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        let written = if self.options.color && self.is_terminal {
            let color = Self::color_code(record.level());
            writeln!(stream, "{color}{line}{RESET}")
        } else {
            writeln!(stream, "{line}")
        };

        written.map_err(|e| {
            self.errors.fetch_add(1, Ordering::Relaxed);
            e.into()
        })
    }

    fn flush(&self) -> Result<()> {
        self.stream
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .flush()
            .map_err(|e| {
                self.errors.fetch_add(1, Ordering::Relaxed);
                e.into()
            })
    }
}
