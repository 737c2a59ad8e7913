// String storage primitives: SSO message storage and the atomic name buffer

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Messages up to this many bytes live inline in the record slot.
pub const INLINE_CAPACITY: usize = 64;

/// Owned message bytes with small-string optimization.
///
/// Short payloads are copied into a fixed inline buffer so the hot path
/// performs no allocation; longer payloads go to the heap. The borrowed view
/// is always derived from the storage itself, so moving the storage can
/// never leave a dangling view.
#[derive(Debug)]
pub enum MessageStorage {
    Inline { len: u8, buf: [u8; INLINE_CAPACITY] },
    Heap(Box<str>),
}

impl MessageStorage {
    pub fn new(msg: &str) -> Self {
        if msg.len() <= INLINE_CAPACITY {
            let mut buf = [0u8; INLINE_CAPACITY];
            buf[..msg.len()].copy_from_slice(msg.as_bytes());
            MessageStorage::Inline {
                len: msg.len() as u8,
                buf,
            }
        } else {
            MessageStorage::Heap(msg.into())
        }
    }

    /// Borrowed view over the stored message
    pub fn view(&self) -> &str {
        match self {
            MessageStorage::Inline { len, buf } => {
                std::str::from_utf8(&buf[..*len as usize]).unwrap_or("")
            }
            MessageStorage::Heap(s) => s,
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, MessageStorage::Inline { .. })
    }

    pub fn len(&self) -> usize {
        match self {
            MessageStorage::Inline { len, .. } => *len as usize,
            MessageStorage::Heap(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MessageStorage {
    fn default() -> Self {
        MessageStorage::Inline {
            len: 0,
            buf: [0u8; INLINE_CAPACITY],
        }
    }
}

/// Capacity of an [`AtomicName`] buffer.
pub const NAME_CAPACITY: usize = 128;

/// Bounded name buffer with lock-free readers.
///
/// Readers load the length with acquire ordering and copy the bytes out
/// before use; they are never handed a pointer into the buffer. Writers are
/// rare (default-logger renames) and serialize on an internal mutex.
pub struct AtomicName {
    buf: [AtomicU8; NAME_CAPACITY],
    len: AtomicUsize,
    write_lock: Mutex<()>,
}

impl AtomicName {
    pub fn new() -> Self {
        Self {
            buf: [0u8; NAME_CAPACITY].map(AtomicU8::new),
            len: AtomicUsize::new(0),
            write_lock: Mutex::new(()),
        }
    }

    pub fn with(name: &str) -> Self {
        let this = Self::new();
        this.store(name);
        this
    }

    /// Store `name`, truncating to the buffer capacity on a character
    /// boundary.
    pub fn store(&self, name: &str) {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut len = name.len().min(NAME_CAPACITY);
        while !name.is_char_boundary(len) {
            len -= 1;
        }

        for (i, b) in name.as_bytes()[..len].iter().enumerate() {
            self.buf[i].store(*b, Ordering::Relaxed);
        }
        self.len.store(len, Ordering::Release);
    }

    /// Copy the current name out
    pub fn load(&self) -> String {
        let len = self.len.load(Ordering::Acquire);
        let mut bytes = vec![0u8; len];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = self.buf[i].load(Ordering::Relaxed);
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Compare the current name against `other` without allocating
    pub fn matches(&self, other: &str) -> bool {
        let len = self.len.load(Ordering::Acquire);
        if len != other.len() {
            return false;
        }
        other
            .as_bytes()
            .iter()
            .enumerate()
            .all(|(i, b)| self.buf[i].load(Ordering::Relaxed) == *b)
    }
}

impl Default for AtomicName {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AtomicName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AtomicName({:?})", self.load())
    }
}
