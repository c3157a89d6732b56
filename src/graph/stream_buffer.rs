//! Stream Buffer (C1): a bounded byte ring between the HTTP source and the
//! decoder, with blocking reads/writes, EOF and cancellation.
//!
//! Grounded on `player/streaming_source.rs`'s `BufferedMediaSource`/`BufferWriter`
//! pair (condvar-guarded shared state, blocking `read`/`write`), generalized to
//! a plain byte-ring contract rather than rodio's `MediaSource`/`Seek` surface
//! (which the decoder wraps separately).

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::error::EngineError;

struct Inner {
    data: VecDeque<u8>,
    capacity: usize,
    closed: bool,
    cancelled: bool,
}

/// A bounded byte ring. Cloning a `StreamBuffer` shares the same ring; the
/// contract assumes at most one concurrent writer and one concurrent reader.
#[derive(Clone)]
pub struct StreamBuffer {
    inner: Arc<(Mutex<Inner>, Condvar)>,
}

impl StreamBuffer {
    /// Capacity is floored at `config::MIN_BUFFER_CAPACITY_BYTES`.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(crate::config::MIN_BUFFER_CAPACITY_BYTES);
        Self {
            inner: Arc::new((
                Mutex::new(Inner {
                    data: VecDeque::with_capacity(capacity.min(1 << 20)),
                    capacity,
                    closed: false,
                    cancelled: false,
                }),
                Condvar::new(),
            )),
        }
    }

    /// Blocks while free space is less than `chunk.len()` and the buffer is
    /// open. Returns the number of bytes written (always `chunk.len()` on
    /// success), `0` if the buffer was closed before there was room, or
    /// `EngineError::Cancelled` if `cancel()` was called.
    pub fn write(&self, chunk: &[u8]) -> Result<usize, EngineError> {
        let (lock, cvar) = &*self.inner;
        let mut inner = lock.lock().unwrap();
        loop {
            if inner.cancelled {
                return Err(EngineError::Cancelled);
            }
            if inner.closed {
                return Ok(0);
            }
            let free = inner.capacity.saturating_sub(inner.data.len());
            if free >= chunk.len() {
                inner.data.extend(chunk.iter().copied());
                cvar.notify_all();
                return Ok(chunk.len());
            }
            inner = cvar.wait(inner).unwrap();
        }
    }

    /// Blocks while the buffer is empty and not at EOF. Returns up to `max`
    /// bytes, or an empty vector once the buffer is drained and closed.
    pub fn read(&self, max: usize) -> Result<Vec<u8>, EngineError> {
        let (lock, cvar) = &*self.inner;
        let mut inner = lock.lock().unwrap();
        loop {
            if inner.cancelled {
                return Err(EngineError::Cancelled);
            }
            if !inner.data.is_empty() {
                let n = max.min(inner.data.len());
                let chunk: Vec<u8> = inner.data.drain(..n).collect();
                cvar.notify_all();
                return Ok(chunk);
            }
            if inner.closed {
                return Ok(Vec::new());
            }
            inner = cvar.wait(inner).unwrap();
        }
    }

    /// Marks EOF. Subsequent `read` drains any remaining bytes then returns
    /// empty; in-flight `write` calls waiting for space are unblocked and
    /// told `Ok(0)`.
    pub fn close_writer(&self) {
        let (lock, cvar) = &*self.inner;
        let mut inner = lock.lock().unwrap();
        inner.closed = true;
        cvar.notify_all();
    }

    /// Unblocks all waiters with a cancellation indication; the buffer is
    /// unusable afterwards.
    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        let mut inner = lock.lock().unwrap();
        inner.cancelled = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.0.lock().unwrap().cancelled
    }

    pub fn is_closed(&self) -> bool {
        self.inner.0.lock().unwrap().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn read_drains_then_returns_empty_on_eof() {
        let buf = StreamBuffer::new(1024);
        buf.write(b"hello").unwrap();
        buf.close_writer();
        assert_eq!(buf.read(5).unwrap(), b"hello");
        assert_eq!(buf.read(5).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn write_blocks_until_space_then_unblocks_on_read() {
        let buf = StreamBuffer::new(crate::config::MIN_BUFFER_CAPACITY_BYTES);
        let filler = vec![0u8; crate::config::MIN_BUFFER_CAPACITY_BYTES];
        buf.write(&filler).unwrap();

        let reader = buf.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            reader.read(crate::config::MIN_BUFFER_CAPACITY_BYTES).unwrap();
        });

        let more = vec![1u8; 16];
        let written = buf.write(&more).unwrap();
        assert_eq!(written, 16);
        handle.join().unwrap();
    }

    #[test]
    fn cancel_unblocks_waiters_with_cancellation() {
        let buf = StreamBuffer::new(crate::config::MIN_BUFFER_CAPACITY_BYTES);
        let canceller = buf.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            canceller.cancel();
        });
        let err = buf.read(16).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        handle.join().unwrap();
    }

    #[test]
    fn fifo_ordering_is_preserved() {
        let buf = StreamBuffer::new(crate::config::MIN_BUFFER_CAPACITY_BYTES);
        buf.write(b"abc").unwrap();
        buf.write(b"def").unwrap();
        buf.close_writer();
        let mut all = Vec::new();
        loop {
            let chunk = buf.read(2).unwrap();
            if chunk.is_empty() {
                break;
            }
            all.extend(chunk);
        }
        assert_eq!(all, b"abcdef");
    }
}
