//! Bounded in-memory sink for recent log output.
//!
//! A byte-capped ring that a `tracing-subscriber` fmt layer writes through.
//! When full, the oldest bytes are dropped first; writes never block on
//! anything but the ring's own mutex. The current contents are dumped over
//! HTTP for quick inspection without shell access to the host.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

/// Shared handle to the ring. Clone-cheap; one lives in `AppState` for the
/// dump endpoint, one inside the subscriber.
#[derive(Clone)]
pub struct LogRing {
    inner: Arc<Mutex<VecDeque<u8>>>,
    capacity: usize,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(4096)))),
            capacity,
        }
    }

    /// Copy out the buffered log text, oldest first.
    pub fn contents(&self) -> String {
        let buffer = self.inner.lock().expect("log ring poisoned");
        String::from_utf8_lossy(&buffer.iter().copied().collect::<Vec<u8>>()).into_owned()
    }

    fn push(&self, bytes: &[u8]) {
        let mut buffer = self.inner.lock().expect("log ring poisoned");
        // Oversized writes keep only their tail; anything else evicts from
        // the front until it fits.
        if bytes.len() >= self.capacity {
            buffer.clear();
            buffer.extend(&bytes[bytes.len() - self.capacity..]);
            return;
        }
        while buffer.len() + bytes.len() > self.capacity {
            buffer.pop_front();
        }
        buffer.extend(bytes);
    }
}

pub struct RingWriter(LogRing);

impl io::Write for RingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.push(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogRing {
    type Writer = RingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RingWriter(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn retains_writes_in_order() {
        let ring = LogRing::new(64);
        let mut writer = ring.make_writer();
        writer.write_all(b"first\n").unwrap();
        writer.write_all(b"second\n").unwrap();
        assert_eq!(ring.contents(), "first\nsecond\n");
    }

    #[test]
    fn evicts_oldest_bytes_when_full() {
        let ring = LogRing::new(10);
        let mut writer = ring.make_writer();
        writer.write_all(b"aaaaa").unwrap();
        writer.write_all(b"bbbbb").unwrap();
        writer.write_all(b"cc").unwrap();
        assert_eq!(ring.contents(), "aaabbbbbcc");
    }

    #[test]
    fn oversized_write_keeps_its_tail() {
        let ring = LogRing::new(4);
        let mut writer = ring.make_writer();
        writer.write_all(b"0123456789").unwrap();
        assert_eq!(ring.contents(), "6789");
    }
}
