//! Scripted transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::traits::{Transport, TransportError, TransportFactory};

#[derive(Default)]
struct Inner {
    replies: VecDeque<Vec<u8>>,
    writes: Vec<Vec<u8>>,
    disconnect_waits: usize,
}

/// Scripted transport for unit testing engine and codec logic.
///
/// Clones share state, so a test can keep a handle for inspection while the
/// engine owns another.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply frame to be returned on the next read.
    pub fn push_reply(&self, frame: &[u8]) {
        self.inner.lock().unwrap().replies.push_back(frame.to_vec());
    }

    /// Get all captured writes, raw.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.inner.lock().unwrap().writes.clone()
    }

    /// Captured writes that look like command frames (printable ASCII within
    /// the command size limit); bulk payloads are filtered out.
    pub fn commands(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .writes
            .iter()
            .filter(|w| {
                w.len() < crate::protocol::MAX_COMMAND_SIZE
                    && w.iter().all(|b| b.is_ascii_graphic() || *b == b' ')
            })
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }

    /// How many times the engine blocked on disconnect.
    pub fn disconnect_waits(&self) -> usize {
        self.inner.lock().unwrap().disconnect_waits
    }
}

impl Transport for ScriptedTransport {
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        self.inner.lock().unwrap().writes.push(data.to_vec());
        Ok(data.len())
    }

    fn read(&mut self, _max_len: usize) -> Result<Vec<u8>, TransportError> {
        self.inner
            .lock()
            .unwrap()
            .replies
            .pop_front()
            .ok_or(TransportError::Timeout { timeout_ms: 5000 })
    }

    fn wait_for_disconnect(&mut self) -> Result<(), TransportError> {
        self.inner.lock().unwrap().disconnect_waits += 1;
        Ok(())
    }
}

/// Factory handing out pre-scripted transports in order.
#[derive(Default)]
pub struct ScriptedFactory {
    transports: VecDeque<ScriptedTransport>,
    reopens: usize,
}

impl ScriptedFactory {
    pub fn new(transports: Vec<ScriptedTransport>) -> Self {
        Self {
            transports: transports.into(),
            reopens: 0,
        }
    }

    pub fn reopens(&self) -> usize {
        self.reopens
    }
}

impl TransportFactory for ScriptedFactory {
    fn reopen(&mut self) -> Result<Box<dyn Transport>, TransportError> {
        self.reopens += 1;
        self.transports
            .pop_front()
            .map(|t| Box::new(t) as Box<dyn Transport>)
            .ok_or(TransportError::DeviceNotFound)
    }
}
