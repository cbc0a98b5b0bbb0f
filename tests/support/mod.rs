//! Scripted in-memory transport for protocol-level tests.

// Each test binary only exercises a subset of the helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use nv200::error::{Nv200Error, Result};
use nv200::transport::Transport;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Responder = Box<dyn FnMut(&str) -> Option<String> + Send>;

/// Transport double: records written lines and answers them through a
/// responder function. A `None` response models a pure write command; a
/// missing response on read models a device timeout.
pub struct MockTransport {
    responder: Responder,
    pending: Arc<Mutex<VecDeque<Vec<u8>>>>,
    written: Arc<Mutex<Vec<String>>>,
    fail_prefix: Option<String>,
    open: bool,
}

impl MockTransport {
    pub fn new(responder: impl FnMut(&str) -> Option<String> + Send + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            pending: Arc::new(Mutex::new(VecDeque::new())),
            written: Arc::new(Mutex::new(Vec::new())),
            fail_prefix: None,
            open: true,
        }
    }

    /// A transport that echoes every request line back as its response.
    pub fn echoing() -> Self {
        Self::new(|line: &str| Some(line.to_string()))
    }

    /// A transport that answers nothing (every command is a pure write).
    pub fn write_only() -> Self {
        Self::new(|_| None)
    }

    /// Makes writes whose line starts with `prefix` fail with an I/O error.
    pub fn fail_writes_with_prefix(mut self, prefix: &str) -> Self {
        self.fail_prefix = Some(prefix.to_string());
        self
    }

    /// Shared log of written lines (CR stripped).
    pub fn written(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.written)
    }

    /// Shared handle to the receive queue, e.g. to inject a late frame.
    pub fn pending_handle(&self) -> Arc<Mutex<VecDeque<Vec<u8>>>> {
        Arc::clone(&self.pending)
    }
}

/// Encodes a response the way the firmware does: one byte per char.
fn encode_single_byte(text: &str) -> Vec<u8> {
    text.chars().map(|c| c as u32 as u8).collect()
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<()> {
        self.open = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let line: String = data.iter().map(|&b| b as char).collect();
        let line = line.trim_end_matches('\r').to_string();
        if let Some(prefix) = &self.fail_prefix {
            if line.starts_with(prefix.as_str()) {
                return Err(Nv200Error::Io(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "scripted write failure",
                )));
            }
        }
        if let Some(response) = (self.responder)(&line) {
            let mut frame = encode_single_byte(&response);
            frame.extend_from_slice(b"\r\n");
            self.pending.lock().expect("pending queue poisoned").push_back(frame);
        }
        self.written
            .lock()
            .expect("written log poisoned")
            .push(line);
        Ok(())
    }

    async fn drain(&mut self) -> Result<usize> {
        let mut pending = self.pending.lock().expect("pending queue poisoned");
        let stale = pending.iter().map(Vec::len).sum();
        pending.clear();
        Ok(stale)
    }

    async fn read_until(&mut self, _terminator: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        self.pending
            .lock()
            .expect("pending queue poisoned")
            .pop_front()
            .ok_or(Nv200Error::Timeout {
                keyword: String::new(),
                waited_ms: timeout.as_millis() as u64,
            })
    }

    fn response_terminator(&self) -> &'static [u8] {
        b"\r\n"
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
