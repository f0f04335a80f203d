//! Deadline-bounded framing over a byte stream
//!
//! Bytes read past the end of a frame stay buffered for the next read, so
//! pipelined replies (several queries sent before any reply is read) are
//! split correctly.
//!
//! A read that reaches its deadline with nothing buffered is a timeout. A
//! read that reaches its deadline holding part of a frame is a protocol error
//! carrying those bytes; they are consumed so the next exchange starts clean.

use super::Transport;
use stagekit_core::{Error, Result};
use std::time::{Duration, Instant};

const CHUNK_SIZE: usize = 256;

/// Text line along with the frame it was decoded from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextLine {
    pub text: String,
    pub frame: Vec<u8>,
}

impl TextLine {
    /// Decode a frame, dropping CR, LF and NUL bytes (some controllers emit
    /// NULs after a reset) and trimming surrounding whitespace
    pub fn decode(frame: Vec<u8>) -> Result<Self> {
        let cleaned: Vec<u8> = frame
            .iter()
            .copied()
            .filter(|&b| b != b'\r' && b != b'\n' && b != 0)
            .collect();
        match String::from_utf8(cleaned) {
            Ok(text) => Ok(Self {
                text: text.trim().to_string(),
                frame,
            }),
            Err(_) => Err(Error::protocol("reply is not valid UTF-8", frame)),
        }
    }
}

/// Buffered byte-stream channel
pub struct StreamChannel {
    transport: Box<dyn Transport>,
    pending: Vec<u8>,
}

impl StreamChannel {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            pending: Vec::new(),
        }
    }

    pub fn open(&mut self) -> Result<()> {
        self.pending.clear();
        self.transport.open()
    }

    pub fn close(&mut self) {
        self.pending.clear();
        self.transport.close();
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    pub fn name(&self) -> String {
        self.transport.name()
    }

    /// Write a complete command
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        tracing::debug!("{} >> {:?}", self.transport.name(), String::from_utf8_lossy(data));
        self.transport.write_all(data)
    }

    pub fn send_str(&mut self, command: &str) -> Result<()> {
        self.send(command.as_bytes())
    }

    /// Read up to and including `terminator`
    pub fn read_until(&mut self, terminator: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        self.read_frame(timeout, |buf| {
            buf.windows(terminator.len())
                .position(|w| w == terminator)
                .map(|pos| pos + terminator.len())
        })
    }

    /// Read exactly `len` bytes
    pub fn read_exact(&mut self, len: usize, timeout: Duration) -> Result<Vec<u8>> {
        self.read_frame(timeout, |buf| (buf.len() >= len).then_some(len))
    }

    /// Read one text line ending in `terminator`, keeping its frame
    pub fn read_text_line(&mut self, terminator: &[u8], timeout: Duration) -> Result<TextLine> {
        TextLine::decode(self.read_until(terminator, timeout)?)
    }

    /// Read one LF-terminated text line, see [`TextLine::decode`]
    pub fn read_line(&mut self, timeout: Duration) -> Result<String> {
        self.read_text_line(b"\n", timeout).map(|line| line.text)
    }

    /// Drop buffered and pending input
    pub fn flush_input(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            tracing::debug!(
                "{} discarding {} buffered bytes",
                self.transport.name(),
                self.pending.len()
            );
        }
        self.pending.clear();
        self.transport.clear_input()
    }

    fn read_frame(
        &mut self,
        timeout: Duration,
        complete: impl Fn(&[u8]) -> Option<usize>,
    ) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; CHUNK_SIZE];

        loop {
            if let Some(len) = complete(&self.pending) {
                let frame: Vec<u8> = self.pending.drain(..len).collect();
                tracing::debug!(
                    "{} << {:?}",
                    self.transport.name(),
                    String::from_utf8_lossy(&frame)
                );
                return Ok(frame);
            }

            let now = Instant::now();
            if now >= deadline {
                let timeout_ms = timeout.as_millis() as u64;
                if self.pending.is_empty() {
                    return Err(Error::timeout(timeout_ms));
                }
                let partial = std::mem::take(&mut self.pending);
                tracing::warn!(
                    "{} incomplete frame after {}ms: {:?}",
                    self.transport.name(),
                    timeout_ms,
                    String::from_utf8_lossy(&partial)
                );
                return Err(Error::protocol(
                    format!("incomplete frame after {}ms", timeout_ms),
                    partial,
                ));
            }

            let n = self.transport.read(&mut chunk, deadline - now)?;
            self.pending.extend_from_slice(&chunk[..n]);
        }
    }
}
