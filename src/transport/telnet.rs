//! Telnet transport for Ethernet-connected controllers.
//!
//! The controller's Ethernet port is a Lantronix serial bridge that exposes
//! the wire protocol on TCP port 23 with a thin telnet layer on top. The
//! transport filters telnet IAC negotiation out of the byte stream (refusing
//! every offered option) so the command channel only ever sees protocol
//! bytes. Responses are terminated by CRLF.

use super::{not_connected, timeout_error, Transport};
use crate::error::{Nv200Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Default telnet port of the Ethernet bridge.
const DEFAULT_PORT: u16 = 23;

/// Budget for establishing the TCP connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// Telnet protocol bytes (RFC 854).
const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

/// Configuration for [`TelnetTransport`].
#[derive(Debug, Clone, Deserialize)]
pub struct TelnetConfig {
    /// Hostname or IP address of the Ethernet bridge.
    pub host: String,
    /// TCP port, defaults to 23.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl TelnetConfig {
    /// Configuration for `host` on the default telnet port.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
        }
    }
}

/// Decoder state for the telnet byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TelnetState {
    Data,
    Iac,
    Negotiate(u8),
    Subnegotiate,
    SubnegotiateIac,
}

/// Telnet transport driving the controller's Ethernet bridge.
pub struct TelnetTransport {
    config: TelnetConfig,
    stream: Option<TcpStream>,
    state: TelnetState,
    /// Filtered data bytes received beyond the last returned frame.
    carry: Vec<u8>,
}

impl TelnetTransport {
    /// Creates an unconnected telnet transport.
    pub fn new(config: TelnetConfig) -> Self {
        Self {
            config,
            stream: None,
            state: TelnetState::Data,
            carry: Vec::new(),
        }
    }

    /// The configured endpoint, for diagnostics.
    pub fn endpoint(&self) -> (&str, u16) {
        (&self.config.host, self.config.port)
    }

    /// Feeds raw bytes through the telnet decoder.
    ///
    /// Data bytes are appended to `out`; option negotiations are answered
    /// with refusals appended to `replies`.
    fn feed(state: &mut TelnetState, input: &[u8], out: &mut Vec<u8>, replies: &mut Vec<u8>) {
        for &byte in input {
            *state = match *state {
                TelnetState::Data => {
                    if byte == IAC {
                        TelnetState::Iac
                    } else {
                        out.push(byte);
                        TelnetState::Data
                    }
                }
                TelnetState::Iac => match byte {
                    IAC => {
                        // Escaped literal 0xFF.
                        out.push(IAC);
                        TelnetState::Data
                    }
                    WILL | WONT | DO | DONT => TelnetState::Negotiate(byte),
                    SB => TelnetState::Subnegotiate,
                    _ => TelnetState::Data,
                },
                TelnetState::Negotiate(command) => {
                    // Refuse every option: WILL -> DONT, DO -> WONT.
                    match command {
                        WILL => replies.extend_from_slice(&[IAC, DONT, byte]),
                        DO => replies.extend_from_slice(&[IAC, WONT, byte]),
                        _ => {}
                    }
                    TelnetState::Data
                }
                TelnetState::Subnegotiate => {
                    if byte == IAC {
                        TelnetState::SubnegotiateIac
                    } else {
                        TelnetState::Subnegotiate
                    }
                }
                TelnetState::SubnegotiateIac => {
                    if byte == SE {
                        TelnetState::Data
                    } else {
                        TelnetState::Subnegotiate
                    }
                }
            };
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[async_trait]
impl Transport for TelnetTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let endpoint = (self.config.host.clone(), self.config.port);
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(endpoint))
            .await
            .map_err(|_| {
                Nv200Error::Connection(format!(
                    "connection to {}:{} timed out",
                    self.config.host, self.config.port
                ))
            })?
            .map_err(|e| {
                Nv200Error::Connection(format!(
                    "failed to connect to {}:{}: {}",
                    self.config.host, self.config.port, e
                ))
            })?;
        // Low latency matters more than throughput for short command lines.
        stream.set_nodelay(true)?;
        info!(host = %self.config.host, port = self.config.port, "telnet transport connected");
        self.stream = Some(stream);
        self.state = TelnetState::Data;
        self.carry.clear();
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            info!(host = %self.config.host, "telnet transport closed");
        }
        self.carry.clear();
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        debug!(bytes = ?data, "telnet write");
        stream.write_all(data).await?;
        Ok(())
    }

    async fn drain(&mut self) -> Result<usize> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(0);
        };
        let mut total = self.carry.len();
        self.carry.clear();

        let mut buf = [0u8; 256];
        let mut replies = Vec::new();
        loop {
            match stream.try_read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    // Run discarded bytes through the filter so a partial IAC
                    // sequence does not corrupt the decoder state.
                    let mut out = Vec::new();
                    Self::feed(&mut self.state, &buf[..n], &mut out, &mut replies);
                    total += out.len();
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        if !replies.is_empty() {
            stream.write_all(&replies).await?;
        }
        Ok(total)
    }

    async fn read_until(&mut self, terminator: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        let deadline = tokio::time::Instant::now() + timeout;
        let mut buf = [0u8; 256];

        loop {
            if let Some(pos) = find_subslice(&self.carry, terminator) {
                let rest = self.carry.split_off(pos + terminator.len());
                let frame = std::mem::replace(&mut self.carry, rest);
                debug!(bytes = frame.len(), "telnet frame received");
                return Ok(frame);
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(timeout_error(timeout));
            }

            let n = tokio::time::timeout(remaining, stream.read(&mut buf))
                .await
                .map_err(|_| timeout_error(timeout))??;
            if n == 0 {
                return Err(Nv200Error::Connection(
                    "telnet connection closed while reading".into(),
                ));
            }

            let mut replies = Vec::new();
            Self::feed(&mut self.state, &buf[..n], &mut self.carry, &mut replies);
            if !replies.is_empty() {
                debug!(bytes = replies.len(), "refusing telnet option negotiation");
                stream.write_all(&replies).await?;
            }
        }
    }

    fn response_terminator(&self) -> &'static [u8] {
        b"\r\n"
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}
