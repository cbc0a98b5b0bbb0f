//! Byte transports for the NV200 wire protocol.
//!
//! The controller speaks the same line-oriented ASCII protocol over two
//! physical channels: a USB serial port (FTDI, 115200 baud, XON/XOFF) and an
//! Ethernet-to-serial bridge reachable over telnet. Both are hidden behind
//! the [`Transport`] trait so that the command channel never needs to know
//! which one it is driving; the variant is chosen at construction time.
//!
//! A transport owns exactly one physical connection. It is opened explicitly
//! with [`Transport::connect`], closed explicitly with [`Transport::close`]
//! (idempotent), and is not reusable after close.

mod serial;
mod telnet;

pub use serial::{SerialConfig, SerialTransport};
pub use telnet::{TelnetConfig, TelnetTransport};

use crate::error::{Nv200Error, Result};
use async_trait::async_trait;
use std::time::Duration;

/// XON control byte; the firmware appends it after every serial response.
pub const XON: u8 = 0x11;

/// XOFF control byte; may appear interleaved in serial responses.
pub const XOFF: u8 = 0x13;

/// Default per-round-trip response timeout.
///
/// The firmware needs up to half a second for some parameter reads, so the
/// floor is deliberately above that.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(600);

/// A byte-oriented connection to an NV200 controller.
///
/// Implementations must suspend the calling task (never block a thread) while
/// waiting for data. Errors map onto the crate taxonomy: `Connection` when the
/// link cannot be established or is used before `connect`, `Io` for failures
/// on an open link, `Timeout` when `read_until` does not observe the
/// terminator in time.
#[async_trait]
pub trait Transport: Send {
    /// Establishes the physical connection.
    async fn connect(&mut self) -> Result<()>;

    /// Releases the connection. Idempotent; the transport is not reusable.
    async fn close(&mut self) -> Result<()>;

    /// Sends raw bytes.
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Discards any input bytes already received, returning how many were
    /// dropped.
    ///
    /// A response arriving after its query timed out would otherwise be
    /// matched against the next command and desynchronize the stream; the
    /// command channel drains before every write.
    async fn drain(&mut self) -> Result<usize>;

    /// Reads until `terminator` is observed or `timeout` elapses.
    ///
    /// Returns the received bytes including the terminator. A timeout fails
    /// with [`Nv200Error::Timeout`] (keyword filled in by the caller).
    async fn read_until(&mut self, terminator: &[u8], timeout: Duration) -> Result<Vec<u8>>;

    /// The terminator sequence this transport's responses end with.
    fn response_terminator(&self) -> &'static [u8];

    /// Whether the connection is currently open.
    fn is_open(&self) -> bool;
}

pub(crate) fn timeout_error(timeout: Duration) -> Nv200Error {
    Nv200Error::Timeout {
        keyword: String::new(),
        waited_ms: timeout.as_millis() as u64,
    }
}

pub(crate) fn not_connected() -> Nv200Error {
    Nv200Error::Connection("transport is not connected".into())
}
