//! Async client library for the piezosystem jena NV200/D_NET piezo amplifier.
//!
//! The controller speaks a line-oriented ASCII protocol over two physical
//! links: USB serial (FTDI, 115200 baud, XON/XOFF) and an Ethernet-to-serial
//! telnet bridge. This crate layers on top of either:
//!
//! - [`transport`]: the byte links behind the [`transport::Transport`] trait,
//! - [`channel`]: command/response framing with echo verification and a
//!   result cache for slow-changing parameters,
//! - [`transfer`]: chunked bulk upload/download with progress reporting,
//! - [`recorder`] and [`waveform`]: the 20 kHz data recorder and the
//!   arbitrary waveform generator,
//! - [`device`]: the typed [`device::Nv200Device`] facade.
//!
//! # Example
//!
//! ```no_run
//! use nv200::device::Nv200Device;
//! use nv200::transport::TelnetConfig;
//! use nv200::types::PidLoopMode;
//!
//! # async fn run() -> nv200::error::Result<()> {
//! let mut device = Nv200Device::from_telnet(TelnetConfig::new("192.168.0.42"));
//! device.connect().await?;
//! device.set_pid_mode(PidLoopMode::ClosedLoop).await?;
//! device.set_setpoint(20.0).await?;
//! let position = device.measured_value().await?;
//! println!("position: {position}");
//! device.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod channel;
pub mod device;
pub mod error;
pub mod poll;
pub mod recorder;
pub mod transfer;
pub mod transport;
pub mod types;
pub mod waveform;

pub use cache::{cache_enabled, set_cache_enabled};
pub use channel::{Command, CommandChannel};
pub use device::Nv200Device;
pub use error::{Nv200Error, Result};
pub use transfer::{Progress, SampleBuffer};
pub use transport::{
    SerialConfig, SerialTransport, TelnetConfig, TelnetTransport, Transport, DEFAULT_TIMEOUT,
};
pub use types::{
    DataRecorderSource, ErrorCode, ModulationSource, PidLoopMode, RecorderAutoStartMode,
    StatusFlags, StatusRegister,
};
