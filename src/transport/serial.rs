//! USB serial transport.
//!
//! The controller enumerates as an FTDI USB-serial device running at
//! 115200 baud, 8N1, with XON/XOFF software flow control. Responses are
//! terminated by the XON byte the firmware appends after each reply.

use super::{not_connected, timeout_error, Transport, XON};
use crate::error::{Nv200Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::task::spawn_blocking;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info};

/// Baud rate of the NV200 USB interface.
const BAUD_RATE: u32 = 115_200;

/// Manufacturer string the controller's USB-serial bridge reports.
const USB_MANUFACTURER: &str = "FTDI";

/// How long to wait for the identification banner while probing a port.
const PROBE_TIMEOUT: Duration = Duration::from_millis(250);

/// Banner prefix the device answers with on a bare carriage return.
const DEVICE_BANNER: &str = "NV200";

/// How long a drain waits for further stale bytes before giving up.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(2);

/// Configuration for [`SerialTransport`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SerialConfig {
    /// Serial port path (e.g. `/dev/ttyUSB0`, `COM3`). When absent, all FTDI
    /// ports are probed for the device banner.
    #[serde(default)]
    pub port: Option<String>,
}

/// Serial transport driving the controller's USB interface.
pub struct SerialTransport {
    config: SerialConfig,
    reader: Option<BufReader<SerialStream>>,
    resolved_port: Option<String>,
}

impl SerialTransport {
    /// Creates an unconnected serial transport.
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            reader: None,
            resolved_port: None,
        }
    }

    /// The port the transport is (or was) connected to, once resolved.
    pub fn port(&self) -> Option<&str> {
        self.resolved_port.as_deref()
    }

    async fn open_stream(path: &str) -> Result<SerialStream> {
        let path_owned = path.to_string();

        // Opening the port touches the OS device node; keep it off the runtime.
        spawn_blocking(move || {
            tokio_serial::new(&path_owned, BAUD_RATE)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::Software)
                .open_native_async()
                .map_err(|e| {
                    Nv200Error::Connection(format!("failed to open {}: {}", path_owned, e))
                })
        })
        .await
        .map_err(|e| Nv200Error::Connection(format!("port open task failed: {}", e)))?
    }

    /// Lists serial ports whose USB bridge reports the expected manufacturer.
    async fn candidate_ports() -> Result<Vec<String>> {
        let ports = spawn_blocking(serialport::available_ports)
            .await
            .map_err(|e| Nv200Error::Connection(format!("port enumeration task failed: {}", e)))?
            .map_err(|e| Nv200Error::Connection(format!("port enumeration failed: {}", e)))?;

        Ok(ports
            .into_iter()
            .filter(|p| match &p.port_type {
                serialport::SerialPortType::UsbPort(usb) => {
                    usb.manufacturer.as_deref() == Some(USB_MANUFACTURER)
                }
                _ => false,
            })
            .map(|p| p.port_name)
            .collect())
    }

    /// Sends a bare carriage return and checks for the identification banner.
    async fn probe(reader: &mut BufReader<SerialStream>) -> bool {
        if reader.get_mut().write_all(b"\r").await.is_err() {
            return false;
        }
        match read_frame(reader, XON, PROBE_TIMEOUT).await {
            Ok(frame) => {
                let text: String = frame.iter().map(|&b| b as char).collect();
                text.trim_start_matches(['\r', '\n']).starts_with(DEVICE_BANNER)
            }
            Err(_) => false,
        }
    }

    async fn detect_port(&mut self) -> Result<()> {
        for path in Self::candidate_ports().await? {
            let stream = match Self::open_stream(&path).await {
                Ok(stream) => stream,
                Err(e) => {
                    debug!(port = %path, error = %e, "skipping unopenable port");
                    continue;
                }
            };
            let mut reader = BufReader::new(stream);
            if Self::probe(&mut reader).await {
                info!(port = %path, "detected NV200 on serial port");
                self.reader = Some(reader);
                self.resolved_port = Some(path);
                return Ok(());
            }
            debug!(port = %path, "no NV200 banner, skipping");
        }
        Err(Nv200Error::Connection(
            "no NV200 device found on any FTDI serial port".into(),
        ))
    }
}

/// Reads one terminator-delimited frame from a buffered stream.
async fn read_frame(
    reader: &mut BufReader<SerialStream>,
    terminator: u8,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let mut frame = Vec::new();
    let n = tokio::time::timeout(timeout, reader.read_until(terminator, &mut frame))
        .await
        .map_err(|_| timeout_error(timeout))??;
    if n == 0 {
        return Err(Nv200Error::Connection(
            "serial port closed while reading".into(),
        ));
    }
    Ok(frame)
}

#[async_trait]
impl Transport for SerialTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.reader.is_some() {
            return Ok(());
        }
        match self.config.port.clone() {
            Some(path) => {
                let stream = Self::open_stream(&path).await?;
                info!(port = %path, "serial transport connected");
                self.reader = Some(BufReader::new(stream));
                self.resolved_port = Some(path);
                Ok(())
            }
            None => self.detect_port().await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.reader.take().is_some() {
            info!(port = ?self.resolved_port, "serial transport closed");
        }
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let reader = self.reader.as_mut().ok_or_else(not_connected)?;
        debug!(bytes = ?data, "serial write");
        reader.get_mut().write_all(data).await?;
        Ok(())
    }

    async fn drain(&mut self) -> Result<usize> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(0);
        };
        let mut discard = [0u8; 256];
        let mut total = 0usize;
        loop {
            match tokio::time::timeout(DRAIN_TIMEOUT, reader.read(&mut discard)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => total += n,
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Ok(Err(e)) => return Err(e.into()),
                // No more data within the window.
                Err(_) => break,
            }
        }
        Ok(total)
    }

    async fn read_until(&mut self, terminator: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        let reader = self.reader.as_mut().ok_or_else(not_connected)?;
        // Serial frames end on the single XON byte.
        let delimiter = terminator.last().copied().unwrap_or(XON);
        let frame = read_frame(reader, delimiter, timeout).await?;
        debug!(bytes = frame.len(), "serial frame received");
        Ok(frame)
    }

    fn response_terminator(&self) -> &'static [u8] {
        const TERMINATOR: &[u8] = &[XON];
        TERMINATOR
    }

    fn is_open(&self) -> bool {
        self.reader.is_some()
    }
}
