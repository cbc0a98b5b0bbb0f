//! High-level NV200 device handle.
//!
//! [`Nv200Device`] owns one command channel and exposes the controller's
//! parameters as typed methods: loop mode, modulation routing, setpoint and
//! motion, ranges and units, status, actuator identity. The data recorder and
//! waveform generator are reached through borrowed sub-handles sharing the
//! same channel.

use crate::channel::{Command, CommandChannel};
use crate::error::{Nv200Error, Result};
use crate::recorder::DataRecorder;
use crate::transport::{
    SerialConfig, SerialTransport, TelnetConfig, TelnetTransport, Transport,
};
use crate::types::{ModulationSource, PidLoopMode, StatusFlags, StatusRegister};
use crate::waveform::WaveformGenerator;
use std::time::Duration;
use tracing::info;

/// Commands whose results only change on explicit writes, and are therefore
/// safe to cache between reads.
pub const CACHEABLE_COMMANDS: &[&str] = &[
    "cl", "unitcl", "unitol", "avmin", "avmax", "posmin", "posmax", "modsrc", "spisrc",
];

/// An NV200 piezo amplifier controller.
pub struct Nv200Device {
    channel: CommandChannel,
}

impl Nv200Device {
    /// Wraps an arbitrary transport.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            channel: CommandChannel::with_cacheable(transport, CACHEABLE_COMMANDS),
        }
    }

    /// Device reached over USB serial; auto-detects the port if unset.
    pub fn from_serial(config: SerialConfig) -> Self {
        Self::new(Box::new(SerialTransport::new(config)))
    }

    /// Device reached over the Ethernet telnet bridge.
    pub fn from_telnet(config: TelnetConfig) -> Self {
        Self::new(Box::new(TelnetTransport::new(config)))
    }

    /// Opens the connection.
    pub async fn connect(&mut self) -> Result<()> {
        self.channel.connect().await?;
        info!("NV200 connected");
        Ok(())
    }

    /// Closes the connection and drops all cached results.
    pub async fn close(&mut self) -> Result<()> {
        self.channel.close().await?;
        info!("NV200 disconnected");
        Ok(())
    }

    /// The underlying command channel, for raw protocol access.
    pub fn channel(&self) -> &CommandChannel {
        &self.channel
    }

    /// Mutable channel access, e.g. to tune the response timeout.
    pub fn channel_mut(&mut self) -> &mut CommandChannel {
        &mut self.channel
    }

    /// Sets the per-round-trip response timeout (floored at the minimum).
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.channel.set_timeout(timeout);
    }

    /// Handle to the data recorder.
    pub fn recorder(&self) -> DataRecorder<'_> {
        DataRecorder::new(&self.channel)
    }

    /// Handle to the waveform generator.
    pub fn waveform_generator(&self) -> WaveformGenerator<'_> {
        WaveformGenerator::new(&self.channel)
    }

    /// Switches between open and closed loop control.
    pub async fn set_pid_mode(&self, mode: PidLoopMode) -> Result<()> {
        self.channel.write_value("cl", mode as i64).await
    }

    /// The active loop control mode.
    pub async fn pid_mode(&self) -> Result<PidLoopMode> {
        let code = self.channel.read_int("cl").await?;
        PidLoopMode::try_from(code).map_err(|code| Nv200Error::Value {
            keyword: "cl".into(),
            token: code.to_string(),
            reason: "unknown loop mode code".into(),
        })
    }

    /// Routes the setpoint to a modulation source.
    pub async fn set_modulation_source(&self, source: ModulationSource) -> Result<()> {
        self.channel.write_value("modsrc", source as i64).await
    }

    /// The active modulation source.
    pub async fn modulation_source(&self) -> Result<ModulationSource> {
        let code = self.channel.read_int("modsrc").await?;
        ModulationSource::try_from(code).map_err(|code| Nv200Error::Value {
            keyword: "modsrc".into(),
            token: code.to_string(),
            reason: "unknown modulation source code".into(),
        })
    }

    /// Writes the setpoint: a position in closed loop, a voltage in open loop.
    pub async fn set_setpoint(&self, value: f64) -> Result<()> {
        self.channel.write_value("set", value).await
    }

    /// The current setpoint.
    pub async fn setpoint(&self) -> Result<f64> {
        self.channel.read_float("set").await
    }

    /// Moves to a position: switches to closed loop, routes the setpoint back
    /// to `set` commands, then writes it.
    ///
    /// The re-routing matters after a waveform run, which leaves the setpoint
    /// bound to the generator; without it the written setpoint is ignored.
    pub async fn move_to_position(&self, position: f64) -> Result<()> {
        self.set_pid_mode(PidLoopMode::ClosedLoop).await?;
        self.set_modulation_source(ModulationSource::SetCommand).await?;
        self.set_setpoint(position).await
    }

    /// Applies a voltage: switches to open loop, routes the setpoint back to
    /// `set` commands, then writes it.
    pub async fn move_to_voltage(&self, voltage: f64) -> Result<()> {
        self.set_pid_mode(PidLoopMode::OpenLoop).await?;
        self.set_modulation_source(ModulationSource::SetCommand).await?;
        self.set_setpoint(voltage).await
    }

    /// The measured position (closed loop) or piezo voltage (open loop).
    pub async fn measured_value(&self) -> Result<f64> {
        self.channel.read_float("meas").await
    }

    /// Heat sink temperature in degrees Celsius.
    pub async fn heat_sink_temperature(&self) -> Result<f64> {
        self.channel.read_float("temp").await
    }

    /// The 16-bit device status register.
    pub async fn status_register(&self) -> Result<StatusRegister> {
        let raw = self.channel.read_int("stat").await?;
        let bits = u16::try_from(raw).map_err(|_| Nv200Error::Value {
            keyword: "stat".into(),
            token: raw.to_string(),
            reason: "status register outside 16 bits".into(),
        })?;
        Ok(StatusRegister(bits))
    }

    /// Whether a single status flag is currently set.
    pub async fn is_status_flag_set(&self, flag: StatusFlags) -> Result<bool> {
        Ok(self.status_register().await?.has_flag(flag))
    }

    /// Lower end of the closed-loop position range.
    pub async fn min_position(&self) -> Result<f64> {
        self.channel.read_float("posmin").await
    }

    /// Upper end of the closed-loop position range.
    pub async fn max_position(&self) -> Result<f64> {
        self.channel.read_float("posmax").await
    }

    /// Closed-loop position range as (min, max).
    pub async fn position_range(&self) -> Result<(f64, f64)> {
        Ok((self.min_position().await?, self.max_position().await?))
    }

    /// Lower end of the open-loop voltage range.
    pub async fn min_voltage(&self) -> Result<f64> {
        self.channel.read_float("avmin").await
    }

    /// Upper end of the open-loop voltage range.
    pub async fn max_voltage(&self) -> Result<f64> {
        self.channel.read_float("avmax").await
    }

    /// Open-loop voltage range as (min, max).
    pub async fn voltage_range(&self) -> Result<(f64, f64)> {
        Ok((self.min_voltage().await?, self.max_voltage().await?))
    }

    /// Unit of closed-loop setpoints (e.g. micrometers or milliradians).
    pub async fn position_unit(&self) -> Result<String> {
        self.channel.read_string("unitcl").await
    }

    /// Unit of open-loop setpoints (volts).
    pub async fn voltage_unit(&self) -> Result<String> {
        self.channel.read_string("unitol").await
    }

    /// The unit matching the current loop mode.
    pub async fn setpoint_unit(&self) -> Result<String> {
        match self.pid_mode().await? {
            PidLoopMode::ClosedLoop => self.position_unit().await,
            PidLoopMode::OpenLoop => self.voltage_unit().await,
        }
    }

    /// Name of the connected actuator.
    pub async fn actuator_name(&self) -> Result<String> {
        self.channel.read_string("desc").await
    }

    /// Serial number of the connected actuator.
    pub async fn actuator_serial_number(&self) -> Result<String> {
        self.channel.read_string("acserno").await
    }

    /// Name and serial number combined, for display.
    pub async fn actuator_description(&self) -> Result<String> {
        let name = self.actuator_name().await?;
        let serial = self.actuator_serial_number().await?;
        Ok(format!("{} #{}", name, serial))
    }

    /// Sets the slew rate limiter in units per millisecond.
    pub async fn set_slew_rate(&self, rate: f64) -> Result<()> {
        self.channel.write_value("sr", rate).await
    }

    /// The configured slew rate limit.
    pub async fn slew_rate(&self) -> Result<f64> {
        self.channel.read_float("sr").await
    }

    /// Enables or disables the setpoint low-pass filter.
    pub async fn set_setpoint_lowpass_enabled(&self, enabled: bool) -> Result<()> {
        self.channel
            .send(&Command::new("setlpon")?.arg(i64::from(enabled)))
            .await
    }

    /// Whether the setpoint low-pass filter is enabled.
    pub async fn setpoint_lowpass_enabled(&self) -> Result<bool> {
        Ok(self.channel.read_int("setlpon").await? != 0)
    }

    /// Sets the setpoint low-pass cutoff frequency in Hz.
    pub async fn set_setpoint_lowpass_frequency(&self, freq_hz: f64) -> Result<()> {
        self.channel.write_value("setlpf", freq_hz).await
    }

    /// The setpoint low-pass cutoff frequency in Hz.
    pub async fn setpoint_lowpass_frequency(&self) -> Result<f64> {
        self.channel.read_float("setlpf").await
    }
}
