//! Shared value types for the NV200 controller.
//!
//! Enumerations mirror the numeric codes of the device firmware. Conversions
//! from wire integers go through `TryFrom<i64>` so that an out-of-range code
//! surfaces as a typed error instead of a panic.

use std::fmt;

/// PID loop control mode (`cl` command).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidLoopMode {
    /// Open loop: setpoint is a piezo voltage.
    OpenLoop = 0,
    /// Closed loop: setpoint is a position in actuator units.
    ClosedLoop = 1,
}

impl TryFrom<i64> for PidLoopMode {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, i64> {
        match value {
            0 => Ok(Self::OpenLoop),
            1 => Ok(Self::ClosedLoop),
            other => Err(other),
        }
    }
}

/// Source of the setpoint modulation (`modsrc` command).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModulationSource {
    /// Setpoint follows `set` commands over USB/Ethernet.
    SetCommand = 0,
    /// Setpoint follows the analog input.
    AnalogIn = 1,
    /// Setpoint follows the SPI interface.
    Spi = 2,
    /// Setpoint follows the arbitrary waveform generator.
    WaveformGenerator = 3,
}

impl TryFrom<i64> for ModulationSource {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, i64> {
        match value {
            0 => Ok(Self::SetCommand),
            1 => Ok(Self::AnalogIn),
            2 => Ok(Self::Spi),
            3 => Ok(Self::WaveformGenerator),
            other => Err(other),
        }
    }
}

/// Signal recorded by a data recorder channel (`recsrc` command).
///
/// The buffer (A or B) distinction is carried separately as the channel
/// number; this enum only names the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataRecorderSource {
    /// Piezo position (um or mrad).
    PiezoPosition = 0,
    /// Setpoint (um or mrad).
    Setpoint = 1,
    /// Piezo voltage (V).
    PiezoVoltage = 2,
    /// Position error.
    PositionError = 3,
    /// Absolute position error.
    AbsPositionError = 4,
    /// Piezo current, channel 1 (A).
    PiezoCurrent1 = 6,
    /// Piezo current, channel 2 (A).
    PiezoCurrent2 = 7,
}

impl TryFrom<i64> for DataRecorderSource {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, i64> {
        match value {
            0 => Ok(Self::PiezoPosition),
            1 => Ok(Self::Setpoint),
            2 => Ok(Self::PiezoVoltage),
            3 => Ok(Self::PositionError),
            4 => Ok(Self::AbsPositionError),
            6 => Ok(Self::PiezoCurrent1),
            7 => Ok(Self::PiezoCurrent2),
            other => Err(other),
        }
    }
}

impl fmt::Display for DataRecorderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::PiezoPosition => "Piezo Position (um or mrad)",
            Self::Setpoint => "Setpoint (um or mrad)",
            Self::PiezoVoltage => "Piezo Voltage (V)",
            Self::PositionError => "Position Error",
            Self::AbsPositionError => "Absolute Position Error",
            Self::PiezoCurrent1 => "Piezo Current 1 (A)",
            Self::PiezoCurrent2 => "Piezo Current 2 (A)",
        };
        write!(f, "{}", label)
    }
}

/// Autostart behavior of the data recorder (`recast` command).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderAutoStartMode {
    /// Recorder only starts on an explicit `recrun` command.
    Off = 0,
    /// Recorder starts on the next `set` command.
    StartOnSetCommand = 1,
    /// Recorder starts when the waveform generator starts.
    StartOnWaveformRun = 2,
}

impl TryFrom<i64> for RecorderAutoStartMode {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, i64> {
        match value {
            0 => Ok(Self::Off),
            1 => Ok(Self::StartOnSetCommand),
            2 => Ok(Self::StartOnWaveformRun),
            other => Err(other),
        }
    }
}

/// Error codes reported by the controller in `error,<code>` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Error not otherwise specified (code 1).
    Unspecified,
    /// Unknown command keyword (code 2).
    UnknownCommand,
    /// A required parameter was missing (code 3).
    ParameterMissing,
    /// A parameter was outside its admissible range (code 4).
    ParameterOutOfRange,
    /// Too many parameters for the command (code 5).
    TooManyParameters,
    /// The parameter is locked in the current mode (code 6).
    ParameterLocked,
    /// The amplifier is overloaded or overheated (code 7).
    Overload,
    /// Any code the library does not know.
    Other(u16),
}

impl ErrorCode {
    /// Maps a wire error code onto the known set; unknown codes are kept.
    pub fn from_value(code: u16) -> Self {
        match code {
            1 => Self::Unspecified,
            2 => Self::UnknownCommand,
            3 => Self::ParameterMissing,
            4 => Self::ParameterOutOfRange,
            5 => Self::TooManyParameters,
            6 => Self::ParameterLocked,
            7 => Self::Overload,
            other => Self::Other(other),
        }
    }

    /// The numeric code as transmitted by the firmware.
    pub fn code(&self) -> u16 {
        match self {
            Self::Unspecified => 1,
            Self::UnknownCommand => 2,
            Self::ParameterMissing => 3,
            Self::ParameterOutOfRange => 4,
            Self::TooManyParameters => 5,
            Self::ParameterLocked => 6,
            Self::Overload => 7,
            Self::Other(code) => *code,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = match self {
            Self::Unspecified => "error not specified",
            Self::UnknownCommand => "unknown command",
            Self::ParameterMissing => "parameter missing",
            Self::ParameterOutOfRange => "admissible parameter range exceeded",
            Self::TooManyParameters => "too many parameters",
            Self::ParameterLocked => "parameter locked",
            Self::Overload => "amplifier overload",
            Self::Other(code) => return write!(f, "unrecognized error code {}", code),
        };
        write!(f, "{} (code {})", description, self.code())
    }
}

/// Bitmask flags of the 16-bit device status register (`stat` command).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum StatusFlags {
    /// An actuator is connected.
    ActuatorConnected = 1 << 0,
    /// The actuator has a position sensor.
    SensorAvailable = 1 << 1,
    /// Closed loop control is active.
    ClosedLoopActive = 1 << 2,
    /// The piezo voltage is within limits.
    VoltageInRange = 1 << 3,
    /// The notch filter is enabled.
    NotchFilterActive = 1 << 4,
    /// The setpoint low-pass filter is enabled.
    SetpointLowpassActive = 1 << 5,
    /// The waveform generator is running.
    WaveformGeneratorRunning = 1 << 6,
    /// The data recorder is running.
    RecorderRunning = 1 << 7,
    /// The amplifier reports a temperature fault.
    TemperatureFault = 1 << 8,
}

/// Parsed 16-bit status register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRegister(pub u16);

impl StatusRegister {
    /// Tests whether a single flag is set.
    pub fn has_flag(self, flag: StatusFlags) -> bool {
        self.0 & (flag as u16) != 0
    }
}

impl fmt::Display for StatusRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_mode_round_trip() {
        assert_eq!(PidLoopMode::try_from(0), Ok(PidLoopMode::OpenLoop));
        assert_eq!(PidLoopMode::try_from(1), Ok(PidLoopMode::ClosedLoop));
        assert_eq!(PidLoopMode::try_from(7), Err(7));
    }

    #[test]
    fn recorder_source_skips_code_five() {
        // Code 5 is unassigned in the firmware's recsrc table.
        assert_eq!(DataRecorderSource::try_from(5), Err(5));
        assert_eq!(
            DataRecorderSource::try_from(6),
            Ok(DataRecorderSource::PiezoCurrent1)
        );
    }

    #[test]
    fn error_code_keeps_unknown_values() {
        assert_eq!(ErrorCode::from_value(2), ErrorCode::UnknownCommand);
        assert_eq!(ErrorCode::from_value(42), ErrorCode::Other(42));
        assert_eq!(ErrorCode::from_value(42).code(), 42);
    }

    #[test]
    fn status_register_flag_test() {
        let status = StatusRegister(0b0100_0101);
        assert!(status.has_flag(StatusFlags::ActuatorConnected));
        assert!(!status.has_flag(StatusFlags::SensorAvailable));
        assert!(status.has_flag(StatusFlags::ClosedLoopActive));
        assert!(status.has_flag(StatusFlags::WaveformGeneratorRunning));
    }
}
