//! Data recorder control and readback.
//!
//! The controller samples two signals at 20 kHz into a pair of 6144-sample
//! banks. This module configures what gets recorded (`recsrc`), how the
//! recorder starts (`recast`), decimation and length (`recstr`, `reclen`),
//! runs it (`recrun`), and reads banks back in chunks (`recoutf`).

use crate::channel::{last_token, token_to, Command, CommandChannel};
use crate::error::{Nv200Error, Result};
use crate::poll::{poll_until, DEFAULT_POLL_INTERVAL};
use crate::transfer::{download_samples, DownloadRequest, Progress, SampleBuffer};
use crate::types::{DataRecorderSource, RecorderAutoStartMode};
use std::time::Duration;
use tracing::debug;

/// Fixed base sample rate of the recorder hardware.
pub const SAMPLE_RATE_HZ: f64 = 20_000.0;

/// Samples per recorder bank.
pub const BUFFER_SIZE: usize = 6144;

/// `reclen` value selecting endless (ring buffer) recording.
pub const INFINITE_RECORDING: usize = 0;

/// Response timeout for bank readback; block reads are much slower than
/// scalar parameter reads.
const READ_TIMEOUT: Duration = Duration::from_secs(6);

/// Number of recorder channels (banks).
const CHANNEL_COUNT: usize = 2;

/// Effective recorder configuration after fitting a requested duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecorderParams {
    /// Samples that will be recorded per bank.
    pub buffer_size: usize,
    /// Decimation applied to the 20 kHz base rate.
    pub stride: usize,
    /// Resulting sample rate in Hz.
    pub sample_rate_hz: f64,
}

/// Handle to the device's data recorder, borrowed from a command channel.
pub struct DataRecorder<'a> {
    channel: &'a CommandChannel,
}

impl<'a> DataRecorder<'a> {
    pub(crate) fn new(channel: &'a CommandChannel) -> Self {
        Self { channel }
    }

    /// Selects the signal recorded into bank `channel`.
    pub async fn set_data_source(
        &self,
        channel: usize,
        source: DataRecorderSource,
    ) -> Result<()> {
        self.channel
            .send(&Command::new("recsrc")?.arg(channel).arg(source as i64))
            .await
    }

    /// The signal currently recorded into bank `channel`.
    pub async fn data_source(&self, channel: usize) -> Result<DataRecorderSource> {
        let values = self
            .channel
            .query(&Command::new("recsrc")?.arg(channel))
            .await?;
        let code: i64 = token_to("recsrc", last_token("recsrc", &values)?)?;
        DataRecorderSource::try_from(code).map_err(|code| Nv200Error::Value {
            keyword: "recsrc".into(),
            token: code.to_string(),
            reason: "unknown recorder source code".into(),
        })
    }

    /// Sets when the recorder starts automatically.
    pub async fn set_autostart_mode(&self, mode: RecorderAutoStartMode) -> Result<()> {
        self.channel.write_value("recast", mode as i64).await
    }

    /// The configured autostart behavior.
    pub async fn autostart_mode(&self) -> Result<RecorderAutoStartMode> {
        let code = self.channel.read_int("recast").await?;
        RecorderAutoStartMode::try_from(code).map_err(|code| Nv200Error::Value {
            keyword: "recast".into(),
            token: code.to_string(),
            reason: "unknown autostart mode code".into(),
        })
    }

    /// Sets the decimation: record every `stride`-th 20 kHz sample.
    pub async fn set_stride(&self, stride: usize) -> Result<()> {
        self.channel.write_value("recstr", stride).await
    }

    /// The configured decimation.
    pub async fn stride(&self) -> Result<usize> {
        let stride = self.channel.read_int("recstr").await?;
        Ok(stride.max(1) as usize)
    }

    /// Sets how many samples each bank records.
    ///
    /// `0` ([`INFINITE_RECORDING`]) arms the ring-buffer mode; otherwise the
    /// length must fit the bank.
    pub async fn set_buffer_size(&self, length: usize) -> Result<()> {
        if length > BUFFER_SIZE {
            return Err(Nv200Error::Command {
                keyword: "reclen".into(),
                reason: "recording length exceeds the bank size",
            });
        }
        self.channel.write_value("reclen", length).await
    }

    /// The configured per-bank recording length.
    pub async fn buffer_size(&self) -> Result<usize> {
        Ok(self.channel.read_int("reclen").await?.max(0) as usize)
    }

    /// Fits stride and length to a requested recording duration.
    ///
    /// Picks the smallest stride whose decimated bank covers the duration,
    /// then sizes the bank to the duration at the resulting rate. Returns the
    /// effective parameters, which quantize the request.
    pub async fn set_recording_duration_ms(&self, milliseconds: f64) -> Result<RecorderParams> {
        let duration_s = milliseconds / 1000.0;
        let bank_duration_s = BUFFER_SIZE as f64 / SAMPLE_RATE_HZ;
        let stride = (duration_s / bank_duration_s) as usize + 1;
        let sample_rate_hz = SAMPLE_RATE_HZ / stride as f64;
        let buffer_size = ((sample_rate_hz * duration_s).ceil() as usize).min(BUFFER_SIZE);

        self.set_stride(stride).await?;
        self.set_buffer_size(buffer_size).await?;
        debug!(stride, buffer_size, sample_rate_hz, "recorder duration fitted");
        Ok(RecorderParams {
            buffer_size,
            stride,
            sample_rate_hz,
        })
    }

    /// Starts recording into both banks.
    pub async fn start(&self) -> Result<()> {
        self.channel.write_value("recrun", 1).await
    }

    /// Stops a running recording.
    pub async fn stop(&self) -> Result<()> {
        self.channel.write_value("recrun", 0).await
    }

    /// Whether a recording is currently running.
    pub async fn is_recording(&self) -> Result<bool> {
        Ok(self.channel.read_int("recrun").await? != 0)
    }

    /// Suspends until the recording finishes or `budget` elapses.
    pub async fn wait_until_finished(&self, budget: Duration) -> Result<()> {
        poll_until(
            "recrun",
            || async move { Ok(!self.is_recording().await?) },
            DEFAULT_POLL_INTERVAL,
            budget,
        )
        .await
    }

    /// Reads up to `max_samples` recorded values from bank `channel`.
    ///
    /// The returned buffer carries the bank's source label and the sample
    /// spacing implied by the configured stride.
    pub async fn read_channel(
        &self,
        channel: usize,
        max_samples: usize,
        progress: Option<Progress<'_>>,
    ) -> Result<SampleBuffer> {
        let source = self.data_source(channel).await?;
        let stride = self.stride().await?;
        let request = DownloadRequest {
            channel,
            source: source.to_string(),
            sample_time_ms: stride as f64 * 1000.0 / SAMPLE_RATE_HZ,
            timeout: READ_TIMEOUT,
            ..DownloadRequest::new("recoutf", max_samples.min(BUFFER_SIZE))
        };
        download_samples(self.channel, &request, progress).await
    }

    /// Reads both banks back to back.
    pub async fn read_all(&self, max_samples: usize) -> Result<Vec<SampleBuffer>> {
        let mut buffers = Vec::with_capacity(CHANNEL_COUNT);
        for channel in 0..CHANNEL_COUNT {
            buffers.push(self.read_channel(channel, max_samples, None).await?);
        }
        Ok(buffers)
    }
}
