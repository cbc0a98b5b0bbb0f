//! Arbitrary waveform generator control.
//!
//! The generator plays up to 1024 setpoint values from an on-device buffer
//! at a multiple of the 50 us base sample time. This module builds waveforms
//! host-side (including a sine helper that fits the frequency onto the
//! sample-time grid), uploads them in chunks (`gparb`), and controls playback
//! (`gtarb`, `goarb`, `gsarb`, `gearb`, `gcarb`, `grun`).

use crate::channel::CommandChannel;
use crate::error::{Nv200Error, Result};
use crate::poll::{poll_until, DEFAULT_POLL_INTERVAL};
use crate::transfer::{upload_samples, Progress, UploadRequest};
use crate::types::ModulationSource;
use std::f64::consts::TAU;
use std::time::Duration;
use tracing::debug;

/// Samples the on-device waveform buffer can hold.
pub const BUFFER_SIZE: usize = 1024;

/// Base sample time of the generator; playback runs at a multiple of this.
pub const BASE_SAMPLE_TIME_US: u64 = 50;

/// Largest sample-time multiplier the firmware accepts.
const MAX_SAMPLE_FACTOR: u64 = 65_535;

/// `gcarb` value selecting endless playback.
pub const INFINITE_CYCLES: u32 = 0;

/// A host-side waveform: values plus their playback spacing.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    /// Setpoint values, at most [`BUFFER_SIZE`] of them.
    pub values: Vec<f64>,
    /// Time between consecutive samples, in milliseconds. Must be a multiple
    /// of the 50 us base sample time.
    pub sample_time_ms: f64,
}

impl Waveform {
    /// Builds one period of a sine wave between `low` and `high`.
    ///
    /// The sample time is the smallest multiple of the base sample time at
    /// which one period fits the buffer, so low frequencies trade resolution
    /// in time rather than truncating the wave.
    pub fn sine(freq_hz: f64, low: f64, high: f64, phase_shift_rad: f64) -> Self {
        let base_s = BASE_SAMPLE_TIME_US as f64 / 1e6;
        let period_s = 1.0 / freq_hz;
        let factor = (period_s / (BUFFER_SIZE as f64 * base_s)).ceil().max(1.0);
        let sample_time_s = factor * base_s;
        let len = ((period_s / sample_time_s).round() as usize).clamp(1, BUFFER_SIZE);

        let offset = (high + low) / 2.0;
        let amplitude = (high - low) / 2.0;
        let values = (0..len)
            .map(|i| offset + amplitude * (TAU * i as f64 / len as f64 + phase_shift_rad).sin())
            .collect();
        Self {
            values,
            sample_time_ms: sample_time_s * 1000.0,
        }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the waveform holds no samples.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The sample time as a multiplier of the base sample time.
    pub fn sample_factor(&self) -> u64 {
        let factor = (self.sample_time_ms * 1000.0 / BASE_SAMPLE_TIME_US as f64).round() as u64;
        factor.clamp(1, MAX_SAMPLE_FACTOR)
    }

    /// Duration of one playback cycle, in milliseconds.
    pub fn cycle_time_ms(&self) -> f64 {
        self.values.len() as f64 * self.sample_time_ms
    }
}

/// Handle to the device's waveform generator, borrowed from a command channel.
pub struct WaveformGenerator<'a> {
    channel: &'a CommandChannel,
}

impl<'a> WaveformGenerator<'a> {
    pub(crate) fn new(channel: &'a CommandChannel) -> Self {
        Self { channel }
    }

    /// Uploads a waveform into the device buffer and applies its sample time.
    ///
    /// With `adjust_loop` the loop window is reset to cover the whole
    /// uploaded waveform; otherwise previously configured indices stay.
    pub async fn set_waveform(
        &self,
        waveform: &Waveform,
        adjust_loop: bool,
        progress: Option<Progress<'_>>,
    ) -> Result<()> {
        if waveform.is_empty() {
            return Err(Nv200Error::Command {
                keyword: "gparb".into(),
                reason: "waveform holds no samples",
            });
        }
        if waveform.len() > BUFFER_SIZE {
            return Err(Nv200Error::Command {
                keyword: "gparb".into(),
                reason: "waveform exceeds the device buffer",
            });
        }

        upload_samples(
            self.channel,
            &UploadRequest::new("gparb"),
            &waveform.values,
            progress,
        )
        .await?;
        self.channel
            .write_value("gtarb", waveform.sample_factor())
            .await?;
        if adjust_loop {
            self.configure_loop(0, 0, waveform.len() - 1).await?;
        }
        debug!(samples = waveform.len(), factor = waveform.sample_factor(), "waveform uploaded");
        Ok(())
    }

    /// Sets the playback sample time, rounded onto the base grid.
    ///
    /// Returns the sample time actually configured.
    pub async fn set_sample_time_us(&self, sample_time_us: u64) -> Result<u64> {
        let factor = ((sample_time_us + BASE_SAMPLE_TIME_US / 2) / BASE_SAMPLE_TIME_US)
            .clamp(1, MAX_SAMPLE_FACTOR);
        self.channel.write_value("gtarb", factor).await?;
        Ok(factor * BASE_SAMPLE_TIME_US)
    }

    /// Buffer index playback starts from.
    pub async fn set_start_index(&self, index: usize) -> Result<()> {
        self.channel.write_value("goarb", index).await
    }

    /// First buffer index of the repeated loop window.
    pub async fn set_loop_start_index(&self, index: usize) -> Result<()> {
        self.channel.write_value("gsarb", index).await
    }

    /// Last buffer index of the repeated loop window.
    pub async fn set_loop_end_index(&self, index: usize) -> Result<()> {
        self.channel.write_value("gearb", index).await
    }

    /// Sets start and loop indices in one go.
    pub async fn configure_loop(
        &self,
        start: usize,
        loop_start: usize,
        loop_end: usize,
    ) -> Result<()> {
        self.set_start_index(start).await?;
        self.set_loop_start_index(loop_start).await?;
        self.set_loop_end_index(loop_end).await
    }

    /// Number of playback cycles; [`INFINITE_CYCLES`] repeats forever.
    pub async fn set_cycles(&self, cycles: u32) -> Result<()> {
        self.channel.write_value("gcarb", cycles).await
    }

    /// Starts playback, routing the setpoint to the generator first.
    pub async fn start(&self, cycles: Option<u32>, start_index: Option<usize>) -> Result<()> {
        if let Some(cycles) = cycles {
            self.set_cycles(cycles).await?;
        }
        if let Some(index) = start_index {
            self.set_start_index(index).await?;
        }
        self.channel
            .write_value("modsrc", ModulationSource::WaveformGenerator as i64)
            .await?;
        self.channel.write_value("grun", 1).await
    }

    /// Stops playback.
    pub async fn stop(&self) -> Result<()> {
        self.channel.write_value("grun", 0).await
    }

    /// Whether playback is currently running.
    pub async fn is_running(&self) -> Result<bool> {
        Ok(self.channel.read_int("grun").await? != 0)
    }

    /// Suspends until playback finishes or `budget` elapses.
    pub async fn wait_until_finished(&self, budget: Duration) -> Result<()> {
        poll_until(
            "grun",
            || async move { Ok(!self.is_running().await?) },
            DEFAULT_POLL_INTERVAL,
            budget,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_sine_stays_on_the_base_sample_time() {
        // 1/(1024 * 50us) ~ 19.53 Hz; anything faster stays on factor 1.
        let wave = Waveform::sine(100.0, 0.0, 80.0, 0.0);
        assert_eq!(wave.sample_factor(), 1);
        assert_eq!(wave.len(), 200); // 10 ms period / 50 us
        assert!(wave.len() <= BUFFER_SIZE);
    }

    #[test]
    fn slow_sine_stretches_the_sample_time() {
        let wave = Waveform::sine(1.0, -10.0, 10.0, 0.0);
        assert!(wave.sample_factor() > 1);
        assert!(wave.len() <= BUFFER_SIZE);
        // One cycle still spans the full period.
        assert!((wave.cycle_time_ms() - 1000.0).abs() < wave.sample_time_ms);
    }

    #[test]
    fn sine_respects_the_requested_range() {
        let wave = Waveform::sine(50.0, 10.0, 70.0, 0.0);
        let max = wave.values.iter().cloned().fold(f64::MIN, f64::max);
        let min = wave.values.iter().cloned().fold(f64::MAX, f64::min);
        assert!(max <= 70.0 + 1e-9);
        assert!(min >= 10.0 - 1e-9);
        assert!(max > 69.0);
        assert!(min < 11.0);
    }

    #[test]
    fn phase_shift_moves_the_first_sample() {
        let unshifted = Waveform::sine(100.0, -1.0, 1.0, 0.0);
        let shifted = Waveform::sine(100.0, -1.0, 1.0, std::f64::consts::FRAC_PI_2);
        assert!(unshifted.values[0].abs() < 1e-9);
        assert!((shifted.values[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn sample_factor_rounds_onto_the_grid() {
        let wave = Waveform {
            values: vec![0.0; 4],
            sample_time_ms: 0.1, // 100 us
        };
        assert_eq!(wave.sample_factor(), 2);
        assert!((wave.cycle_time_ms() - 0.4).abs() < 1e-12);
    }
}
