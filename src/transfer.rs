//! Chunked bulk sample transfer.
//!
//! Waveform upload and recorder readback move thousands of values over a
//! command channel whose line length is limited, so both directions are
//! chunked into bounded command exchanges. Uploads write
//! `<keyword>,<start_index>,<v1>,...,<vN>` per chunk; downloads query
//! `<keyword>,<channel>,<offset>,<stride>,<count>` and accumulate the
//! returned values. A progress callback, if given, fires after every chunk
//! with (transferred, total).

use crate::channel::{token_to, Command, CommandChannel};
use crate::error::Result;
use crate::transport::DEFAULT_TIMEOUT;
use std::time::Duration;
use tracing::debug;

/// Largest number of values carried per chunk in either direction.
pub const DEFAULT_CHUNK_LEN: usize = 64;

/// Progress observer: called with (samples transferred so far, total).
pub type Progress<'a> = &'a mut (dyn FnMut(usize, usize) + Send);

/// A block of samples with its acquisition metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    /// Human-readable label of the recorded signal.
    pub source: String,
    /// Time between consecutive samples, in milliseconds.
    pub sample_time_ms: f64,
    /// The sample values.
    pub values: Vec<f64>,
}

impl SampleBuffer {
    /// Number of samples.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sample timestamps in milliseconds, aligned with `values`.
    pub fn sample_times_ms(&self) -> impl Iterator<Item = f64> + '_ {
        let dt = self.sample_time_ms;
        (0..self.values.len()).map(move |i| i as f64 * dt)
    }
}

/// Parameters for a chunked upload.
#[derive(Debug, Clone)]
pub struct UploadRequest<'a> {
    /// Command keyword carrying the data (e.g. the waveform buffer write).
    pub keyword: &'a str,
    /// Device-side index of the first uploaded value.
    pub start_index: usize,
    /// Values per command line.
    pub chunk_len: usize,
}

impl<'a> UploadRequest<'a> {
    /// Upload to `keyword` starting at index 0 with the default chunk length.
    pub fn new(keyword: &'a str) -> Self {
        Self {
            keyword,
            start_index: 0,
            chunk_len: DEFAULT_CHUNK_LEN,
        }
    }
}

/// Uploads `values` in chunks, reporting progress after each chunk.
///
/// Each chunk is a single write command; the first failed chunk aborts the
/// transfer and no further chunks are sent.
pub async fn upload_samples(
    channel: &CommandChannel,
    request: &UploadRequest<'_>,
    values: &[f64],
    mut progress: Option<Progress<'_>>,
) -> Result<()> {
    let chunk_len = request.chunk_len.max(1);
    let total = values.len();
    let mut sent = 0;

    for (i, chunk) in values.chunks(chunk_len).enumerate() {
        let mut cmd = Command::new(request.keyword)?.arg(request.start_index + i * chunk_len);
        for value in chunk {
            cmd = cmd.arg(value);
        }
        channel.send(&cmd).await?;
        sent += chunk.len();
        debug!(keyword = request.keyword, sent, total, "upload chunk");
        if let Some(cb) = progress.as_deref_mut() {
            cb(sent, total);
        }
    }
    Ok(())
}

/// Parameters for a chunked download.
#[derive(Debug, Clone)]
pub struct DownloadRequest<'a> {
    /// Command keyword serving the data (e.g. the recorder block read).
    pub keyword: &'a str,
    /// Device-side channel number.
    pub channel: usize,
    /// Buffer offset of the first requested sample.
    pub start_index: usize,
    /// Decimation: keep every `stride`-th sample.
    pub stride: usize,
    /// Upper bound on the number of samples to fetch.
    pub max_samples: usize,
    /// Values requested per command.
    pub chunk_len: usize,
    /// Label stored in the resulting buffer.
    pub source: String,
    /// Sample spacing stored in the resulting buffer, in milliseconds.
    pub sample_time_ms: f64,
    /// Per-chunk response timeout; block reads are slower than scalar reads.
    pub timeout: Duration,
}

impl<'a> DownloadRequest<'a> {
    /// Download up to `max_samples` from channel 0 of `keyword`, stride 1.
    pub fn new(keyword: &'a str, max_samples: usize) -> Self {
        Self {
            keyword,
            channel: 0,
            start_index: 0,
            stride: 1,
            max_samples,
            chunk_len: DEFAULT_CHUNK_LEN,
            source: String::new(),
            sample_time_ms: 0.0,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Downloads samples chunk by chunk until the cap is reached or the device
/// runs out of data.
///
/// After each chunk the read offset advances by chunk length times stride. A
/// short chunk (fewer values than requested) means the device buffer is
/// exhausted and ends the transfer. Progress reports the cap as the total.
pub async fn download_samples(
    channel: &CommandChannel,
    request: &DownloadRequest<'_>,
    mut progress: Option<Progress<'_>>,
) -> Result<SampleBuffer> {
    let chunk_len = request.chunk_len.max(1);
    let stride = request.stride.max(1);
    let mut offset = request.start_index;
    let mut values: Vec<f64> = Vec::new();

    while values.len() < request.max_samples {
        let want = chunk_len.min(request.max_samples - values.len());
        let cmd = Command::new(request.keyword)?
            .arg(request.channel)
            .arg(offset)
            .arg(stride)
            .arg(want);
        let tokens = channel.query_with_timeout(&cmd, request.timeout).await?;
        let got = tokens.len();
        for token in &tokens {
            values.push(token_to(request.keyword, token)?);
        }
        debug!(
            keyword = request.keyword,
            offset,
            got,
            collected = values.len(),
            "download chunk"
        );
        if let Some(cb) = progress.as_deref_mut() {
            cb(values.len().min(request.max_samples), request.max_samples);
        }
        if got < want {
            break;
        }
        offset += want * stride;
    }

    values.truncate(request.max_samples);
    Ok(SampleBuffer {
        source: request.source.clone(),
        sample_time_ms: request.sample_time_ms,
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_times_follow_the_spacing() {
        let buffer = SampleBuffer {
            source: "Setpoint (um or mrad)".into(),
            sample_time_ms: 0.05,
            values: vec![0.0, 1.0, 2.0],
        };
        let times: Vec<f64> = buffer.sample_times_ms().collect();
        assert_eq!(times, vec![0.0, 0.05, 0.1]);
    }

    #[test]
    fn upload_request_defaults() {
        let request = UploadRequest::new("gparb");
        assert_eq!(request.start_index, 0);
        assert_eq!(request.chunk_len, DEFAULT_CHUNK_LEN);
    }
}
