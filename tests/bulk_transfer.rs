//! Chunked upload/download semantics against a scripted transport.

mod support;

use nv200::channel::CommandChannel;
use nv200::transfer::{
    download_samples, upload_samples, DownloadRequest, UploadRequest, DEFAULT_CHUNK_LEN,
};
use support::MockTransport;

#[tokio::test]
async fn upload_of_1024_values_takes_16_chunks() {
    let mock = MockTransport::write_only();
    let written = mock.written();
    let channel = CommandChannel::new(Box::new(mock));

    let values: Vec<f64> = (0..1024).map(f64::from).collect();
    let mut reports: Vec<(usize, usize)> = Vec::new();
    let mut on_progress = |done: usize, total: usize| reports.push((done, total));

    upload_samples(
        &channel,
        &UploadRequest::new("gparb"),
        &values,
        Some(&mut on_progress),
    )
    .await
    .expect("upload");

    let log = written.lock().expect("log");
    assert_eq!(log.len(), 1024 / DEFAULT_CHUNK_LEN);
    assert!(log[0].starts_with("gparb,0,0,1,"));
    assert!(log[1].starts_with("gparb,64,64,65,"));
    assert!(log[15].starts_with("gparb,960,960,"));

    // One report per chunk, strictly increasing, ending at the total.
    assert_eq!(reports.len(), 16);
    assert!(reports.windows(2).all(|w| w[0].0 < w[1].0));
    assert!(reports.iter().all(|&(_, total)| total == 1024));
    assert_eq!(reports.last(), Some(&(1024, 1024)));
}

#[tokio::test]
async fn failed_chunk_aborts_the_upload() {
    // The second chunk starts at index 8 and fails on the wire.
    let mock = MockTransport::write_only().fail_writes_with_prefix("gparb,8,");
    let written = mock.written();
    let channel = CommandChannel::new(Box::new(mock));

    let request = UploadRequest {
        chunk_len: 8,
        ..UploadRequest::new("gparb")
    };
    let values = vec![0.0; 32];
    let result = upload_samples(&channel, &request, &values, None).await;

    assert!(result.is_err());
    assert_eq!(written.lock().expect("log").len(), 1);
}

/// Serves a decimated view of a 100-sample device buffer.
fn buffer_responder(buffer_len: usize) -> impl FnMut(&str) -> Option<String> + Send {
    move |line: &str| {
        let fields: Vec<&str> = line.split(',').collect();
        if fields[0] != "recoutf" || fields.len() != 5 {
            return None;
        }
        let offset: usize = fields[2].parse().ok()?;
        let stride: usize = fields[3].parse().ok()?;
        let count: usize = fields[4].parse().ok()?;

        let values: Vec<String> = (0..count)
            .map(|i| offset + i * stride)
            .take_while(|&index| index < buffer_len)
            .map(|index| format!("{}.0", index))
            .collect();
        Some(format!("recoutf,{}", values.join(",")))
    }
}

#[tokio::test]
async fn download_with_stride_advances_the_offset_per_chunk() {
    let mock = MockTransport::new(buffer_responder(100));
    let written = mock.written();
    let channel = CommandChannel::new(Box::new(mock));

    let request = DownloadRequest {
        stride: 3,
        chunk_len: 16,
        ..DownloadRequest::new("recoutf", 50)
    };
    let buffer = download_samples(&channel, &request, None)
        .await
        .expect("download");

    // Indices 0, 3, 6, ... below 100: 34 samples, ending in a short chunk.
    assert_eq!(buffer.len(), 34);
    assert_eq!(buffer.values[0], 0.0);
    assert_eq!(buffer.values[1], 3.0);
    assert_eq!(buffer.values[33], 99.0);

    // Each request advances the offset by chunk length times stride.
    let log = written.lock().expect("log");
    assert_eq!(
        log.as_slice(),
        &[
            "recoutf,0,0,3,16".to_string(),
            "recoutf,0,48,3,16".to_string(),
            "recoutf,0,96,3,16".to_string(),
        ]
    );
}

#[tokio::test]
async fn download_stops_at_the_sample_cap() {
    let mock = MockTransport::new(buffer_responder(10_000));
    let written = mock.written();
    let channel = CommandChannel::new(Box::new(mock));

    let request = DownloadRequest {
        chunk_len: 16,
        ..DownloadRequest::new("recoutf", 40)
    };
    let mut reports: Vec<(usize, usize)> = Vec::new();
    let mut on_progress = |done: usize, total: usize| reports.push((done, total));
    let buffer = download_samples(&channel, &request, Some(&mut on_progress))
        .await
        .expect("download");

    assert_eq!(buffer.len(), 40);
    // The final chunk only asks for the remainder.
    let log = written.lock().expect("log");
    assert_eq!(log.len(), 3);
    assert_eq!(log[2], "recoutf,0,32,1,8");
    assert_eq!(reports, vec![(16, 40), (32, 40), (40, 40)]);
}
