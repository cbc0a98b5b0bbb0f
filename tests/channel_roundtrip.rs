//! Command/response framing against a scripted transport.

mod support;

use nv200::channel::{Command, CommandChannel};
use nv200::error::Nv200Error;
use nv200::types::ErrorCode;
use support::MockTransport;

fn channel(mock: MockTransport) -> CommandChannel {
    CommandChannel::new(Box::new(mock))
}

#[tokio::test]
async fn echoed_request_tokens_come_back_as_values() {
    let channel = channel(MockTransport::echoing());
    let cmd = Command::new("set").expect("valid keyword").arg(42.5).arg(1);
    let values = channel.query(&cmd).await.expect("round trip");
    assert_eq!(values, vec!["42.5".to_string(), "1".to_string()]);
}

#[tokio::test]
async fn typed_reads_convert_the_first_value() {
    let channel = channel(MockTransport::new(|line: &str| match line {
        "meas" => Some("meas,12.625".to_string()),
        "cl" => Some("cl,1".to_string()),
        "desc" => Some("desc,TRITOR100SG".to_string()),
        _ => None,
    }));

    assert_eq!(channel.read_float("meas").await.expect("float"), 12.625);
    assert_eq!(channel.read_int("cl").await.expect("int"), 1);
    assert_eq!(
        channel.read_string("desc").await.expect("string"),
        "TRITOR100SG"
    );
}

#[tokio::test]
async fn device_error_frames_surface_as_device_errors() {
    let channel = channel(MockTransport::new(|_: &str| Some("error,4".to_string())));
    let err = channel
        .query(&Command::new("set").expect("valid keyword").arg(1e9))
        .await
        .expect_err("device rejects");
    assert!(matches!(
        err,
        Nv200Error::Device(ErrorCode::ParameterOutOfRange)
    ));
}

#[tokio::test]
async fn echo_mismatch_is_a_protocol_error() {
    // Device answers with a stale frame from a different command.
    let channel = channel(MockTransport::new(|_: &str| Some("meas,1.0".to_string())));
    let err = channel
        .query(&Command::new("set").expect("valid keyword").arg(1))
        .await
        .expect_err("desynchronized stream");
    assert!(matches!(
        err,
        Nv200Error::Protocol { ref sent, ref got, .. } if sent == "set" && got == "meas"
    ));
}

#[tokio::test]
async fn echo_mismatch_leaves_the_cache_untouched() {
    let channel = CommandChannel::with_cacheable(
        Box::new(MockTransport::new(|_: &str| Some("meas,1".to_string()))),
        &["cl"],
    );
    let err = channel
        .query(&Command::new("cl").expect("valid keyword"))
        .await
        .expect_err("desynchronized stream");
    assert!(matches!(err, Nv200Error::Protocol { .. }));
    assert!(!channel.cache().contains("cl"));
}

#[tokio::test]
async fn read_values_returns_the_full_value_list() {
    let channel = channel(MockTransport::new(|line: &str| match line {
        "recout" => Some("recout,0,17,5.25".to_string()),
        _ => None,
    }));
    assert_eq!(
        channel.read_values("recout").await.expect("values"),
        vec!["0".to_string(), "17".to_string(), "5.25".to_string()]
    );
}

#[tokio::test]
async fn late_frame_from_a_timed_out_query_does_not_poison_the_next() {
    let mock = MockTransport::new(|line: &str| match line {
        "set,1" => Some("set,1".to_string()),
        _ => None,
    });
    let pending = mock.pending_handle();
    let channel = channel(mock);

    // The device misses its window and the query times out.
    let err = channel
        .query(&Command::new("meas").expect("valid keyword"))
        .await;
    assert!(matches!(err, Err(Nv200Error::Timeout { .. })));

    // Its response arrives afterwards and sits in the receive buffer.
    pending
        .lock()
        .expect("pending")
        .push_back(b"meas,12.5\r\n".to_vec());

    // The next round trip discards the stale frame instead of matching it.
    let values = channel
        .query(&Command::new("set").expect("valid keyword").arg(1))
        .await
        .expect("round trip");
    assert_eq!(values, vec!["1".to_string()]);
}

#[tokio::test]
async fn missing_response_times_out_with_the_keyword() {
    let channel = channel(MockTransport::write_only());
    let err = channel
        .query(&Command::new("meas").expect("valid keyword"))
        .await
        .expect_err("no response scripted");
    assert!(matches!(
        err,
        Nv200Error::Timeout { ref keyword, .. } if keyword == "meas"
    ));
}

#[tokio::test]
async fn firmware_byte_values_above_ascii_decode_losslessly() {
    // The firmware reports units with a raw 0xB5 micro sign, which is not
    // valid UTF-8 on the wire.
    let channel = channel(MockTransport::new(|line: &str| match line {
        "unitcl" => Some("unitcl,\u{B5}m".to_string()),
        _ => None,
    }));
    assert_eq!(channel.read_string("unitcl").await.expect("unit"), "\u{B5}m");
}

#[tokio::test]
async fn pure_writes_transmit_the_serialized_line() {
    let mock = MockTransport::write_only();
    let written = mock.written();
    let channel = channel(mock);

    channel
        .send(&Command::new("set").expect("valid keyword").arg(20.0))
        .await
        .expect("write");
    assert_eq!(
        written.lock().expect("log").as_slice(),
        &["set,20".to_string()]
    );
}
