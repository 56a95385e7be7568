//! Unit tests for stdout/stderr framing and line parsing.
//!
//! Covers:
//! - chunked delivery is buffered until the newline
//! - the trailing unterminated line is flushed at EOF
//! - non-JSON lines degrade to text events
//! - over-long lines are skipped without ending the stream
//! - invalid UTF-8 is decoded lossily and later lines still arrive
//! - stderr lines become error events

use std::time::Duration;

use bytes::BytesMut;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::codec::Decoder;

use agent_relay::process::codec::{NdjsonCodec, MAX_LINE_BYTES};
use agent_relay::process::reader::{parse_stdout_line, read_stderr, read_stdout};
use agent_relay::process::ProcessEvent;
use agent_relay::AppError;

async fn drain(mut rx: mpsc::Receiver<ProcessEvent>) -> Vec<ProcessEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

#[test]
fn codec_buffers_partial_line_across_chunks() {
    let mut codec = NdjsonCodec::new();
    let mut buf = BytesMut::from(&b"{\"a\":1}\n{\"b\":2"[..]);

    assert_eq!(
        codec.decode(&mut buf).unwrap().as_deref(),
        Some("{\"a\":1}")
    );
    assert_eq!(codec.decode(&mut buf).unwrap(), None);

    buf.extend_from_slice(b"}\n");
    assert_eq!(
        codec.decode(&mut buf).unwrap().as_deref(),
        Some("{\"b\":2}")
    );
}

#[test]
fn codec_flushes_partial_line_at_eof() {
    let mut codec = NdjsonCodec::new();
    let mut buf = BytesMut::from(&b"tail without newline"[..]);

    assert_eq!(codec.decode(&mut buf).unwrap(), None);
    assert_eq!(
        codec.decode_eof(&mut buf).unwrap().as_deref(),
        Some("tail without newline")
    );
}

#[test]
fn codec_rejects_over_long_line_then_recovers() {
    let mut codec = NdjsonCodec::with_max_length(8);
    let mut buf = BytesMut::from(&b"0123456789abcdef\nok\n"[..]);

    assert!(matches!(codec.decode(&mut buf), Err(AppError::Process(_))));
    assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("ok"));
}

#[test]
fn over_long_error_reports_configured_limit() {
    let mut codec = NdjsonCodec::with_max_length(8);
    assert_eq!(codec.max_length(), 8);

    let mut buf = BytesMut::from(&b"0123456789abcdef\n"[..]);
    match codec.decode(&mut buf) {
        Err(AppError::Process(msg)) => assert!(msg.contains("exceeded 8 bytes"), "{msg}"),
        other => panic!("expected a framing error, got {other:?}"),
    }
}

#[test]
fn default_limit_is_one_mebibyte() {
    assert_eq!(MAX_LINE_BYTES, 1024 * 1024);
    assert_eq!(NdjsonCodec::new().max_length(), MAX_LINE_BYTES);
}

#[test]
fn codec_decodes_invalid_utf8_lossily_and_strips_cr() {
    let mut codec = NdjsonCodec::new();
    let mut buf = BytesMut::from(&b"\xff\xfe bad\r\nnext\n"[..]);

    let first = codec.decode(&mut buf).unwrap().expect("first line");
    assert!(first.ends_with(" bad"));
    assert!(first.contains('\u{FFFD}'));
    assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("next"));
}

#[test]
fn json_lines_parse_and_text_lines_are_wrapped() {
    assert_eq!(
        parse_stdout_line("{\"type\":\"result\"}"),
        Some(json!({ "type": "result" }))
    );
    assert_eq!(
        parse_stdout_line("plain output"),
        Some(json!({ "type": "text", "data": "plain output" }))
    );
    assert_eq!(parse_stdout_line("   "), None);
}

#[tokio::test]
async fn stdout_chunks_yield_events_in_order() {
    let (mut tx_io, rx_io) = tokio::io::duplex(64);
    let (tx, rx) = mpsc::channel(16);
    let reader = tokio::spawn(read_stdout(rx_io, tx));

    tx_io.write_all(b"{\"a\":1}\n{\"b\":2").await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    tx_io.write_all(b"}\n").await.unwrap();
    drop(tx_io);

    reader.await.unwrap();
    assert_eq!(
        drain(rx).await,
        vec![
            ProcessEvent::Data(json!({ "a": 1 })),
            ProcessEvent::Data(json!({ "b": 2 })),
        ]
    );
}

#[tokio::test]
async fn stdout_flushes_trailing_text_on_eof() {
    let (mut tx_io, rx_io) = tokio::io::duplex(64);
    let (tx, rx) = mpsc::channel(16);
    let reader = tokio::spawn(read_stdout(rx_io, tx));

    tx_io.write_all(b"\n{\"n\":1}\nDone.").await.unwrap();
    drop(tx_io);

    reader.await.unwrap();
    assert_eq!(
        drain(rx).await,
        vec![
            ProcessEvent::Data(json!({ "n": 1 })),
            ProcessEvent::Data(json!({ "type": "text", "data": "Done." })),
        ]
    );
}

#[tokio::test]
async fn stderr_lines_become_error_events() {
    let (mut tx_io, rx_io) = tokio::io::duplex(64);
    let (tx, rx) = mpsc::channel(16);
    let reader = tokio::spawn(read_stderr(rx_io, tx));

    tx_io.write_all(b"warning: one\n\nfatal: two").await.unwrap();
    drop(tx_io);

    reader.await.unwrap();
    assert_eq!(
        drain(rx).await,
        vec![
            ProcessEvent::Error("warning: one".into()),
            ProcessEvent::Error("fatal: two".into()),
        ]
    );
}

#[tokio::test]
async fn invalid_utf8_line_does_not_end_stdout() {
    let (mut tx_io, rx_io) = tokio::io::duplex(64);
    let (tx, rx) = mpsc::channel(16);
    let reader = tokio::spawn(read_stdout(rx_io, tx));

    tx_io
        .write_all(b"\xff\xfe garbage\n{\"a\":1}\n{\"b\":2}\n")
        .await
        .unwrap();
    drop(tx_io);

    reader.await.unwrap();
    let events = drain(rx).await;
    assert_eq!(events.len(), 3, "{events:?}");

    let ProcessEvent::Data(first) = &events[0] else {
        panic!("expected data, got {:?}", events[0]);
    };
    assert_eq!(first["type"], "text");
    assert!(first["data"].as_str().unwrap().ends_with("garbage"));
    assert_eq!(events[1], ProcessEvent::Data(json!({ "a": 1 })));
    assert_eq!(events[2], ProcessEvent::Data(json!({ "b": 2 })));
}

#[tokio::test]
async fn invalid_utf8_on_stderr_is_still_reported() {
    let (mut tx_io, rx_io) = tokio::io::duplex(64);
    let (tx, rx) = mpsc::channel(16);
    let reader = tokio::spawn(read_stderr(rx_io, tx));

    tx_io.write_all(b"bad \xc3\nfatal: two\n").await.unwrap();
    drop(tx_io);

    reader.await.unwrap();
    let events = drain(rx).await;
    assert_eq!(events.len(), 2, "{events:?}");
    assert_eq!(events[0], ProcessEvent::Error("bad \u{FFFD}".into()));
    assert_eq!(events[1], ProcessEvent::Error("fatal: two".into()));
}
