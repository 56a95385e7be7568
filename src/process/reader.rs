//! Stream reader tasks for the CLI's stdout and stderr.
//!
//! Both readers are driven by [`FramedRead`] over [`NdjsonCodec`] and run
//! until end of stream. Lines are forwarded in the order the process wrote
//! them; the final unterminated line is flushed at EOF by the codec.
//! Framing errors skip one line and reading continues, so the child never
//! blocks on a pipe nobody drains. Only an I/O failure ends a reader.

use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tracing::{debug, warn};

use crate::process::codec::NdjsonCodec;
use crate::process::ProcessEvent;
use crate::AppError;

/// Parse one stdout line.
///
/// Returns `None` for blank lines. Lines that are not valid JSON become
/// `{"type":"text","data":<line>}`.
#[must_use]
pub fn parse_stdout_line(line: &str) -> Option<Value> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    Some(
        serde_json::from_str(trimmed)
            .unwrap_or_else(|_| json!({ "type": "text", "data": trimmed })),
    )
}

/// Read stdout to EOF, emitting one [`ProcessEvent::Data`] per line.
pub async fn read_stdout<R>(stdout: R, events: mpsc::Sender<ProcessEvent>)
where
    R: AsyncRead + Unpin + Send,
{
    read_lines(
        stdout,
        "stdout",
        |line| parse_stdout_line(line).map(ProcessEvent::Data),
        &events,
    )
    .await;
}

/// Read stderr to EOF, emitting one [`ProcessEvent::Error`] per line.
pub async fn read_stderr<R>(stderr: R, events: mpsc::Sender<ProcessEvent>)
where
    R: AsyncRead + Unpin + Send,
{
    read_lines(
        stderr,
        "stderr",
        |line| {
            let trimmed = line.trim_end();
            (!trimmed.trim().is_empty()).then(|| ProcessEvent::Error(trimmed.to_owned()))
        },
        &events,
    )
    .await;
}

async fn read_lines<R, F>(
    stream: R,
    stream_name: &'static str,
    to_event: F,
    events: &mpsc::Sender<ProcessEvent>,
) where
    R: AsyncRead + Unpin + Send,
    F: Fn(&str) -> Option<ProcessEvent>,
{
    let mut framed = FramedRead::new(stream, NdjsonCodec::new());

    while let Some(item) = framed.next().await {
        match item {
            Ok(line) => {
                let Some(event) = to_event(&line) else {
                    continue;
                };
                if events.send(event).await.is_err() {
                    // Keep draining so the process never blocks on a full pipe.
                    debug!(stream = stream_name, "event receiver dropped");
                }
            }
            Err(AppError::Process(msg)) => {
                warn!(stream = stream_name, error = msg.as_str(), "framing error, line skipped");
            }
            Err(err) => {
                warn!(stream = stream_name, %err, "stream read failed");
                let _ = events
                    .send(ProcessEvent::Error(format!("{stream_name} read failed: {err}")))
                    .await;
                break;
            }
        }
    }

    debug!(stream = stream_name, "stream reached EOF");
}
