//! The single user message written to the CLI's stdin.
//!
//! Each turn writes exactly one NDJSON line and then closes the stream:
//!
//! ```json
//! {"type":"user","message":{"role":"user","content":[
//!   {"type":"text","text":"..."},
//!   {"type":"image","source":{"type":"base64","media_type":"image/png","data":"..."}}
//! ]}}
//! ```

use serde_json::{json, Value};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::models::options::ProcessOptions;
use crate::{AppError, Result};

/// Build the user message for `options`: one text block followed by one
/// block per image.
#[must_use]
pub fn user_message(options: &ProcessOptions) -> Value {
    let mut content = Vec::with_capacity(options.images.len() + 1);
    content.push(json!({ "type": "text", "text": options.message }));
    content.extend(options.images.iter().map(|image| {
        json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": image.media_type,
                "data": image.data,
            }
        })
    }));

    json!({
        "type": "user",
        "message": { "role": "user", "content": content },
    })
}

/// Write `message` as one line to `stdin`, then shut the stream down.
///
/// # Errors
///
/// Returns [`AppError::Process`] if the write fails, typically because the
/// process already exited.
pub async fn write_message<W>(mut stdin: W, message: &Value) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut bytes = serde_json::to_vec(message)
        .map_err(|err| AppError::Process(format!("failed to serialise user message: {err}")))?;
    bytes.push(b'\n');

    stdin
        .write_all(&bytes)
        .await
        .map_err(|err| AppError::Process(format!("write to stdin failed: {err}")))?;
    stdin
        .shutdown()
        .await
        .map_err(|err| AppError::Process(format!("failed to close stdin: {err}")))?;

    debug!(bytes = bytes.len(), "user message written, stdin closed");
    Ok(())
}
