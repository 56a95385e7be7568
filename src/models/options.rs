//! Per-turn request parameters and the resolved execution environment.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Media type used when an image does not declare one.
pub const DEFAULT_IMAGE_MEDIA_TYPE: &str = "image/png";

/// An image attached to a user message, already base64 encoded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageAttachment {
    /// MIME type, e.g. `image/png`.
    pub media_type: String,
    /// Base64 payload.
    pub data: String,
}

impl ImageAttachment {
    /// A PNG attachment.
    #[must_use]
    pub fn png(data: impl Into<String>) -> Self {
        Self {
            media_type: DEFAULT_IMAGE_MEDIA_TYPE.to_owned(),
            data: data.into(),
        }
    }
}

/// Parameters of one turn. Immutable once handed to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOptions {
    /// User message text.
    pub message: String,
    /// Working directory of the CLI process.
    pub cwd: PathBuf,
    /// Session id for a new session.
    pub session_id: Option<String>,
    /// Session to resume; wins over `session_id`.
    pub resume_session_id: Option<String>,
    /// Requested model identifier.
    pub model: Option<String>,
    /// Attached images.
    pub images: Vec<ImageAttachment>,
    /// Custom instruction text.
    pub custom_instructions: Option<String>,
}

impl ProcessOptions {
    /// Options for `message` run in `cwd`.
    #[must_use]
    pub fn new(message: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            message: message.into(),
            cwd: cwd.into(),
            session_id: None,
            resume_session_id: None,
            model: None,
            images: Vec::new(),
            custom_instructions: None,
        }
    }

    /// Set the new-session id.
    #[must_use]
    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    /// Set the session to resume.
    #[must_use]
    pub fn with_resume(mut self, id: impl Into<String>) -> Self {
        self.resume_session_id = Some(id.into());
        self
    }

    /// Set the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Attach an image.
    #[must_use]
    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.images.push(image);
        self
    }

    /// Set custom instructions.
    #[must_use]
    pub fn with_custom_instructions(mut self, text: impl Into<String>) -> Self {
        self.custom_instructions = Some(text.into());
        self
    }
}

/// Where and how the CLI executable is launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionEnvironment {
    /// Absolute path of the CLI executable.
    pub executable: PathBuf,
    /// Working directory.
    pub cwd: PathBuf,
    /// Full environment of the child.
    pub env: HashMap<String, String>,
    /// Launch through the platform shell (Windows `cmd /C`).
    pub shell: bool,
}
