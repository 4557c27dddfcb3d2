//! Attachment types.

use serde::{Deserialize, Serialize};

/// A file selected for the next send, tracked until it is sent or removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Unique key within the pending batch.
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// MIME type of the file
    #[serde(rename = "type")]
    pub mime_type: String,
    /// Displayed upload progress, 0-100.
    pub progress: u8,
    pub uploaded: bool,
    /// Stable reference returned by the upload call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, size: u64, mime_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size,
            mime_type: mime_type.into(),
            progress: 0,
            uploaded: false,
            url: None,
        }
    }
}

/// The reference a sent message keeps to an uploaded attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    pub name: String,
    pub url: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub mime_type: String,
}
