//! AttachmentManager - pending uploads for the next send.

use cockpit_core::session::{Attachment, AttachmentRef};
use cockpit_core::{CockpitError, Result};
use std::collections::HashSet;

/// A file the user picked, before it becomes a tracked [`Attachment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    pub name: String,
    pub size: u64,
    /// Inferred from the file name when absent.
    pub mime_type: Option<String>,
}

impl PendingFile {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn resolved_mime_type(&self) -> String {
        match &self.mime_type {
            Some(mime) => mime.clone(),
            None => mime_guess::from_path(&self.name)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
        }
    }
}

/// Tracks the pending attachment batch.
///
/// Names are unique within the batch. Displayed progress never decreases,
/// and once an attachment is uploaded later progress reports are ignored.
#[derive(Debug, Default)]
pub struct AttachmentManager {
    pending: Vec<Attachment>,
}

impl AttachmentManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> &[Attachment] {
        &self.pending
    }

    pub fn get(&self, name: &str) -> Option<&Attachment> {
        self.pending.iter().find(|a| a.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// True when every pending attachment finished uploading.
    pub fn all_uploaded(&self) -> bool {
        self.pending.iter().all(|a| a.uploaded)
    }

    /// Adds a batch of files.
    ///
    /// # Errors
    ///
    /// `Validation` naming the duplicates if any incoming name collides with
    /// a pending name or with another name in the batch. Nothing is added in
    /// that case.
    pub fn add(&mut self, files: Vec<PendingFile>) -> Result<Vec<Attachment>> {
        let mut seen: HashSet<&str> = self.pending.iter().map(|a| a.name.as_str()).collect();
        let mut duplicates: Vec<&str> = Vec::new();
        for file in &files {
            if !seen.insert(file.name.as_str()) && !duplicates.contains(&file.name.as_str()) {
                duplicates.push(file.name.as_str());
            }
        }
        if !duplicates.is_empty() {
            return Err(CockpitError::validation(format!(
                "duplicate attachment name(s): {}",
                duplicates.join(", ")
            )));
        }

        let added: Vec<Attachment> = files
            .iter()
            .map(|f| Attachment::new(f.name.clone(), f.size, f.resolved_mime_type()))
            .collect();
        self.pending.extend(added.iter().cloned());
        Ok(added)
    }

    pub fn remove(&mut self, name: &str) -> Option<Attachment> {
        let index = self.pending.iter().position(|a| a.name == name)?;
        Some(self.pending.remove(index))
    }

    /// Drops the whole pending batch.
    ///
    /// # Returns
    ///
    /// The names that were dropped.
    pub fn clear(&mut self) -> Vec<String> {
        self.pending.drain(..).map(|a| a.name).collect()
    }

    /// Applies a progress report.
    ///
    /// # Returns
    ///
    /// The displayed progress after the update, or `None` for unknown names.
    pub fn update_progress(&mut self, name: &str, percentage: u8) -> Option<u8> {
        let attachment = self.pending.iter_mut().find(|a| a.name == name)?;
        if !attachment.uploaded {
            attachment.progress = attachment.progress.max(percentage.min(100));
        }
        Some(attachment.progress)
    }

    /// Terminal transition; wins over any later progress report.
    pub fn mark_uploaded(&mut self, name: &str, url: impl Into<String>) -> bool {
        let Some(attachment) = self.pending.iter_mut().find(|a| a.name == name) else {
            return false;
        };
        attachment.progress = 100;
        attachment.uploaded = true;
        attachment.url = Some(url.into());
        true
    }

    /// Fails when any attachment is still uploading.
    pub fn ensure_ready(&self) -> Result<()> {
        let uploading: Vec<&str> = self
            .pending
            .iter()
            .filter(|a| !a.uploaded)
            .map(|a| a.name.as_str())
            .collect();
        if uploading.is_empty() {
            Ok(())
        } else {
            Err(CockpitError::validation(format!(
                "attachment(s) still uploading: {}",
                uploading.join(", ")
            )))
        }
    }

    /// Drains the batch into references for a send.
    pub fn take_for_send(&mut self) -> Result<Vec<AttachmentRef>> {
        self.ensure_ready()?;
        Ok(self
            .pending
            .drain(..)
            .map(|a| AttachmentRef {
                url: a.url.unwrap_or_default(),
                name: a.name,
                size: a.size,
                mime_type: a.mime_type,
            })
            .collect())
    }
}
