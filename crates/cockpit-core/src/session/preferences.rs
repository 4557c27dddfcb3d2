//! Chat preferences.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_RETAIN_DAYS: u32 = 30;

/// Process-wide chat preferences, persisted externally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub show_timestamps: bool,
    pub compact_mode: bool,
    /// Conversations idle for longer than this are dropped from the known set.
    pub retain_days: u32,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            show_timestamps: true,
            compact_mode: false,
            retain_days: DEFAULT_RETAIN_DAYS,
        }
    }
}

impl Preferences {
    /// Merges a partial update, returning whether anything changed.
    pub fn apply(&mut self, patch: &PreferencesPatch) -> bool {
        let before = self.clone();
        if let Some(value) = patch.show_timestamps {
            self.show_timestamps = value;
        }
        if let Some(value) = patch.compact_mode {
            self.compact_mode = value;
        }
        if let Some(value) = patch.retain_days {
            self.retain_days = value;
        }
        *self != before
    }

    /// Oldest `last_active_at` that is still retained. `None` when retention
    /// is disabled (`retain_days == 0`).
    pub fn retention_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.retain_days == 0 {
            return None;
        }
        Some(now - Duration::days(i64::from(self.retain_days)))
    }
}

/// Partial preferences update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_timestamps: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compact_mode: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retain_days: Option<u32>,
}
