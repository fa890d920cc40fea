//! # Pet Record
//!
//! The immutable unit of tracked data. A `PetRecord` is built once by the
//! extractor from a single embed and is never mutated afterwards; the store
//! only ever clones, evicts, or replaces whole records.
//!
//! The serialized form (camelCase JSON, RFC 3339 timestamps) is shared by the
//! persisted snapshot and the HTTP responses, so a record read back from disk
//! is indistinguishable from the one that was written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One `(name, value, inline)` triple exactly as it arrived on the embed.
///
/// Kept on the record for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

impl RawField {
    pub fn new(name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            inline,
        }
    }
}

/// Metadata of the message an embed was attached to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageMeta {
    /// Origin message identifier (a Discord snowflake).
    pub message_id: Option<String>,
    /// Source-reported creation time of the message.
    pub created_at: Option<DateTime<Utc>>,
}

/// # Pet Record
///
/// A single announced pet server. `name` and `job_id` are always non-empty;
/// together they form the deduplication key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PetRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traits: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub players: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dps_metric: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_metric: Option<String>,
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teleport_script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub found_at: Option<DateTime<Utc>>,
    pub processed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub raw_fields: Vec<RawField>,
}

impl PetRecord {
    /// True if `other` carries the same `(name, job_id)` key.
    pub fn same_key(&self, other: &PetRecord) -> bool {
        self.name == other.name && self.job_id == other.job_id
    }

    /// The timestamp recency is measured from: `found_at`, else `processed_at`.
    pub fn seen_at(&self) -> DateTime<Utc> {
        self.found_at.unwrap_or(self.processed_at)
    }
}

/// Minimal record for unit tests elsewhere in the crate.
#[cfg(test)]
pub(crate) fn test_record(name: &str, job_id: &str) -> PetRecord {
    PetRecord {
        name: name.to_string(),
        emoji: None,
        mutation: None,
        tier: None,
        traits: None,
        players: None,
        dps_metric: None,
        generation_metric: None,
        job_id: job_id.to_string(),
        place_id: None,
        teleport_script: None,
        join_link: None,
        found_at: None,
        processed_at: Utc::now(),
        message_id: None,
        raw_fields: Vec::new(),
    }
}
