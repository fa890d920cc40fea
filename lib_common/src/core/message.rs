//! Inbound message shapes.
//!
//! These mirror the subset of a Discord `MESSAGE_CREATE` payload the tracker
//! reads, so gateway dispatches deserialize straight into them. Unknown keys
//! are ignored.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::core::record::{MessageMeta, RawField};

/// Milliseconds between the Unix epoch and the Discord epoch (2015-01-01).
const DISCORD_EPOCH_MS: u64 = 1_420_070_400_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Embed {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<RawField>,
}

/// A message posted to a channel, carrying zero or more embeds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub embeds: Vec<Embed>,
}

impl InboundMessage {
    /// Source creation time: the reported timestamp, else decoded from the id.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp.or_else(|| snowflake_time(&self.id))
    }

    pub fn meta(&self) -> MessageMeta {
        MessageMeta {
            message_id: Some(self.id.clone()),
            created_at: self.created_at(),
        }
    }
}

/// Creation time encoded in the top 42 bits of a snowflake id.
pub fn snowflake_time(id: &str) -> Option<DateTime<Utc>> {
    let raw: u64 = id.trim().parse().ok()?;
    let millis = (raw >> 22).checked_add(DISCORD_EPOCH_MS)?;
    Utc.timestamp_millis_opt(i64::try_from(millis).ok()?).single()
}
