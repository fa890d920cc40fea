//! Read-side views over store snapshots.
//!
//! Everything here is pure: callers pass a snapshot and the query time, so
//! the HTTP layer and the tests share exactly the same filtering.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::core::record::PetRecord;

/// Default age limit for the recent-records query, in seconds.
pub const RECENT_WINDOW_SECS: i64 = 900;

/// Records younger than `window` at `now`, in store order.
///
/// Age is measured from `found_at`, falling back to `processed_at`. Records
/// stamped in the future count as recent.
pub fn recent(records: Vec<PetRecord>, now: DateTime<Utc>, window: Duration) -> Vec<PetRecord> {
    records
        .into_iter()
        .filter(|record| now.signed_duration_since(record.seen_at()) < window)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_tracked: usize,
    pub source_channel: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub ready: bool,
}

impl Health {
    pub fn new(ready: bool) -> Self {
        Self { status: "ok", ready }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::test_record;
    use chrono::TimeZone;

    fn found(name: &str, at: DateTime<Utc>) -> PetRecord {
        let mut record = test_record(name, name);
        record.found_at = Some(at);
        record
    }

    #[test]
    fn window_boundary_is_exclusive_of_older_records() {
        let now = Utc.with_ymd_and_hms(2025, 9, 1, 12, 0, 0).unwrap();
        let window = Duration::seconds(RECENT_WINDOW_SECS);
        let records = vec![
            found("stale", now - Duration::seconds(901)),
            found("fresh", now - Duration::seconds(899)),
            found("edge", now - Duration::seconds(900)),
            found("future", now + Duration::seconds(30)),
        ];

        let names: Vec<String> = recent(records, now, window).into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["fresh", "future"]);
    }

    #[test]
    fn falls_back_to_processed_at() {
        let now = Utc.with_ymd_and_hms(2025, 9, 1, 12, 0, 0).unwrap();
        let mut old = test_record("old", "j1");
        old.processed_at = now - Duration::seconds(1000);
        let mut new = test_record("new", "j2");
        new.processed_at = now - Duration::seconds(10);

        let kept = recent(vec![old, new], now, Duration::seconds(RECENT_WINDOW_SECS));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "new");
    }

    #[test]
    fn stats_and_health_serialize_to_documented_shapes() {
        let stats = Stats {
            total_tracked: 3,
            source_channel: "1411527848585330850".to_string(),
        };
        assert_eq!(
            serde_json::to_value(stats).unwrap(),
            serde_json::json!({ "totalTracked": 3, "sourceChannel": "1411527848585330850" })
        );
        assert_eq!(
            serde_json::to_value(Health::new(true)).unwrap(),
            serde_json::json!({ "status": "ok", "ready": true })
        );
    }
}
