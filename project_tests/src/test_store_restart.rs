use chrono::{Duration, TimeZone, Utc};
use lib_common::core::{
    BoundedStore, FieldExtractor, IngestOutcome, JsonFileStore, MessageMeta, PetRecord, RawField, Tracker,
};
use std::path::Path;
use std::sync::Arc;

const CHANNEL: &str = "1411527848585330850";

fn tracker(path: &Path, capacity: usize) -> Tracker {
    Tracker::new(
        FieldExtractor::default(),
        Arc::new(BoundedStore::new(capacity)),
        Arc::new(JsonFileStore::new(path)),
        CHANNEL,
    )
}

fn announce(tracker: &Tracker, i: i64) -> IngestOutcome {
    let base = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
    let fields = vec![
        RawField::new("🏷️ Name", format!("🐉 Pet {}", i), true),
        RawField::new("💰 Money per sec", "$1.2M/s", true),
        RawField::new(
            "📜 Join Script",
            format!("game:GetService(\"TeleportService\"):TeleportToPlaceInstance(109983668079237, \"job-{}\")", i),
            false,
        ),
    ];
    let meta = MessageMeta {
        message_id: Some(format!("14115278485853308{:02}", i)),
        created_at: Some(base + Duration::seconds(i)),
    };
    tracker.ingest_at(&fields, &meta, base + Duration::seconds(i + 1))
}

fn names(records: &[PetRecord]) -> Vec<String> {
    records.iter().map(|r| r.name.clone()).collect()
}

#[test]
fn restart_restores_the_newest_records_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("pet_servers.json");

    let first = tracker(&path, 3);
    for i in 0..5 {
        assert_eq!(announce(&first, i), IngestOutcome::Inserted { persisted: true });
    }
    let before = first.store().snapshot();
    assert_eq!(names(&before), vec!["Pet 2", "Pet 3", "Pet 4"]);
    assert_eq!(before[0].emoji.as_deref(), Some("🐉"));
    assert_eq!(before[0].place_id.as_deref(), Some("109983668079237"));
    assert_eq!(before[0].dps_metric.as_deref(), Some("$1.2M/s"));
    drop(first);

    let second = tracker(&path, 3);
    assert_eq!(second.restore(), 3);
    assert_eq!(second.store().snapshot(), before);

    // The key set survives the restart too.
    assert_eq!(announce(&second, 4), IngestOutcome::Duplicate);
    assert_eq!(announce(&second, 5), IngestOutcome::Inserted { persisted: true });
    assert_eq!(names(&second.store().snapshot()), vec!["Pet 3", "Pet 4", "Pet 5"]);
}

#[test]
fn restart_with_a_smaller_capacity_keeps_the_tail() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pet_servers.json");

    let first = tracker(&path, 5);
    for i in 0..5 {
        announce(&first, i);
    }
    drop(first);

    let second = tracker(&path, 2);
    assert_eq!(second.restore(), 2);
    assert_eq!(names(&second.store().snapshot()), vec!["Pet 3", "Pet 4"]);
}

#[test]
fn restart_from_a_corrupt_snapshot_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pet_servers.json");
    std::fs::write(&path, "[{\"name\": \"half").unwrap();

    let tracker = tracker(&path, 20);
    assert_eq!(tracker.restore(), 0);
    assert!(tracker.store().is_empty());

    // The next insert rewrites the file with a valid snapshot.
    assert_eq!(announce(&tracker, 1), IngestOutcome::Inserted { persisted: true });
    let saved: Vec<PetRecord> = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(names(&saved), vec!["Pet 1"]);
}
