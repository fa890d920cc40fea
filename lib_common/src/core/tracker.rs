//! # Pet Tracker
//!
//! The ingestion pipeline for one source channel: extract a record from each
//! embed, insert it if its key is new, and persist the store after every
//! insert.
//!
//! Insert and save of one record form a single critical section: a second
//! ingest waits until the first one's snapshot is on disk, so the last saved
//! snapshot always matches the store. Read traffic goes straight to the
//! shared [`BoundedStore`] and never waits on a save.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};

use crate::core::extractor::FieldExtractor;
use crate::core::message::InboundMessage;
use crate::core::persistence::Persistence;
use crate::core::record::{MessageMeta, RawField};
use crate::core::store::BoundedStore;

/// What happened to one embed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The embed is not a pet announcement.
    NoMatch,
    /// A record with the same `(name, job_id)` is already stored.
    Duplicate,
    /// Stored; `persisted` is false when the snapshot write failed.
    Inserted { persisted: bool },
}

pub struct Tracker {
    extractor: FieldExtractor,
    store: Arc<BoundedStore>,
    persistence: Arc<dyn Persistence>,
    source_channel: String,
    // Serializes store writers with their saves
    ingest_lock: Mutex<()>,
}

impl Tracker {
    pub fn new(
        extractor: FieldExtractor,
        store: Arc<BoundedStore>,
        persistence: Arc<dyn Persistence>,
        source_channel: impl Into<String>,
    ) -> Self {
        Self {
            extractor,
            store,
            persistence,
            source_channel: source_channel.into(),
            ingest_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<BoundedStore> {
        &self.store
    }

    pub fn source_channel(&self) -> &str {
        &self.source_channel
    }

    /// Replaces the store content with the persisted snapshot. Returns the
    /// number of records now held.
    pub fn restore(&self) -> usize {
        let _ingest = self.ingest_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.store.restore(self.persistence.load());
        self.store.len()
    }

    pub fn accepts(&self, channel_id: &str) -> bool {
        channel_id == self.source_channel
    }

    /// Runs every embed of `message` through the pipeline.
    ///
    /// Messages from other channels yield no outcomes.
    pub fn handle_message(&self, message: &InboundMessage) -> Vec<IngestOutcome> {
        if !self.accepts(&message.channel_id) {
            log::trace!("Ignoring message {} from channel {}", message.id, message.channel_id);
            return Vec::new();
        }

        let meta = message.meta();
        message
            .embeds
            .iter()
            .map(|embed| self.ingest(&embed.fields, &meta))
            .collect()
    }

    pub fn ingest(&self, fields: &[RawField], meta: &MessageMeta) -> IngestOutcome {
        self.ingest_at(fields, meta, Utc::now())
    }

    /// # Ingest At
    ///
    /// Extract, insert-if-absent, then save the full snapshot, all under the
    /// ingest lock. A failed save is logged by the persistence layer and does
    /// not undo the insert.
    pub fn ingest_at(&self, fields: &[RawField], meta: &MessageMeta, processed_at: DateTime<Utc>) -> IngestOutcome {
        let Some(record) = self.extractor.extract(fields, meta, processed_at) else {
            return IngestOutcome::NoMatch;
        };

        let name = record.name.clone();
        let job_id = record.job_id.clone();
        let _ingest = self.ingest_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.store.insert_if_absent(record) {
            return IngestOutcome::Duplicate;
        }

        log::info!("Added pet: {} {}", name, job_id);
        let persisted = self.persistence.save(&self.store.snapshot());
        IngestOutcome::Inserted { persisted }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::Embed;
    use crate::core::record::PetRecord;
    use std::thread;
    use std::time::Duration;

    /// Records every save; optionally fails them.
    #[derive(Default)]
    struct RecordingPersistence {
        saved: Mutex<Vec<Vec<PetRecord>>>,
        initial: Vec<PetRecord>,
        fail: bool,
    }

    impl Persistence for RecordingPersistence {
        fn load(&self) -> Vec<PetRecord> {
            self.initial.clone()
        }

        fn save(&self, records: &[PetRecord]) -> bool {
            self.saved.lock().unwrap().push(records.to_vec());
            !self.fail
        }
    }

    const CHANNEL: &str = "1411527848585330850";

    fn tracker(persistence: Arc<RecordingPersistence>, capacity: usize) -> Tracker {
        Tracker::new(FieldExtractor::default(), Arc::new(BoundedStore::new(capacity)), persistence, CHANNEL)
    }

    fn embed(name: &str, job_id: &str) -> Embed {
        Embed {
            fields: vec![RawField::new("Name", name, true), RawField::new("Job ID", job_id, true)],
            ..Default::default()
        }
    }

    fn message(channel_id: &str, embeds: Vec<Embed>) -> InboundMessage {
        InboundMessage {
            id: "1411600000000000000".to_string(),
            channel_id: channel_id.to_string(),
            timestamp: None,
            embeds,
        }
    }

    #[test]
    fn processes_every_embed_and_saves_after_each_insert() {
        let persistence = Arc::new(RecordingPersistence::default());
        let tracker = tracker(Arc::clone(&persistence), 10);

        let not_a_pet = Embed {
            title: Some("Server restart".to_string()),
            ..Default::default()
        };
        let outcomes = tracker.handle_message(&message(CHANNEL, vec![embed("Fox", "j1"), not_a_pet, embed("Fox", "j1"), embed("Owl", "j2")]));

        assert_eq!(
            outcomes,
            vec![
                IngestOutcome::Inserted { persisted: true },
                IngestOutcome::NoMatch,
                IngestOutcome::Duplicate,
                IngestOutcome::Inserted { persisted: true },
            ]
        );
        let saved = persistence.saved.lock().unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[1].len(), 2);
        assert_eq!(saved[1][0].message_id.as_deref(), Some("1411600000000000000"));
        assert!(saved[1][0].found_at.is_some());
    }

    #[test]
    fn ignores_other_channels() {
        let persistence = Arc::new(RecordingPersistence::default());
        let tracker = tracker(Arc::clone(&persistence), 10);

        assert!(tracker.handle_message(&message("42", vec![embed("Fox", "j1")])).is_empty());
        assert!(tracker.store().is_empty());
        assert!(persistence.saved.lock().unwrap().is_empty());
    }

    #[test]
    fn failed_save_keeps_the_insert() {
        let persistence = Arc::new(RecordingPersistence {
            fail: true,
            ..Default::default()
        });
        let tracker = tracker(persistence, 10);

        let outcome = tracker.ingest(&embed("Fox", "j1").fields, &MessageMeta::default());
        assert_eq!(outcome, IngestOutcome::Inserted { persisted: false });
        assert_eq!(tracker.store().len(), 1);
    }

    #[test]
    fn restore_replaces_store_with_snapshot() {
        let mut initial = Vec::new();
        for i in 0..5 {
            initial.push(crate::core::record::test_record("Fox", &format!("j{}", i)));
        }
        let persistence = Arc::new(RecordingPersistence {
            initial,
            ..Default::default()
        });
        let tracker = tracker(persistence, 3);
        tracker.store().insert_if_absent(crate::core::record::test_record("Stale", "x"));

        assert_eq!(tracker.restore(), 3);
        let jobs: Vec<String> = tracker.store().snapshot().into_iter().map(|r| r.job_id).collect();
        assert_eq!(jobs, vec!["j2", "j3", "j4"]);
    }

    /// Holds the first save long enough for a second ingest to start.
    #[derive(Default)]
    struct SlowFirstSave {
        saved: Mutex<Vec<Vec<PetRecord>>>,
    }

    impl Persistence for SlowFirstSave {
        fn load(&self) -> Vec<PetRecord> {
            Vec::new()
        }

        fn save(&self, records: &[PetRecord]) -> bool {
            if records.len() == 1 {
                thread::sleep(Duration::from_millis(300));
            }
            self.saved.lock().unwrap().push(records.to_vec());
            true
        }
    }

    #[test]
    fn concurrent_ingests_leave_the_newest_snapshot_last() {
        let persistence = Arc::new(SlowFirstSave::default());
        let tracker = Arc::new(Tracker::new(
            FieldExtractor::default(),
            Arc::new(BoundedStore::new(10)),
            Arc::clone(&persistence) as Arc<dyn Persistence>,
            CHANNEL,
        ));

        let first = {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || tracker.ingest(&embed("Fox", "j1").fields, &MessageMeta::default()))
        };
        thread::sleep(Duration::from_millis(50));
        let second = {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || tracker.ingest(&embed("Owl", "j2").fields, &MessageMeta::default()))
        };
        assert_eq!(first.join().unwrap(), IngestOutcome::Inserted { persisted: true });
        assert_eq!(second.join().unwrap(), IngestOutcome::Inserted { persisted: true });

        let saved = persistence.saved.lock().unwrap();
        let newest: Vec<&str> = saved.iter().filter_map(|s| s.last()).map(|r| r.name.as_str()).collect();
        assert_eq!(newest, vec!["Fox", "Owl"]);
        assert_eq!(saved.last().unwrap(), &tracker.store().snapshot());
    }
}
