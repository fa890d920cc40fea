use chrono::{DateTime, Utc};
use lib_common::core::query::{self, Health, Stats, RECENT_WINDOW_SECS};
use lib_common::core::{PetRecord, Tracker};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Shared between the ingestion task and the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    tracker: Arc<Tracker>,
    // Set once the gateway reports READY
    ready: Arc<AtomicBool>,
    recent_window: chrono::Duration,
}

impl AppState {
    pub fn new(tracker: Arc<Tracker>, recent_window: Duration) -> Self {
        let recent_window = chrono::Duration::from_std(recent_window)
            .unwrap_or_else(|_| chrono::Duration::seconds(RECENT_WINDOW_SECS));
        Self {
            tracker,
            ready: Arc::new(AtomicBool::new(false)),
            recent_window,
        }
    }

    pub fn tracker(&self) -> &Arc<Tracker> {
        &self.tracker
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn recent(&self, now: DateTime<Utc>) -> Vec<PetRecord> {
        query::recent(self.tracker.store().snapshot(), now, self.recent_window)
    }

    pub fn all(&self) -> Vec<PetRecord> {
        self.tracker.store().snapshot()
    }

    pub fn stats(&self) -> Stats {
        Stats {
            total_tracked: self.tracker.store().len(),
            source_channel: self.tracker.source_channel().to_string(),
        }
    }

    pub fn health(&self) -> Health {
        Health::new(self.is_ready())
    }
}
