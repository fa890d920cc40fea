//! # Core Tracking Module
//!
//! This module is the heart of the pet server tracker. It turns inbound
//! channel messages into deduplicated, capacity-bounded, persisted records
//! and offers the pure views the read API is built from.
//!
//! ## Core Components:
//!
//! - **`extractor`**: Classifies embed fields by a priority-ordered label
//!   table and builds a `PetRecord`, or reports "no match".
//!
//! - **`dedup`**: The `(name, job_id)` membership test, run under the store lock.
//!
//! - **`store`**: The `BoundedStore`, an insertion-ordered history with FIFO
//!   eviction and a single private lock shared by writers and readers.
//!
//! - **`persistence`**: Full-overwrite, atomically replaced JSON snapshots.
//!
//! - **`query`**: Recent-window filtering plus the stats and health shapes.
//!
//! - **`tracker`**: The per-message pipeline gluing the pieces together.
//!
//! `record` and `message` hold the data types shared by all of the above.

#![warn(rust_2018_idioms, unused_qualifications)]

pub mod dedup;
pub mod extractor;
pub mod message;
pub mod persistence;
pub mod query;
pub mod record;
pub mod store;
pub mod tracker;

// --- Public API Re-exports ---
pub use extractor::{FieldExtractor, FieldLabel, JobIdPrecedence, LabelRule};
pub use message::{Embed, InboundMessage};
pub use persistence::{JsonFileStore, Persistence, PersistenceError};
pub use query::{Health, Stats, RECENT_WINDOW_SECS};
pub use record::{MessageMeta, PetRecord, RawField};
pub use store::BoundedStore;
pub use tracker::{IngestOutcome, Tracker};
