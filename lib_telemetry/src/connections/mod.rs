//! # Connections Module
//!
//! The store gateway: everything the rest of the crate knows about the shared
//! datastore goes through the [`SampleStore`] trait.
//!
//! Back-ends:
//! - **`db_postgres`**: pooled PostgreSQL (feature `postgres`).
//! - **`memory_store`**: an in-process store with the same validation gate,
//!   used by tests and local runs.
//!
//! Every query fails with `TelemetryError::StoreUnavailable` on connectivity
//! loss. Callers treat that as transient.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{AggregateCounts, ProducerId, ProducerSnapshot, Sample};

/// Module for the PostgreSQL-backed store.
#[cfg(feature = "postgres")]
pub mod db_postgres;
/// Module for the in-process store.
pub mod memory_store;

#[cfg(feature = "postgres")]
pub use db_postgres::PgSampleStore;
pub use memory_store::MemoryStore;

/// Query primitives over the append-only collection of samples.
#[async_trait]
pub trait SampleStore: Send + Sync + 'static {
    /// Groups all samples by producer and returns, per producer, the total
    /// count and the most recently inserted sample, read from one snapshot.
    ///
    /// A count increase must always imply a genuinely new sample exists.
    async fn latest_per_producer(&self) -> Result<Vec<ProducerSnapshot>>;

    /// The most recent `limit` samples of one producer, oldest first. An
    /// unknown producer yields an empty sequence.
    async fn recent_samples(&self, producer_id: ProducerId, limit: usize) -> Result<Vec<Sample>>;

    /// Producers with at least one sample captured within `window` of now.
    async fn active_producers(&self, window: Duration) -> Result<BTreeSet<ProducerId>>;

    /// Store-wide counters.
    async fn aggregate_counts(&self) -> Result<AggregateCounts>;

    /// Appends a sample through the store's validation gate.
    async fn insert(&self, sample: Sample) -> Result<()>;
}

/// Start of a trailing window ending now. Windows too large to represent
/// reach back to the earliest representable time.
pub(crate) fn window_start(window: Duration) -> chrono::DateTime<chrono::Utc> {
    let now = chrono::Utc::now();
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC)
}
