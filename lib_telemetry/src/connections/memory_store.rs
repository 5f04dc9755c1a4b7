//! # In-Process Store
//!
//! Keeps samples in insertion order behind a mutex. Enforces the same
//! validation gate as the PostgreSQL schema, and can be switched into an
//! unavailable state to exercise the transient-failure paths.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{window_start, SampleStore};
use crate::error::{Result, TelemetryError};
use crate::model::{AggregateCounts, ProducerId, ProducerSnapshot, Sample};
use crate::schema;

/// Append-only in-memory sample collection.
#[derive(Debug, Default)]
pub struct MemoryStore {
    samples: Mutex<Vec<Sample>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty, reachable store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates losing (`false`) or regaining (`true`) connectivity.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of stored samples, regardless of availability.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the store holds no samples.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Sample>> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reachable(&self) -> Result<MutexGuard<'_, Vec<Sample>>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TelemetryError::StoreUnavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(self.lock())
    }
}

#[async_trait]
impl SampleStore for MemoryStore {
    async fn latest_per_producer(&self) -> Result<Vec<ProducerSnapshot>> {
        let samples = self.reachable()?;
        let mut groups: BTreeMap<ProducerId, (u64, &Sample)> = BTreeMap::new();
        for sample in samples.iter() {
            groups
                .entry(sample.producer_id)
                .and_modify(|(count, newest)| {
                    *count += 1;
                    *newest = sample;
                })
                .or_insert((1, sample));
        }
        Ok(groups
            .into_iter()
            .map(|(producer_id, (count, newest))| ProducerSnapshot {
                producer_id,
                count,
                newest: newest.clone(),
            })
            .collect())
    }

    async fn recent_samples(&self, producer_id: ProducerId, limit: usize) -> Result<Vec<Sample>> {
        let samples = self.reachable()?;
        let mut own: Vec<Sample> = samples
            .iter()
            .filter(|s| s.producer_id == producer_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order between equal capture times.
        own.sort_by_key(|s| s.captured_at);
        let skip = own.len().saturating_sub(limit);
        Ok(own.split_off(skip))
    }

    async fn active_producers(&self, window: Duration) -> Result<BTreeSet<ProducerId>> {
        let since = window_start(window);
        let samples = self.reachable()?;
        Ok(samples
            .iter()
            .filter(|s| s.captured_at >= since)
            .map(|s| s.producer_id)
            .collect())
    }

    async fn aggregate_counts(&self) -> Result<AggregateCounts> {
        let since = window_start(Duration::from_secs(60));
        let samples = self.reachable()?;
        let producers: BTreeSet<ProducerId> = samples.iter().map(|s| s.producer_id).collect();
        Ok(AggregateCounts {
            total: samples.len() as u64,
            distinct_producers: producers.len() as u64,
            last_minute: samples.iter().filter(|s| s.captured_at >= since).count() as u64,
        })
    }

    async fn insert(&self, sample: Sample) -> Result<()> {
        schema::check_sample(&sample)?;
        self.reachable()?.push(sample);
        Ok(())
    }
}
