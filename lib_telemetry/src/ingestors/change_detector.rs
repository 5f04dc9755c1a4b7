//! # Change Detector
//!
//! A self-scheduling poller over the store gateway. The store offers no
//! change notification, so the detector asks it on a fixed interval for "count
//! and newest sample per producer" and compares the counts against what it saw
//! on the previous poll.
//!
//! ## Cycle:
//! 1.  **Poll**: `latest_per_producer()`.
//! 2.  **Diff**: compare each count against the producer's cursor (0 if unseen).
//! 3.  **Update**: a grown count is written into the cursor before anything is
//!     emitted, so the same growth can never be detected twice.
//! 4.  **Emit**: one `BroadcastEvent` per producer that advanced, carrying only
//!     the newest sample. Samples that arrived in between two polls are skipped.
//! 5.  **Sleep**: `poll_interval`, or `backoff` after a failed poll.
//!
//! The first completed poll only seeds the cursors. Producers that already had
//! samples when the detector started emit nothing until they write again;
//! producers first seen on a later poll start from zero and emit at once.
//!
//! Cursors live in this struct only. They are rebuilt from the store on
//! restart, so samples written while the process was down are never pushed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connections::SampleStore;
use crate::error::Result;
use crate::model::{BroadcastEvent, ProducerId, ProducerSnapshot};

/// Timing of the polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorConfig {
    /// Pause between two successful polls.
    pub poll_interval: Duration,
    /// Pause after a failed poll before retrying.
    pub backoff: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            backoff: Duration::from_secs(1),
        }
    }
}

/// Per-producer bookkeeping of samples already observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerCursor {
    /// The producer this cursor tracks.
    pub producer_id: ProducerId,
    /// Sample count as of the last completed poll. Never decreases.
    pub last_observed_count: u64,
}

/// The polling change detector. Owns its cursors exclusively and hands
/// events off through a channel.
pub struct ChangeDetector<S> {
    store: Arc<S>,
    events: mpsc::Sender<BroadcastEvent>,
    cursors: HashMap<ProducerId, ProducerCursor>,
    seeded: bool,
    config: DetectorConfig,
}

impl<S: SampleStore> ChangeDetector<S> {
    /// Creates a detector that has not polled yet.
    pub fn new(store: Arc<S>, events: mpsc::Sender<BroadcastEvent>, config: DetectorConfig) -> Self {
        Self {
            store,
            events,
            cursors: HashMap::new(),
            seeded: false,
            config,
        }
    }

    /// The cursor of one producer, if it has been observed.
    pub fn cursor(&self, producer_id: ProducerId) -> Option<ProducerCursor> {
        self.cursors.get(&producer_id).copied()
    }

    /// Number of producers currently tracked.
    pub fn tracked_producers(&self) -> usize {
        self.cursors.len()
    }

    /// Whether the seeding poll has completed.
    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Runs one Poll/Diff/Update cycle and returns the events it produced,
    /// without handing them off. On failure nothing is updated.
    pub async fn poll_once(&mut self) -> Result<Vec<BroadcastEvent>> {
        let snapshots = self.store.latest_per_producer().await?;
        Ok(self.diff(snapshots))
    }

    fn diff(&mut self, snapshots: Vec<ProducerSnapshot>) -> Vec<BroadcastEvent> {
        let seeding = !self.seeded;
        let mut events = Vec::new();

        for snapshot in snapshots {
            let cursor = self
                .cursors
                .entry(snapshot.producer_id)
                .or_insert(ProducerCursor {
                    producer_id: snapshot.producer_id,
                    last_observed_count: 0,
                });

            if snapshot.count <= cursor.last_observed_count {
                continue;
            }
            cursor.last_observed_count = snapshot.count;

            if !seeding {
                debug!(
                    producer_id = snapshot.producer_id,
                    count = snapshot.count,
                    "producer advanced"
                );
                events.push(BroadcastEvent::new(snapshot.newest, snapshot.count));
            }
        }

        if seeding {
            self.seeded = true;
            info!(producers = self.cursors.len(), "change detector seeded");
        }
        events
    }

    /// # Main Execution Loop
    ///
    /// Polls until `shutdown` is cancelled or the event receiver is gone.
    /// Store failures skip the cycle and retry after `backoff`; they never end
    /// the loop.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            backoff_ms = self.config.backoff.as_millis() as u64,
            "change detector started"
        );

        loop {
            let pause = match self.poll_once().await {
                Ok(events) => {
                    for event in events {
                        if self.events.send(event).await.is_err() {
                            warn!("event channel closed, change detector stopping");
                            return;
                        }
                    }
                    self.config.poll_interval
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        backoff_ms = self.config.backoff.as_millis() as u64,
                        "poll failed, retrying after backoff"
                    );
                    self.config.backoff
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("change detector received shutdown signal");
                    return;
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}
