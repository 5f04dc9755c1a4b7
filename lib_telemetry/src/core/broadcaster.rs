//! # Live Broadcaster
//!
//! Keeps the set of connected viewers and fans each `BroadcastEvent` out to
//! all of them.
//!
//! ## Design:
//!
//! 1.  **Shared frames**: an event is wrapped in an `Arc` once, and every
//!     viewer receives a pointer to the same allocation.
//!
//! 2.  **Never blocks the publisher**: each viewer owns a bounded queue and
//!     `publish` only ever uses `try_send`. The viewer set lock is held for the
//!     membership change or for the fan-out loop, never across network I/O;
//!     the actual socket write happens in the viewer's own task.
//!
//! 3.  **Slow viewers are dropped**: a viewer whose queue is full, or whose
//!     receiver is gone, is removed from the set during the same fan-out. Its
//!     subscription then drains what it already has and ends.
//!
//! 4.  **No backfill**: a subscription only sees events published after it
//!     was registered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TelemetryError;
use crate::model::BroadcastEvent;

/// Broadcaster-assigned identifier of a viewer.
pub type ViewerId = u64;

/// One connected live viewer: the receiving half of its queue.
#[derive(Debug)]
pub struct ViewerSubscription {
    id: ViewerId,
    subscribed_at: DateTime<Utc>,
    receiver: mpsc::Receiver<Arc<BroadcastEvent>>,
}

impl ViewerSubscription {
    /// The viewer's id, used to unsubscribe.
    pub fn id(&self) -> ViewerId {
        self.id
    }

    /// When the viewer was registered.
    pub fn subscribed_at(&self) -> DateTime<Utc> {
        self.subscribed_at
    }

    /// Waits for the next event. `None` once the viewer has been torn down and
    /// its queue is drained.
    pub async fn recv(&mut self) -> Option<Arc<BroadcastEvent>> {
        self.receiver.recv().await
    }

    /// Takes the next already-queued event, if any.
    pub fn try_recv(&mut self) -> Option<Arc<BroadcastEvent>> {
        self.receiver.try_recv().ok()
    }
}

struct ViewerHandle {
    id: ViewerId,
    sender: mpsc::Sender<Arc<BroadcastEvent>>,
}

/// Fan-out of events to every currently subscribed viewer.
pub struct LiveBroadcaster {
    viewers: Mutex<Vec<ViewerHandle>>,
    next_id: AtomicU64,
    viewer_buffer: usize,
}

impl LiveBroadcaster {
    /// Creates a broadcaster whose viewers may each have up to
    /// `viewer_buffer` undelivered events queued before being dropped.
    pub fn new(viewer_buffer: usize) -> Self {
        Self {
            viewers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            viewer_buffer: viewer_buffer.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ViewerHandle>> {
        self.viewers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// # Subscribe
    ///
    /// Registers a new viewer. It receives every event published from now on
    /// and nothing published before.
    pub fn subscribe(&self) -> ViewerSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.viewer_buffer);
        let total = {
            let mut viewers = self.lock();
            viewers.push(ViewerHandle { id, sender });
            viewers.len()
        };
        info!(viewer = id, viewers = total, "viewer subscribed");
        ViewerSubscription {
            id,
            subscribed_at: Utc::now(),
            receiver,
        }
    }

    /// Removes a viewer. Returns whether it was still registered; calling it
    /// again is harmless.
    pub fn unsubscribe(&self, viewer: ViewerId) -> bool {
        let removed = {
            let mut viewers = self.lock();
            let before = viewers.len();
            viewers.retain(|v| v.id != viewer);
            before != viewers.len()
        };
        if removed {
            info!(viewer, "viewer unsubscribed");
        }
        removed
    }

    /// Number of currently registered viewers.
    pub fn viewer_count(&self) -> usize {
        self.lock().len()
    }

    /// # Publish
    ///
    /// Delivers `event` to every registered viewer and returns how many
    /// accepted it. Viewers whose queue is full or closed are torn down.
    pub fn publish(&self, event: BroadcastEvent) -> usize {
        let frame = Arc::new(event);
        let mut dropped = Vec::new();
        let delivered = {
            let mut viewers = self.lock();
            viewers.retain(|viewer| match viewer.sender.try_send(Arc::clone(&frame)) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    dropped.push(TelemetryError::ViewerUnreachable {
                        viewer: viewer.id,
                        reason: "queue full, viewer cannot keep up".to_string(),
                    });
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    dropped.push(TelemetryError::ViewerUnreachable {
                        viewer: viewer.id,
                        reason: "viewer disconnected".to_string(),
                    });
                    false
                }
            });
            viewers.len()
        };

        for err in &dropped {
            warn!(error = %err, "viewer dropped from broadcast");
        }
        debug!(
            producer_id = frame.producer_id,
            delivered,
            dropped = dropped.len(),
            "event published"
        );
        delivered
    }

    /// Drains the detector's event channel into [`publish`](Self::publish)
    /// until the channel closes or `shutdown` is cancelled.
    pub async fn pump(
        self: Arc<Self>,
        mut events: mpsc::Receiver<BroadcastEvent>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("broadcaster received shutdown signal");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => {
                        self.publish(event);
                    }
                    None => {
                        info!("event channel closed, broadcaster stopping");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Sample;
    use std::time::{Duration, Instant};

    fn event(temperature: i32) -> BroadcastEvent {
        BroadcastEvent::new(
            Sample {
                producer_id: 1234567,
                cpu_descriptor: "Intel i7".to_string(),
                ram_bytes: 17179869184,
                temperature,
                captured_at: Utc::now(),
            },
            1,
        )
    }

    #[test]
    fn every_viewer_receives_each_event() {
        let broadcaster = LiveBroadcaster::new(8);
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();
        assert_eq!(broadcaster.publish(event(60)), 2);
        assert_eq!(a.try_recv().unwrap().sample.temperature, 60);
        assert_eq!(b.try_recv().unwrap().sample.temperature, 60);
        assert!(a.try_recv().is_none());
    }

    #[test]
    fn late_subscriber_gets_no_backfill() {
        let broadcaster = LiveBroadcaster::new(8);
        let mut early = broadcaster.subscribe();
        broadcaster.publish(event(60));
        let mut late = broadcaster.subscribe();
        assert!(late.try_recv().is_none());

        broadcaster.publish(event(61));
        assert_eq!(late.try_recv().unwrap().sample.temperature, 61);
        assert!(late.try_recv().is_none());
        assert_eq!(early.try_recv().unwrap().sample.temperature, 60);
        assert_eq!(early.try_recv().unwrap().sample.temperature, 61);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let broadcaster = LiveBroadcaster::new(8);
        let viewer = broadcaster.subscribe();
        assert!(broadcaster.unsubscribe(viewer.id()));
        assert!(!broadcaster.unsubscribe(viewer.id()));
        assert_eq!(broadcaster.viewer_count(), 0);
        assert_eq!(broadcaster.publish(event(60)), 0);
    }

    #[test]
    fn slow_viewer_is_dropped_without_delaying_others() {
        let broadcaster = LiveBroadcaster::new(1);
        let stalled = broadcaster.subscribe();
        let mut healthy = broadcaster.subscribe();

        let started = Instant::now();
        assert_eq!(broadcaster.publish(event(60)), 2);
        assert_eq!(healthy.try_recv().unwrap().sample.temperature, 60);
        // The stalled viewer never reads, so its single slot is still taken.
        assert_eq!(broadcaster.publish(event(61)), 1);
        assert_eq!(healthy.try_recv().unwrap().sample.temperature, 61);
        assert!(started.elapsed() < Duration::from_secs(1));

        assert_eq!(broadcaster.viewer_count(), 1);
        assert!(!broadcaster.unsubscribe(stalled.id()));
    }

    #[tokio::test]
    async fn dropped_viewer_drains_then_ends() {
        let broadcaster = LiveBroadcaster::new(1);
        let mut slow = broadcaster.subscribe();
        broadcaster.publish(event(60));
        broadcaster.publish(event(61));
        assert_eq!(slow.recv().await.unwrap().sample.temperature, 60);
        assert!(slow.recv().await.is_none());
    }

    #[test]
    fn disconnected_viewer_is_removed_on_next_publish() {
        let broadcaster = LiveBroadcaster::new(4);
        let gone = broadcaster.subscribe();
        drop(gone);
        assert_eq!(broadcaster.viewer_count(), 1);
        assert_eq!(broadcaster.publish(event(60)), 0);
        assert_eq!(broadcaster.viewer_count(), 0);
    }

    #[tokio::test]
    async fn pump_forwards_until_channel_closes() {
        let broadcaster = Arc::new(LiveBroadcaster::new(8));
        let mut viewer = broadcaster.subscribe();
        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(Arc::clone(&broadcaster).pump(rx, CancellationToken::new()));

        tx.send(event(70)).await.unwrap();
        tx.send(event(71)).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(viewer.recv().await.unwrap().sample.temperature, 70);
        assert_eq!(viewer.recv().await.unwrap().sample.temperature, 71);
    }
}
