//! # Ingestors Module
//!
//! Components that pull data out of the shared store and feed it into the
//! fan-out path.
//!
//! - **`change_detector`**: a self-scheduling poller that diffs per-producer
//!   sample counts between polls and emits one `BroadcastEvent` per producer
//!   that advanced.

/// The polling change detector.
pub mod change_detector;

pub use change_detector::{ChangeDetector, DetectorConfig, ProducerCursor};
