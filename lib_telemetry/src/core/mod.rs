//! # Core Module
//!
//! The fan-out and read surfaces of the engine.
//!
//! - **`broadcaster`**: the `LiveBroadcaster`. Takes each `BroadcastEvent`
//!   from the change detector and delivers it to every connected viewer
//!   without letting a slow viewer hold anyone else up.
//! - **`query_facade`**: stateless on-demand reads over the store gateway,
//!   shaped for callers outside the core.

/// Live fan-out of detected samples to subscribed viewers.
pub mod broadcaster;
/// Stateless request/response reads.
pub mod query_facade;

pub use broadcaster::{LiveBroadcaster, ViewerId, ViewerSubscription};
pub use query_facade::{QueryConfig, QueryFacade, ValidationHints};
