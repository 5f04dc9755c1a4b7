use lib_telemetry::connections::SampleStore;
use lib_telemetry::core::{LiveBroadcaster, QueryFacade};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Shared handler state: the pull facade, the push broadcaster and the
/// per-viewer timing.
pub struct AppState<S> {
    pub query: QueryFacade<S>,
    pub broadcaster: Arc<LiveBroadcaster>,
    // Upper bound on one frame write to a viewer
    pub viewer_send_timeout: Duration,
    // Ends open viewer sessions on shutdown
    pub shutdown: CancellationToken,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            query: self.query.clone(),
            broadcaster: Arc::clone(&self.broadcaster),
            viewer_send_timeout: self.viewer_send_timeout,
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<S: SampleStore> AppState<S> {
    pub fn new(
        query: QueryFacade<S>,
        broadcaster: Arc<LiveBroadcaster>,
        viewer_send_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            query,
            broadcaster,
            viewer_send_timeout,
            shutdown,
        }
    }
}
