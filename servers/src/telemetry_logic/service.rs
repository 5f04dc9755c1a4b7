//! Wiring of the running service: the detector task, the broadcaster pump and
//! the HTTP server, all stopped by one `CancellationToken`.

use crate::telemetry_logic::config::Settings;
use crate::telemetry_logic::downstream;
use crate::telemetry_logic::state::AppState;
use lib_telemetry::connections::SampleStore;
use lib_telemetry::core::{LiveBroadcaster, QueryFacade};
use lib_telemetry::ingestors::ChangeDetector;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Handles to the tasks of a started service.
pub struct RunningService {
    pub local_addr: SocketAddr,
    pub broadcaster: Arc<LiveBroadcaster>,
    shutdown: CancellationToken,
    detector: JoinHandle<()>,
    pump: JoinHandle<()>,
    server: JoinHandle<std::io::Result<()>>,
}

/// Starts the service on an already bound listener.
///
/// The detector's seeding poll runs before this returns, so samples that
/// exist at startup are never pushed. If the store is down at that moment the
/// detector seeds on its first successful poll instead.
pub async fn start<S: SampleStore>(
    store: Arc<S>,
    settings: &Settings,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> std::io::Result<RunningService> {
    let local_addr = listener.local_addr()?;
    let (events_tx, events_rx) = mpsc::channel(settings.event_channel_capacity);
    let broadcaster = Arc::new(LiveBroadcaster::new(settings.viewer_buffer));

    let mut detector = ChangeDetector::new(Arc::clone(&store), events_tx, settings.detector);
    if let Err(e) = detector.poll_once().await {
        warn!("Initial poll failed, the detector will seed on its next attempt: {}", e);
    }

    let detector = tokio::spawn(detector.run(shutdown.clone()));
    let pump = tokio::spawn(Arc::clone(&broadcaster).pump(events_rx, shutdown.clone()));

    let state = AppState::new(
        QueryFacade::new(store, settings.query),
        Arc::clone(&broadcaster),
        settings.viewer_send_timeout,
        shutdown.clone(),
    );
    let server = tokio::spawn(downstream::serve(listener, state, shutdown.clone()));

    info!("Service started on {}", local_addr);
    Ok(RunningService {
        local_addr,
        broadcaster,
        shutdown,
        detector,
        pump,
        server,
    })
}

impl RunningService {
    /// Cancels every task and waits for them to finish.
    pub async fn stop(self) {
        self.shutdown.cancel();
        self.wait().await;
    }

    /// Waits for every task to finish. They only finish once the shutdown
    /// token is cancelled or the server fails.
    pub async fn wait(self) {
        let (detector, pump, server) = tokio::join!(self.detector, self.pump, self.server);
        if let Err(e) = detector {
            error!("Change detector task failed: {}", e);
        }
        if let Err(e) = pump {
            error!("Broadcaster task failed: {}", e);
        }
        match server {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("HTTP server failed: {}", e),
            Err(e) => error!("HTTP server task failed: {}", e),
        }
        info!("Shutdown complete.");
    }
}
