//! Harness for the black-box tests: runs the real service on an ephemeral
//! port over an in-memory store.

use chrono::{Duration as ChronoDuration, Utc};
use lib_telemetry::connections::MemoryStore;
use lib_telemetry::core::LiveBroadcaster;
use lib_telemetry::model::{ProducerId, Sample};
use servers::telemetry_logic::config::{Config, StoreKind};
use servers::telemetry_logic::service::{self, RunningService};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// A service bound to `127.0.0.1:<ephemeral>`.
pub struct TestServer {
    pub base_url: String,
    pub ws_url: String,
    pub store: Arc<MemoryStore>,
    running: RunningService,
}

impl TestServer {
    /// Starts the service over `store` with a fast poll interval. The
    /// detector has seeded by the time this returns.
    pub async fn start(store: Arc<MemoryStore>) -> TestServer {
        TestServer::start_with(store, |_| {}).await
    }

    /// Like [`TestServer::start`], with `configure` applied on top of the
    /// test defaults.
    pub async fn start_with(store: Arc<MemoryStore>, configure: impl FnOnce(&mut Config)) -> TestServer {
        let mut config = Config::defaults();
        config.store = Some(StoreKind::Memory);
        config.poll_interval_ms = Some(50);
        config.backoff_ms = Some(50);
        config.viewer_send_timeout_ms = Some(500);
        configure(&mut config);
        let settings = config.resolve().expect("test settings are valid");

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
        let running = service::start(Arc::clone(&store), &settings, listener, CancellationToken::new())
            .await
            .expect("service starts");
        let addr = running.local_addr;

        TestServer {
            base_url: format!("http://{}", addr),
            ws_url: format!("ws://{}/ws", addr),
            store,
            running,
        }
    }

    /// The broadcaster fed by the detector, for publishing directly.
    pub fn broadcaster(&self) -> Arc<LiveBroadcaster> {
        Arc::clone(&self.running.broadcaster)
    }

    /// Number of viewers currently registered with the broadcaster.
    pub fn viewer_count(&self) -> usize {
        self.running.broadcaster.viewer_count()
    }

    /// Waits until exactly `expected` viewers are registered. Panics after 5s.
    pub async fn wait_for_viewers(&self, expected: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.viewer_count() != expected {
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {} viewers, have {}",
                expected,
                self.viewer_count()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn stop(self) {
        self.running.stop().await;
    }
}

/// A valid sample captured `age_secs` ago.
pub fn sample(producer_id: ProducerId, temperature: i32, age_secs: i64) -> Sample {
    Sample {
        producer_id,
        cpu_descriptor: "Intel i7".to_string(),
        ram_bytes: 17179869184,
        temperature,
        captured_at: Utc::now() - ChronoDuration::seconds(age_secs),
    }
}
