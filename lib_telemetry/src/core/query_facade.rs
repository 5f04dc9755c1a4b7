//! # Query Facade
//!
//! Stateless request/response reads over the store gateway. Every call goes
//! straight to the store; nothing is cached between requests. Results are
//! shaped for callers outside the core: samples become [`SampleView`]s with
//! ISO-8601 timestamps, and producer sets become sorted lists.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::connections::SampleStore;
use crate::error::Result;
use crate::model::{ProducerId, SampleView, StatsView};
use crate::schema;

/// Shaping parameters of the pull path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryConfig {
    /// How recently a producer must have captured a sample to count as active.
    pub active_window: Duration,
    /// Upper bound on samples returned by one history request.
    pub recent_limit: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            active_window: Duration::from_secs(5 * 60),
            recent_limit: 50,
        }
    }
}

/// Payload of the validation-hints request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationHints {
    /// Descriptions of commonly rejected writes.
    pub common_errors: Vec<String>,
}

/// Read-only view of the store for pull callers.
pub struct QueryFacade<S> {
    store: Arc<S>,
    config: QueryConfig,
}

// Derived Clone would require `S: Clone`.
impl<S> Clone for QueryFacade<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config,
        }
    }
}

impl<S: SampleStore> QueryFacade<S> {
    /// Creates a facade over `store`.
    pub fn new(store: Arc<S>, config: QueryConfig) -> Self {
        Self { store, config }
    }

    /// The shaping parameters in use.
    pub fn config(&self) -> QueryConfig {
        self.config
    }

    /// Producers active within the configured window, ascending.
    pub async fn active_producers(&self) -> Result<Vec<ProducerId>> {
        let active = self.store.active_producers(self.config.active_window).await?;
        Ok(active.into_iter().collect())
    }

    /// Latest samples of one producer, oldest first. `limit` is clamped to the
    /// configured maximum; `None` asks for the maximum.
    pub async fn recent_samples(
        &self,
        producer_id: ProducerId,
        limit: Option<usize>,
    ) -> Result<Vec<SampleView>> {
        let limit = limit
            .unwrap_or(self.config.recent_limit)
            .min(self.config.recent_limit);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let samples = self.store.recent_samples(producer_id, limit).await?;
        Ok(samples.iter().map(|s| s.to_view()).collect())
    }

    /// Store-wide counters in their public shape.
    pub async fn stats(&self) -> Result<StatsView> {
        Ok(self.store.aggregate_counts().await?.to_view())
    }

    /// What the validation gate most often rejects.
    pub fn validation_hints(&self) -> ValidationHints {
        ValidationHints {
            common_errors: schema::common_errors(),
        }
    }
}
