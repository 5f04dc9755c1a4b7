//! # lib_telemetry
//!
//! Change detection and live fan-out for telemetry samples.
//!
//! Many independent producers append `Sample`s (CPU model, RAM size,
//! temperature, producer id, capture time) to a shared store. This crate
//! watches that store and republishes every newly-arrived sample to any number
//! of live viewers, without re-sending what a viewer already has.
//!
//! ## Modules:
//! - **`connections`**: the store gateway (`SampleStore`) with PostgreSQL and
//!   in-process back-ends.
//! - **`ingestors`**: the polling `ChangeDetector` that diffs per-producer
//!   counts between polls.
//! - **`core`**: the `LiveBroadcaster` fan-out and the stateless `QueryFacade`.
//! - **`loggers`**: tracing subscriber bootstrap (feature `loggers`).

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod connections;
pub mod core;
pub mod error;
pub mod ingestors;
#[cfg(feature = "loggers")]
pub mod loggers;
pub mod model;
pub mod schema;

pub use error::{Result, TelemetryError};
pub use model::{BroadcastEvent, ProducerId, Sample};
