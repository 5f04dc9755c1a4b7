//! # Telemetry Data Model
//!
//! The records that flow through the system and their wire shapes.
//!
//! Internally a reading is a [`Sample`]. Whenever a sample leaves the core,
//! either pushed as a `new_data` event or returned by a pull query, it is
//! rendered as a [`SampleView`]: the field names producers and viewers agree
//! on (`CPU`, `RAM`, `Temperature`, `ID`, `timestamp`) with the capture time
//! as an ISO-8601 string.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier of a producer.
pub type ProducerId = i64;

/// Name of the push event carrying a freshly detected sample.
pub const NEW_DATA_EVENT: &str = "new_data";

/// One immutable telemetry reading as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// The producer that wrote the reading.
    pub producer_id: ProducerId,
    /// Short CPU model description.
    pub cpu_descriptor: String,
    /// Installed RAM in bytes.
    pub ram_bytes: i64,
    /// Temperature reading.
    pub temperature: i32,
    /// Producer-assigned capture time.
    pub captured_at: DateTime<Utc>,
}

impl Sample {
    /// Renders the sample in its outbound shape.
    pub fn to_view(&self) -> SampleView {
        SampleView {
            cpu: self.cpu_descriptor.clone(),
            ram: self.ram_bytes,
            temperature: self.temperature,
            id: self.producer_id,
            timestamp: iso_timestamp(&self.captured_at),
        }
    }
}

/// Per-producer result of a grouping poll: how many samples exist and which
/// one was inserted last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerSnapshot {
    /// The producer the group belongs to.
    pub producer_id: ProducerId,
    /// Total number of samples stored for the producer.
    pub count: u64,
    /// The most recently inserted sample of the producer.
    pub newest: Sample,
}

/// Store-wide counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AggregateCounts {
    /// Number of samples in the store.
    pub total: u64,
    /// Number of distinct producers that ever wrote a sample.
    pub distinct_producers: u64,
    /// Samples captured within the last minute.
    pub last_minute: u64,
}

impl AggregateCounts {
    /// The outbound shape of the counters.
    pub fn to_view(self) -> StatsView {
        StatsView {
            total_documents: self.total,
            active_students: self.distinct_producers,
            last_minute: self.last_minute,
        }
    }
}

/// A single unit of push delivery, produced once per detected sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastEvent {
    /// The producer that advanced.
    pub producer_id: ProducerId,
    /// The newest sample of that producer at detection time.
    pub sample: Sample,
    /// The producer's sample count when the event was produced.
    pub observed_count: u64,
}

impl BroadcastEvent {
    /// Builds the event for a producer whose count grew to `observed_count`.
    pub fn new(sample: Sample, observed_count: u64) -> Self {
        Self {
            producer_id: sample.producer_id,
            sample,
            observed_count,
        }
    }

    /// The `new_data` message sent to viewers for this event.
    pub fn to_push_message(&self) -> PushMessage {
        PushMessage {
            event: NEW_DATA_EVENT.to_string(),
            data: self.sample.to_view(),
        }
    }
}

/// Outbound shape of a sample, shared by the push and pull paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleView {
    /// CPU model description.
    #[serde(rename = "CPU")]
    pub cpu: String,
    /// RAM in bytes.
    #[serde(rename = "RAM")]
    pub ram: i64,
    /// Temperature reading.
    #[serde(rename = "Temperature")]
    pub temperature: i32,
    /// Producer id.
    #[serde(rename = "ID")]
    pub id: ProducerId,
    /// Capture time, ISO-8601.
    pub timestamp: String,
}

/// Outbound shape of the aggregate counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsView {
    /// Samples in the store.
    pub total_documents: u64,
    /// Distinct producers that ever wrote.
    pub active_students: u64,
    /// Samples captured within the last minute.
    pub last_minute: u64,
}

/// Envelope of a push frame: `{"event": "new_data", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    /// Event name.
    pub event: String,
    /// The sample carried by the event.
    pub data: SampleView,
}

/// Canonical textual form of a timestamp on the wire (RFC 3339, UTC,
/// microsecond precision).
pub fn iso_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}
