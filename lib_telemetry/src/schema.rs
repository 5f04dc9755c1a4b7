//! # Validation Gate Rules
//!
//! The shape constraints a store enforces on every write. The core never
//! validates what it reads; these rules exist so that store back-ends can
//! enforce one identical gate (CHECK constraints in PostgreSQL,
//! [`check_sample`] in the in-process store) and so operators can be shown
//! what producers commonly get wrong.

use std::ops::RangeInclusive;

use crate::error::{Result, TelemetryError};
use crate::model::Sample;

/// Allowed length of `cpu_descriptor`, in characters.
pub const CPU_DESCRIPTOR_LEN: RangeInclusive<usize> = 3..=100;
/// Allowed `ram_bytes` (0 to 1 TiB).
pub const RAM_BYTES: RangeInclusive<i64> = 0..=(1 << 40);
/// Allowed `temperature`.
pub const TEMPERATURE: RangeInclusive<i32> = 0..=150;
/// Allowed `producer_id` (seven digits).
pub const PRODUCER_ID: RangeInclusive<i64> = 1_000_000..=9_999_999;

/// Checks a sample against the gate. The first violated rule is reported.
pub fn check_sample(sample: &Sample) -> Result<()> {
    let cpu_len = sample.cpu_descriptor.chars().count();
    if !CPU_DESCRIPTOR_LEN.contains(&cpu_len) {
        return Err(reject(format!(
            "CPU must be a string between {}-{} characters, got {}",
            CPU_DESCRIPTOR_LEN.start(),
            CPU_DESCRIPTOR_LEN.end(),
            cpu_len
        )));
    }
    if !RAM_BYTES.contains(&sample.ram_bytes) {
        return Err(reject(format!(
            "RAM must be an integer between {} and {} bytes, got {}",
            RAM_BYTES.start(),
            RAM_BYTES.end(),
            sample.ram_bytes
        )));
    }
    if !TEMPERATURE.contains(&sample.temperature) {
        return Err(reject(format!(
            "Temperature must be an integer between {}-{}, got {}",
            TEMPERATURE.start(),
            TEMPERATURE.end(),
            sample.temperature
        )));
    }
    if !PRODUCER_ID.contains(&sample.producer_id) {
        return Err(reject(format!(
            "ID must be a 7-digit integer, got {}",
            sample.producer_id
        )));
    }
    Ok(())
}

fn reject(reason: String) -> TelemetryError {
    TelemetryError::ValidationRejected(reason)
}

/// Human-readable descriptions of the mistakes the gate rejects most often.
pub fn common_errors() -> Vec<String> {
    vec![
        "Document failed validation: CPU must be string".to_string(),
        format!(
            "Document failed validation: CPU must be between {}-{} characters",
            CPU_DESCRIPTOR_LEN.start(),
            CPU_DESCRIPTOR_LEN.end()
        ),
        "Document failed validation: RAM exceeds maximum value".to_string(),
        format!(
            "Document failed validation: Temperature must be integer between {}-{}",
            TEMPERATURE.start(),
            TEMPERATURE.end()
        ),
        "Document failed validation: Missing required field timestamp".to_string(),
        "Document failed validation: ID must be 7-digit number".to_string(),
    ]
}
