//! HTTP and WebSocket surface of the telemetry service.
//!
//! The `server_telemetry` binary is a thin wrapper over [`telemetry_logic`];
//! keeping the logic in a library lets the integration tests drive the real
//! router over TCP.

pub mod telemetry_logic;
