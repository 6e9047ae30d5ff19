//! Domain-specific error types for netwarden.
//!
//! Uses `thiserror` for ergonomic error definitions that integrate
//! with the broader `anyhow` error handling strategy.

use thiserror::Error;

/// Errors that can occur during packet capture operations.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to open capture device '{device}': {source}")]
    DeviceOpen {
        device: String,
        #[source]
        source: pcap::Error,
    },

    #[error("Failed to set capture filter '{filter}': {source}")]
    FilterSet {
        filter: String,
        #[source]
        source: pcap::Error,
    },

    #[error("Failed to read packet: {0}")]
    PacketRead(#[from] pcap::Error),

    #[error("No suitable capture device found")]
    NoDeviceFound,
}

/// Errors that can occur while loading or validating the model artifact.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read model artifact '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse model artifact '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported artifact schema version {found} (expected {expected})")]
    SchemaVersion { found: u32, expected: u32 },

    #[error("Artifact feature schema does not match the aggregator: {0}")]
    SchemaMismatch(String),

    #[error("Artifact is structurally invalid: {0}")]
    Invalid(String),
}

/// Errors that can occur while scoring a window.
#[derive(Error, Debug)]
pub enum ScoreError {
    #[error("Feature row width {actual} does not match trained width {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Result type alias using anyhow for application-level error handling.
pub type Result<T> = anyhow::Result<T>;
