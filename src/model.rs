//! Model artifact loading and validation.
//!
//! The offline trainer exports a JSON bundle holding the feature
//! scaler, the cluster centroids, and the decision threshold. The
//! bundle is read once at startup and is immutable afterwards.
//!
//! The bundle carries a schema version and the ordered list of feature
//! column names it was trained on; both are checked here, once, against
//! the aggregator's compiled-in schema instead of implicitly at every
//! scoring call.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ScoreError};

/// Artifact schema version this build understands.
pub const SCHEMA_VERSION: u32 = 1;

/// The feature columns of a scored row, in order: the per-packet fields
/// first, then the per-window aggregates. Timestamps, addresses, raw
/// ports, and the evaluation label never reach the scorer.
pub const FEATURE_COLUMNS: [&str; 38] = [
    "protocol",
    "tcp",
    "udp",
    "ttl",
    "ack",
    "syn",
    "fin",
    "psh",
    "urg",
    "rst",
    "sequence_number",
    "acknowledgment_number",
    "packet_size",
    "payload_size",
    "packet_size_std",
    "packet_count",
    "most_freq_src_port",
    "most_freq_dst_port",
    "avg_packet_size",
    "most_freq_packet_size_freq",
    "oversized_count",
    "seq_num_variance",
    "short_lived_connections",
    "repeated_dst_hits",
    "scan_syn_count",
    "flow_rate",
    "source_entropy",
    "connection_errors",
    "dst_port_entropy",
    "avg_packets_per_sec",
    "syn_frequency",
    "ack_frequency",
    "tcp_fraction",
    "udp_fraction",
    "most_freq_protocol",
    "packet_size_variance",
    "most_freq_payload_size",
    "avg_payload_size",
];

/// Per-feature standardization parameters (z-score transform).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Scaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl Scaler {
    /// Standardizes one feature row against the trained parameters.
    pub fn transform(&self, row: &[f64]) -> Result<Vec<f64>, ScoreError> {
        if row.len() != self.mean.len() {
            return Err(ScoreError::DimensionMismatch {
                expected: self.mean.len(),
                actual: row.len(),
            });
        }
        Ok(row
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (mean, scale))| (x - mean) / scale)
            .collect())
    }
}

/// The persisted clustering model: scaler, centroids, and threshold.
/// Loaded once at startup; immutable for the process lifetime.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelArtifact {
    pub schema_version: u32,
    pub columns: Vec<String>,
    pub scaler: Scaler,
    pub centroids: Vec<Vec<f64>>,
    pub threshold: f64,
}

impl ModelArtifact {
    /// Loads and validates the artifact from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path).map_err(|source| ModelError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let artifact: ModelArtifact =
            serde_json::from_str(&content).map_err(|source| ModelError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        artifact.validate()?;
        Ok(artifact)
    }

    /// Checks the artifact against the aggregator's feature schema.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ModelError::SchemaVersion {
                found: self.schema_version,
                expected: SCHEMA_VERSION,
            });
        }

        if self.columns.len() != FEATURE_COLUMNS.len() {
            return Err(ModelError::SchemaMismatch(format!(
                "trained on {} columns, aggregator produces {}",
                self.columns.len(),
                FEATURE_COLUMNS.len()
            )));
        }
        for (trained, expected) in self.columns.iter().zip(FEATURE_COLUMNS) {
            if trained.as_str() != expected {
                return Err(ModelError::SchemaMismatch(format!(
                    "column '{trained}' where '{expected}' was expected"
                )));
            }
        }

        let width = FEATURE_COLUMNS.len();
        if self.scaler.mean.len() != width || self.scaler.scale.len() != width {
            return Err(ModelError::Invalid(format!(
                "scaler width {}/{} does not match {} feature columns",
                self.scaler.mean.len(),
                self.scaler.scale.len(),
                width
            )));
        }
        if self
            .scaler
            .scale
            .iter()
            .any(|s| !s.is_finite() || *s == 0.0)
        {
            return Err(ModelError::Invalid(
                "scaler contains a zero or non-finite scale entry".into(),
            ));
        }

        if self.centroids.is_empty() {
            return Err(ModelError::Invalid("artifact has no centroids".into()));
        }
        for (i, centroid) in self.centroids.iter().enumerate() {
            if centroid.len() != width {
                return Err(ModelError::Invalid(format!(
                    "centroid {} has width {}, expected {}",
                    i,
                    centroid.len(),
                    width
                )));
            }
            if centroid.iter().any(|v| !v.is_finite()) {
                return Err(ModelError::Invalid(format!(
                    "centroid {i} contains a non-finite value"
                )));
            }
        }

        if !self.threshold.is_finite() {
            return Err(ModelError::Invalid("threshold is not finite".into()));
        }

        Ok(())
    }

    pub fn num_features(&self) -> usize {
        self.columns.len()
    }
}

/// Identity-scaled artifact with a single origin centroid, for tests.
#[cfg(test)]
pub(crate) fn test_artifact() -> ModelArtifact {
    let width = FEATURE_COLUMNS.len();
    ModelArtifact {
        schema_version: SCHEMA_VERSION,
        columns: FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect(),
        scaler: Scaler {
            mean: vec![0.0; width],
            scale: vec![1.0; width],
        },
        centroids: vec![vec![0.0; width]],
        threshold: 3.0,
    }
}
