//! Anomaly scoring against the pretrained clustering artifact.
//!
//! Every packet of a window is scored individually: its per-packet
//! fields are joined with the window's aggregate features into one
//! fixed-order row, the row is standardized with the artifact's scaler,
//! and the minimum Euclidean distance to any centroid becomes the
//! anomaly score. A score strictly above the trained threshold marks
//! the packet malicious; exact equality stays benign.

use crate::capture::PacketRecord;
use crate::error::ScoreError;
use crate::features::WindowFeatures;
use crate::model::ModelArtifact;

/// Batch-level classification summary for one window.
///
/// Advisory telemetry only - the scorer never blocks or drops traffic.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowVerdict {
    /// Rows evaluated (one per packet in the window).
    pub total: usize,
    /// Rows whose anomaly score exceeded the threshold.
    pub flagged: usize,
    /// Agreement between verdicts and the embedded evaluation labels.
    pub accuracy: f64,
    pub mean_distance: f64,
    pub max_distance: f64,
}

/// Scores every packet of a window against the artifact.
///
/// A dimensionality mismatch between the produced rows and the trained
/// scaler is a misconfiguration, not a per-row condition: the whole
/// window is aborted and the error surfaced.
pub fn score_window(
    batch: &[PacketRecord],
    features: &WindowFeatures,
    artifact: &ModelArtifact,
) -> Result<WindowVerdict, ScoreError> {
    let mut flagged = 0usize;
    let mut correct = 0usize;
    let mut distance_sum = 0.0f64;
    let mut max_distance = 0.0f64;

    for record in batch {
        let row = feature_row(record, features);
        let scaled = artifact.scaler.transform(&row)?;
        let distance = nearest_centroid_distance(&scaled, &artifact.centroids);

        let predicted = u8::from(distance > artifact.threshold);
        flagged += usize::from(predicted == 1);
        correct += usize::from(predicted == record.label);
        distance_sum += distance;
        max_distance = max_distance.max(distance);
    }

    let total = batch.len();
    Ok(WindowVerdict {
        total,
        flagged,
        accuracy: if total > 0 {
            correct as f64 / total as f64
        } else {
            0.0
        },
        mean_distance: if total > 0 {
            distance_sum / total as f64
        } else {
            0.0
        },
        max_distance,
    })
}

/// Joins one packet's fields with the window aggregates, in the order
/// of [`crate::model::FEATURE_COLUMNS`].
fn feature_row(record: &PacketRecord, features: &WindowFeatures) -> Vec<f64> {
    vec![
        record.protocol as f64,
        u8::from(record.is_tcp) as f64,
        u8::from(record.is_udp) as f64,
        record.ttl as f64,
        record.ack as f64,
        record.syn as f64,
        record.fin as f64,
        record.psh as f64,
        record.urg as f64,
        record.rst as f64,
        record.sequence as f64,
        record.acknowledgment as f64,
        record.packet_size as f64,
        record.payload_size as f64,
        features.packet_size_std,
        features.packet_count as f64,
        features.most_freq_src_port as f64,
        features.most_freq_dst_port as f64,
        features.avg_packet_size,
        features.most_freq_packet_size_freq as f64,
        features.oversized_count as f64,
        features.seq_num_variance,
        features.short_lived_connections as f64,
        features.repeated_dst_hits as f64,
        features.scan_syn_count as f64,
        features.flow_rate,
        features.source_entropy,
        features.connection_errors as f64,
        features.dst_port_entropy,
        features.avg_packets_per_sec,
        features.syn_frequency,
        features.ack_frequency,
        features.tcp_fraction,
        features.udp_fraction,
        features.most_freq_protocol as f64,
        features.packet_size_variance,
        features.most_freq_payload_size as f64,
        features.avg_payload_size,
    ]
}

/// Minimum Euclidean distance from a standardized row to any centroid.
fn nearest_centroid_distance(row: &[f64], centroids: &[Vec<f64>]) -> f64 {
    centroids
        .iter()
        .map(|centroid| euclidean(row, centroid))
        .fold(f64::INFINITY, f64::min)
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}
