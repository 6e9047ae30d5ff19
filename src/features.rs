//! Per-window feature aggregation.
//!
//! Turns one swapped-out window batch into a single row of statistical
//! flow features: entropies, frequency gates, rates, and size/sequence
//! variability. All aggregates span the whole window as one group.
//!
//! # Statistical conventions
//!
//! - Entropy is Shannon entropy in nats over the empirical value
//!   distribution within the window.
//! - Variance and standard deviation use the unbiased (n−1) sample
//!   estimator; a window of one packet reports 0, not NaN.
//! - "Most frequent port" fields report 0 unless the top count strictly
//!   exceeds the configured frequency gate, so single-packet windows do
//!   not produce a dominant port.

use std::collections::HashMap;
use std::hash::Hash;

use statrs::statistics::{Data, Distribution};

use crate::capture::PacketRecord;

/// Thresholds and timing context for feature extraction.
#[derive(Debug, Clone)]
pub struct FeatureConfig {
    /// Packet sizes above this byte count are counted as oversized.
    pub oversized_packet_bytes: u32,
    /// Minimum occurrence count before a port is reported as dominant.
    pub port_frequency_min: u64,
    /// Windows with fewer packets than this are flagged short-lived.
    pub short_lived_packets: u64,
    /// Aggregation interval in seconds, used for per-second frequencies.
    pub interval_secs: u64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            oversized_packet_bytes: 1500,
            port_frequency_min: 5,
            short_lived_packets: 5,
            interval_secs: 1,
        }
    }
}

/// One row of per-window aggregates. Read-only after computation.
#[derive(Debug, Clone, Default)]
pub struct WindowFeatures {
    pub packet_size_std: f64,
    pub packet_count: u64,
    pub most_freq_src_port: u16,
    pub most_freq_dst_port: u16,
    pub avg_packet_size: f64,
    pub most_freq_packet_size_freq: u64,
    pub oversized_count: u64,
    pub seq_num_variance: f64,
    /// 1 when the whole window holds fewer packets than the short-lived
    /// threshold, else 0.
    pub short_lived_connections: u64,
    pub repeated_dst_hits: u64,
    pub scan_syn_count: u64,
    pub flow_rate: f64,
    pub source_entropy: f64,
    pub connection_errors: u64,
    pub dst_port_entropy: f64,
    pub avg_packets_per_sec: f64,
    pub syn_frequency: f64,
    pub ack_frequency: f64,
    pub tcp_fraction: f64,
    pub udp_fraction: f64,
    pub most_freq_protocol: u8,
    pub packet_size_variance: f64,
    pub most_freq_payload_size: u32,
    pub avg_payload_size: f64,
}

/// Computes the feature row for one window batch.
///
/// Sorts the batch by capture timestamp in place before any time-based
/// computation; the first record's inter-arrival delta is 0.
pub fn aggregate(batch: &mut [PacketRecord], cfg: &FeatureConfig) -> WindowFeatures {
    if batch.is_empty() {
        return WindowFeatures::default();
    }

    batch.sort_by_key(|r| r.timestamp);

    let count = batch.len() as u64;
    let count_f = batch.len() as f64;
    let interval = cfg.interval_secs.max(1) as f64;

    let deltas = inter_arrival_secs(batch);
    let total_time: f64 = deltas.iter().sum();
    let flow_rate = if total_time > 0.0 {
        count_f / total_time
    } else {
        count_f
    };

    let sizes: Vec<f64> = batch.iter().map(|r| r.packet_size as f64).collect();
    let (avg_packet_size, packet_size_std, packet_size_variance) = sample_stats(&sizes);

    let sequences: Vec<f64> = batch.iter().map(|r| r.sequence as f64).collect();
    let (_, _, seq_num_variance) = sample_stats(&sequences);

    let payloads: Vec<f64> = batch.iter().map(|r| r.payload_size as f64).collect();
    let (avg_payload_size, _, _) = sample_stats(&payloads);

    let src_port_counts = count_by(batch.iter().map(|r| u64::from(r.src_port)));
    let dst_port_counts = count_by(batch.iter().map(|r| u64::from(r.dst_port)));
    let size_counts = count_by(batch.iter().map(|r| u64::from(r.packet_size)));
    let payload_counts = count_by(batch.iter().map(|r| u64::from(r.payload_size)));
    let protocol_counts = count_by(batch.iter().map(|r| u64::from(r.protocol)));
    let src_addr_counts = count_by(batch.iter().map(|r| r.src));
    let dst_addr_counts = count_by(batch.iter().map(|r| r.dst));

    let syn_count = batch.iter().filter(|r| r.syn == 1).count() as u64;
    let ack_count = batch.iter().filter(|r| r.ack == 1).count() as u64;
    let tcp_count = batch.iter().filter(|r| r.is_tcp).count() as u64;
    let udp_count = batch.iter().filter(|r| r.is_udp).count() as u64;

    WindowFeatures {
        packet_size_std,
        packet_count: count,
        most_freq_src_port: gated_mode(&src_port_counts, cfg.port_frequency_min) as u16,
        most_freq_dst_port: gated_mode(&dst_port_counts, cfg.port_frequency_min) as u16,
        avg_packet_size,
        most_freq_packet_size_freq: mode(&size_counts).map_or(0, |(_, c)| c),
        oversized_count: batch
            .iter()
            .filter(|r| r.packet_size > cfg.oversized_packet_bytes)
            .count() as u64,
        seq_num_variance,
        short_lived_connections: u64::from(count < cfg.short_lived_packets),
        repeated_dst_hits: count - dst_addr_counts.len() as u64,
        scan_syn_count: batch.iter().filter(|r| r.syn == 1 && r.ack == 0).count() as u64,
        flow_rate,
        source_entropy: shannon_entropy(src_addr_counts.values().copied()),
        connection_errors: batch.iter().filter(|r| r.rst == 1).count() as u64,
        dst_port_entropy: shannon_entropy(dst_port_counts.values().copied()),
        avg_packets_per_sec: count_f / interval,
        syn_frequency: syn_count as f64 / interval,
        ack_frequency: ack_count as f64 / interval,
        tcp_fraction: tcp_count as f64 / count_f,
        udp_fraction: udp_count as f64 / count_f,
        most_freq_protocol: mode(&protocol_counts).map_or(0, |(v, _)| v) as u8,
        packet_size_variance,
        most_freq_payload_size: mode(&payload_counts).map_or(0, |(v, _)| v) as u32,
        avg_payload_size,
    }
}

/// Inter-arrival deltas in seconds over a timestamp-sorted batch.
/// The first record's delta is defined as 0.
fn inter_arrival_secs(batch: &[PacketRecord]) -> Vec<f64> {
    let mut deltas = vec![0.0f64; batch.len()];
    for i in 1..batch.len() {
        let delta = batch[i]
            .timestamp
            .signed_duration_since(batch[i - 1].timestamp);
        deltas[i] = delta
            .num_microseconds()
            .map(|us| us as f64 / 1e6)
            .unwrap_or_else(|| delta.num_milliseconds() as f64 / 1e3);
    }
    deltas
}

/// Mean, sample standard deviation, and sample variance of a series.
/// Fewer than two samples yield zero spread by convention.
fn sample_stats(xs: &[f64]) -> (f64, f64, f64) {
    if xs.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let data = Data::new(xs.to_vec());
    let mean = data.mean().unwrap_or(0.0);
    if xs.len() < 2 {
        return (mean, 0.0, 0.0);
    }
    let variance = data.variance().unwrap_or(0.0);
    (mean, variance.sqrt(), variance)
}

/// Shannon entropy in nats over a set of occurrence counts.
fn shannon_entropy(counts: impl Iterator<Item = u64>) -> f64 {
    let counts: Vec<u64> = counts.filter(|&c| c > 0).collect();
    let total: u64 = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    -counts
        .iter()
        .map(|&c| {
            let p = c as f64 / total;
            p * p.ln()
        })
        .sum::<f64>()
}

fn count_by<T, I>(values: I) -> HashMap<T, u64>
where
    T: Eq + Hash,
    I: IntoIterator<Item = T>,
{
    let mut counts = HashMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }
    counts
}

/// Most frequent value and its count. Ties resolve to the smallest
/// value so the output is deterministic.
fn mode(counts: &HashMap<u64, u64>) -> Option<(u64, u64)> {
    counts
        .iter()
        .map(|(&v, &c)| (v, c))
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
}

/// Most frequent value, or 0 unless its count strictly exceeds the gate.
fn gated_mode(counts: &HashMap<u64, u64>, gate: u64) -> u64 {
    match mode(counts) {
        Some((value, count)) if count > gate => value,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    use chrono::{Duration, TimeZone, Utc};

    fn base_record() -> PacketRecord {
        PacketRecord {
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            src: "10.0.0.1".parse::<IpAddr>().unwrap(),
            dst: "10.0.0.2".parse::<IpAddr>().unwrap(),
            protocol: 6,
            src_port: 40_000,
            dst_port: 80,
            is_tcp: true,
            is_udp: false,
            ttl: 64,
            ack: 0,
            syn: 0,
            fin: 0,
            psh: 0,
            urg: 0,
            rst: 0,
            sequence: 100,
            acknowledgment: 0,
            packet_size: 60,
            payload_size: 0,
            label: 0,
        }
    }

    fn assert_all_finite(f: &WindowFeatures) {
        for (name, value) in [
            ("packet_size_std", f.packet_size_std),
            ("avg_packet_size", f.avg_packet_size),
            ("seq_num_variance", f.seq_num_variance),
            ("flow_rate", f.flow_rate),
            ("source_entropy", f.source_entropy),
            ("dst_port_entropy", f.dst_port_entropy),
            ("avg_packets_per_sec", f.avg_packets_per_sec),
            ("syn_frequency", f.syn_frequency),
            ("ack_frequency", f.ack_frequency),
            ("tcp_fraction", f.tcp_fraction),
            ("udp_fraction", f.udp_fraction),
            ("packet_size_variance", f.packet_size_variance),
            ("avg_payload_size", f.avg_payload_size),
        ] {
            assert!(value.is_finite(), "{name} is not finite: {value}");
        }
    }

    #[test]
    fn test_single_packet_window() {
        let mut batch = vec![base_record()];
        let features = aggregate(&mut batch, &FeatureConfig::default());

        assert_eq!(features.packet_count, 1);
        assert_eq!(features.packet_size_std, 0.0);
        assert_eq!(features.packet_size_variance, 0.0);
        assert_eq!(features.seq_num_variance, 0.0);
        // single packet, zero summed inter-arrival time: raw count
        assert_eq!(features.flow_rate, 1.0);
        assert_eq!(features.short_lived_connections, 1);
        assert_all_finite(&features);
    }

    #[test]
    fn test_homogeneous_entropy_is_zero() {
        let mut batch: Vec<PacketRecord> = (0..8i64)
            .map(|i| {
                let mut r = base_record();
                r.timestamp = r.timestamp + Duration::milliseconds(i * 10);
                r
            })
            .collect();
        let features = aggregate(&mut batch, &FeatureConfig::default());

        assert_eq!(features.dst_port_entropy, 0.0);
        assert_eq!(features.source_entropy, 0.0);
    }

    #[test]
    fn test_distinct_addresses_raise_entropy() {
        let homogeneous = {
            let mut batch: Vec<PacketRecord> = (0..3).map(|_| base_record()).collect();
            aggregate(&mut batch, &FeatureConfig::default())
        };

        let mut spread: Vec<PacketRecord> = (0..3)
            .map(|i| {
                let mut r = base_record();
                r.src = format!("10.0.0.{}", i + 1).parse::<IpAddr>().unwrap();
                r.dst = format!("10.0.1.{}", i + 1).parse::<IpAddr>().unwrap();
                r
            })
            .collect();
        let spread = aggregate(&mut spread, &FeatureConfig::default());

        assert_eq!(homogeneous.source_entropy, 0.0);
        assert!(spread.source_entropy > homogeneous.source_entropy);
        // ln(3) for three equally likely sources
        assert!((spread.source_entropy - 3.0f64.ln()).abs() < 1e-9);
    }

    #[test]
    fn test_syn_scan_window() {
        let mut batch: Vec<PacketRecord> = (0..10i64)
            .map(|i| {
                let mut r = base_record();
                r.timestamp = r.timestamp + Duration::milliseconds(i * 5);
                r.syn = 1;
                r.ack = 0;
                r.dst_port = 8080;
                r
            })
            .collect();
        let features = aggregate(&mut batch, &FeatureConfig::default());

        assert_eq!(features.scan_syn_count, 10);
        // 10 hits on one port clears the default gate of 5
        assert_eq!(features.most_freq_dst_port, 8080);
        assert_eq!(features.syn_frequency, 10.0);
    }

    #[test]
    fn test_port_frequency_gate() {
        // 4 packets to one port does not strictly exceed a gate of 5
        let mut batch: Vec<PacketRecord> = (0..4).map(|_| base_record()).collect();
        let features = aggregate(&mut batch, &FeatureConfig::default());

        assert_eq!(features.most_freq_dst_port, 0);
        assert_eq!(features.most_freq_src_port, 0);

        // exactly gate + 1 packets passes
        let mut batch: Vec<PacketRecord> = (0..6).map(|_| base_record()).collect();
        let features = aggregate(&mut batch, &FeatureConfig::default());
        assert_eq!(features.most_freq_dst_port, 80);
        assert_eq!(features.most_freq_src_port, 40_000);
    }

    #[test]
    fn test_flow_rate_from_inter_arrival_time() {
        // 5 packets spread over 2 seconds of summed deltas
        let mut batch: Vec<PacketRecord> = (0..5i64)
            .map(|i| {
                let mut r = base_record();
                r.timestamp = r.timestamp + Duration::milliseconds(i * 500);
                r
            })
            .collect();
        let features = aggregate(&mut batch, &FeatureConfig::default());
        assert!((features.flow_rate - 2.5).abs() < 1e-9);

        // simultaneous timestamps fall back to the raw count
        let mut batch: Vec<PacketRecord> = (0..5).map(|_| base_record()).collect();
        let features = aggregate(&mut batch, &FeatureConfig::default());
        assert_eq!(features.flow_rate, 5.0);
    }

    #[test]
    fn test_unsorted_batch_is_sorted_first() {
        // timestamps arrive out of order; sorted deltas sum to 1s
        let base = base_record().timestamp;
        let offsets = [500i64, 0, 1000, 250, 750];
        let mut batch: Vec<PacketRecord> = offsets
            .iter()
            .map(|&ms| {
                let mut r = base_record();
                r.timestamp = base + Duration::milliseconds(ms);
                r
            })
            .collect();
        let features = aggregate(&mut batch, &FeatureConfig::default());
        assert!((features.flow_rate - 5.0).abs() < 1e-9);
        assert!(batch.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_mixed_window_counts() {
        let mut batch = Vec::new();
        for i in 0..6i64 {
            let mut r = base_record();
            r.timestamp = r.timestamp + Duration::milliseconds(i * 100);
            r.sequence = 100 + i as u32 * 1000;
            r.packet_size = 60 + (i as u32 % 2) * 1500;
            r.rst = u8::from(i == 5);
            batch.push(r);
        }
        for i in 0..2 {
            let mut r = base_record();
            r.timestamp = r.timestamp + Duration::milliseconds(600 + i * 100);
            r.protocol = 17;
            r.is_tcp = false;
            r.is_udp = true;
            r.syn = 0;
            r.sequence = 0;
            r.payload_size = 128;
            batch.push(r);
        }

        let cfg = FeatureConfig {
            interval_secs: 2,
            ..FeatureConfig::default()
        };
        let features = aggregate(&mut batch, &cfg);

        assert_eq!(features.packet_count, 8);
        assert_eq!(features.oversized_count, 3);
        assert_eq!(features.connection_errors, 1);
        assert_eq!(features.tcp_fraction, 0.75);
        assert_eq!(features.udp_fraction, 0.25);
        assert_eq!(features.most_freq_protocol, 6);
        // all 8 packets hit the same destination address
        assert_eq!(features.repeated_dst_hits, 7);
        assert_eq!(features.avg_packets_per_sec, 4.0);
        assert!(features.seq_num_variance > 0.0);
        assert_all_finite(&features);
    }

    #[test]
    fn test_mode_tie_breaks_to_smallest() {
        let counts = count_by([3u64, 3, 7, 7].into_iter());
        assert_eq!(mode(&counts), Some((3, 2)));
    }
}
