//! Pipeline scheduler - owns the two timing domains.
//!
//! The capture loop runs in its own OS thread at whatever rate packets
//! arrive; the aggregation loop wakes on a fixed timer, swaps the
//! window buffer, and runs the aggregator and scorer on the detached
//! batch. The two only meet at the buffer's mutex.
//!
//! A tick that fires while the previous cycle is still running is
//! skipped (`MissedTickBehavior::Skip`), so at most one aggregation
//! cycle is ever in flight - the backpressure policy is to drop excess
//! windows rather than queue unbounded work.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::capture::{CaptureConfig, PacketCapture};
use crate::config::Config;
use crate::error::Result;
use crate::features::{aggregate, FeatureConfig};
use crate::model::ModelArtifact;
use crate::report::{OutputFormat, WindowReport};
use crate::scorer::score_window;
use crate::window::WindowBuffer;

/// Runs the live pipeline until Ctrl+C or a fatal capture error.
///
/// Records still sitting in the buffer at shutdown are discarded, not
/// flushed - acceptable loss for a monitoring system.
pub async fn run(config: &Config, artifact: &ModelArtifact) -> Result<()> {
    let buffer = Arc::new(WindowBuffer::new());

    let capture = PacketCapture::new(CaptureConfig {
        device: config.capture.interface.clone(),
        filter: config.capture.filter.clone(),
        promiscuous: config.capture.promiscuous,
        timeout_ms: config.capture.channel_timeout_ms,
        sentinel_port: config.features.sentinel_port,
    });
    let shutdown = capture.shutdown_handle();
    capture.start(Arc::clone(&buffer))?;
    info!("Packet capture started");

    let feature_cfg = feature_config(config);
    let mut ticker = interval(Duration::from_secs(config.window.interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "Aggregation loop started, interval: {}s",
        config.window.interval_secs
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // The capture thread trips the flag on a fatal error.
                if shutdown.load(Ordering::Relaxed) {
                    anyhow::bail!("Capture source terminated unexpectedly");
                }
                process_window(&buffer, &feature_cfg, artifact, config.output.format)?;
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    shutdown.store(true, Ordering::Relaxed);
    Ok(())
}

/// One aggregation cycle: take-and-reset, aggregate, score, report.
/// An empty buffer means nothing to process and the cycle is skipped.
pub fn process_window(
    buffer: &WindowBuffer,
    feature_cfg: &FeatureConfig,
    artifact: &ModelArtifact,
    format: OutputFormat,
) -> Result<()> {
    let Some(mut batch) = buffer.take() else {
        debug!("Empty window, skipping aggregation cycle");
        return Ok(());
    };

    debug!("Processing window of {} packets", batch.len());
    let features = aggregate(&mut batch, feature_cfg);
    let verdict = score_window(&batch, &features, artifact)?;

    WindowReport::new(Utc::now(), &verdict, artifact.threshold).emit(format);
    Ok(())
}

pub fn feature_config(config: &Config) -> FeatureConfig {
    FeatureConfig {
        oversized_packet_bytes: config.features.oversized_packet_bytes,
        port_frequency_min: config.features.port_frequency_min,
        short_lived_packets: config.features.short_lived_packets,
        interval_secs: config.window.interval_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    use chrono::TimeZone;

    use crate::capture::PacketRecord;
    use crate::model::test_artifact;

    fn record() -> PacketRecord {
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
            syn: 1,
            fin: 0,
            psh: 0,
            urg: 0,
            rst: 0,
            sequence: 1,
            acknowledgment: 0,
            packet_size: 60,
            payload_size: 0,
            label: 0,
        }
    }

    #[test]
    fn test_empty_buffer_cycle_is_skipped() {
        let buffer = WindowBuffer::new();
        let artifact = test_artifact();

        let result = process_window(
            &buffer,
            &FeatureConfig::default(),
            &artifact,
            OutputFormat::Text,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_cycle_drains_buffer() {
        let buffer = WindowBuffer::new();
        for _ in 0..4 {
            buffer.push(record());
        }
        let artifact = test_artifact();

        process_window(
            &buffer,
            &FeatureConfig::default(),
            &artifact,
            OutputFormat::Text,
        )
        .unwrap();

        // the batch was swapped out; nothing is visible in two windows
        assert!(buffer.is_empty());
    }
}
