//! Packet capture module - the producer side of the pipeline.
//!
//! This module handles raw packet capture using libpcap, decodes each
//! frame into a [`PacketRecord`], and appends it to the shared
//! [`WindowBuffer`](crate::window::WindowBuffer). Frames that are not
//! TCP or UDP over IP are dropped silently.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Utc};
use etherparse::{NetSlice, SlicedPacket, TransportSlice};
use pcap::{Capture, Device};
use tracing::{debug, error, info};

use crate::error::{CaptureError, Result};
use crate::window::WindowBuffer;

/// IP protocol numbers for the two transports we decode.
const PROTO_TCP: u8 = 6;
const PROTO_UDP: u8 = 17;

/// One decoded packet. Immutable once created.
///
/// TCP control flags are stored as 0/1 integers; for UDP packets the
/// flag and sequence fields stay 0. `label` marks traffic on the
/// sentinel port and is used only for self-evaluation of the verdicts.
#[derive(Debug, Clone)]
pub struct PacketRecord {
    pub timestamp: DateTime<Utc>,
    pub src: IpAddr,
    pub dst: IpAddr,
    pub protocol: u8,
    pub src_port: u16,
    pub dst_port: u16,
    pub is_tcp: bool,
    pub is_udp: bool,
    pub ttl: u8,
    pub ack: u8,
    pub syn: u8,
    pub fin: u8,
    pub psh: u8,
    pub urg: u8,
    pub rst: u8,
    pub sequence: u32,
    pub acknowledgment: u32,
    pub packet_size: u32,
    pub payload_size: u32,
    pub label: u8,
}

/// Configuration for the packet capture.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Network interface to capture on (None = auto-detect).
    pub device: Option<String>,
    /// BPF filter expression (e.g., "tcp or udp").
    pub filter: Option<String>,
    /// Promiscuous mode.
    pub promiscuous: bool,
    /// Capture read timeout in milliseconds.
    pub timeout_ms: i32,
    /// Port marking known attack traffic for self-evaluation.
    pub sentinel_port: u16,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            filter: None,
            promiscuous: true,
            timeout_ms: 100,
            sentinel_port: 9,
        }
    }
}

/// The packet capture producer.
/// Runs in a dedicated thread and appends PacketRecords to the window buffer.
pub struct PacketCapture {
    config: CaptureConfig,
    shutdown: Arc<AtomicBool>,
}

impl PacketCapture {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Starts packet capture in a background thread, appending decoded
    /// records to `buffer`. A fatal capture error trips the shutdown
    /// flag so the rest of the pipeline stops too.
    pub fn start(self, buffer: Arc<WindowBuffer>) -> Result<()> {
        let shutdown = Arc::clone(&self.shutdown);
        let config = self.config.clone();

        thread::Builder::new()
            .name("packet-capture".into())
            .spawn(move || {
                if let Err(e) = Self::capture_loop(config, buffer, Arc::clone(&shutdown)) {
                    error!("Capture thread error: {}", e);
                    shutdown.store(true, Ordering::Relaxed);
                }
                info!("Capture thread terminated");
            })?;

        Ok(())
    }

    /// The main capture loop - runs in a dedicated thread.
    fn capture_loop(
        config: CaptureConfig,
        buffer: Arc<WindowBuffer>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<()> {
        // Select capture device
        let device = match &config.device {
            Some(name) => Device::from(name.as_str()),
            None => Device::lookup()
                .map_err(|e| CaptureError::DeviceOpen {
                    device: "default".into(),
                    source: e,
                })?
                .ok_or(CaptureError::NoDeviceFound)?,
        };

        info!("Opening capture on device: {}", device.name);

        // Open capture handle
        let mut cap = Capture::from_device(device.clone())
            .map_err(|e| CaptureError::DeviceOpen {
                device: device.name.clone(),
                source: e,
            })?
            .promisc(config.promiscuous)
            .timeout(config.timeout_ms)
            .open()
            .map_err(|e| CaptureError::DeviceOpen {
                device: device.name.clone(),
                source: e,
            })?;

        // Apply BPF filter if specified
        if let Some(ref filter) = config.filter {
            cap.filter(filter, true).map_err(|e| CaptureError::FilterSet {
                filter: filter.clone(),
                source: e,
            })?;
            info!("Applied capture filter: {}", filter);
        }

        // Main capture loop
        while !shutdown.load(Ordering::Relaxed) {
            match cap.next_packet() {
                Ok(packet) => {
                    let timestamp = match timeval_to_datetime(packet.header.ts) {
                        Some(ts) => ts,
                        None => continue,
                    };
                    if let Some(record) =
                        decode_packet(packet.data, timestamp, config.sentinel_port)
                    {
                        buffer.push(record);
                    }
                }
                Err(pcap::Error::TimeoutExpired) => {
                    // Normal timeout, continue loop
                    continue;
                }
                Err(e) => {
                    // Capture-source failure is fatal; the caller trips shutdown.
                    return Err(CaptureError::PacketRead(e).into());
                }
            }
        }

        Ok(())
    }
}

/// Converts a pcap timeval to a chrono DateTime.
/// Uses saturating arithmetic to prevent overflow (tv_usec max is 999,999).
fn timeval_to_datetime(ts: libc::timeval) -> Option<DateTime<Utc>> {
    let nanos = (ts.tv_usec as u32).saturating_mul(1000);
    DateTime::from_timestamp(ts.tv_sec, nanos)
}

/// Decodes a raw ethernet frame into a PacketRecord.
/// Returns None for anything that is not TCP or UDP over IP.
pub fn decode_packet(
    data: &[u8],
    timestamp: DateTime<Utc>,
    sentinel_port: u16,
) -> Option<PacketRecord> {
    let sliced = SlicedPacket::from_ethernet(data).ok()?;

    // Extract IP addresses and TTL/hop limit
    let (src, dst, ttl) = match &sliced.net {
        Some(NetSlice::Ipv4(ipv4)) => {
            let header = ipv4.header();
            (
                IpAddr::from(header.source()),
                IpAddr::from(header.destination()),
                header.ttl(),
            )
        }
        Some(NetSlice::Ipv6(ipv6)) => {
            let header = ipv6.header();
            (
                IpAddr::from(header.source()),
                IpAddr::from(header.destination()),
                header.hop_limit(),
            )
        }
        _ => return None,
    };

    let record = match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => {
            let src_port = tcp.source_port();
            let dst_port = tcp.destination_port();
            PacketRecord {
                timestamp,
                src,
                dst,
                protocol: PROTO_TCP,
                src_port,
                dst_port,
                is_tcp: true,
                is_udp: false,
                ttl,
                ack: tcp.ack() as u8,
                syn: tcp.syn() as u8,
                fin: tcp.fin() as u8,
                psh: tcp.psh() as u8,
                urg: tcp.urg() as u8,
                rst: tcp.rst() as u8,
                sequence: tcp.sequence_number(),
                acknowledgment: tcp.acknowledgment_number(),
                packet_size: data.len() as u32,
                payload_size: tcp.payload().len() as u32,
                label: label_for(src_port, dst_port, sentinel_port),
            }
        }
        Some(TransportSlice::Udp(udp)) => {
            let src_port = udp.source_port();
            let dst_port = udp.destination_port();
            PacketRecord {
                timestamp,
                src,
                dst,
                protocol: PROTO_UDP,
                src_port,
                dst_port,
                is_tcp: false,
                is_udp: true,
                ttl,
                ack: 0,
                syn: 0,
                fin: 0,
                psh: 0,
                urg: 0,
                rst: 0,
                sequence: 0,
                acknowledgment: 0,
                packet_size: data.len() as u32,
                payload_size: udp.payload().len() as u32,
                label: label_for(src_port, dst_port, sentinel_port),
            }
        }
        _ => return None,
    };

    debug!(
        "Captured: {} -> {}:{} proto={} size={}",
        record.src, record.dst, record.dst_port, record.protocol, record.packet_size
    );

    Some(record)
}

/// Traffic touching the sentinel port is labeled as known attack traffic.
fn label_for(src_port: u16, dst_port: u16, sentinel_port: u16) -> u8 {
    u8::from(src_port == sentinel_port || dst_port == sentinel_port)
}

/// Lists available network devices for capture.
pub fn list_devices() -> Result<Vec<Device>> {
    Ok(Device::list()?)
}
