//! Window buffer - the single piece of shared mutable state.
//!
//! The capture thread appends decoded records; the aggregation loop
//! periodically takes the whole accumulated batch and leaves a fresh
//! empty one behind. The lock is held only for the append or the swap,
//! never across feature computation or scoring.

use std::sync::Mutex;

use crate::capture::PacketRecord;

/// Thread-safe append-only accumulator for decoded packets.
#[derive(Debug, Default)]
pub struct WindowBuffer {
    records: Mutex<Vec<PacketRecord>>,
}

impl WindowBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one record. Constant-time aside from the occasional
    /// Vec growth.
    pub fn push(&self, record: PacketRecord) {
        let mut guard = self.records.lock().unwrap_or_else(|e| e.into_inner());
        guard.push(record);
    }

    /// Atomically takes the accumulated batch and resets the buffer.
    /// Returns None when nothing was collected since the last take,
    /// which tells the caller to skip the cycle entirely.
    pub fn take(&self) -> Option<Vec<PacketRecord>> {
        let mut guard = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut *guard))
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;
    use std::sync::Arc;
    use std::thread;

    use chrono::Utc;

    fn record() -> PacketRecord {
        PacketRecord {
            timestamp: Utc::now(),
            src: "10.0.0.1".parse::<IpAddr>().unwrap(),
            dst: "10.0.0.2".parse::<IpAddr>().unwrap(),
            protocol: 6,
            src_port: 1234,
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
    fn test_take_empty_returns_none() {
        let buffer = WindowBuffer::new();
        assert!(buffer.take().is_none());
    }

    #[test]
    fn test_take_resets_buffer() {
        let buffer = WindowBuffer::new();
        buffer.push(record());
        buffer.push(record());

        let batch = buffer.take().unwrap();
        assert_eq!(batch.len(), 2);
        assert!(buffer.is_empty());
        assert!(buffer.take().is_none());
    }

    #[test]
    fn test_concurrent_append_and_take_conserves_records() {
        // N appends racing an aggressive taker must neither lose nor
        // duplicate a record across the returned batches.
        const WRITERS: usize = 4;
        const PER_WRITER: usize = 2_500;

        let buffer = Arc::new(WindowBuffer::new());
        let mut handles = Vec::new();

        for _ in 0..WRITERS {
            let buffer = Arc::clone(&buffer);
            handles.push(thread::spawn(move || {
                for _ in 0..PER_WRITER {
                    buffer.push(record());
                }
            }));
        }

        let taker = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                let mut taken = 0usize;
                for _ in 0..200 {
                    if let Some(batch) = buffer.take() {
                        taken += batch.len();
                    }
                    thread::yield_now();
                }
                taken
            })
        };

        for handle in handles {
            handle.join().unwrap();
        }
        let mut total = taker.join().unwrap();

        // Whatever the taker missed is still in the buffer.
        total += buffer.take().map_or(0, |batch| batch.len());

        assert_eq!(total, WRITERS * PER_WRITER);
    }
}
