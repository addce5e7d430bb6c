//! Transfer statistics: concurrency-safe counters shared between the send
//! and retransmit paths, plus a derived report.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Counters are lock-free atomics; only the two timestamps sit behind a
/// mutex. Readers take a `snapshot` rather than touching fields directly.
#[derive(Debug, Default)]
pub struct TransferStats {
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    packets_retransmitted: AtomicU64,
    acks_sent: AtomicU64,
    acks_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    timing: Mutex<Timing>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Timing {
    start: Option<Instant>,
    end: Option<Instant>,
}

impl TransferStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one packet out, header and payload included in `bytes`.
    pub fn record_send(&self, bytes: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_receive(&self, bytes: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_retransmit(&self) {
        self.packets_retransmitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ack_sent(&self) {
        self.acks_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ack_received(&self) {
        self.acks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn start_transfer(&self) {
        self.timing.lock().unwrap().start = Some(Instant::now());
    }

    pub fn end_transfer(&self) {
        self.timing.lock().unwrap().end = Some(Instant::now());
    }

    /// Consistent view of all counters and derived rates.
    pub fn snapshot(&self) -> StatsReport {
        let timing = *self.timing.lock().unwrap();
        let duration = match (timing.start, timing.end) {
            (Some(start), Some(end)) => end.duration_since(start),
            _ => Duration::ZERO,
        };

        let packets_sent = self.packets_sent.load(Ordering::Relaxed);
        let packets_retransmitted = self.packets_retransmitted.load(Ordering::Relaxed);
        let bytes_received = self.bytes_received.load(Ordering::Relaxed);

        let throughput_mbps = if duration.is_zero() {
            0.0
        } else {
            (bytes_received * 8) as f64 / (duration.as_secs_f64() * 1_000_000.0)
        };
        let retransmit_rate_percent = if packets_sent == 0 {
            0.0
        } else {
            packets_retransmitted as f64 / packets_sent as f64 * 100.0
        };

        StatsReport {
            packets_sent,
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_retransmitted,
            acks_sent: self.acks_sent.load(Ordering::Relaxed),
            acks_received: self.acks_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received,
            duration,
            throughput_mbps,
            retransmit_rate_percent,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsReport {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_retransmitted: u64,
    pub acks_sent: u64,
    pub acks_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub duration: Duration,
    pub throughput_mbps: f64,
    pub retransmit_rate_percent: f64,
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "========================================")?;
        writeln!(f, "          Transfer Statistics")?;
        writeln!(f, "========================================")?;
        writeln!(f, "Packets Sent:          {}", self.packets_sent)?;
        writeln!(f, "Packets Received:      {}", self.packets_received)?;
        writeln!(
            f,
            "Packets Retransmitted: {} ({:.2}%)",
            self.packets_retransmitted, self.retransmit_rate_percent
        )?;
        writeln!(f, "ACKs Sent:             {}", self.acks_sent)?;
        writeln!(f, "ACKs Received:         {}", self.acks_received)?;
        writeln!(f, "Bytes Sent:            {}", self.bytes_sent)?;
        writeln!(f, "Bytes Received:        {}", self.bytes_received)?;
        writeln!(f, "Duration:              {:.2} seconds", self.duration.as_secs_f64())?;
        writeln!(f, "Throughput:            {:.2} Mbps", self.throughput_mbps)?;
        write!(f, "========================================")
    }
}
