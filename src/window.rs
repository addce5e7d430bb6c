//! Send-side sliding window with per-chunk retransmit timers.
//!
//! Pure state machine: the transfer loop asks which indices to (re)transmit
//! and feeds back ACKs and the clock. Deadlines live in a min-heap; ACKed
//! entries are deleted logically by dropping the side-map record, so stale
//! heap entries pop harmlessly.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

use crate::error::TransferError;

#[derive(Debug)]
struct Record {
    last_sent_at: Instant,
    deadline: Instant,
    retries: u32,
}

/// Window over chunk indices `[base, base + window)`. A record exists for
/// index `i` iff `base <= i < next_to_send`; `base` is the smallest
/// un-acknowledged index.
#[derive(Debug)]
pub struct SendWindow {
    base: u32,
    next_to_send: u32,
    fin_index: u32,
    window: u32,
    rto: Duration,
    max_retries: u32,
    records: HashMap<u32, Record>,
    deadlines: BinaryHeap<Reverse<(Instant, u32)>>,
}

impl SendWindow {
    pub fn new(fin_index: u32, window: u32, rto: Duration, max_retries: u32) -> Self {
        Self {
            base: 0,
            next_to_send: 0,
            fin_index,
            window,
            rto,
            max_retries,
            records: HashMap::new(),
            deadlines: BinaryHeap::new(),
        }
    }

    /// Indices to transmit for the first time, in ascending order. Arms a
    /// retransmit timer for each.
    pub fn fill(&mut self, now: Instant) -> Vec<u32> {
        let mut out = Vec::new();
        while self.next_to_send < self.base.saturating_add(self.window)
            && self.next_to_send <= self.fin_index
        {
            let seq = self.next_to_send;
            self.arm(seq, now, 0);
            self.next_to_send += 1;
            out.push(seq);
        }
        out
    }

    /// Cumulative ACK: every index strictly below `ack` is done. Stale or
    /// out-of-window values clamp via `max`, so ACKs are idempotent.
    pub fn on_ack(&mut self, ack: u32) {
        if ack <= self.base {
            return;
        }
        for seq in self.base..ack.min(self.next_to_send) {
            self.records.remove(&seq);
        }
        self.base = self.base.max(ack.min(self.next_to_send));
    }

    /// Indices whose timers have fired, re-armed for retransmission.
    /// Fails the transfer once any chunk exhausts its retries.
    pub fn expired(&mut self, now: Instant) -> Result<Vec<u32>, TransferError> {
        let mut out = Vec::new();
        while let Some(&Reverse((deadline, seq))) = self.deadlines.peek() {
            if deadline > now {
                break;
            }
            self.deadlines.pop();

            let Some(record) = self.records.get(&seq) else {
                continue; // already acked
            };
            if record.deadline != deadline {
                continue; // superseded by a retransmit
            }

            if record.retries >= self.max_retries {
                return Err(TransferError::RetryExhausted { seq, retries: record.retries });
            }

            let retries = record.retries + 1;
            self.arm(seq, now, retries);
            out.push(seq);
        }
        Ok(out)
    }

    fn arm(&mut self, seq: u32, now: Instant, retries: u32) {
        let deadline = now + self.rto;
        self.records.insert(seq, Record { last_sent_at: now, deadline, retries });
        self.deadlines.push(Reverse((deadline, seq)));
    }

    /// Earliest pending retransmit deadline, for bounding the ACK poll.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.records.values().map(|r| r.deadline).min()
    }

    /// All chunks through the terminal one are acknowledged.
    pub fn is_complete(&self) -> bool {
        self.base == self.fin_index + 1
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn in_flight(&self) -> usize {
        self.records.len()
    }

    pub fn retries_of(&self, seq: u32) -> Option<u32> {
        self.records.get(&seq).map(|r| r.retries)
    }

    pub fn last_sent_at(&self, seq: u32) -> Option<Instant> {
        self.records.get(&seq).map(|r| r.last_sent_at)
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    const RTO: Duration = Duration::from_millis(500);

    fn window(fin: u32) -> SendWindow {
        SendWindow::new(fin, 10, RTO, 10)
    }

    #[test]
    fn test_fill_respects_window() {
        let now = Instant::now();
        let mut w = window(99);
        assert_eq!(w.fill(now), (0..10).collect::<Vec<_>>());
        assert_eq!(w.in_flight(), 10);
        assert_eq!(w.last_sent_at(0), Some(now));
        // No window space left, nothing new to send.
        assert!(w.fill(now).is_empty());
    }

    #[test]
    fn test_fill_stops_at_fin() {
        let now = Instant::now();
        let mut w = window(2);
        assert_eq!(w.fill(now), vec![0, 1, 2]);
        assert!(w.fill(now).is_empty());
    }

    #[test]
    fn test_empty_file_single_chunk() {
        let now = Instant::now();
        let mut w = window(0);
        assert_eq!(w.fill(now), vec![0]);
        w.on_ack(1);
        assert!(w.is_complete());
    }

    #[test]
    fn test_ack_advances_and_slides() {
        let now = Instant::now();
        let mut w = window(99);
        w.fill(now);

        w.on_ack(4);
        assert_eq!(w.base(), 4);
        assert_eq!(w.in_flight(), 6);
        // Freed window space admits indices 10..14.
        assert_eq!(w.fill(now), (10..14).collect::<Vec<_>>());
    }

    #[test]
    fn test_ack_is_idempotent_and_monotone() {
        let now = Instant::now();
        let mut w = window(99);
        w.fill(now);

        w.on_ack(5);
        let (base, inflight) = (w.base(), w.in_flight());
        w.on_ack(5);
        assert_eq!((w.base(), w.in_flight()), (base, inflight));

        // A lower-numbered ACK arriving late is ignored via max.
        w.on_ack(2);
        assert_eq!(w.base(), 5);
    }

    #[test]
    fn test_at_most_one_record_per_index() {
        let now = Instant::now();
        let mut w = window(99);
        w.fill(now);
        // Force several timer generations on the same indices.
        for i in 1..4u32 {
            let later = now + RTO * i + Duration::from_millis(1);
            w.expired(later).unwrap();
        }
        assert_eq!(w.in_flight(), 10);
        for seq in 0..10 {
            assert!(w.retries_of(seq).is_some());
        }
    }

    #[test]
    fn test_expired_retransmits_in_ascending_order() {
        let now = Instant::now();
        let mut w = window(99);
        w.fill(now); // all share one deadline
        let due = w.expired(now + RTO + Duration::from_millis(1)).unwrap();
        assert_eq!(due, (0..10).collect::<Vec<_>>());
        assert_eq!(w.retries_of(0), Some(1));
    }

    #[test]
    fn test_acked_records_do_not_retransmit() {
        let now = Instant::now();
        let mut w = window(99);
        w.fill(now);
        w.on_ack(7);

        let due = w.expired(now + RTO + Duration::from_millis(1)).unwrap();
        assert_eq!(due, vec![7, 8, 9]);
    }

    #[test]
    fn test_stale_heap_entries_are_skipped() {
        let now = Instant::now();
        let mut w = window(99);
        w.fill(now);

        let t1 = now + RTO + Duration::from_millis(1);
        w.expired(t1).unwrap(); // re-arms everything at t1 + RTO

        // The original deadlines are long gone; only the re-armed ones fire.
        let due = w.expired(t1 + RTO + Duration::from_millis(1)).unwrap();
        assert_eq!(due.len(), 10);
        assert_eq!(w.retries_of(0), Some(2));
    }

    #[test]
    fn test_retry_exhaustion_fails() {
        let now = Instant::now();
        let mut w = SendWindow::new(0, 10, RTO, 3);
        w.fill(now);

        let mut t = now;
        for _ in 0..3 {
            t += RTO + Duration::from_millis(1);
            assert_eq!(w.expired(t).unwrap(), vec![0]);
        }

        t += RTO + Duration::from_millis(1);
        let err = w.expired(t).unwrap_err();
        assert!(matches!(err, TransferError::RetryExhausted { seq: 0, retries: 3 }));
    }

    #[test]
    fn test_completion() {
        let now = Instant::now();
        let mut w = window(4);
        w.fill(now);
        assert!(!w.is_complete());
        w.on_ack(5);
        assert!(w.is_complete());
        assert_eq!(w.in_flight(), 0);
    }

    #[test]
    fn test_ack_beyond_sent_clamps() {
        let now = Instant::now();
        let mut w = window(99);
        w.fill(now);
        // An ACK past next_to_send cannot move base past what was sent.
        w.on_ack(50);
        assert_eq!(w.base(), 10);
    }

    #[test]
    fn test_next_deadline_tracks_earliest() {
        let now = Instant::now();
        let mut w = window(99);
        assert!(w.next_deadline().is_none());
        w.fill(now);
        assert_eq!(w.next_deadline(), Some(now + RTO));
    }
}
