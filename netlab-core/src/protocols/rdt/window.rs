//! The sender's sliding window: in-flight segments, their retransmission
//! counters and timer handles, and the duplicate-ACK bookkeeping.
//!
//! The window is owned by the sender's event loop, so no locking happens
//! here. Timer handles are aborted on acknowledgment; a timer that already
//! fired posts its sequence number anyway and the loop's still-outstanding
//! check makes the second outcome harmless.

use std::collections::{BTreeMap, HashMap};
use tokio::task::JoinHandle;

/// How many identical cumulative ACKs trigger a fast retransmit.
pub const DUPLICATE_ACK_THRESHOLD: u32 = 3;

/// One in-flight segment.
pub struct Outstanding {
    pub payload: Vec<u8>,
    /// Retransmissions so far; zero for a segment only sent once
    pub retransmissions: u32,
    timer: JoinHandle<()>,
}

/// The set of in-flight segments, hard-capped at `capacity` segments.
pub struct SendWindow {
    capacity: usize,
    outstanding: BTreeMap<u32, Outstanding>,
    /// Times each ack number has been observed, across the whole transfer
    ack_observations: HashMap<u32, u32>,
}

impl SendWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            outstanding: BTreeMap::new(),
            ack_observations: HashMap::new(),
        }
    }

    pub fn has_space(&self) -> bool {
        self.outstanding.len() < self.capacity
    }

    pub fn len(&self) -> usize {
        self.outstanding.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }

    pub fn contains(&self, seq: u32) -> bool {
        self.outstanding.contains_key(&seq)
    }

    /// Admits a freshly transmitted segment. There is never more than one
    /// record per sequence number.
    pub fn admit(&mut self, seq: u32, payload: Vec<u8>, timer: JoinHandle<()>) {
        let previous = self.outstanding.insert(
            seq,
            Outstanding {
                payload,
                retransmissions: 0,
                timer,
            },
        );
        if let Some(previous) = previous {
            previous.timer.abort();
        }
    }

    /// Applies a cumulative acknowledgment: removes every segment whose end
    /// byte is at or below `ack_num`, cancelling its timer. Returns how many
    /// segments were retired.
    pub fn ack(&mut self, ack_num: u32) -> usize {
        let retired: Vec<u32> = self
            .outstanding
            .iter()
            .filter(|(seq, segment)| **seq + segment.payload.len() as u32 <= ack_num)
            .map(|(seq, _)| *seq)
            .collect();
        for seq in &retired {
            if let Some(segment) = self.outstanding.remove(seq) {
                segment.timer.abort();
            }
        }
        retired.len()
    }

    /// Records one observation of `ack_num` and returns the total count so
    /// far. Counts accumulate for the whole run, so each ack number can
    /// cross the fast-retransmit threshold exactly once.
    pub fn observe_ack(&mut self, ack_num: u32) -> u32 {
        let count = self.ack_observations.entry(ack_num).or_insert(0);
        *count += 1;
        *count
    }

    /// The lowest in-flight sequence number, the fast-retransmit target.
    pub fn lowest_outstanding(&self) -> Option<u32> {
        self.outstanding.keys().next().copied()
    }

    /// Starts a retransmission of `seq`: bumps its counter, swaps in the new
    /// timer, and hands back the payload to resend along with the attempt
    /// count. Returns `None` when the segment was already acknowledged.
    pub fn begin_retransmit(
        &mut self,
        seq: u32,
        timer: JoinHandle<()>,
    ) -> Option<(Vec<u8>, u32)> {
        match self.outstanding.get_mut(&seq) {
            Some(segment) => {
                segment.retransmissions += 1;
                let old = std::mem::replace(&mut segment.timer, timer);
                old.abort();
                Some((segment.payload.clone(), segment.retransmissions))
            }
            None => {
                timer.abort();
                None
            }
        }
    }

    /// Aborts every pending timer. Called on teardown and on fatal errors.
    pub fn cancel_all(&mut self) {
        for (_, segment) in std::mem::take(&mut self.outstanding) {
            segment.timer.abort();
        }
    }
}

impl Drop for SendWindow {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_timer() -> JoinHandle<()> {
        tokio::spawn(std::future::pending())
    }

    #[tokio::test]
    async fn capacity_is_a_hard_cap() {
        let mut window = SendWindow::new(2);
        assert!(window.has_space());
        window.admit(1, vec![0; 100], idle_timer());
        window.admit(101, vec![0; 100], idle_timer());
        assert!(!window.has_space());
        assert_eq!(window.len(), 2);
    }

    #[tokio::test]
    async fn cumulative_ack_retires_covered_segments() {
        let mut window = SendWindow::new(4);
        window.admit(1, vec![0; 100], idle_timer());
        window.admit(101, vec![0; 100], idle_timer());
        window.admit(201, vec![0; 100], idle_timer());

        // Covers the first two segments but not the third
        assert_eq!(window.ack(201), 2);
        assert_eq!(window.lowest_outstanding(), Some(201));

        // A stale lower ack retires nothing
        assert_eq!(window.ack(101), 0);
        assert_eq!(window.ack(301), 1);
        assert!(window.is_empty());
    }

    #[tokio::test]
    async fn third_observation_crosses_the_threshold_once() {
        let mut window = SendWindow::new(4);
        assert_eq!(window.observe_ack(1), 1);
        assert_eq!(window.observe_ack(1), 2);
        assert_eq!(window.observe_ack(1), DUPLICATE_ACK_THRESHOLD);
        // Further duplicates keep counting past the threshold
        assert_eq!(window.observe_ack(1), 4);
        // A different ack number has its own counter
        assert_eq!(window.observe_ack(501), 1);
    }

    #[tokio::test]
    async fn retransmit_counts_attempts_and_survives_ack_race() {
        let mut window = SendWindow::new(4);
        window.admit(1, vec![0xab; 50], idle_timer());

        let (payload, attempt) = window.begin_retransmit(1, idle_timer()).unwrap();
        assert_eq!(payload, vec![0xab; 50]);
        assert_eq!(attempt, 1);
        let (_, attempt) = window.begin_retransmit(1, idle_timer()).unwrap();
        assert_eq!(attempt, 2);

        // Acked while its timer fire was in flight: nothing to retransmit
        window.ack(51);
        assert!(window.begin_retransmit(1, idle_timer()).is_none());
    }
}
