use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use log::debug;
use tokio::time::Instant;

use crate::store::DeviceIndex;

/// Identity of one liveness timer: a (device, base station) pair
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerKey {
    pub device: DeviceIndex,
    pub base_station: String,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Deadline {
    at: Instant,
    token: u64,
    key: TimerKey,
}

/// Single timer queue holding one liveness deadline per (device, base station).
///
/// Restarting a timer arms a fresh token for the pair; the deadline already in
/// the queue stays there but no longer matches and is dropped when it surfaces.
/// A cancel or restart therefore always wins over an expiry that has not been
/// collected yet.
#[derive(Debug)]
pub struct LivenessScheduler {
    timeout: Duration,
    queue: BinaryHeap<Reverse<Deadline>>,
    armed: HashMap<TimerKey, u64>,
    next_token: u64,
}

impl LivenessScheduler {
    pub fn new(timeout: Duration) -> Self {
        LivenessScheduler {
            timeout,
            queue: BinaryHeap::new(),
            armed: HashMap::new(),
            next_token: 0,
        }
    }

    /// Cancel any pending timer for the pair and start a new one from `now`
    pub fn restart(&mut self, key: TimerKey, now: Instant) {
        let token = self.next_token;
        self.next_token += 1;

        if self.armed.insert(key.clone(), token).is_some() {
            debug!(
                "Restarting liveness timer for {:?}/{}",
                key.device, key.base_station
            );
        }
        self.queue.push(Reverse(Deadline {
            at: now + self.timeout,
            token,
            key,
        }));
        self.compact();
    }

    pub fn cancel_all(&mut self) {
        self.armed.clear();
        self.queue.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.armed.len()
    }

    #[cfg(test)]
    fn is_armed(&self, key: &TimerKey) -> bool {
        self.armed.contains_key(key)
    }

    /// Earliest deadline of a still-armed timer
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.drop_stale_head();
        self.queue.peek().map(|Reverse(deadline)| deadline.at)
    }

    /// Collect every armed timer whose deadline is at or before `now`,
    /// earliest first. Collected timers are disarmed.
    pub fn expire(&mut self, now: Instant) -> Vec<TimerKey> {
        let mut expired = Vec::new();
        loop {
            self.drop_stale_head();
            match self.queue.peek() {
                Some(Reverse(deadline)) if deadline.at <= now => {}
                _ => break,
            }
            if let Some(Reverse(deadline)) = self.queue.pop() {
                self.armed.remove(&deadline.key);
                expired.push(deadline.key);
            }
        }
        expired
    }

    fn is_current(&self, deadline: &Deadline) -> bool {
        self.armed.get(&deadline.key) == Some(&deadline.token)
    }

    fn drop_stale_head(&mut self) {
        while let Some(Reverse(deadline)) = self.queue.peek() {
            if self.is_current(deadline) {
                break;
            }
            self.queue.pop();
        }
    }

    // Frequent refreshes leave superseded deadlines deep in the heap
    fn compact(&mut self) {
        if self.queue.len() > 2 * self.armed.len() + 64 {
            let armed = &self.armed;
            self.queue
                .retain(|Reverse(deadline)| armed.get(&deadline.key) == Some(&deadline.token));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(device: usize, base_station: &str) -> TimerKey {
        TimerKey {
            device: DeviceIndex(device),
            base_station: base_station.to_string(),
        }
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_expires_after_timeout() {
        let start = Instant::now();
        let mut scheduler = LivenessScheduler::new(secs(60));
        scheduler.restart(key(0, "kitchen"), start);

        assert_eq!(scheduler.next_deadline(), Some(start + secs(60)));
        assert!(scheduler.expire(start + secs(59)).is_empty());
        assert_eq!(scheduler.expire(start + secs(60)), vec![key(0, "kitchen")]);
        assert_eq!(scheduler.len(), 0);
        assert_eq!(scheduler.next_deadline(), None);
    }

    #[test]
    fn test_restart_replaces_pending_timer() {
        let start = Instant::now();
        let mut scheduler = LivenessScheduler::new(secs(60));
        scheduler.restart(key(0, "kitchen"), start);
        scheduler.restart(key(0, "kitchen"), start + secs(59));

        assert_eq!(scheduler.len(), 1);
        assert!(scheduler.expire(start + secs(60)).is_empty());
        assert_eq!(scheduler.next_deadline(), Some(start + secs(119)));
        assert_eq!(scheduler.expire(start + secs(119)), vec![key(0, "kitchen")]);
    }

    #[test]
    fn test_restart_wins_over_overdue_expiry() {
        let start = Instant::now();
        let mut scheduler = LivenessScheduler::new(secs(60));
        scheduler.restart(key(0, "kitchen"), start);
        // The old deadline has passed but was not collected before the refresh
        scheduler.restart(key(0, "kitchen"), start + secs(61));

        assert!(scheduler.expire(start + secs(61)).is_empty());
        assert!(scheduler.is_armed(&key(0, "kitchen")));
    }

    #[test]
    fn test_cancel_all_after_expiry_is_noop() {
        let start = Instant::now();
        let mut scheduler = LivenessScheduler::new(secs(60));
        scheduler.cancel_all();
        scheduler.restart(key(0, "kitchen"), start);
        assert_eq!(scheduler.expire(start + secs(60)), vec![key(0, "kitchen")]);
        scheduler.cancel_all();
        scheduler.cancel_all();

        assert!(scheduler.expire(start + secs(120)).is_empty());
        assert_eq!(scheduler.next_deadline(), None);
    }

    #[test]
    fn test_independent_timers_expire_in_order() {
        let start = Instant::now();
        let mut scheduler = LivenessScheduler::new(secs(60));
        scheduler.restart(key(0, "office"), start + secs(5));
        scheduler.restart(key(0, "kitchen"), start);
        scheduler.restart(key(1, "kitchen"), start + secs(2));
        assert_eq!(scheduler.len(), 3);

        assert_eq!(
            scheduler.expire(start + secs(65)),
            vec![key(0, "kitchen"), key(1, "kitchen"), key(0, "office")]
        );
    }

    #[test]
    fn test_cancel_all() {
        let start = Instant::now();
        let mut scheduler = LivenessScheduler::new(secs(60));
        scheduler.restart(key(0, "kitchen"), start);
        scheduler.restart(key(1, "office"), start);
        scheduler.cancel_all();

        assert_eq!(scheduler.len(), 0);
        assert!(scheduler.expire(start + secs(600)).is_empty());
    }

    #[test]
    fn test_compaction_keeps_armed_timers() {
        let start = Instant::now();
        let mut scheduler = LivenessScheduler::new(secs(60));
        for i in 0..500 {
            scheduler.restart(key(0, "kitchen"), start + Duration::from_millis(i));
        }
        assert!(scheduler.queue.len() <= 2 * scheduler.len() + 65);
        assert_eq!(
            scheduler.next_deadline(),
            Some(start + Duration::from_millis(499) + secs(60))
        );
    }
}
