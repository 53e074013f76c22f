/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The single scheduling timer.
//!
//! At most one [`TimerHandle`] is outstanding.  A handle is never mutated:
//! retiming replaces it with a new handle carrying a fresh [`TimerId`], and
//! expiry events for the old id are ignored.
//!
//! Waiting nodes keep their `time_to_req_ms` relative to the start of the
//! current timer period.  Every rebase (retime or expiry) subtracts the
//! elapsed time with saturation, so a node's remaining time never goes
//! negative and never grows.

use std::fmt;

use tracing::{debug, info};

use super::error::SchedulerError;
use super::node_db::{NodeDatabase, NodeState, TrackedNode};

// ── TimerHandle ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// One armed timer period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle {
    pub id: TimerId,
    pub timeout_ms: u32,
    pub started_at_ms: u64,
}

impl TimerHandle {
    /// Clock time at which the timer expires.
    pub fn deadline_ms(&self) -> u64 {
        self.started_at_ms + u64::from(self.timeout_ms)
    }

    pub fn elapsed_ms(&self, now_ms: u64) -> u32 {
        u32::try_from(now_ms.saturating_sub(self.started_at_ms)).unwrap_or(u32::MAX)
    }

    pub fn time_left_ms(&self, now_ms: u64) -> u32 {
        self.timeout_ms.saturating_sub(self.elapsed_ms(now_ms))
    }
}

// ── TimerController ───────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct TimerController {
    handle: Option<TimerHandle>,
    next_id: u64,
    acceptable_wait_ms: u32,
}

impl TimerController {
    pub fn new(acceptable_wait_ms: u32) -> Self {
        Self {
            handle: None,
            next_id: 1,
            acceptable_wait_ms,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> Option<&TimerHandle> {
        self.handle.as_ref()
    }

    /// Time elapsed in the current period, `0` when no timer runs.
    pub fn elapsed_ms(&self, now_ms: u64) -> u32 {
        self.handle.map_or(0, |h| h.elapsed_ms(now_ms))
    }

    /// Arm a new timer.
    ///
    /// # Errors
    /// [`SchedulerError::TimerAlreadyRunning`] if a timer is outstanding,
    /// [`SchedulerError::ZeroTimeout`] for a zero timeout.
    pub fn start_timer(&mut self, timeout_ms: u32, now_ms: u64) -> Result<TimerHandle, SchedulerError> {
        if let Some(running) = self.handle {
            return Err(SchedulerError::TimerAlreadyRunning {
                running: running.id.0,
                timeout_ms: running.timeout_ms,
            });
        }
        if timeout_ms == 0 {
            return Err(SchedulerError::ZeroTimeout);
        }

        let handle = TimerHandle {
            id: TimerId(self.next_id),
            timeout_ms,
            started_at_ms: now_ms,
        };
        self.next_id += 1;
        self.handle = Some(handle);
        debug!(timer = %handle.id, timeout_ms, "timer started");
        Ok(handle)
    }

    pub fn stop_timer(&mut self) -> Option<TimerHandle> {
        let stopped = self.handle.take();
        if let Some(h) = &stopped {
            debug!(timer = %h.id, "timer stopped");
        }
        stopped
    }

    /// Consume the running timer if `id` names it.  Expiries of replaced or
    /// stopped timers return `None`.
    pub fn expire(&mut self, id: TimerId) -> Option<TimerHandle> {
        match self.handle {
            Some(h) if h.id == id => self.handle.take(),
            _ => None,
        }
    }

    /// Smallest remaining time among the waiting nodes: the next timer
    /// period.
    pub fn compute_timer_period(db: &NodeDatabase) -> Option<u32> {
        db.iter()
            .filter(|n| n.state == NodeState::WaitingForTimer)
            .map(|n| n.time_to_req_ms)
            .min()
    }

    /// Smallest period among periodic nodes that are ready for request,
    /// i.e. the ones that just arrived.
    pub fn find_new_min_period(db: &NodeDatabase) -> Option<u32> {
        db.iter()
            .filter(|n| n.state == NodeState::ReadyForRequest && n.is_periodic())
            .map(|n| n.info.period_ms)
            .min()
    }

    /// Rebase every waiting node by `elapsed_ms` so a timer restart does not
    /// penalise it.
    pub fn adjust_time_left(db: &mut NodeDatabase, elapsed_ms: u32) {
        for node in db
            .iter_mut()
            .filter(|n| n.state == NodeState::WaitingForTimer)
        {
            node.time_to_req_ms = node.time_to_req_ms.saturating_sub(elapsed_ms);
        }
    }

    /// Advance waiting nodes by `elapsed_ms`; every node due within the
    /// acceptable wait becomes ready.  Returns the number of nodes made
    /// ready.
    pub fn set_nodes_to_ready(&self, db: &mut NodeDatabase, elapsed_ms: u32) -> usize {
        let mut ready = 0;
        for node in db
            .iter_mut()
            .filter(|n| n.state == NodeState::WaitingForTimer)
        {
            node.time_to_req_ms = node.time_to_req_ms.saturating_sub(elapsed_ms);
            if node.time_to_req_ms <= self.acceptable_wait_ms {
                node.time_to_req_ms = 0;
                node.state = NodeState::ReadyForRequest;
                ready += 1;
            }
        }
        ready
    }

    /// Put `node` to sleep for one period, expressed relative to the start
    /// of the running timer.
    pub fn arm_node(&self, node: &mut TrackedNode, now_ms: u64) {
        node.state = NodeState::WaitingForTimer;
        node.time_to_req_ms = node
            .info
            .period_ms
            .saturating_add(self.elapsed_ms(now_ms));
    }

    /// Put `node` to sleep for `backoff_ms` before its next attempt,
    /// expressed relative to the start of the running timer.
    pub fn arm_retry(&self, node: &mut TrackedNode, backoff_ms: u32, now_ms: u64) {
        node.state = NodeState::WaitingForTimer;
        node.time_to_req_ms = backoff_ms.saturating_add(self.elapsed_ms(now_ms));
    }

    /// Shorten the running timer when new work is due before it expires.
    ///
    /// The timer is left alone when it expires within the acceptable wait
    /// anyway, or when `new_min_ms` does not beat the time left.  Otherwise
    /// waiting nodes are rebased by `elapsed_ms` and the timer is restarted.
    /// Returns `true` when the timer was replaced.
    pub fn adjust_timer_period(
        &mut self,
        db: &mut NodeDatabase,
        elapsed_ms: u32,
        new_min_ms: u32,
        now_ms: u64,
    ) -> Result<bool, SchedulerError> {
        let Some(current) = self.handle else {
            return Ok(false);
        };

        let time_left = current.timeout_ms.saturating_sub(elapsed_ms);
        if time_left < self.acceptable_wait_ms {
            debug!(time_left, "timer close to expiry, not retiming");
            return Ok(false);
        }
        if new_min_ms >= time_left {
            debug!(time_left, new_min_ms, "running timer already short enough");
            return Ok(false);
        }

        Self::adjust_time_left(db, elapsed_ms);
        let period = Self::compute_timer_period(db)
            .map_or(new_min_ms, |p| p.min(new_min_ms))
            .max(1);

        self.handle = None;
        let replacement = self.start_timer(period, now_ms)?;
        info!(
            old = %current.id,
            new = %replacement.id,
            elapsed_ms,
            time_left,
            timeout_ms = period,
            "timer retimed"
        );
        Ok(true)
    }

    /// Start the timer if nodes are waiting and none runs; stop it when no
    /// periodic node is left and nothing waits on a retry backoff.
    pub fn refresh(&mut self, db: &NodeDatabase, now_ms: u64) -> Result<(), SchedulerError> {
        let next = Self::compute_timer_period(db);
        if db.found_periodic_nodes() == 0 && next.is_none() {
            if self.stop_timer().is_some() {
                info!("no periodic nodes left, timer stopped");
            }
            return Ok(());
        }

        if self.handle.is_none() {
            if let Some(period) = next {
                self.start_timer(period.max(1), now_ms)?;
            }
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::MacAddress;
    use crate::request::{PeriodicNodeInfo, RequestKey};

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0x02, 0, 0, 0, 0, last])
    }

    fn key() -> RequestKey {
        RequestKey {
            client: "a".into(),
            request_id: 1,
        }
    }

    /// Database with one waiting periodic node per `(mac, time_left)` pair.
    fn waiting_db(nodes: &[(u8, u32)]) -> NodeDatabase {
        let mut db = NodeDatabase::new();
        for &(m, left) in nodes {
            db.add_node(&PeriodicNodeInfo::periodic(mac(m), 10_000, 5), &key());
            let node = db.get_mut(&mac(m)).unwrap();
            node.state = NodeState::WaitingForTimer;
            node.time_to_req_ms = left;
        }
        db
    }

    // ── start / stop / expire ─────────────────────────────────────────────────

    #[test]
    fn second_start_is_rejected() {
        let mut timer = TimerController::new(100);
        timer.start_timer(500, 0).unwrap();
        let err = timer.start_timer(200, 10).unwrap_err();
        assert_eq!(
            err,
            SchedulerError::TimerAlreadyRunning {
                running: 1,
                timeout_ms: 500
            }
        );
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut timer = TimerController::new(100);
        assert_eq!(timer.start_timer(0, 0), Err(SchedulerError::ZeroTimeout));
        assert!(!timer.is_running());
    }

    #[test]
    fn expire_ignores_stale_ids() {
        let mut timer = TimerController::new(100);
        let first = timer.start_timer(500, 0).unwrap();
        timer.stop_timer();
        let second = timer.start_timer(500, 0).unwrap();

        assert_eq!(timer.expire(first.id), None);
        assert!(timer.is_running());
        assert_eq!(timer.expire(second.id), Some(second));
        assert!(!timer.is_running());
    }

    #[test]
    fn handle_reports_deadline_and_time_left() {
        let mut timer = TimerController::new(100);
        let h = timer.start_timer(1000, 250).unwrap();
        assert_eq!(h.deadline_ms(), 1250);
        assert_eq!(h.elapsed_ms(650), 400);
        assert_eq!(h.time_left_ms(650), 600);
        assert_eq!(h.time_left_ms(5000), 0);
    }

    // ── Period computation ────────────────────────────────────────────────────

    #[test]
    fn compute_timer_period_is_min_of_waiting_nodes() {
        let mut db = waiting_db(&[(1, 3000), (2, 700), (3, 1200)]);
        assert_eq!(TimerController::compute_timer_period(&db), Some(700));

        db.get_mut(&mac(2)).unwrap().state = NodeState::MeasInProgress;
        assert_eq!(TimerController::compute_timer_period(&db), Some(1200));
    }

    #[test]
    fn compute_timer_period_without_waiting_nodes_is_none() {
        assert_eq!(TimerController::compute_timer_period(&NodeDatabase::new()), None);
    }

    #[test]
    fn find_new_min_period_looks_at_ready_periodic_nodes() {
        let mut db = waiting_db(&[(1, 50)]);
        db.add_node(&PeriodicNodeInfo::periodic(mac(2), 800, 2), &key());
        db.add_node(&PeriodicNodeInfo::periodic(mac(3), 300, 2), &key());
        db.add_node(&PeriodicNodeInfo::one_shot(mac(4)).with_retries(2), &key());
        assert_eq!(TimerController::find_new_min_period(&db), Some(300));
    }

    // ── set_nodes_to_ready ────────────────────────────────────────────────────

    #[test]
    fn expiry_readies_nodes_within_acceptable_wait() {
        let timer = TimerController::new(100);
        let mut db = waiting_db(&[(1, 1000), (2, 1080), (3, 5000)]);

        assert_eq!(timer.set_nodes_to_ready(&mut db, 1000), 2);
        assert_eq!(db.get(&mac(1)).unwrap().state, NodeState::ReadyForRequest);
        assert_eq!(db.get(&mac(2)).unwrap().state, NodeState::ReadyForRequest);
        let far = db.get(&mac(3)).unwrap();
        assert_eq!(far.state, NodeState::WaitingForTimer);
        assert_eq!(far.time_to_req_ms, 4000);
    }

    // ── arm_node ──────────────────────────────────────────────────────────────

    #[test]
    fn arm_node_is_relative_to_running_timer() {
        let mut timer = TimerController::new(100);
        let mut db = NodeDatabase::new();
        db.add_node(&PeriodicNodeInfo::periodic(mac(1), 1000, 3), &key());

        timer.arm_node(db.get_mut(&mac(1)).unwrap(), 0);
        assert_eq!(db.get(&mac(1)).unwrap().time_to_req_ms, 1000);

        timer.start_timer(5000, 0).unwrap();
        timer.arm_node(db.get_mut(&mac(1)).unwrap(), 300);
        let node = db.get(&mac(1)).unwrap();
        assert_eq!(node.state, NodeState::WaitingForTimer);
        assert_eq!(node.time_to_req_ms, 1300);
    }

    // ── adjust_timer_period ───────────────────────────────────────────────────

    #[test]
    fn adjust_leaves_timer_close_to_expiry() {
        let mut timer = TimerController::new(100);
        let mut db = waiting_db(&[(1, 1000)]);
        let h = timer.start_timer(1000, 0).unwrap();

        assert!(!timer.adjust_timer_period(&mut db, 950, 10, 950).unwrap());
        assert_eq!(timer.handle(), Some(&h));
        assert_eq!(db.get(&mac(1)).unwrap().time_to_req_ms, 1000);
    }

    #[test]
    fn adjust_leaves_timer_when_new_period_is_not_shorter() {
        let mut timer = TimerController::new(100);
        let mut db = waiting_db(&[(1, 1000)]);
        let h = timer.start_timer(1000, 0).unwrap();

        assert!(!timer.adjust_timer_period(&mut db, 200, 800, 200).unwrap());
        assert_eq!(timer.handle(), Some(&h));
    }

    #[test]
    fn adjust_retimes_and_rebases_waiting_nodes() {
        let mut timer = TimerController::new(100);
        let mut db = waiting_db(&[(1, 5000), (2, 9000)]);
        let old = timer.start_timer(5000, 0).unwrap();

        assert!(timer.adjust_timer_period(&mut db, 1000, 200, 1000).unwrap());
        let new = *timer.handle().unwrap();
        assert_ne!(new.id, old.id);
        assert_eq!(new.timeout_ms, 200);
        assert_eq!(new.started_at_ms, 1000);
        assert_eq!(db.get(&mac(1)).unwrap().time_to_req_ms, 4000);
        assert_eq!(db.get(&mac(2)).unwrap().time_to_req_ms, 8000);
    }

    #[test]
    fn adjust_never_drives_time_left_negative() {
        let mut timer = TimerController::new(10);
        let mut db = waiting_db(&[(1, 300)]);
        timer.start_timer(5000, 0).unwrap();

        assert!(timer.adjust_timer_period(&mut db, 400, 100, 400).unwrap());
        let node = db.get(&mac(1)).unwrap();
        assert_eq!(node.time_to_req_ms, 0);
        assert_eq!(timer.handle().unwrap().timeout_ms, 1, "overdue node fires next");
    }

    #[test]
    fn adjust_without_running_timer_is_noop() {
        let mut timer = TimerController::new(100);
        let mut db = waiting_db(&[(1, 1000)]);
        assert!(!timer.adjust_timer_period(&mut db, 0, 10, 0).unwrap());
        assert!(!timer.is_running());
    }

    // ── refresh ───────────────────────────────────────────────────────────────

    #[test]
    fn refresh_starts_timer_for_waiting_nodes() {
        let mut timer = TimerController::new(100);
        let db = waiting_db(&[(1, 1500), (2, 900)]);
        timer.refresh(&db, 40).unwrap();
        let h = timer.handle().unwrap();
        assert_eq!(h.timeout_ms, 900);
        assert_eq!(h.started_at_ms, 40);

        timer.refresh(&db, 80).unwrap();
        assert_eq!(timer.handle().unwrap().started_at_ms, 40, "running timer kept");
    }

    #[test]
    fn arm_retry_is_relative_to_running_timer() {
        let mut timer = TimerController::new(100);
        let mut db = NodeDatabase::new();
        db.add_node(&PeriodicNodeInfo::one_shot(mac(1)).with_retries(2), &key());
        timer.start_timer(1000, 0).unwrap();

        let node = db.get_mut(&mac(1)).unwrap();
        timer.arm_retry(node, 50, 300);
        assert_eq!(node.state, NodeState::WaitingForTimer);
        assert_eq!(node.time_to_req_ms, 350);
    }

    #[test]
    fn refresh_keeps_timer_for_backed_off_one_shot_node() {
        let mut timer = TimerController::new(100);
        let mut db = NodeDatabase::new();
        db.add_node(&PeriodicNodeInfo::one_shot(mac(1)).with_retries(2), &key());
        let node = db.get_mut(&mac(1)).unwrap();
        timer.arm_retry(node, 50, 0);

        timer.refresh(&db, 10).unwrap();
        let h = timer.handle().unwrap();
        assert_eq!(h.timeout_ms, 50);
        assert_eq!(h.started_at_ms, 10);
    }

    #[test]
    fn refresh_stops_timer_without_periodic_nodes() {
        let mut timer = TimerController::new(100);
        timer.start_timer(1000, 0).unwrap();
        timer.refresh(&NodeDatabase::new(), 10).unwrap();
        assert!(!timer.is_running());
    }
}
