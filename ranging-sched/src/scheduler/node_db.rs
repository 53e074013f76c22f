/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The node database: every ranging target the scheduler currently tracks.
//!
//! Nodes are keyed by MAC in a `BTreeMap`, so every scan over the database
//! (building a batch, computing the timer period, logging) walks the nodes
//! in the same order on every run.
//!
//! A node stays in the database while it has occurrences left, retries
//! left, or a result that has not been reported yet.  Everything else is
//! `Done` and is purged by [`NodeDatabase::remove_done`].

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::mac::MacAddress;
use crate::request::{BatchId, NodeResult, PeerType, PeriodicNodeInfo, RangingBandwidth, RequestKey};

// ── Node state ────────────────────────────────────────────────────────────────

/// Lifecycle of a tracked node.
///
/// ```text
///  admission ──► ReadyForRequest ──dispatch──► MeasInProgress ──rsp──► ReadyForResponse
///                   ▲    ▲                          │                       │
///                   │    └──────── retry ───────────┘                       │
///                   │                                                        ▼
///                   └──── timer ──── WaitingForTimer ◄── occurrences left ──┤
///                                                                            ▼
///                                          cancel (any state) ──────────►  Done
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    MeasInProgress,
    ReadyForRequest,
    ReadyForResponse,
    WaitingForTimer,
    Done,
}

impl NodeState {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeState::MeasInProgress => "MEAS_IN_PROGRESS",
            NodeState::ReadyForRequest => "READY_FOR_REQ",
            NodeState::ReadyForResponse => "READY_FOR_RSP",
            NodeState::WaitingForTimer => "WAITING_FOR_TIMER",
            NodeState::Done => "DONE",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── TrackedNode ───────────────────────────────────────────────────────────────

/// Scheduler bookkeeping for one ranging target.
#[derive(Debug, Clone)]
pub struct TrackedNode {
    // ── Origin ────────────────────────────────────────────────────────────────
    /// Parameters of the most recent request naming this MAC.
    pub info: PeriodicNodeInfo,

    /// Client records that are still owed results for this node.
    pub origins: Vec<RequestKey>,

    // ── Scheduling ────────────────────────────────────────────────────────────
    /// Batch the node was last sent in.  Only meaningful while
    /// `state == MeasInProgress`.
    pub batch_id: Option<BatchId>,

    pub rssi: Option<i16>,
    pub last_rssi: Option<i16>,

    /// Bandwidth for the next attempt.  Narrowed on weak-signal retries.
    pub bandwidth: RangingBandwidth,
    pub last_bw: Option<RangingBandwidth>,

    /// Occurrences left to perform.
    pub periodic_cntr: u32,

    /// Attempts left for the current occurrence.
    pub retry_cntr: u32,

    pub state: NodeState,

    /// Time left before the node goes on a request again, measured from the
    /// start of the current timer period.
    pub time_to_req_ms: u32,

    // ── Response ──────────────────────────────────────────────────────────────
    /// Outcome of the latest occurrence.  Set only in `ReadyForResponse`.
    pub result: Option<NodeResult>,

    /// Cancelled while in flight: the pending driver response is discarded.
    pub cancelled: bool,
}

impl TrackedNode {
    /// Fresh node for `info`, ready to go on the next request.
    pub fn new(info: &PeriodicNodeInfo, origin: &RequestKey) -> Self {
        let info = normalize(info);
        Self {
            origins: vec![origin.clone()],
            batch_id: None,
            rssi: None,
            last_rssi: None,
            bandwidth: info.bandwidth,
            last_bw: None,
            periodic_cntr: info.occurrences(),
            retry_cntr: info.num_retries,
            state: NodeState::ReadyForRequest,
            time_to_req_ms: 0,
            result: None,
            cancelled: false,
            info,
        }
    }

    pub fn mac(&self) -> MacAddress {
        self.info.mac
    }

    pub fn is_periodic(&self) -> bool {
        self.info.periodic
    }

    pub fn is_nan(&self) -> bool {
        self.info.is_nan()
    }

    /// Attempt budget per occurrence.
    pub fn retry_budget(&self) -> u32 {
        self.info.num_retries
    }

    /// `true` while the node still has a measurement to take in the current
    /// round (queued or at the driver).
    pub fn is_pending_measurement(&self) -> bool {
        matches!(
            self.state,
            NodeState::MeasInProgress | NodeState::ReadyForRequest
        )
    }

    /// Merge a later request for the same MAC into this node.
    ///
    /// Parameters follow the newer request; counters keep whichever is
    /// larger, so no origin is short-changed.  An in-flight node keeps its
    /// batch and counters and its result is shared with the new origin.
    fn merge(&mut self, info: &PeriodicNodeInfo, origin: &RequestKey) {
        if self.state == NodeState::Done {
            *self = TrackedNode::new(info, origin);
            return;
        }

        let info = normalize(info);
        if !self.origins.contains(origin) {
            self.origins.push(origin.clone());
        }

        self.info.channel_mhz = info.channel_mhz;
        self.info.bandwidth = info.bandwidth;
        self.info.peer_type = info.peer_type;
        if info.periodic {
            self.info.periodic = true;
            self.info.period_ms = info.period_ms;
        }
        self.info.num_measurements = self.info.num_measurements.max(info.num_measurements);
        self.info.num_retries = self.info.num_retries.max(info.num_retries);
        self.periodic_cntr = self.periodic_cntr.max(info.occurrences());
        self.cancelled = false;

        match self.state {
            NodeState::MeasInProgress | NodeState::ReadyForResponse => {}
            NodeState::ReadyForRequest | NodeState::WaitingForTimer | NodeState::Done => {
                self.retry_cntr = self.retry_cntr.max(self.info.num_retries);
                self.bandwidth = self.info.bandwidth;
                self.state = NodeState::ReadyForRequest;
                self.time_to_req_ms = 0;
            }
        }
    }
}

/// NAN peers are ranged once with no retries.
fn normalize(info: &PeriodicNodeInfo) -> PeriodicNodeInfo {
    let mut info = info.clone();
    if info.peer_type == PeerType::Nan {
        info.periodic = false;
        info.period_ms = 0;
        info.num_retries = 0;
    }
    info
}

// ── NodeDatabase ──────────────────────────────────────────────────────────────

/// Outcome of [`NodeDatabase::add_node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Merged,
}

#[derive(Debug, Default)]
pub struct NodeDatabase {
    nodes: BTreeMap<MacAddress, TrackedNode>,
}

impl NodeDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, mac: &MacAddress) -> Option<&TrackedNode> {
        self.nodes.get(mac)
    }

    pub fn get_mut(&mut self, mac: &MacAddress) -> Option<&mut TrackedNode> {
        self.nodes.get_mut(mac)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedNode> {
        self.nodes.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TrackedNode> {
        self.nodes.values_mut()
    }

    /// Insert `info` as a new node, or merge it into the node already
    /// tracked under the same MAC.
    pub fn add_node(&mut self, info: &PeriodicNodeInfo, origin: &RequestKey) -> Upsert {
        match self.nodes.get_mut(&info.mac) {
            Some(node) => {
                node.merge(info, origin);
                debug!(mac = %info.mac, origin = %origin, state = %node.state, "merged node");
                Upsert::Merged
            }
            None => {
                self.nodes.insert(info.mac, TrackedNode::new(info, origin));
                debug!(mac = %info.mac, origin = %origin, "added node");
                Upsert::Inserted
            }
        }
    }

    /// MACs of the nodes currently in `state`.
    pub fn macs_in_state(&self, state: NodeState) -> Vec<MacAddress> {
        self.nodes
            .values()
            .filter(|n| n.state == state)
            .map(TrackedNode::mac)
            .collect()
    }

    /// Nodes ready to go on a request of the given kind.
    pub fn ready_for_request(&self, nan: bool) -> Vec<MacAddress> {
        self.nodes
            .values()
            .filter(|n| n.state == NodeState::ReadyForRequest && n.is_nan() == nan)
            .map(TrackedNode::mac)
            .collect()
    }

    /// Nodes still waiting on the driver for `batch`.
    pub fn in_batch(&self, batch: BatchId) -> Vec<MacAddress> {
        self.nodes
            .values()
            .filter(|n| n.state == NodeState::MeasInProgress && n.batch_id == Some(batch))
            .map(TrackedNode::mac)
            .collect()
    }

    /// Number of live periodic nodes.
    pub fn found_periodic_nodes(&self) -> usize {
        self.nodes
            .values()
            .filter(|n| n.is_periodic() && n.state != NodeState::Done && !n.cancelled)
            .count()
    }

    /// Number of NAN nodes in the database.
    pub fn found_nan_nodes(&self) -> usize {
        self.nodes.values().filter(|n| n.is_nan()).count()
    }

    /// `true` when some node has a result waiting to be reported.
    pub fn nodes_for_rsp(&self) -> bool {
        self.nodes
            .values()
            .any(|n| n.state == NodeState::ReadyForResponse)
    }

    /// Purge every `Done` node and return the removed MACs.
    pub fn remove_done(&mut self) -> Vec<MacAddress> {
        let done = self.macs_in_state(NodeState::Done);
        for mac in &done {
            self.nodes.remove(mac);
        }
        done
    }

    /// Dump the database at debug level.
    pub fn log_database(&self) {
        debug!(count = self.nodes.len(), "node database");
        for node in self.nodes.values() {
            debug!(
                mac      = %node.mac(),
                state    = %node.state,
                batch    = ?node.batch_id,
                periodic = node.periodic_cntr,
                retries  = node.retry_cntr,
                t2req_ms = node.time_to_req_ms,
                bw_mhz   = node.bandwidth.mhz(),
                origins  = node.origins.len(),
                cancelled = node.cancelled,
                "  node"
            );
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0x02, 0, 0, 0, 0, last])
    }

    fn key(client: &str) -> RequestKey {
        RequestKey {
            client: client.into(),
            request_id: 1,
        }
    }

    // ── TrackedNode::new ──────────────────────────────────────────────────────

    #[test]
    fn new_node_is_ready_with_full_counters() {
        let info = PeriodicNodeInfo::periodic(mac(1), 1000, 3).with_retries(2);
        let node = TrackedNode::new(&info, &key("a"));
        assert_eq!(node.state, NodeState::ReadyForRequest);
        assert_eq!(node.periodic_cntr, 3);
        assert_eq!(node.retry_cntr, 2);
        assert_eq!(node.origins, vec![key("a")]);
        assert!(node.batch_id.is_none());
    }

    #[test]
    fn nan_node_is_forced_one_shot_without_retries() {
        let info = PeriodicNodeInfo::periodic(mac(1), 1000, 5)
            .with_retries(4)
            .as_nan();
        let node = TrackedNode::new(&info, &key("a"));
        assert!(!node.is_periodic());
        assert_eq!(node.periodic_cntr, 1);
        assert_eq!(node.retry_cntr, 0);
    }

    // ── add_node ──────────────────────────────────────────────────────────────

    #[test]
    fn add_same_mac_twice_merges() {
        let mut db = NodeDatabase::new();
        let info = PeriodicNodeInfo::one_shot(mac(1)).with_retries(2);
        assert_eq!(db.add_node(&info, &key("a")), Upsert::Inserted);
        assert_eq!(db.add_node(&info, &key("b")), Upsert::Merged);
        assert_eq!(db.len(), 1);
        assert_eq!(db.get(&mac(1)).unwrap().origins, vec![key("a"), key("b")]);
    }

    #[test]
    fn merge_takes_larger_retry_budget() {
        let mut db = NodeDatabase::new();
        db.add_node(&PeriodicNodeInfo::one_shot(mac(1)).with_retries(2), &key("a"));
        db.add_node(&PeriodicNodeInfo::one_shot(mac(1)).with_retries(5), &key("b"));
        let node = db.get(&mac(1)).unwrap();
        assert_eq!(node.retry_budget(), 5);
        assert_eq!(node.retry_cntr, 5);

        db.add_node(&PeriodicNodeInfo::one_shot(mac(1)).with_retries(1), &key("c"));
        assert_eq!(db.get(&mac(1)).unwrap().retry_budget(), 5);
    }

    #[test]
    fn merge_preserves_in_flight_counters() {
        let mut db = NodeDatabase::new();
        db.add_node(&PeriodicNodeInfo::one_shot(mac(1)).with_retries(3), &key("a"));
        {
            let node = db.get_mut(&mac(1)).unwrap();
            node.state = NodeState::MeasInProgress;
            node.batch_id = Some(BatchId(7));
            node.retry_cntr = 1;
        }

        db.add_node(&PeriodicNodeInfo::one_shot(mac(1)).with_retries(6), &key("b"));
        let node = db.get(&mac(1)).unwrap();
        assert_eq!(node.state, NodeState::MeasInProgress);
        assert_eq!(node.batch_id, Some(BatchId(7)));
        assert_eq!(node.retry_cntr, 1, "in-flight counter untouched");
        assert_eq!(node.retry_budget(), 6, "budget for later occurrences raised");
    }

    #[test]
    fn merge_into_waiting_node_makes_it_ready() {
        let mut db = NodeDatabase::new();
        db.add_node(&PeriodicNodeInfo::periodic(mac(1), 5000, 4), &key("a"));
        {
            let node = db.get_mut(&mac(1)).unwrap();
            node.state = NodeState::WaitingForTimer;
            node.time_to_req_ms = 3000;
            node.periodic_cntr = 2;
        }

        db.add_node(&PeriodicNodeInfo::one_shot(mac(1)).with_retries(1), &key("b"));
        let node = db.get(&mac(1)).unwrap();
        assert_eq!(node.state, NodeState::ReadyForRequest);
        assert_eq!(node.time_to_req_ms, 0);
        assert!(node.is_periodic(), "periodicity kept for the first origin");
        assert_eq!(node.info.period_ms, 5000);
        assert_eq!(node.periodic_cntr, 2);
    }

    #[test]
    fn merge_clears_deferred_cancel() {
        let mut db = NodeDatabase::new();
        db.add_node(&PeriodicNodeInfo::one_shot(mac(1)).with_retries(1), &key("a"));
        {
            let node = db.get_mut(&mac(1)).unwrap();
            node.state = NodeState::MeasInProgress;
            node.cancelled = true;
            node.origins.clear();
        }
        db.add_node(&PeriodicNodeInfo::one_shot(mac(1)).with_retries(1), &key("b"));
        let node = db.get(&mac(1)).unwrap();
        assert!(!node.cancelled);
        assert_eq!(node.origins, vec![key("b")]);
        assert_eq!(node.state, NodeState::MeasInProgress);
    }

    #[test]
    fn merge_into_done_node_revives_it() {
        let mut db = NodeDatabase::new();
        db.add_node(&PeriodicNodeInfo::periodic(mac(1), 100, 2), &key("a"));
        {
            let node = db.get_mut(&mac(1)).unwrap();
            node.state = NodeState::Done;
            node.periodic_cntr = 0;
            node.origins.clear();
        }
        db.add_node(&PeriodicNodeInfo::one_shot(mac(1)).with_retries(2), &key("b"));
        let node = db.get(&mac(1)).unwrap();
        assert_eq!(node.state, NodeState::ReadyForRequest);
        assert_eq!(node.periodic_cntr, 1);
        assert!(!node.is_periodic());
        assert_eq!(node.origins, vec![key("b")]);
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    #[test]
    fn ready_for_request_separates_nan_nodes() {
        let mut db = NodeDatabase::new();
        db.add_node(&PeriodicNodeInfo::one_shot(mac(1)).with_retries(1), &key("a"));
        db.add_node(&PeriodicNodeInfo::one_shot(mac(2)).as_nan(), &key("a"));
        assert_eq!(db.ready_for_request(false), vec![mac(1)]);
        assert_eq!(db.ready_for_request(true), vec![mac(2)]);
        assert_eq!(db.found_nan_nodes(), 1);
    }

    #[test]
    fn periodic_count_ignores_done_and_cancelled() {
        let mut db = NodeDatabase::new();
        db.add_node(&PeriodicNodeInfo::periodic(mac(1), 100, 2), &key("a"));
        db.add_node(&PeriodicNodeInfo::periodic(mac(2), 100, 2), &key("a"));
        db.add_node(&PeriodicNodeInfo::periodic(mac(3), 100, 2), &key("a"));
        db.add_node(&PeriodicNodeInfo::one_shot(mac(4)).with_retries(1), &key("a"));
        db.get_mut(&mac(2)).unwrap().state = NodeState::Done;
        db.get_mut(&mac(3)).unwrap().cancelled = true;
        assert_eq!(db.found_periodic_nodes(), 1);
    }

    #[test]
    fn in_batch_only_matches_in_progress_nodes() {
        let mut db = NodeDatabase::new();
        for i in 1..=3 {
            db.add_node(&PeriodicNodeInfo::one_shot(mac(i)).with_retries(1), &key("a"));
            let node = db.get_mut(&mac(i)).unwrap();
            node.batch_id = Some(BatchId(42));
            node.state = NodeState::MeasInProgress;
        }
        db.get_mut(&mac(2)).unwrap().state = NodeState::ReadyForResponse;
        assert_eq!(db.in_batch(BatchId(42)), vec![mac(1), mac(3)]);
        assert!(db.in_batch(BatchId(43)).is_empty());
    }

    #[test]
    fn remove_done_purges_only_done_nodes() {
        let mut db = NodeDatabase::new();
        db.add_node(&PeriodicNodeInfo::one_shot(mac(1)).with_retries(1), &key("a"));
        db.add_node(&PeriodicNodeInfo::one_shot(mac(2)).with_retries(1), &key("a"));
        db.get_mut(&mac(1)).unwrap().state = NodeState::Done;

        assert_eq!(db.remove_done(), vec![mac(1)]);
        assert!(db.get(&mac(1)).is_none());
        assert!(db.get(&mac(2)).is_some());
        assert!(db.remove_done().is_empty());
    }
}
