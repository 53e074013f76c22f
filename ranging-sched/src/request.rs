/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Data that crosses the scheduler boundary.
//!
//! ```text
//! client ──(RangingRequest / CancelRequest)──►  Scheduler  ──(DriverRequest)──►  driver
//! client ◄──────────(Delivery)──────────────    Scheduler  ◄──(RangingResult)──  driver
//! ```
//!
//! Requests are immutable once admitted; the scheduler keeps its own mutable
//! per-node bookkeeping in [`crate::scheduler::node_db`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::mac::MacAddress;

/// Identifier of the client that issued a request.
pub type ClientId = String;

// ── Node parameters ───────────────────────────────────────────────────────────

/// Channel bandwidth used for a ranging exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangingBandwidth {
    #[default]
    Bw20,
    Bw40,
    Bw80,
    Bw160,
}

impl RangingBandwidth {
    pub fn mhz(self) -> u32 {
        match self {
            RangingBandwidth::Bw20 => 20,
            RangingBandwidth::Bw40 => 40,
            RangingBandwidth::Bw80 => 80,
            RangingBandwidth::Bw160 => 160,
        }
    }

    /// Next narrower bandwidth; 20 MHz is the floor.
    pub fn step_down(self) -> Self {
        match self {
            RangingBandwidth::Bw160 => RangingBandwidth::Bw80,
            RangingBandwidth::Bw80 => RangingBandwidth::Bw40,
            RangingBandwidth::Bw40 | RangingBandwidth::Bw20 => RangingBandwidth::Bw20,
        }
    }
}

/// How the peer was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerType {
    #[default]
    AccessPoint,
    /// Discovered through Neighbor Awareness Networking.  NAN peers are
    /// always ranged once, in a request of their own.
    Nan,
}

fn default_num_measurements() -> u32 {
    1
}

/// Per-node parameters carried in a client request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodicNodeInfo {
    pub mac: MacAddress,

    /// Primary channel centre frequency; `0` lets the driver pick.
    #[serde(default)]
    pub channel_mhz: u32,

    #[serde(default)]
    pub bandwidth: RangingBandwidth,

    #[serde(default)]
    pub peer_type: PeerType,

    /// Repeat the measurement every `period_ms`.
    #[serde(default)]
    pub periodic: bool,

    #[serde(default)]
    pub period_ms: u32,

    /// Number of occurrences for a periodic node.  Ignored otherwise.
    #[serde(default = "default_num_measurements")]
    pub num_measurements: u32,

    /// Attempt budget per occurrence.  `0` and `1` both mean a single attempt.
    #[serde(default)]
    pub num_retries: u32,
}

impl PeriodicNodeInfo {
    /// One-shot access-point node with no retries.
    pub fn one_shot(mac: MacAddress) -> Self {
        Self {
            mac,
            channel_mhz: 0,
            bandwidth: RangingBandwidth::default(),
            peer_type: PeerType::AccessPoint,
            periodic: false,
            period_ms: 0,
            num_measurements: 1,
            num_retries: 0,
        }
    }

    /// Periodic node measured `num_measurements` times every `period_ms`.
    pub fn periodic(mac: MacAddress, period_ms: u32, num_measurements: u32) -> Self {
        Self {
            periodic: true,
            period_ms,
            num_measurements,
            ..Self::one_shot(mac)
        }
    }

    pub fn with_retries(mut self, num_retries: u32) -> Self {
        self.num_retries = num_retries;
        self
    }

    pub fn as_nan(mut self) -> Self {
        self.peer_type = PeerType::Nan;
        self
    }

    pub fn is_nan(&self) -> bool {
        self.peer_type == PeerType::Nan
    }

    /// `true` when the node needs periodicity or retry management.
    pub fn needs_scheduling(&self) -> bool {
        self.periodic || self.num_retries > 0
    }

    /// Occurrences owed to the requesting client for this node.
    pub fn occurrences(&self) -> u32 {
        if self.periodic && !self.is_nan() {
            self.num_measurements
        } else {
            1
        }
    }
}

// ── Client requests ───────────────────────────────────────────────────────────

/// Where a request came from, which decides the shape of its delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOrigin {
    /// Ordinary client; receives raw measurements.
    #[default]
    Client,
    /// Fine Timing Measurement Range Request from an associated AP; receives
    /// a range report.
    Ftmrr { dialog_token: u8 },
}

/// Key of a client record: one per (client, request id) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
    pub client: ClientId,
    pub request_id: u32,
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.client, self.request_id)
    }
}

/// A ranging request as issued by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangingRequest {
    pub client: ClientId,
    pub request_id: u32,
    #[serde(default)]
    pub origin: RequestOrigin,
    pub nodes: Vec<PeriodicNodeInfo>,
}

impl RangingRequest {
    pub fn new(client: impl Into<ClientId>, request_id: u32, nodes: Vec<PeriodicNodeInfo>) -> Self {
        Self {
            client: client.into(),
            request_id,
            origin: RequestOrigin::Client,
            nodes,
        }
    }

    pub fn key(&self) -> RequestKey {
        RequestKey {
            client: self.client.clone(),
            request_id: self.request_id,
        }
    }

    /// `true` when any node in the request is a NAN peer.
    pub fn found_nan_nodes(&self) -> bool {
        self.nodes.iter().any(PeriodicNodeInfo::is_nan)
    }

    /// `true` when the scheduler has to manage this request rather than let
    /// it pass straight through to the driver.
    pub fn needs_scheduling(&self) -> bool {
        self.found_nan_nodes() || self.nodes.iter().any(PeriodicNodeInfo::needs_scheduling)
    }
}

/// Stop ranging the listed peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    pub client: ClientId,
    pub macs: Vec<MacAddress>,
}

// ── Driver boundary ───────────────────────────────────────────────────────────

/// Correlation id of one scheduler-generated driver request.
///
/// The high 16 bits carry the process id, the low 16 bits a wrapping
/// sequence number.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchId(pub u32);

impl BatchId {
    pub fn from_parts(pid: u16, seq: u16) -> Self {
        BatchId((u32::from(pid) << 16) | u32::from(seq))
    }

    pub fn pid(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn seq(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.pid(), self.seq())
    }
}

impl fmt::Debug for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BatchId({self})")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverRequestKind {
    Ranging,
    Nan,
}

/// One peer on an outbound driver request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverNode {
    pub mac: MacAddress,
    pub channel_mhz: u32,
    pub bandwidth: RangingBandwidth,
}

/// Batched request handed to the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverRequest {
    pub batch_id: BatchId,
    pub kind: DriverRequestKind,
    pub nodes: Vec<DriverNode>,
}

impl DriverRequest {
    pub fn macs(&self) -> impl Iterator<Item = MacAddress> + '_ {
        self.nodes.iter().map(|n| n.mac)
    }
}

/// Request-level outcome reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    #[default]
    Success,
    /// Driver resources exhausted; try again later.
    Busy,
    /// The request failed inside the driver.
    DriverError,
    /// Wi-Fi is disabled; nothing can be measured.
    NoWifi,
    Timeout,
    Aborted,
    Internal,
}

impl ScanStatus {
    pub fn is_success(self) -> bool {
        self == ScanStatus::Success
    }

    /// `true` when retrying is certain to fail, so every remaining retry of
    /// the affected nodes is abandoned.
    pub fn forecloses_retry(self) -> bool {
        self == ScanStatus::NoWifi
    }
}

/// Per-target outcome inside a driver result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    #[default]
    Success,
    Failure,
    NoResponse,
    Rejected,
    Timeout,
    TargetBusy,
    OnDifferentChannel,
    NoCapability,
    Aborted,
}

impl TargetStatus {
    pub fn is_success(self) -> bool {
        self == TargetStatus::Success
    }
}

/// One RTT sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementInfo {
    /// Round-trip time in picoseconds.
    pub rtt_ps: i64,
    pub rssi_dbm: i16,
}

/// Driver measurement for one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanMeasurement {
    pub mac: MacAddress,
    pub target_status: TargetStatus,
    pub rssi_dbm: i16,
    pub bandwidth: RangingBandwidth,
    #[serde(default)]
    pub samples: Vec<MeasurementInfo>,
}

impl ScanMeasurement {
    /// Successful measurement with a single RTT sample.
    pub fn success(mac: MacAddress, rtt_ps: i64, rssi_dbm: i16) -> Self {
        Self {
            mac,
            target_status: TargetStatus::Success,
            rssi_dbm,
            bandwidth: RangingBandwidth::default(),
            samples: vec![MeasurementInfo { rtt_ps, rssi_dbm }],
        }
    }

    pub fn failed(mac: MacAddress, target_status: TargetStatus, rssi_dbm: i16) -> Self {
        Self {
            mac,
            target_status,
            rssi_dbm,
            bandwidth: RangingBandwidth::default(),
            samples: Vec::new(),
        }
    }
}

/// Driver response to a [`DriverRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangingResult {
    pub batch_id: BatchId,
    pub status: ScanStatus,
    pub measurements: Vec<ScanMeasurement>,
}

// ── Client deliveries ─────────────────────────────────────────────────────────

/// Per-node outcome of one occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    Measured(ScanMeasurement),
    Failed {
        status: ScanStatus,
        target: TargetStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeResult {
    pub mac: MacAddress,
    pub outcome: NodeOutcome,
}

impl NodeResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, NodeOutcome::Measured(_))
    }
}

/// Aggregated measurements for one client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientResponse {
    pub client: ClientId,
    pub request_id: u32,
    /// `Success` if any node was measured, otherwise the last failure status.
    pub status: ScanStatus,
    pub results: Vec<NodeResult>,
}

/// One measured peer in a range report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeEntry {
    pub mac: MacAddress,
    /// Distance in 1/64 m.
    pub range_64ths_m: u32,
}

/// Range report for an FTMRR-originated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeReport {
    pub client: ClientId,
    pub request_id: u32,
    pub dialog_token: u8,
    pub entries: Vec<RangeEntry>,
    pub failed: Vec<MacAddress>,
}

/// What the scheduler hands to the response sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Measurements(ClientResponse),
    RangeReport(RangeReport),
}

impl Delivery {
    pub fn client(&self) -> &str {
        match self {
            Delivery::Measurements(r) => &r.client,
            Delivery::RangeReport(r) => &r.client,
        }
    }

    pub fn request_id(&self) -> u32 {
        match self {
            Delivery::Measurements(r) => r.request_id,
            Delivery::RangeReport(r) => r.request_id,
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

    // ── RangingBandwidth ──────────────────────────────────────────────────────

    #[test]
    fn bandwidth_step_down_floors_at_20mhz() {
        assert_eq!(RangingBandwidth::Bw160.step_down(), RangingBandwidth::Bw80);
        assert_eq!(RangingBandwidth::Bw40.step_down(), RangingBandwidth::Bw20);
        assert_eq!(RangingBandwidth::Bw20.step_down(), RangingBandwidth::Bw20);
    }

    // ── PeriodicNodeInfo ──────────────────────────────────────────────────────

    #[test]
    fn one_shot_without_retries_needs_no_scheduling() {
        assert!(!PeriodicNodeInfo::one_shot(mac(1)).needs_scheduling());
        assert!(PeriodicNodeInfo::one_shot(mac(1)).with_retries(2).needs_scheduling());
        assert!(PeriodicNodeInfo::periodic(mac(1), 1000, 3).needs_scheduling());
    }

    #[test]
    fn occurrences_follow_periodicity() {
        assert_eq!(PeriodicNodeInfo::one_shot(mac(1)).occurrences(), 1);
        assert_eq!(PeriodicNodeInfo::periodic(mac(1), 500, 4).occurrences(), 4);
        assert_eq!(PeriodicNodeInfo::periodic(mac(1), 500, 4).as_nan().occurrences(), 1);
    }

    #[test]
    fn nan_node_makes_request_managed() {
        let req = RangingRequest::new(
            "c",
            1,
            vec![PeriodicNodeInfo::one_shot(mac(1)).as_nan()],
        );
        assert!(req.found_nan_nodes());
        assert!(req.needs_scheduling());

        let plain = RangingRequest::new("c", 2, vec![PeriodicNodeInfo::one_shot(mac(1))]);
        assert!(!plain.needs_scheduling());
    }

    #[test]
    fn node_info_yaml_defaults() {
        let yaml = "mac: \"02:00:00:00:00:01\"\n";
        let info: PeriodicNodeInfo = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(info, PeriodicNodeInfo::one_shot(mac(1)));
    }

    // ── BatchId ───────────────────────────────────────────────────────────────

    #[test]
    fn batch_id_packs_pid_in_high_half() {
        let id = BatchId::from_parts(0x1234, 0x0007);
        assert_eq!(id.0, 0x1234_0007);
        assert_eq!(id.pid(), 0x1234);
        assert_eq!(id.seq(), 7);
        assert_eq!(id.to_string(), "1234:0007");
    }

    // ── ScanStatus ────────────────────────────────────────────────────────────

    #[test]
    fn only_no_wifi_forecloses_retries() {
        assert!(ScanStatus::NoWifi.forecloses_retry());
        for s in [
            ScanStatus::Success,
            ScanStatus::Busy,
            ScanStatus::DriverError,
            ScanStatus::Timeout,
            ScanStatus::Aborted,
            ScanStatus::Internal,
        ] {
            assert!(!s.forecloses_retry(), "{s:?}");
        }
    }
}
