/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Response processor.
//!
//! Driver outcomes are first applied node by node (retry and occurrence
//! bookkeeping, result caching), then [`Scheduler::process_rang_rsp`] hands
//! cached results to the owning clients, re-arms or retires each node, and
//! emits every client response that is complete.

use tracing::{debug, error, info, warn};

use super::node_db::{NodeState, TrackedNode};
use super::Scheduler;
use crate::mac::MacAddress;
use crate::port::{Clock, RangingDriver, ResponseSink};
use crate::range::build_range_report;
use crate::request::{
    BatchId, ClientResponse, Delivery, DriverRequest, NodeOutcome, NodeResult, RangingResult,
    RequestKey, RequestOrigin, ScanMeasurement, ScanStatus, TargetStatus,
};

/// Target status recorded for nodes failed by a request-level status.
fn target_status_for(status: ScanStatus) -> TargetStatus {
    match status {
        ScanStatus::Timeout => TargetStatus::Timeout,
        ScanStatus::Aborted => TargetStatus::Aborted,
        _ => TargetStatus::Failure,
    }
}

/// Assemble the delivery for one client from its collected results.
fn build_delivery(key: &RequestKey, origin: RequestOrigin, results: Vec<NodeResult>) -> Delivery {
    match origin {
        RequestOrigin::Ftmrr { dialog_token } => {
            Delivery::RangeReport(build_range_report(key, dialog_token, &results))
        }
        RequestOrigin::Client => {
            let status = if results.iter().any(NodeResult::is_success) {
                ScanStatus::Success
            } else {
                results
                    .iter()
                    .rev()
                    .find_map(|r| match r.outcome {
                        NodeOutcome::Failed { status, .. } => Some(status),
                        NodeOutcome::Measured(_) => None,
                    })
                    .unwrap_or_default()
            };
            Delivery::Measurements(ClientResponse {
                client: key.client.clone(),
                request_id: key.request_id,
                status,
                results,
            })
        }
    }
}

impl<D, S, C> Scheduler<D, S, C>
where
    D: RangingDriver,
    S: ResponseSink,
    C: Clock,
{
    // ── Driver events ─────────────────────────────────────────────────────────

    /// Apply a driver result.
    ///
    /// Returns `false` when the batch was not generated by this scheduler.
    /// Measurements for unknown MACs, for another batch, or for nodes that
    /// are not in flight are discarded.  A node sent in the batch but absent
    /// from a successful result counts as a failed attempt.
    pub fn manage_rang_rsp(&mut self, result: &RangingResult) -> bool {
        if !self.batch_ids.is_scheduler_request(result.batch_id) {
            return false;
        }
        if !result.status.is_success() {
            return self.manage_err_rsp(result.batch_id, result.status);
        }

        debug!(
            batch = %result.batch_id,
            measurements = result.measurements.len(),
            "ranging result"
        );

        for meas in &result.measurements {
            if !self.is_in_flight(&meas.mac, result.batch_id) {
                debug!(mac = %meas.mac, batch = %result.batch_id, "discarding stale measurement");
                continue;
            }
            if meas.target_status.is_success() {
                self.node_measured(meas);
            } else {
                self.node_failed(
                    meas.mac,
                    ScanStatus::Success,
                    meas.target_status,
                    Some(meas.rssi_dbm),
                );
            }
        }

        for mac in self.nodes.in_batch(result.batch_id) {
            debug!(mac = %mac, batch = %result.batch_id, "no measurement for node");
            self.node_failed(mac, ScanStatus::Success, TargetStatus::NoResponse, None);
        }

        self.process_rang_rsp();
        self.setup_request();
        self.clean_up();
        true
    }

    /// Fail every node still in flight for `batch_id` with `status`.
    ///
    /// Used for driver results with a non-success status and for
    /// asynchronous request failures.  Returns `false` for batches this
    /// scheduler did not generate.
    pub fn manage_err_rsp(&mut self, batch_id: BatchId, status: ScanStatus) -> bool {
        if !self.batch_ids.is_scheduler_request(batch_id) {
            return false;
        }

        let macs = self.nodes.in_batch(batch_id);
        if macs.is_empty() {
            debug!(batch = %batch_id, status = ?status, "failure for batch with nothing in flight");
            return true;
        }

        warn!(batch = %batch_id, status = ?status, nodes = macs.len(), "driver request failed");
        let target = target_status_for(status);
        for mac in macs {
            self.node_failed(mac, status, target, None);
        }

        self.process_rang_rsp();
        self.setup_request();
        self.clean_up();
        true
    }

    /// Fail every node of a request the driver refused to queue.  The caller
    /// dispatches any retries.
    pub(crate) fn manage_err_request(&mut self, request: &DriverRequest, status: ScanStatus) {
        let target = target_status_for(status);
        for mac in request.macs() {
            if self.is_in_flight(&mac, request.batch_id) {
                self.node_failed(mac, status, target, None);
            }
        }
        self.process_rang_rsp();
    }

    fn is_in_flight(&self, mac: &MacAddress, batch_id: BatchId) -> bool {
        self.nodes.get(mac).is_some_and(|n| {
            n.state == NodeState::MeasInProgress && n.batch_id == Some(batch_id)
        })
    }

    // ── Per-node bookkeeping ──────────────────────────────────────────────────

    /// Finalise a node that was cancelled while in flight.  Returns `true`
    /// when the node was cancelled and its outcome must be dropped.
    fn discard_cancelled(node: &mut TrackedNode) -> bool {
        node.batch_id = None;
        if !node.cancelled {
            return false;
        }
        debug!(mac = %node.mac(), "dropping outcome of cancelled node");
        node.state = NodeState::Done;
        node.result = None;
        true
    }

    /// One occurrence completed successfully.
    fn node_measured(&mut self, meas: &ScanMeasurement) {
        let Some(node) = self.nodes.get_mut(&meas.mac) else {
            return;
        };
        if Self::discard_cancelled(node) {
            return;
        }

        node.last_rssi = node.rssi;
        node.rssi = Some(meas.rssi_dbm);
        node.last_bw = Some(node.bandwidth);
        node.bandwidth = node.info.bandwidth;

        node.periodic_cntr = node.periodic_cntr.saturating_sub(1);
        node.retry_cntr = node.retry_budget();
        node.result = Some(NodeResult {
            mac: meas.mac,
            outcome: NodeOutcome::Measured(meas.clone()),
        });
        node.state = NodeState::ReadyForResponse;
        debug!(mac = %meas.mac, remaining = node.periodic_cntr, "node measured");
    }

    /// One attempt failed.  Retries while the budget lasts; otherwise the
    /// occurrence is reported as failed.
    fn node_failed(
        &mut self,
        mac: MacAddress,
        status: ScanStatus,
        target: TargetStatus,
        rssi: Option<i16>,
    ) {
        let weak_rssi = self.config.weak_rssi_dbm;
        let Some(node) = self.nodes.get_mut(&mac) else {
            return;
        };
        if Self::discard_cancelled(node) {
            return;
        }

        let failure = NodeResult {
            mac,
            outcome: NodeOutcome::Failed { status, target },
        };

        if status.forecloses_retry() {
            warn!(mac = %mac, status = ?status, "radio unavailable, abandoning node");
            node.retry_cntr = 0;
            node.periodic_cntr = 0;
            node.result = Some(failure);
            node.state = NodeState::ReadyForResponse;
            return;
        }

        node.retry_cntr = node.retry_cntr.saturating_sub(1);
        if node.retry_cntr > 0 {
            node.last_rssi = node.rssi;
            node.last_bw = Some(node.bandwidth);
            if let Some(rssi) = rssi {
                node.rssi = Some(rssi);
                if rssi < weak_rssi {
                    node.bandwidth = node.bandwidth.step_down();
                }
            }
            node.state = NodeState::ReadyForRequest;
            debug!(
                mac = %mac,
                target = ?target,
                retries = node.retry_cntr,
                bw_mhz = node.bandwidth.mhz(),
                "retrying node"
            );
            return;
        }

        node.periodic_cntr = node.periodic_cntr.saturating_sub(1);
        node.retry_cntr = node.retry_budget();
        node.bandwidth = node.info.bandwidth;
        node.result = Some(failure);
        node.state = NodeState::ReadyForResponse;
        info!(mac = %mac, target = ?target, remaining = node.periodic_cntr, "node occurrence failed");
    }

    // ── Reporting ─────────────────────────────────────────────────────────────

    /// Hand every cached result to the clients that are owed it, re-arm or
    /// retire the reported nodes, and deliver complete client responses.
    pub(crate) fn process_rang_rsp(&mut self) {
        if !self.nodes.nodes_for_rsp() {
            return;
        }

        let now = self.clock.now_ms();
        let mut rearmed_min: Option<u32> = None;

        for mac in self.nodes.macs_in_state(NodeState::ReadyForResponse) {
            let Some(node) = self.nodes.get_mut(&mac) else {
                continue;
            };

            let mut origins = std::mem::take(&mut node.origins);
            if let Some(result) = node.result.take() {
                origins.retain(|key| {
                    self.clients
                        .get_mut(key)
                        .is_some_and(|record| record.accept(result.clone()))
                });
            }
            if node.periodic_cntr == 0 {
                for key in &origins {
                    if let Some(record) = self.clients.get_mut(key) {
                        record.forgive(&mac);
                    }
                }
                origins.clear();
            }
            node.origins = origins;

            if node.origins.is_empty() {
                node.state = NodeState::Done;
            } else if node.is_periodic() {
                self.timer.arm_node(node, now);
                let period = node.info.period_ms;
                rearmed_min = Some(rearmed_min.map_or(period, |m| m.min(period)));
            } else {
                node.state = NodeState::ReadyForRequest;
            }
            debug!(mac = %mac, state = %node.state, "node reported");
        }

        self.flush_deliveries();

        if let (Some(new_min), Some(handle)) = (rearmed_min, self.timer.handle().copied()) {
            let elapsed = handle.elapsed_ms(now);
            if let Err(e) = self
                .timer
                .adjust_timer_period(&mut self.nodes, elapsed, new_min, now)
            {
                error!(error = %e, "failed to retime timer");
            }
        }
    }

    /// Deliver every client that has results and no owed node still being
    /// measured.
    pub(crate) fn flush_deliveries(&mut self) {
        for key in self.clients.keys() {
            let Some(record) = self.clients.get(&key) else {
                continue;
            };
            if !record.has_pending() {
                continue;
            }
            let blocked = record.owed_macs().any(|mac| {
                self.nodes
                    .get(&mac)
                    .is_some_and(TrackedNode::is_pending_measurement)
            });
            if blocked {
                continue;
            }

            let Some(record) = self.clients.get_mut(&key) else {
                continue;
            };
            let origin = record.request.origin;
            let results = record.take_pending();
            info!(client = %key, results = results.len(), "delivering response");
            self.sink.deliver(build_delivery(&key, origin, results));
        }
    }
}
