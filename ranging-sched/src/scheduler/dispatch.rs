/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Request dispatcher: admission, batch id generation, and batching of ready
//! nodes into driver requests.

use std::collections::BTreeSet;

use tracing::{debug, error, info, warn};

use super::error::RequestError;
use super::node_db::NodeState;
use super::timer::TimerController;
use super::{ManageOutcome, Scheduler};
use crate::config::SchedulerConfig;
use crate::mac::MacAddress;
use crate::port::{Clock, RangingDriver, ResponseSink};
use crate::request::{BatchId, DriverNode, DriverRequest, DriverRequestKind, RangingRequest};

// ── Batch ids ─────────────────────────────────────────────────────────────────

/// Generates [`BatchId`]s tagged with the process id.
#[derive(Debug, Clone)]
pub struct BatchIdGenerator {
    pid: u16,
    seq: u16,
}

impl BatchIdGenerator {
    /// Generator tagged with the low 16 bits of the current process id.
    pub fn new() -> Self {
        Self::with_pid((std::process::id() & 0xFFFF) as u16)
    }

    pub fn with_pid(pid: u16) -> Self {
        Self { pid, seq: 0 }
    }

    pub fn pid(&self) -> u16 {
        self.pid
    }

    pub fn next_id(&mut self) -> BatchId {
        self.seq = self.seq.wrapping_add(1);
        BatchId::from_parts(self.pid, self.seq)
    }

    /// `true` when `id` was generated by a scheduler in this process.
    pub fn is_scheduler_request(&self, id: BatchId) -> bool {
        id.pid() == self.pid
    }
}

impl Default for BatchIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// ── Admission ─────────────────────────────────────────────────────────────────

/// Validate a client request before any of its nodes is tracked.
pub fn is_req_ok(request: &RangingRequest, config: &SchedulerConfig) -> Result<(), RequestError> {
    if request.nodes.is_empty() {
        return Err(RequestError::NoNodes {
            client: request.client.clone(),
            request_id: request.request_id,
        });
    }
    if request.nodes.len() > config.max_nodes_per_request {
        return Err(RequestError::TooManyNodes {
            count: request.nodes.len(),
            limit: config.max_nodes_per_request,
        });
    }

    let mut seen: BTreeSet<MacAddress> = BTreeSet::new();
    for node in &request.nodes {
        if !node.mac.is_unicast() {
            return Err(RequestError::InvalidMac { mac: node.mac });
        }
        if !seen.insert(node.mac) {
            return Err(RequestError::DuplicateNode { mac: node.mac });
        }
        if !node.is_nan() && node.num_retries > config.max_retries {
            return Err(RequestError::TooManyRetries {
                mac: node.mac,
                retries: node.num_retries,
                limit: config.max_retries,
            });
        }
        // NAN peers are never periodic, whatever they asked for.
        if node.periodic && !node.is_nan() {
            if node.period_ms == 0 {
                return Err(RequestError::ZeroPeriod { mac: node.mac });
            }
            if node.num_measurements == 0 {
                return Err(RequestError::ZeroMeasurements { mac: node.mac });
            }
        }
    }
    Ok(())
}

// ── Scheduler: request side ───────────────────────────────────────────────────

impl<D, S, C> Scheduler<D, S, C>
where
    D: RangingDriver,
    S: ResponseSink,
    C: Clock,
{
    /// Admit a client request.
    ///
    /// Requests without periodic, retried or NAN nodes are left to the
    /// caller ([`ManageOutcome::NotManaged`]).  Otherwise every node is
    /// inserted or merged, the running timer is shortened if the new work is
    /// due sooner, and the ready nodes are dispatched.
    pub fn manage_request(&mut self, request: &RangingRequest) -> ManageOutcome {
        let key = request.key();

        if let Err(reason) = is_req_ok(request, &self.config) {
            warn!(client = %key, error = %reason, "request rejected");
            return ManageOutcome::Error(reason);
        }
        if !request.needs_scheduling() {
            debug!(client = %key, "request needs no scheduling, passing through");
            return ManageOutcome::NotManaged;
        }

        info!(
            client = %key,
            nodes = request.nodes.len(),
            nan = request.found_nan_nodes(),
            "managing request"
        );

        self.clients.admit(request);
        for node in &request.nodes {
            self.nodes.add_node(node, &key);
        }

        self.retime_for_new_work();
        self.setup_request();
        self.clean_up();
        ManageOutcome::Managed
    }

    /// Shorten the running timer if freshly admitted periodic nodes are due
    /// before it expires.
    fn retime_for_new_work(&mut self) {
        let Some(new_min) = TimerController::find_new_min_period(&self.nodes) else {
            return;
        };
        let Some(handle) = self.timer.handle().copied() else {
            return;
        };
        let now = self.clock.now_ms();
        let elapsed = handle.elapsed_ms(now);
        if let Err(e) = self
            .timer
            .adjust_timer_period(&mut self.nodes, elapsed, new_min, now)
        {
            error!(error = %e, "failed to retime timer");
        }
    }

    /// Send every ready node to the driver: one ranging request for the
    /// access points and one for the NAN peers.
    ///
    /// A submission the driver refuses outright is failed on the spot.  Its
    /// nodes with budget left wait `retry_backoff_ms` on the timer before
    /// going out again.
    pub(crate) fn setup_request(&mut self) {
        for kind in [DriverRequestKind::Ranging, DriverRequestKind::Nan] {
            let ready = self.nodes.ready_for_request(kind == DriverRequestKind::Nan);
            if ready.is_empty() {
                continue;
            }

            let request = self.stamp_batch(kind, &ready);
            info!(
                batch = %request.batch_id,
                kind = ?kind,
                nodes = request.nodes.len(),
                "submitting driver request"
            );
            if let Err(status) = self.driver.submit(request.clone()) {
                warn!(batch = %request.batch_id, status = ?status, "driver refused request");
                self.manage_err_request(&request, status);
                self.back_off(kind);
            }
        }
    }

    /// Park the ready nodes of `kind` on the timer for one retry backoff.
    fn back_off(&mut self, kind: DriverRequestKind) {
        let macs = self.nodes.ready_for_request(kind == DriverRequestKind::Nan);
        if macs.is_empty() {
            return;
        }

        let backoff = self.config.retry_backoff_ms.max(1);
        let now = self.clock.now_ms();
        for mac in &macs {
            if let Some(node) = self.nodes.get_mut(mac) {
                self.timer.arm_retry(node, backoff, now);
            }
        }
        debug!(nodes = macs.len(), backoff_ms = backoff, "backing off refused nodes");

        let Some(handle) = self.timer.handle().copied() else {
            return;
        };
        let elapsed = handle.elapsed_ms(now);
        if let Err(e) = self
            .timer
            .adjust_timer_period(&mut self.nodes, elapsed, backoff, now)
        {
            error!(error = %e, "failed to retime timer");
        }
    }

    /// Put `macs` in flight under a fresh batch id and build the driver
    /// request for them.
    fn stamp_batch(&mut self, kind: DriverRequestKind, macs: &[MacAddress]) -> DriverRequest {
        let batch_id = self.batch_ids.next_id();
        let mut nodes = Vec::with_capacity(macs.len());
        for mac in macs {
            if let Some(node) = self.nodes.get_mut(mac) {
                node.state = NodeState::MeasInProgress;
                node.batch_id = Some(batch_id);
                nodes.push(DriverNode {
                    mac: *mac,
                    channel_mhz: node.info.channel_mhz,
                    bandwidth: node.bandwidth,
                });
            }
        }
        DriverRequest {
            batch_id,
            kind,
            nodes,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
