/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Ranging request scheduler.
//!
//! [`Scheduler`] multiplexes ranging requests from many clients onto one
//! driver.  It owns the node database, the client registry and the single
//! timer, and is driven one event at a time:
//!
//! | Event | Entry point |
//! |---|---|
//! | client request | [`Scheduler::manage_request`] |
//! | client cancel | [`Scheduler::process_cancel_req`] |
//! | driver result | [`Scheduler::manage_rang_rsp`] |
//! | driver request failure | [`Scheduler::manage_err_rsp`] |
//! | timer expiry | [`Scheduler::timer_callback`] |
//!
//! [`Scheduler::manage_msg`] routes a [`SchedulerEvent`] to the right entry
//! point.  Every entry point runs to completion and ends with
//! [`Scheduler::clean_up`].
//!
//! # Example
//! ```rust,ignore
//! let mut sched = Scheduler::new(SchedulerConfig::default(), driver, sink);
//! match sched.manage_request(&request) {
//!     ManageOutcome::NotManaged => driver.submit_unscheduled(request),
//!     ManageOutcome::Managed => {}
//!     ManageOutcome::Error(reason) => reply_error(reason),
//! }
//! ```

pub mod clients;
pub mod dispatch;
pub mod error;
pub mod node_db;
pub mod response;
pub mod timer;

pub use dispatch::{is_req_ok, BatchIdGenerator};
pub use error::{RequestError, SchedulerError};
pub use node_db::{NodeState, TrackedNode};
pub use timer::{TimerHandle, TimerId};

use tracing::{debug, error, info};

use crate::config::SchedulerConfig;
use crate::mac::MacAddress;
use crate::port::{Clock, RangingDriver, ResponseSink, SystemClock};
use crate::request::{BatchId, CancelRequest, RangingRequest, RangingResult, ScanStatus};

use clients::ClientRegistry;
use node_db::NodeDatabase;
use timer::TimerController;

// ── Public types ──────────────────────────────────────────────────────────────

/// Result of [`Scheduler::manage_request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManageOutcome {
    /// Nothing to schedule; the caller forwards the request to the driver
    /// unmodified.
    NotManaged,
    Managed,
    /// Rejected at admission.  No node was tracked.
    Error(RequestError),
}

/// Everything the scheduler reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    Request(RangingRequest),
    Cancel(CancelRequest),
    Measurement(RangingResult),
    RequestFailed { batch_id: BatchId, status: ScanStatus },
    TimerExpired(TimerId),
}

// ── Scheduler ─────────────────────────────────────────────────────────────────

pub struct Scheduler<D, S, C = SystemClock> {
    config: SchedulerConfig,
    nodes: NodeDatabase,
    clients: ClientRegistry,
    timer: TimerController,
    batch_ids: BatchIdGenerator,
    driver: D,
    sink: S,
    clock: C,
}

impl<D, S> Scheduler<D, S, SystemClock>
where
    D: RangingDriver,
    S: ResponseSink,
{
    pub fn new(config: SchedulerConfig, driver: D, sink: S) -> Self {
        Self::with_clock(config, driver, sink, SystemClock::new())
    }
}

impl<D, S, C> Scheduler<D, S, C>
where
    D: RangingDriver,
    S: ResponseSink,
    C: Clock,
{
    pub fn with_clock(config: SchedulerConfig, driver: D, sink: S, clock: C) -> Self {
        let batch_ids = BatchIdGenerator::new();
        info!(
            pid = batch_ids.pid(),
            acceptable_wait_ms = config.acceptable_wait_ms,
            max_nodes_per_request = config.max_nodes_per_request,
            "ranging scheduler created"
        );
        Self {
            timer: TimerController::new(config.acceptable_wait_ms),
            config,
            nodes: NodeDatabase::new(),
            clients: ClientRegistry::new(),
            batch_ids,
            driver,
            sink,
            clock,
        }
    }

    // ── Event entry ───────────────────────────────────────────────────────────

    /// Process one event.  Returns `false` when the event is not the
    /// scheduler's to handle: a request that needs no scheduling, or a
    /// driver event for a batch another component generated.
    pub fn manage_msg(&mut self, event: SchedulerEvent) -> bool {
        match event {
            SchedulerEvent::Request(request) => match self.manage_request(&request) {
                ManageOutcome::NotManaged => false,
                ManageOutcome::Managed | ManageOutcome::Error(_) => true,
            },
            SchedulerEvent::Cancel(cancel) => {
                self.process_cancel_req(&cancel);
                true
            }
            SchedulerEvent::Measurement(result) => self.manage_rang_rsp(&result),
            SchedulerEvent::RequestFailed { batch_id, status } => {
                self.manage_err_rsp(batch_id, status)
            }
            SchedulerEvent::TimerExpired(id) => self.timer_callback(id),
        }
    }

    /// `true` when `id` was generated by this scheduler.
    pub fn is_scheduler_request(&self, id: BatchId) -> bool {
        self.batch_ids.is_scheduler_request(id)
    }

    // ── Timer ─────────────────────────────────────────────────────────────────

    /// Timer expiry: ready every node that is due, dispatch them, and arm
    /// the next period.  Expiries of replaced timers are ignored.
    pub fn timer_callback(&mut self, id: TimerId) -> bool {
        let Some(handle) = self.timer.expire(id) else {
            debug!(timer = %id, "ignoring expiry of replaced timer");
            return false;
        };

        let elapsed = handle.elapsed_ms(self.clock.now_ms());
        let ready = self.timer.set_nodes_to_ready(&mut self.nodes, elapsed);
        info!(timer = %id, elapsed_ms = elapsed, ready, "timer expired");

        self.setup_request();
        self.clean_up();
        true
    }

    // ── Cancellation ──────────────────────────────────────────────────────────

    /// Stop ranging the listed MACs.
    ///
    /// Idle nodes are retired at once.  Nodes in flight are marked and their
    /// driver outcome is dropped when it arrives.  No response is produced
    /// for a cancelled node, but clients it was holding back receive what
    /// they have collected so far.
    pub fn process_cancel_req(&mut self, cancel: &CancelRequest) {
        for mac in &cancel.macs {
            let Some(node) = self.nodes.get_mut(mac) else {
                debug!(mac = %mac, client = %cancel.client, "cancel for untracked node");
                continue;
            };
            if node.state == NodeState::Done || node.cancelled {
                debug!(mac = %mac, "node already cancelled");
                continue;
            }

            for key in &node.origins {
                if let Some(record) = self.clients.get_mut(key) {
                    record.forgive(mac);
                }
            }
            node.origins.clear();
            node.result = None;

            if node.state == NodeState::MeasInProgress {
                node.cancelled = true;
                info!(mac = %mac, client = %cancel.client, "cancelled in flight, outcome will be dropped");
            } else {
                node.state = NodeState::Done;
                info!(mac = %mac, client = %cancel.client, "cancelled");
            }
        }

        self.flush_deliveries();
        self.clean_up();
    }

    // ── Cleanup ───────────────────────────────────────────────────────────────

    /// Purge `Done` nodes and serviced clients, then start or stop the timer
    /// to match what is left.
    pub fn clean_up(&mut self) {
        let purged = self.nodes.remove_done();
        if !purged.is_empty() {
            for mac in &purged {
                self.clients.forgive_all(mac);
            }
            debug!(count = purged.len(), "purged done nodes");
            self.flush_deliveries();
        }
        self.clients.remove_serviced();

        let now = self.clock.now_ms();
        if let Err(e) = self.timer.refresh(&self.nodes, now) {
            error!(error = %e, "failed to refresh timer");
        }
        self.nodes.log_database();
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn node(&self, mac: &MacAddress) -> Option<&TrackedNode> {
        self.nodes.get(mac)
    }

    pub fn nodes(&self) -> &NodeDatabase {
        &self.nodes
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    /// The running timer, if any.
    pub fn pending_timer(&self) -> Option<TimerHandle> {
        self.timer.handle().copied()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
