/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Structured error types for the ranging scheduler.
//!
//! Two error enums model the two failure layers:
//!
//! * [`RequestError`]: why admission (`is_req_ok`) rejected a client
//!   request.  Returned synchronously inside
//!   [`ManageOutcome::Error`](super::ManageOutcome::Error); no node of a
//!   rejected request ever enters the node database.
//! * [`SchedulerError`]: an internal invariant was about to be violated.
//!   These are logged by the scheduler core and never surface to clients.
//!
//! Node-level measurement failures are **not** errors: they are absorbed into
//! the node's retry bookkeeping and reported per node in the client response.

use thiserror::Error;

use crate::mac::MacAddress;

// ── Admission ─────────────────────────────────────────────────────────────────

/// Reason a client request failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The request carried no nodes.
    #[error("request {request_id} from '{client}' has no nodes")]
    NoNodes { client: String, request_id: u32 },

    /// More nodes than `max_nodes_per_request`.
    #[error("request carries {count} nodes, limit is {limit}")]
    TooManyNodes { count: usize, limit: usize },

    /// Zero, broadcast or multicast MAC.
    #[error("node {mac} is not a unicast address")]
    InvalidMac { mac: MacAddress },

    /// The same MAC appears twice in one request.
    #[error("node {mac} appears more than once in the request")]
    DuplicateNode { mac: MacAddress },

    /// A periodic node with `period_ms == 0`.
    #[error("periodic node {mac} has a zero period")]
    ZeroPeriod { mac: MacAddress },

    /// A periodic node asking for zero measurements.
    #[error("periodic node {mac} requests zero measurements")]
    ZeroMeasurements { mac: MacAddress },

    /// More retries than `max_retries`.
    #[error("node {mac} asks for {retries} retries, limit is {limit}")]
    TooManyRetries {
        mac: MacAddress,
        retries: u32,
        limit: u32,
    },
}

// ── Internal invariants ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// Only one timer may be outstanding at a time.
    #[error("timer {running} is already running ({timeout_ms}ms)")]
    TimerAlreadyRunning { running: u64, timeout_ms: u32 },

    /// A timer must have a non-zero timeout.
    #[error("refusing to start a timer with a zero timeout")]
    ZeroTimeout,
}
