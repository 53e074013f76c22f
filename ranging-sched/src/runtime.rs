/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Tokio host for the scheduler.
//!
//! [`SchedulerHost`] serialises the two event sources the scheduler reacts
//! to: the event channel (client requests, cancels, driver outcomes) and the
//! scheduler's own timer.  One `tokio::select!` loop multiplexes
//!
//! 1. **Shutdown**: a `oneshot` signal ends the loop.
//! 2. **Events**: each [`SchedulerEvent`] is processed to completion.
//! 3. **Timer**: a `sleep_until` on the pending timer's deadline, re-derived
//!    after every event so a retimed timer is always the one awaited.
//!
//! The scheduler itself never awaits anything.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::port::{Clock, RangingDriver, ResponseSink};
use crate::request::RangingRequest;
use crate::scheduler::{ManageOutcome, Scheduler, SchedulerEvent, TimerId};

// ── TokioClock ────────────────────────────────────────────────────────────────

/// Milliseconds since construction on tokio's clock, which honours paused
/// test time.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// The instant `ms` milliseconds after the origin.
    pub fn instant_at(&self, ms: u64) -> Instant {
        self.origin + Duration::from_millis(ms)
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

// ── SchedulerHost ─────────────────────────────────────────────────────────────

pub struct SchedulerHost<D, S> {
    scheduler: Scheduler<D, S, TokioClock>,
    events: mpsc::UnboundedReceiver<SchedulerEvent>,
    passthrough: Option<mpsc::UnboundedSender<RangingRequest>>,
}

impl<D, S> SchedulerHost<D, S>
where
    D: RangingDriver,
    S: ResponseSink,
{
    pub fn new(
        config: SchedulerConfig,
        driver: D,
        sink: S,
        events: mpsc::UnboundedReceiver<SchedulerEvent>,
    ) -> Self {
        Self {
            scheduler: Scheduler::with_clock(config, driver, sink, TokioClock::new()),
            events,
            passthrough: None,
        }
    }

    /// Forward requests that need no scheduling to `tx`.  Without a
    /// pass-through they are logged and dropped.
    pub fn with_passthrough(mut self, tx: mpsc::UnboundedSender<RangingRequest>) -> Self {
        self.passthrough = Some(tx);
        self
    }

    pub fn scheduler(&self) -> &Scheduler<D, S, TokioClock> {
        &self.scheduler
    }

    /// Run until `shutdown` fires (or its sender is dropped) or the event
    /// channel closes.  Returns the scheduler for inspection.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) -> Scheduler<D, S, TokioClock> {
        info!("scheduler host started");

        loop {
            let deadline = self.scheduler.pending_timer().map(|h| {
                (h.id, self.scheduler.clock().instant_at(h.deadline_ms()))
            });

            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown signal received, stopping scheduler host");
                    break;
                }

                event = self.events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => {
                        info!("event channel closed, stopping scheduler host");
                        break;
                    }
                },

                id = timer_expiry(deadline) => {
                    self.scheduler.manage_msg(SchedulerEvent::TimerExpired(id));
                }
            }
        }

        self.scheduler
    }

    fn handle(&mut self, event: SchedulerEvent) {
        match event {
            SchedulerEvent::Request(request) => match self.scheduler.manage_request(&request) {
                ManageOutcome::NotManaged => self.forward(request),
                ManageOutcome::Managed => {}
                ManageOutcome::Error(reason) => {
                    debug!(client = %request.key(), error = %reason, "request not admitted");
                }
            },
            other => {
                if !self.scheduler.manage_msg(other) {
                    debug!("event left unhandled by scheduler");
                }
            }
        }
    }

    fn forward(&self, request: RangingRequest) {
        match &self.passthrough {
            Some(tx) => {
                if tx.send(request).is_err() {
                    warn!("pass-through receiver dropped");
                }
            }
            None => debug!(client = %request.key(), "no pass-through configured, dropping request"),
        }
    }
}

/// Resolves with the timer id at the deadline; never resolves without one.
async fn timer_expiry(deadline: Option<(TimerId, Instant)>) -> TimerId {
    match deadline {
        Some((id, at)) => {
            sleep_until(at).await;
            id
        }
        None => std::future::pending().await,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
