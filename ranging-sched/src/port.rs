/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Collaborator seams of the scheduler.
//!
//! The scheduler never talks to the radio or to clients directly.  It hands
//! batched requests to a [`RangingDriver`], hands finished responses to a
//! [`ResponseSink`], and reads time from a [`Clock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::request::{Delivery, DriverRequest, ScanStatus};

/// The controller that owns the radio.
pub trait RangingDriver {
    /// Queue `request` at the driver.  Must not block: the measurement comes
    /// back later as a separate event.
    ///
    /// # Errors
    /// Returns the status to apply to every node of the request when it
    /// could not be queued at all (radio off, resources exhausted).
    fn submit(&mut self, request: DriverRequest) -> Result<(), ScanStatus>;
}

/// Receives aggregated per-client responses.
pub trait ResponseSink {
    fn deliver(&mut self, delivery: Delivery);
}

/// Millisecond time source.
pub trait Clock {
    /// Milliseconds since an arbitrary, fixed origin.
    fn now_ms(&self) -> u64;
}

/// Wall clock backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Manually advanced clock.  Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
