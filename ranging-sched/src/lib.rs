/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Wi-Fi ranging request scheduler.
//!
//! Turns client ranging requests (periodic, retried, or naming NAN peers)
//! into timed, batched requests towards a single ranging driver, and routes
//! the measurements back to the clients that asked for them.
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── mac          – MAC address value type
//! ├── request      – requests, driver results and client deliveries
//! ├── config/      – YAML scheduler tunables
//! ├── port         – driver / sink / clock seams
//! ├── range        – RTT to distance, FTM range reports
//! ├── scheduler/   – node database, client registry, timer, dispatch, responses
//! └── runtime      – tokio host event loop
//! ```

pub mod config;
pub mod mac;
pub mod port;
pub mod range;
pub mod request;
pub mod runtime;
pub mod scheduler;
