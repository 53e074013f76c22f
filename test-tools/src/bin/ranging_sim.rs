/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! `ranging-sim` – replays a scenario against the ranging scheduler.
//!
//! The scheduler runs inside its tokio host exactly as in production; only
//! the driver is simulated.  Every driver request is answered after a fixed
//! latency, with per-MAC injected failures and an optional window during
//! which the radio is off.
//!
//! Example:
//!   ranging-sim --scenario test-tools/scenarios/periodic_and_retry.yaml \
//!               --config test-tools/scenarios/scheduler.yaml --latency-ms 20

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{error, info, warn};

use ranging_sched::config::SchedulerConfig;
use ranging_sched::mac::MacAddress;
use ranging_sched::port::{RangingDriver, ResponseSink};
use ranging_sched::request::{
    CancelRequest, Delivery, DriverNode, DriverRequest, RangingRequest, RangingResult,
    ScanMeasurement, ScanStatus, TargetStatus,
};
use ranging_sched::runtime::SchedulerHost;
use ranging_sched::scheduler::SchedulerEvent;

const DEFAULT_LATENCY_MS: u64 = 50;
const DEFAULT_DURATION_MS: u64 = 5_000;

/// Round trip for one metre, in picoseconds.
const RTT_PER_METRE_PS: i64 = 6_671;

// ── CLI argument definition ───────────────────────────────────────────────────

/// Ranging scheduler simulator.
#[derive(Debug, Parser)]
#[command(
    name = "ranging-sim",
    about = "Replays a ranging scenario against the scheduler with a simulated driver",
    long_about = None,
)]
struct Cli {
    /// Scenario YAML (timed requests, cancels, injected failures).
    #[arg(short = 's', long = "scenario")]
    scenario: PathBuf,

    /// Scheduler configuration YAML.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Driver latency; overrides the scenario's `latency_ms`.
    #[arg(short = 'l', long = "latency-ms")]
    latency_ms: Option<u64>,
}

// ── Scenario file ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Scenario {
    #[serde(default)]
    latency_ms: Option<u64>,

    #[serde(default = "default_duration_ms")]
    duration_ms: u64,

    /// Number of leading attempts that fail, per MAC.
    #[serde(default)]
    failures: BTreeMap<MacAddress, u32>,

    #[serde(default)]
    radio_off: Option<Window>,

    #[serde(default)]
    events: Vec<TimedAction>,
}

fn default_duration_ms() -> u64 {
    DEFAULT_DURATION_MS
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct Window {
    from_ms: u64,
    until_ms: u64,
}

impl Window {
    fn contains(&self, ms: u64) -> bool {
        (self.from_ms..self.until_ms).contains(&ms)
    }
}

#[derive(Debug, Deserialize)]
struct TimedAction {
    at_ms: u64,
    #[serde(flatten)]
    action: Action,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Action {
    Request(RangingRequest),
    Cancel(CancelRequest),
}

impl Action {
    fn into_event(self) -> SchedulerEvent {
        match self {
            Action::Request(r) => SchedulerEvent::Request(r),
            Action::Cancel(c) => SchedulerEvent::Cancel(c),
        }
    }
}

impl Scenario {
    fn load(path: &Path) -> Result<Self> {
        info!("Loading scenario from: {}", path.display());
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open scenario file: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse scenario file: {}", path.display()))
    }

    fn from_yaml(content: &str) -> Result<Self> {
        let mut scenario: Scenario = serde_yaml::from_str(content)?;
        scenario.events.sort_by_key(|e| e.at_ms);
        Ok(scenario)
    }
}

// ── Simulated driver ──────────────────────────────────────────────────────────

/// Answers each request on the scheduler's event channel after `latency`.
struct SimDriver {
    events: mpsc::UnboundedSender<SchedulerEvent>,
    latency: Duration,
    failures: BTreeMap<MacAddress, u32>,
    radio_off: Option<Window>,
    start: Instant,
    submitted: usize,
}

impl SimDriver {
    fn new(
        events: mpsc::UnboundedSender<SchedulerEvent>,
        latency: Duration,
        failures: BTreeMap<MacAddress, u32>,
        radio_off: Option<Window>,
    ) -> Self {
        Self {
            events,
            latency,
            failures,
            radio_off,
            start: Instant::now(),
            submitted: 0,
        }
    }

    fn measure(&mut self, node: &DriverNode) -> ScanMeasurement {
        if let Some(left) = self.failures.get_mut(&node.mac) {
            if *left > 0 {
                *left -= 1;
                return ScanMeasurement::failed(node.mac, TargetStatus::NoResponse, -85);
            }
        }
        // Distance in metres taken from the last octet, so runs are repeatable.
        let metres = i64::from(node.mac.as_bytes()[5]) + 1;
        let mut meas = ScanMeasurement::success(node.mac, metres * RTT_PER_METRE_PS, -55);
        meas.bandwidth = node.bandwidth;
        meas
    }

    /// The outcome of `request` as the scheduler will see it.
    fn outcome(&mut self, request: &DriverRequest) -> SchedulerEvent {
        let now_ms = u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX);
        if self.radio_off.is_some_and(|w| w.contains(now_ms)) {
            return SchedulerEvent::RequestFailed {
                batch_id: request.batch_id,
                status: ScanStatus::NoWifi,
            };
        }
        SchedulerEvent::Measurement(RangingResult {
            batch_id: request.batch_id,
            status: ScanStatus::Success,
            measurements: request.nodes.iter().map(|n| self.measure(n)).collect(),
        })
    }
}

impl RangingDriver for SimDriver {
    fn submit(&mut self, request: DriverRequest) -> Result<(), ScanStatus> {
        self.submitted += 1;
        info!(
            batch = %request.batch_id,
            kind = ?request.kind,
            nodes = request.nodes.len(),
            "driver: request queued"
        );

        let event = self.outcome(&request);
        let tx = self.events.clone();
        let latency = self.latency;
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            if tx.send(event).is_err() {
                warn!("driver: scheduler host gone, dropping outcome");
            }
        });
        Ok(())
    }
}

// ── Logging sink ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct LogSink {
    /// Deliveries per client.
    per_client: BTreeMap<String, usize>,
}

impl ResponseSink for LogSink {
    fn deliver(&mut self, delivery: Delivery) {
        match &delivery {
            Delivery::Measurements(rsp) => {
                let measured = rsp.results.iter().filter(|r| r.is_success()).count();
                info!(
                    client = %rsp.client,
                    request_id = rsp.request_id,
                    status = ?rsp.status,
                    measured,
                    failed = rsp.results.len() - measured,
                    "client: measurements delivered"
                );
            }
            Delivery::RangeReport(report) => {
                for entry in &report.entries {
                    info!(
                        client = %report.client,
                        mac = %entry.mac,
                        range_m = f64::from(entry.range_64ths_m) / 64.0,
                        "client: range"
                    );
                }
                info!(
                    client = %report.client,
                    dialog_token = report.dialog_token,
                    failed = report.failed.len(),
                    "client: range report delivered"
                );
            }
        }
        *self.per_client.entry(delivery.client().to_owned()).or_insert(0) += 1;
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("ranging-sim failed: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => SchedulerConfig::load_from_file(path)?,
        None => {
            warn!("No scheduler configuration provided, using defaults");
            SchedulerConfig::default()
        }
    };
    let scenario = Scenario::load(&cli.scenario)?;
    let latency_ms = cli
        .latency_ms
        .or(scenario.latency_ms)
        .unwrap_or(DEFAULT_LATENCY_MS);

    info!(
        latency_ms,
        duration_ms = scenario.duration_ms,
        events = scenario.events.len(),
        radio_off = ?scenario.radio_off,
        "Scenario"
    );

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (pass_tx, mut pass_rx) = mpsc::unbounded_channel::<RangingRequest>();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let driver = SimDriver::new(
        event_tx.clone(),
        Duration::from_millis(latency_ms),
        scenario.failures,
        scenario.radio_off,
    );
    let host = SchedulerHost::new(config, driver, LogSink::default(), event_rx)
        .with_passthrough(pass_tx);
    let host_task = tokio::spawn(host.run(shutdown_rx));

    // Unscheduled requests would go straight to the driver; just count them.
    let pass_task = tokio::spawn(async move {
        let mut count = 0usize;
        while let Some(request) = pass_rx.recv().await {
            info!(client = %request.key(), nodes = request.nodes.len(), "pass-through request");
            count += 1;
        }
        count
    });

    // ── Replay ────────────────────────────────────────────────────────────────
    let start = Instant::now();
    for timed in scenario.events {
        sleep_until(start + Duration::from_millis(timed.at_ms)).await;
        event_tx
            .send(timed.action.into_event())
            .context("scheduler host stopped before the scenario finished")?;
    }
    sleep_until(start + Duration::from_millis(scenario.duration_ms)).await;

    let _ = shutdown_tx.send(());
    let scheduler = host_task.await.context("scheduler host task failed")?;
    let passed_through = pass_task.await.context("pass-through task failed")?;

    // ── Summary ───────────────────────────────────────────────────────────────
    info!(
        driver_requests = scheduler.driver().submitted,
        passed_through,
        nodes_left = scheduler.nodes().len(),
        clients_left = scheduler.clients().len(),
        "Simulation finished"
    );
    for (client, count) in &scheduler.sink().per_client {
        info!("  [{client}]  deliveries={count}");
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
