//! Scheduler tunables loaded from YAML.
//!
//! The expected YAML structure is:
//! ```yaml
//! scheduler:
//!   acceptable_wait_ms: 100
//!   max_nodes_per_request: 64
//!   weak_rssi_dbm: -80
//!   max_retries: 8
//!   retry_backoff_ms: 50
//! ```
//!
//! Every field is optional; missing values fall back to
//! [`SchedulerConfig::default`].

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

// ── Defaults ──────────────────────────────────────────────────────────────────

/// Remaining timer time below which a running timer is left to expire rather
/// than being retimed.  Also the window within which waiting nodes are made
/// ready together when the timer fires.
pub const DEFAULT_ACCEPTABLE_WAIT_MS: u32 = 100;

/// Upper bound on the number of nodes in a single client request.
pub const DEFAULT_MAX_NODES_PER_REQUEST: usize = 64;

/// RSSI below which a retry is sent on a narrower bandwidth.
pub const DEFAULT_WEAK_RSSI_DBM: i16 = -80;

/// Largest `num_retries` a node may ask for.
pub const DEFAULT_MAX_RETRIES: u32 = 8;

/// Delay before nodes of a submission the driver refused go out again.
pub const DEFAULT_RETRY_BACKOFF_MS: u32 = 50;

// ── Private YAML deserialization types ────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    scheduler: Option<SchedulerEntry>,
}

#[derive(Debug, Deserialize)]
struct SchedulerEntry {
    acceptable_wait_ms: Option<u32>,
    max_nodes_per_request: Option<usize>,
    weak_rssi_dbm: Option<i16>,
    max_retries: Option<u32>,
    retry_backoff_ms: Option<u32>,
}

// ── Public data structures ────────────────────────────────────────────────────

/// Runtime tunables of the ranging scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub acceptable_wait_ms: u32,
    pub max_nodes_per_request: usize,
    pub weak_rssi_dbm: i16,
    pub max_retries: u32,
    pub retry_backoff_ms: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            acceptable_wait_ms: DEFAULT_ACCEPTABLE_WAIT_MS,
            max_nodes_per_request: DEFAULT_MAX_NODES_PER_REQUEST,
            weak_rssi_dbm: DEFAULT_WEAK_RSSI_DBM,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

impl SchedulerConfig {
    /// Parses `path`, filling absent fields with defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is
    /// structurally invalid.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading scheduler configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))
    }

    /// Parses a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: ConfigFile = serde_yaml::from_str(content)?;
        let defaults = Self::default();

        let config = match file.scheduler {
            Some(entry) => Self {
                acceptable_wait_ms: entry
                    .acceptable_wait_ms
                    .unwrap_or(defaults.acceptable_wait_ms),
                max_nodes_per_request: entry
                    .max_nodes_per_request
                    .unwrap_or(defaults.max_nodes_per_request),
                weak_rssi_dbm: entry.weak_rssi_dbm.unwrap_or(defaults.weak_rssi_dbm),
                max_retries: entry.max_retries.unwrap_or(defaults.max_retries),
                retry_backoff_ms: entry
                    .retry_backoff_ms
                    .unwrap_or(defaults.retry_backoff_ms),
            },
            None => {
                debug!("No 'scheduler' section, using defaults");
                defaults
            }
        };

        info!(
            acceptable_wait_ms = config.acceptable_wait_ms,
            max_nodes_per_request = config.max_nodes_per_request,
            weak_rssi_dbm = config.weak_rssi_dbm,
            max_retries = config.max_retries,
            retry_backoff_ms = config.retry_backoff_ms,
            "Scheduler configuration"
        );

        Ok(config)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
