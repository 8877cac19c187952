// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Agent configuration.
//
// Constructed once at startup and handed to each component explicitly;
// nothing reads configuration from global state.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TicketwerkError};
use crate::types::CodePage;

/// Complete agent settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub api: ApiConfig,
    pub polling: PollingConfig,
    pub printer: PrinterConfig,
    pub delivery: DeliveryConfig,
    pub ledger: LedgerConfig,
}

/// Backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL without trailing slash, e.g. `https://api.example.com`.
    pub base_url: String,
    /// Device token issued at pairing time.
    pub token: Option<String>,
    /// Upper bound for any single backend request.
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".into(),
            token: None,
            request_timeout_secs: 10,
        }
    }
}

impl ApiConfig {
    /// The device credential; polling must not start without one.
    pub fn credential(&self) -> Result<&str> {
        match self.token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(TicketwerkError::MissingCredential),
        }
    }
}

/// Poll loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_secs: u64,
    /// Maximum jobs fetched per tick.
    pub batch_size: usize,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            batch_size: 10,
        }
    }
}

/// Physical printer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrinterConfig {
    /// Characters per line; 48 for 80 mm stock, 32 for 58 mm.
    pub paper_width: usize,
    pub code_page: CodePage,
    /// Overrides the `ESC t` table number for printers with a
    /// non-standard table layout.
    pub code_table: Option<u8>,
    /// Upper bound for one complete ticket write.
    pub write_timeout_secs: u64,
    /// How long a writer waits for a concurrent write before giving up
    /// with `DeviceBusy`.
    pub busy_timeout_ms: u64,
    /// Interval at which the hotplug listener rescans the bus.
    pub hotplug_poll_ms: u64,
    /// Root of the sysfs `usbmisc` class.
    pub sysfs_root: PathBuf,
    /// Directory holding the printer character devices.
    pub dev_root: PathBuf,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            paper_width: 48,
            code_page: CodePage::Pc857,
            code_table: None,
            write_timeout_secs: 30,
            busy_timeout_ms: 2_000,
            hotplug_poll_ms: 1_000,
            sysfs_root: PathBuf::from("/sys/class/usbmisc"),
            dev_root: PathBuf::from("/dev/usb"),
        }
    }
}

impl PrinterConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn hotplug_poll(&self) -> Duration {
        Duration::from_millis(self.hotplug_poll_ms)
    }
}

/// Retry policy for device delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Failed attempts after which a job is marked `Failed`.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_ms: 2_000,
            backoff_max_ms: 120_000,
        }
    }
}

/// Ledger location and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Explicit database path; defaults to `jobs.db` in the data directory.
    pub path: Option<PathBuf>,
    /// Acknowledged `Delivered`/`Failed` entries older than this are pruned
    /// at startup. 0 keeps everything.
    pub retention_days: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: None,
            retention_days: 7,
        }
    }
}

impl LedgerConfig {
    pub fn retention(&self) -> Option<Duration> {
        (self.retention_days > 0)
            .then(|| Duration::from_secs(u64::from(self.retention_days) * 24 * 60 * 60))
    }
}

impl AgentConfig {
    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(TicketwerkError::Config("api.base_url is empty".into()));
        }
        if self.polling.batch_size == 0 {
            return Err(TicketwerkError::Config("polling.batch_size must be > 0".into()));
        }
        if self.printer.paper_width < 16 {
            return Err(TicketwerkError::Config(format!(
                "printer.paper_width {} is too narrow",
                self.printer.paper_width
            )));
        }
        if self.delivery.max_attempts == 0 {
            return Err(TicketwerkError::Config("delivery.max_attempts must be > 0".into()));
        }
        Ok(())
    }
}
