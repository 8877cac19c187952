// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Agent services: wires configuration, the ledger, the printer and the
// backend together for each subcommand.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ticketwerk_core::config::AgentConfig;
use ticketwerk_core::{JobId, LifecycleState, Result, TicketwerkError};
use ticketwerk_device::DeviceManager;
use ticketwerk_ledger::{JobLedger, Ledger};
use ticketwerk_print::{BackendClient, BackendSource, Orchestrator};
use ticketwerk_render::{Renderer, test_ticket};

const CONFIG_FILE: &str = "config.json";
const LEDGER_FILE: &str = "jobs.db";

/// Everything a subcommand needs, resolved once at startup.
pub struct AgentServices {
    config: AgentConfig,
    data_dir: PathBuf,
}

impl AgentServices {
    /// Load configuration from `config_path` or `<data_dir>/config.json`.
    pub fn init(config_path: Option<&Path>, data_dir: PathBuf) -> Result<Self> {
        let path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| data_dir.join(CONFIG_FILE));
        let config = load_config(&path)?;
        config.validate()?;
        info!(
            data_dir = %data_dir.display(),
            backend = %config.api.base_url,
            "agent configured"
        );
        Ok(Self { config, data_dir })
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.config
            .ledger
            .path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(LEDGER_FILE))
    }

    fn open_ledger(&self) -> Result<JobLedger> {
        JobLedger::open(self.ledger_path(), self.config.delivery.max_attempts)
    }

    /// Run the delivery loop until SIGINT/SIGTERM or a fatal error.
    pub async fn run(&self) -> Result<()> {
        // Check the credential before touching the printer.
        let client = BackendClient::new(&self.config.api)?;
        let ledger = self.open_ledger()?;

        let device = Arc::new(DeviceManager::from_config(&self.config.printer));
        device.start()?;
        match device.current() {
            Some(printer) => info!(model = %printer.model, path = %printer.device_path.display(), "printer ready"),
            None => warn!("no printer attached yet; waiting for hotplug"),
        }

        let orchestrator = Orchestrator::new(
            BackendSource::new(client),
            ledger,
            Arc::clone(&device),
            &self.config,
        );

        let shutdown = CancellationToken::new();
        let signals = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                shutdown_signal().await;
                shutdown.cancel();
            }
        });

        let result = orchestrator.run(shutdown).await;
        signals.abort();
        device.stop();
        result
    }

    /// Ledger counts, jobs awaiting operator review and the printer.
    pub fn status(&self) -> Result<String> {
        let ledger = self.open_ledger()?;
        let stats = ledger.stats()?;
        let mut out = String::new();
        out.push_str(&format!("ledger      {}\n", self.ledger_path().display()));
        out.push_str(&format!(
            "jobs        {} total: {} pending, {} rendering, {} printing, {} delivered, {} failed, {} ambiguous\n",
            stats.total(),
            stats.pending,
            stats.rendering,
            stats.printing,
            stats.delivered,
            stats.failed,
            stats.ambiguous
        ));
        out.push_str(&format!("unreported  {}\n", stats.unreported));

        for entry in ledger.entries_in(LifecycleState::Ambiguous)? {
            out.push_str(&format!(
                "ambiguous   {} (since {}) {}\n",
                entry.job_id,
                entry.updated_at.format("%Y-%m-%d %H:%M:%S"),
                entry.last_error.as_deref().unwrap_or("")
            ));
        }

        let device = DeviceManager::from_config(&self.config.printer);
        device.rescan()?;
        match device.current() {
            Some(printer) => out.push_str(&format!(
                "printer     {} at {} ({:?}, {})\n",
                printer.model,
                printer.device_path.display(),
                printer.connection_state,
                printer.charset.label()
            )),
            None => out.push_str("printer     none attached\n"),
        }
        Ok(out)
    }

    /// Operator override for a job left ambiguous by a crash.
    pub fn requeue(&self, job_id: &str) -> Result<()> {
        let job_id = JobId::from(job_id);
        self.open_ledger()?.requeue(&job_id)?;
        info!(job_id = %job_id, "job will print when the backend offers it again");
        Ok(())
    }

    /// Print a self-test ticket on the attached printer.
    pub async fn test_print(&self) -> Result<()> {
        let device = DeviceManager::from_config(&self.config.printer);
        device.rescan()?;
        let Some(printer) = device.current() else {
            return Err(TicketwerkError::Probe(format!(
                "no printer found under {}",
                self.config.printer.sysfs_root.display()
            )));
        };

        let renderer = Renderer::from_config(&self.config.printer);
        let ticket = test_ticket(
            &renderer,
            printer.charset,
            &printer.model,
            &printer.device_path.display().to_string(),
        )?;
        let receipt = device.write(&ticket).await?;
        info!(
            model = %printer.model,
            bytes = receipt.bytes_written,
            "test ticket printed"
        );
        Ok(())
    }
}

/// Read `path`; a missing file means defaults, a malformed one is an error.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "no config file; using defaults");
            return Ok(AgentConfig::default());
        }
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&text)
        .map_err(|e| TicketwerkError::Config(format!("{}: {e}", path.display())))
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, finishing current job"),
        _ = terminate => info!("received SIGTERM, finishing current job"),
    }
}
