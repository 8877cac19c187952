// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device manager: owns the single printer slot.
//
// The slot is shared between the hotplug listener (which attaches and
// detaches) and writers. Every detach bumps a generation counter on a
// watch channel; a write started under one generation is aborted with
// `DeviceLost` the moment the counter moves on. Writes are serialized by
// an async mutex whose wait is bounded by the busy timeout.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use ticketwerk_core::config::PrinterConfig;
use ticketwerk_core::{
    CodePage, ConnectionState, PrinterHandle, RenderedTicket, Result, TicketwerkError,
    WriteReceipt,
};

use crate::hotplug::Listener;
use crate::probe::SysfsScanner;
use crate::raw;
use crate::traits::{DeviceScanner, ProbedDevice, TicketSink};

/// State shared with the hotplug thread.
pub(crate) struct Shared {
    pub(crate) scanner: Arc<dyn DeviceScanner>,
    slot: Mutex<Option<PrinterHandle>>,
    generation: watch::Sender<u64>,
    pub(crate) rescan_requested: AtomicBool,
    charset: CodePage,
    paper_width: usize,
}

impl Shared {
    fn slot(&self) -> MutexGuard<'_, Option<PrinterHandle>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump_generation(&self) {
        self.generation.send_modify(|generation| *generation += 1);
    }

    /// Probe `names` and reconcile the slot with what is on the bus.
    pub(crate) fn apply_scan(&self, names: &[String]) {
        let found: Vec<ProbedDevice> = names
            .iter()
            .filter_map(|name| self.scanner.probe(name))
            .collect();
        self.apply(names, found);
    }

    /// True while candidates are listed but no usable printer is held, so
    /// the listener keeps probing even though the names did not change.
    pub(crate) fn unsettled(&self, names: &[String]) -> bool {
        match self.slot().as_ref() {
            None => !names.is_empty(),
            Some(handle) => handle.connection_state == ConnectionState::Error,
        }
    }

    fn apply(&self, names: &[String], found: Vec<ProbedDevice>) {
        let mut slot = self.slot();

        if let Some(current) = slot.as_mut() {
            let still_present = found.iter().find(|device| {
                device.device_path == current.device_path && device.identity == current.identity
            });
            if let Some(device) = still_present {
                if current.connection_state != ConnectionState::Busy {
                    let state = if device.writable {
                        ConnectionState::Attached
                    } else {
                        ConnectionState::Error
                    };
                    if state != current.connection_state {
                        info!(path = %current.device_path.display(), ?state, "printer state changed");
                        current.connection_state = state;
                    }
                }
                return;
            }

            // usblp allows a single open, so a probe during our own write
            // can fail even though the printer never left.
            let probed_elsewhere = found
                .iter()
                .any(|device| device.device_path == current.device_path);
            let listed = names.iter().any(|name| current.device_path.ends_with(name));
            if current.connection_state == ConnectionState::Busy && listed && !probed_elsewhere {
                debug!(path = %current.device_path.display(), "printer busy and still listed; keeping handle");
                return;
            }

            info!(
                path = %current.device_path.display(),
                model = %current.model,
                "printer detached"
            );
            *slot = None;
            self.bump_generation();
        }

        if let Some(device) = found.into_iter().next() {
            let connection_state = if device.writable {
                ConnectionState::Attached
            } else {
                warn!(
                    path = %device.device_path.display(),
                    "printer attached but not writable; grant the agent user write access to the node"
                );
                ConnectionState::Error
            };
            info!(
                path = %device.device_path.display(),
                model = %device.model,
                vendor = %device.identity.vendor_id,
                product = %device.identity.product_id,
                "printer attached"
            );
            *slot = Some(PrinterHandle {
                device_path: device.device_path,
                connection_state,
                charset: self.charset,
                paper_width: self.paper_width,
                identity: device.identity,
                model: device.model,
                attached_at: Utc::now(),
            });
        }
    }

    /// Claim the printer for a write. Returns its node and the generation
    /// the write runs under.
    fn begin_write(&self) -> Result<(PathBuf, u64)> {
        let mut slot = self.slot();
        let Some(handle) = slot.as_mut() else {
            return Err(TicketwerkError::DeviceLost {
                bytes_sent: 0,
                detail: "no printer attached".into(),
            });
        };
        if handle.connection_state == ConnectionState::Error {
            return Err(TicketwerkError::PermissionDenied {
                path: handle.device_path.display().to_string(),
            });
        }
        handle.connection_state = ConnectionState::Busy;
        Ok((handle.device_path.clone(), *self.generation.borrow()))
    }

    /// Release the printer after a write and record what the write learned.
    fn end_write(&self, path: &Path, result: &Result<u64>) {
        let mut slot = self.slot();
        let Some(handle) = slot.as_mut().filter(|handle| handle.device_path == path) else {
            return;
        };
        match result {
            Err(TicketwerkError::PermissionDenied { .. }) => {
                handle.connection_state = ConnectionState::Error;
            }
            Err(TicketwerkError::DeviceLost { .. }) => {
                info!(path = %path.display(), "write lost the printer; dropping handle until rescan");
                *slot = None;
                self.bump_generation();
                self.rescan_requested.store(true, Ordering::Release);
            }
            _ => handle.connection_state = ConnectionState::Attached,
        }
    }
}

/// Owns the printer slot, the hotplug listener and write serialization.
pub struct DeviceManager {
    shared: Arc<Shared>,
    write_lock: tokio::sync::Mutex<()>,
    write_timeout: Duration,
    busy_timeout: Duration,
    hotplug_poll: Duration,
    listener: Mutex<Option<Listener>>,
}

impl DeviceManager {
    pub fn new(scanner: Arc<dyn DeviceScanner>, config: &PrinterConfig) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                scanner,
                slot: Mutex::new(None),
                generation,
                rescan_requested: AtomicBool::new(false),
                charset: config.code_page,
                paper_width: config.paper_width,
            }),
            write_lock: tokio::sync::Mutex::new(()),
            write_timeout: config.write_timeout(),
            busy_timeout: config.busy_timeout(),
            hotplug_poll: config.hotplug_poll(),
            listener: Mutex::new(None),
        }
    }

    /// Manager over the real sysfs tree.
    pub fn from_config(config: &PrinterConfig) -> Self {
        Self::new(Arc::new(SysfsScanner::from_config(config)), config)
    }

    /// Probe once and start the hotplug listener. Idempotent.
    pub fn start(&self) -> Result<()> {
        let mut listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if listener.is_some() {
            return Ok(());
        }
        let names = self.shared.scanner.list()?;
        self.shared.apply_scan(&names);
        *listener = Some(Listener::spawn(
            Arc::clone(&self.shared),
            self.hotplug_poll,
            names,
        )?);
        Ok(())
    }

    /// Stop the hotplug listener. The current handle is kept.
    pub fn stop(&self) {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listener) = listener {
            listener.stop();
        }
    }

    /// Probe the bus now.
    pub fn rescan(&self) -> Result<()> {
        let names = self.shared.scanner.list()?;
        self.shared.apply_scan(&names);
        Ok(())
    }

    /// Snapshot of the attached printer.
    pub fn current(&self) -> Option<PrinterHandle> {
        self.shared.slot().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared
            .slot()
            .as_ref()
            .map_or(ConnectionState::Detached, |handle| handle.connection_state)
    }

    /// Generation counter; changes on every detach.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.generation.subscribe()
    }

    /// Write one complete ticket to the attached printer.
    ///
    /// Errors: `DeviceBusy` if another write holds the printer past the
    /// busy timeout, `DeviceLost` if there is no printer or it goes away
    /// mid-write, `PermissionDenied` if the node cannot be opened, and
    /// `Timeout` if the printer stops accepting bytes.
    #[instrument(skip(self, ticket), fields(bytes = ticket.len()))]
    pub async fn write(&self, ticket: &RenderedTicket) -> Result<WriteReceipt> {
        let _guard = tokio::time::timeout(self.busy_timeout, self.write_lock.lock())
            .await
            .map_err(|_| {
                TicketwerkError::DeviceBusy(format!(
                    "another write held the printer for over {} ms",
                    self.busy_timeout.as_millis()
                ))
            })?;

        let (path, generation) = self.shared.begin_write()?;
        let mut detach = self.shared.generation.subscribe();

        let result = raw::send(
            &path,
            ticket.bytes(),
            generation,
            &mut detach,
            self.write_timeout,
        )
        .await;

        self.shared.end_write(&path, &result);
        if matches!(result, Err(TicketwerkError::DeviceLost { .. })) {
            self.wake_listener();
        }

        let bytes_written = result?;
        info!(path = %path.display(), bytes_written, "ticket delivered to printer");
        Ok(WriteReceipt {
            device_path: path,
            bytes_written,
        })
    }

    fn wake_listener(&self) {
        if let Some(listener) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            listener.wake();
        }
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        self.stop();
    }
}

#[async_trait]
impl TicketSink for DeviceManager {
    async fn write(&self, ticket: &RenderedTicket) -> Result<WriteReceipt> {
        DeviceManager::write(self, ticket).await
    }

    fn current(&self) -> Option<PrinterHandle> {
        DeviceManager::current(self)
    }
}
