// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Seams between the device manager, the bus it watches and the delivery
// loop that writes through it.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use ticketwerk_core::{PrinterHandle, RenderedTicket, Result, UsbIdentity, WriteReceipt};

/// A printer candidate that passed probing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbedDevice {
    pub device_path: PathBuf,
    pub identity: UsbIdentity,
    /// Resolved model name, e.g. "Epson TM-T20".
    pub model: String,
    /// Whether this process may open the node for writing.
    pub writable: bool,
}

/// Enumerates and probes printer candidates on the bus.
pub trait DeviceScanner: Send + Sync + 'static {
    /// Names of the candidate nodes present right now. Cheap; called on
    /// every hotplug poll.
    fn list(&self) -> Result<Vec<String>>;

    /// Full probe of one candidate. `None` if it is not a usable printer.
    fn probe(&self, name: &str) -> Option<ProbedDevice>;
}

/// Where rendered tickets go.
#[async_trait]
pub trait TicketSink: Send + Sync {
    /// Write a complete ticket. No internal retries.
    async fn write(&self, ticket: &RenderedTicket) -> Result<WriteReceipt>;

    /// Snapshot of the attached printer, if any.
    fn current(&self) -> Option<PrinterHandle>;
}

#[async_trait]
impl<T: TicketSink + ?Sized> TicketSink for Arc<T> {
    async fn write(&self, ticket: &RenderedTicket) -> Result<WriteReceipt> {
        (**self).write(ticket).await
    }

    fn current(&self) -> Option<PrinterHandle> {
        (**self).current()
    }
}
