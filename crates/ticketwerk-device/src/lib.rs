// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// ticketwerk-device: The single USB thermal printer.
//
// Probes sysfs for printer-class devices, follows hotplug events, and
// serializes raw writes to the character device. A detach during a write
// aborts it with the number of bytes that got through.

mod hotplug;
pub mod manager;
pub mod probe;
pub mod raw;
pub mod traits;

pub use manager::DeviceManager;
pub use probe::SysfsScanner;
pub use traits::{DeviceScanner, ProbedDevice, TicketSink};
