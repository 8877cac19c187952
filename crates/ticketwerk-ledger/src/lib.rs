// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// ticketwerk-ledger: Persistent job lifecycle record for the Ticketwerk
// delivery agent.
//
// The ledger is what makes delivery at-most-once: an attempt is durably
// recorded before the first byte goes to the printer, and a job that was
// mid-write when the process died comes back as `Ambiguous`, never as
// something to retry.

pub mod ledger;
pub mod store;

pub use ledger::{Ledger, LedgerStats};
pub use store::JobLedger;
