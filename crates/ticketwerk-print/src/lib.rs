// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Ticketwerk Print: Backend polling, acknowledgement and the delivery
// loop. This crate connects the ledger, the renderer and the printer to
// the ordering backend and owns the retry and recovery rules.

pub mod backend;
pub mod orchestrator;
pub mod retry;
pub mod source;

pub use backend::BackendClient;
pub use orchestrator::{Orchestrator, TickReport};
pub use retry::RetryPolicy;
pub use source::{Batch, BackendSource, JobSource, PollStatus};
