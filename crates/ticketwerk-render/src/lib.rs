// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// ticketwerk-render: Turns an order payload and its template rules into
// the ESC/POS byte stream for a thermal printer.
//
// Provides the template model, the ESC/POS command builder, 8-bit code
// page transcoding with visual substitutes, and payload fingerprinting.

pub mod codepage;
pub mod escpos;
pub mod integrity;
pub mod renderer;
pub mod template;

pub use escpos::EscPosBuilder;
pub use renderer::{Renderer, render, test_ticket};
pub use template::TemplateRules;
