// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Ticketwerk delivery agent.

use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a print job, assigned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle states of a job as recorded in the ledger.
///
/// `Pending → Rendering → Printing → Delivered | Failed | Ambiguous`.
/// A failed attempt with attempts left goes back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Known locally, waiting for (another) delivery attempt.
    Pending,
    /// Being turned into device bytes. No byte has reached the printer.
    Rendering,
    /// A device write has been (or is about to be) issued.
    Printing,
    /// The printer accepted the full ticket.
    Delivered,
    /// Given up: permanent error or attempts exhausted.
    Failed,
    /// Interrupted mid-write; the printer may or may not have printed.
    Ambiguous,
}

impl LifecycleState {
    /// Storage keyword for the ledger.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Rendering => "rendering",
            Self::Printing => "printing",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Ambiguous => "ambiguous",
        }
    }

    /// Settled jobs must never be processed again.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Delivered | Self::Ambiguous)
    }

    /// Terminal from the agent's point of view (`Failed` included).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed | Self::Ambiguous)
    }

    /// The outcome reported to the backend for a terminal state.
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            Self::Delivered => Some(Outcome::Delivered),
            Self::Failed => Some(Outcome::Failed),
            Self::Ambiguous => Some(Outcome::Ambiguous),
            Self::Pending | Self::Rendering | Self::Printing => None,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "rendering" => Ok(Self::Rendering),
            "printing" => Ok(Self::Printing),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            "ambiguous" => Ok(Self::Ambiguous),
            other => Err(format!("unknown lifecycle state '{other}'")),
        }
    }
}

/// Terminal outcome acknowledged to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Delivered,
    Failed,
    Ambiguous,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "Delivered",
            Self::Failed => "Failed",
            Self::Ambiguous => "Ambiguous",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Busy printer, timeout, cable blip or network trouble; safe to retry.
    Transient,
    /// Someone has to act on the device (permissions, paper).
    UserAction,
    /// Retrying cannot help: broken template or payload.
    Permanent,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::UserAction => "user_action",
            Self::Permanent => "permanent",
        }
    }
}

impl FromStr for ErrorClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transient" => Ok(Self::Transient),
            "user_action" => Ok(Self::UserAction),
            "permanent" => Ok(Self::Permanent),
            other => Err(format!("unknown error class '{other}'")),
        }
    }
}

/// 8-bit printer code pages supported by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodePage {
    /// USA, standard Europe.
    Pc437,
    /// Multilingual Latin-1.
    Pc850,
    /// Turkish.
    Pc857,
    /// Multilingual Latin-1 with Euro.
    Pc858,
    /// Cyrillic.
    Pc866,
    /// Windows Latin-1.
    Wpc1252,
}

impl CodePage {
    /// Default `ESC t n` character-table number for this page.
    ///
    /// The numbering follows the ESC/POS clones deployed in the field
    /// (Xprinter/Rongta), which differ from Epson for PC857/PC858. Use
    /// the `code_table` printer setting to override per device.
    pub fn escpos_table(&self) -> u8 {
        match self {
            Self::Pc437 => 0,
            Self::Pc850 => 2,
            Self::Pc857 => 18,
            Self::Pc858 => 19,
            Self::Pc866 => 17,
            Self::Wpc1252 => 16,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pc437 => "PC437",
            Self::Pc850 => "PC850",
            Self::Pc857 => "PC857",
            Self::Pc858 => "PC858",
            Self::Pc866 => "PC866",
            Self::Wpc1252 => "WPC1252",
        }
    }
}

impl FromStr for CodePage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pc437" | "cp437" => Ok(Self::Pc437),
            "pc850" | "cp850" => Ok(Self::Pc850),
            "pc857" | "cp857" => Ok(Self::Pc857),
            "pc858" | "cp858" => Ok(Self::Pc858),
            "pc866" | "cp866" => Ok(Self::Pc866),
            "wpc1252" | "cp1252" | "windows-1252" => Ok(Self::Wpc1252),
            other => Err(format!("unsupported code page '{other}'")),
        }
    }
}

/// Template rules delivered with a job, plus their version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateDocument {
    pub version: u32,
    pub body: serde_json::Value,
}

/// A print job fetched from the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    /// Order content. Only the renderer looks inside.
    pub payload: serde_json::Value,
    pub template: TemplateDocument,
    /// When this agent first saw the job.
    pub received_at: DateTime<Utc>,
}

impl Job {
    pub fn new(job_id: JobId, payload: serde_json::Value, template: TemplateDocument) -> Self {
        Self {
            job_id,
            payload,
            template,
            received_at: Utc::now(),
        }
    }
}

/// Durable projection of a job's lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub job_id: JobId,
    pub state: LifecycleState,
    /// Number of failed attempts so far.
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub error_class: Option<ErrorClass>,
    /// SHA-256 of the payload the job was first seen with.
    pub payload_hash: Option<String>,
    /// Attempt currently (or last) holding the `Printing` state.
    pub attempt_id: Option<Uuid>,
    pub received_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Whether the terminal outcome has been accepted by the backend.
    pub reported: bool,
}

/// Proof that a job was durably moved to `Printing`.
///
/// Issued by the ledger's `begin_attempt` and redeemed by `commit` or
/// `fail`. A token from a superseded attempt is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptToken {
    pub job_id: JobId,
    pub attempt_id: Uuid,
    /// 1-based number of this attempt.
    pub attempt_number: u32,
}

impl AttemptToken {
    pub fn issue(job_id: JobId, attempt_number: u32) -> Self {
        Self {
            job_id,
            attempt_id: Uuid::new_v4(),
            attempt_number,
        }
    }
}

/// Device-ready bytes for one ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTicket {
    bytes: Vec<u8>,
    payload_hash: String,
    template_version: u32,
}

impl RenderedTicket {
    pub fn new(bytes: Vec<u8>, payload_hash: String, template_version: u32) -> Self {
        Self {
            bytes,
            payload_hash,
            template_version,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// SHA-256 hex digest of the source payload.
    pub fn payload_hash(&self) -> &str {
        &self.payload_hash
    }

    pub fn template_version(&self) -> u32 {
        self.template_version
    }
}

/// Connection state of the attached printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Attached,
    Detached,
    /// A write is in flight.
    Busy,
    /// Attached but unusable (e.g. permission denied on the node).
    Error,
}

/// USB descriptor strings read at probe time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbIdentity {
    /// Lowercase hex, e.g. `04b8`.
    pub vendor_id: String,
    pub product_id: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial: Option<String>,
}

/// The single physical printer target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrinterHandle {
    /// Character device, e.g. `/dev/usb/lp0`.
    pub device_path: PathBuf,
    pub connection_state: ConnectionState,
    pub charset: CodePage,
    /// Characters per line at normal size.
    pub paper_width: usize,
    pub identity: UsbIdentity,
    /// Human-readable model, e.g. "Epson TM-T20".
    pub model: String,
    pub attached_at: DateTime<Utc>,
}

/// Result of a successful device write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub device_path: PathBuf,
    pub bytes_written: u64,
}
