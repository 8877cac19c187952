// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// HTTP client for the ordering backend's printer-device API.
//
// Every response is wrapped in `{ success, message, data, errorCode }`.
// Requests authenticate with `Authorization: PrinterDevice <token>`.

use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use ticketwerk_core::config::ApiConfig;
use ticketwerk_core::{JobId, Outcome, Result, TicketwerkError};

const API_PREFIX: &str = "/api/printer-device";

/// Backend error codes that mean the device token is no longer valid.
const CREDENTIAL_ERROR_CODES: &[&str] = &["UNAUTHORIZED", "INVALID_TOKEN", "TOKEN_REVOKED"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    error_code: Option<String>,
}

/// Authenticated client for one paired device.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl BackendClient {
    /// Build a client from the API settings. Fails with
    /// `MissingCredential` if no token has been configured.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let token = config.credential()?.to_owned();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| TicketwerkError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            token,
        })
    }

    /// `GET /jobs/pending?take=N`: job descriptors, oldest first.
    #[instrument(skip(self))]
    pub async fn pending_jobs(&self, take: usize) -> Result<Vec<Value>> {
        let data = self
            .request(Method::GET, "/jobs/pending", &[("take", take.to_string())], None)
            .await?;
        match data {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => Err(TicketwerkError::Backend {
                status: StatusCode::OK.as_u16(),
                code: None,
                message: format!("pending jobs: expected an array, got {other}"),
            }),
        }
    }

    /// `GET /jobs/{id}`: full job detail with payload and template.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn job_detail(&self, job_id: &JobId) -> Result<Value> {
        self.request(Method::GET, &format!("/jobs/{job_id}"), &[], None)
            .await
    }

    /// `POST /jobs/{id}/complete`.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn complete_job(&self, job_id: &JobId) -> Result<()> {
        self.request(Method::POST, &format!("/jobs/{job_id}/complete"), &[], None)
            .await?;
        Ok(())
    }

    /// `POST /jobs/{id}/fail` for `Failed` and `Ambiguous` outcomes.
    #[instrument(skip(self, error_message), fields(job_id = %job_id))]
    pub async fn fail_job(&self, job_id: &JobId, error_message: &str, outcome: Outcome) -> Result<()> {
        let body = json!({
            "errorMessage": error_message,
            "outcome": outcome.as_str(),
        });
        self.request(Method::POST, &format!("/jobs/{job_id}/fail"), &[], Some(body))
            .await?;
        Ok(())
    }

    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<Value> {
        let url = format!("{}{API_PREFIX}{endpoint}", self.base_url);
        debug!(%method, %url, "backend request");

        let mut request = self
            .http
            .request(method, &url)
            .header("Authorization", format!("PrinterDevice {}", self.token))
            .header("Accept", "application/json");
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TicketwerkError::Transport(format!("{url}: {e}")))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TicketwerkError::Transport(format!("{url}: reading body: {e}")))?;
        interpret(status, &text)
    }
}

/// Turn an HTTP status and body into the envelope's `data`.
pub(crate) fn interpret(status: StatusCode, body: &str) -> Result<Value> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(TicketwerkError::CredentialRejected(format!("HTTP {status}")));
    }

    let envelope: Envelope = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(e) if status.is_success() => {
            return Err(TicketwerkError::Transport(format!("malformed response: {e}")));
        }
        Err(_) => {
            return Err(TicketwerkError::Backend {
                status: status.as_u16(),
                code: None,
                message: format!("HTTP {status}"),
            });
        }
    };

    if envelope.success {
        return Ok(envelope.data);
    }
    let message = envelope.message.unwrap_or_else(|| format!("HTTP {status}"));
    match envelope.error_code {
        Some(code) if CREDENTIAL_ERROR_CODES.contains(&code.as_str()) => {
            Err(TicketwerkError::CredentialRejected(format!("{code}: {message}")))
        }
        code => Err(TicketwerkError::Backend {
            status: status.as_u16(),
            code,
            message,
        }),
    }
}
