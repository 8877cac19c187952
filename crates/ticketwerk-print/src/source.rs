// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job source: remote polling as a lazy, finite batch of jobs.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use ticketwerk_core::{Job, JobId, Outcome, Result, TemplateDocument, TicketwerkError};

use crate::backend::BackendClient;

/// How the poll that produced a batch went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Ok,
    /// Network or backend trouble; try again next tick.
    Transient(String),
    /// The device credential was rejected; polling must stop.
    AuthRejected(String),
}

/// One poll's worth of jobs, in backend order.
///
/// Descriptors are decoded as the batch is iterated. A descriptor without
/// a job id is skipped; one with a broken payload or template is still
/// yielded and left for the renderer to reject.
#[derive(Debug)]
pub struct Batch {
    descriptors: std::vec::IntoIter<Value>,
    status: PollStatus,
}

impl Batch {
    pub fn new(descriptors: Vec<Value>) -> Self {
        Self {
            descriptors: descriptors.into_iter(),
            status: PollStatus::Ok,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn transient(detail: impl Into<String>) -> Self {
        Self {
            status: PollStatus::Transient(detail.into()),
            ..Self::empty()
        }
    }

    pub fn auth_rejected(detail: impl Into<String>) -> Self {
        Self {
            status: PollStatus::AuthRejected(detail.into()),
            ..Self::empty()
        }
    }

    pub fn status(&self) -> &PollStatus {
        &self.status
    }
}

impl Iterator for Batch {
    type Item = Job;

    fn next(&mut self) -> Option<Job> {
        for descriptor in self.descriptors.by_ref() {
            match decode_job(&descriptor) {
                Some(job) => return Some(job),
                None => warn!(%descriptor, "skipping job descriptor without an id"),
            }
        }
        None
    }
}

/// Where jobs come from and where outcomes go.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Fetch up to `max_items` pending jobs. Never fails: trouble is
    /// carried in the batch status.
    async fn fetch_batch(&self, max_items: usize) -> Batch;

    /// Report a terminal outcome.
    async fn acknowledge(&self, job_id: &JobId, outcome: Outcome, detail: Option<&str>)
    -> Result<()>;
}

#[async_trait]
impl<T: JobSource + ?Sized> JobSource for Arc<T> {
    async fn fetch_batch(&self, max_items: usize) -> Batch {
        (**self).fetch_batch(max_items).await
    }

    async fn acknowledge(
        &self,
        job_id: &JobId,
        outcome: Outcome,
        detail: Option<&str>,
    ) -> Result<()> {
        (**self).acknowledge(job_id, outcome, detail).await
    }
}

/// Decode one backend job descriptor.
///
/// `printData` and `templateContent` arrive either as JSON text or as
/// inline JSON. Text that does not parse is kept as a string so rendering
/// fails with `InvalidTemplate` rather than the job vanishing.
pub fn decode_job(descriptor: &Value) -> Option<Job> {
    let job_id = ["jobGuid", "jobId", "id"]
        .iter()
        .find_map(|key| match descriptor.get(*key)? {
            Value::String(id) if !id.trim().is_empty() => Some(id.trim().to_owned()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        })?;

    let payload = descriptor.get("printData").map_or(Value::Null, embedded_json);
    let body = descriptor
        .get("templateContent")
        .map_or_else(|| Value::Object(Default::default()), embedded_json);
    let version = descriptor
        .get("templateVersion")
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(1);

    Some(Job::new(
        JobId::from(job_id),
        payload,
        TemplateDocument { version, body },
    ))
}

fn embedded_json(value: &Value) -> Value {
    match value {
        Value::String(text) => serde_json::from_str(text).unwrap_or_else(|_| value.clone()),
        other => other.clone(),
    }
}

/// `JobSource` backed by the HTTP API.
#[derive(Debug, Clone)]
pub struct BackendSource {
    client: BackendClient,
}

impl BackendSource {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &BackendClient {
        &self.client
    }

    /// Complete descriptors that came without payload from the detail
    /// endpoint. Stops at the first failure so no later job overtakes it.
    async fn with_details(&self, descriptors: Vec<Value>) -> Batch {
        let mut complete = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            if descriptor.get("printData").is_some() {
                complete.push(descriptor);
                continue;
            }
            let Some(job_id) = decode_job(&descriptor).map(|job| job.job_id) else {
                complete.push(descriptor);
                continue;
            };
            match self.client.job_detail(&job_id).await {
                Ok(detail) if detail.is_object() => complete.push(detail),
                Ok(_) => complete.push(descriptor),
                Err(TicketwerkError::CredentialRejected(detail)) => {
                    return Batch::auth_rejected(detail);
                }
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "job detail unavailable; truncating batch");
                    break;
                }
            }
        }
        Batch::new(complete)
    }
}

#[async_trait]
impl JobSource for BackendSource {
    async fn fetch_batch(&self, max_items: usize) -> Batch {
        match self.client.pending_jobs(max_items).await {
            Ok(descriptors) => {
                debug!(count = descriptors.len(), "pending jobs fetched");
                self.with_details(descriptors).await
            }
            Err(TicketwerkError::CredentialRejected(detail)) => Batch::auth_rejected(detail),
            Err(e) => {
                warn!(error = %e, "poll failed");
                Batch::transient(e.to_string())
            }
        }
    }

    async fn acknowledge(
        &self,
        job_id: &JobId,
        outcome: Outcome,
        detail: Option<&str>,
    ) -> Result<()> {
        match outcome {
            Outcome::Delivered => self.client.complete_job(job_id).await?,
            Outcome::Failed | Outcome::Ambiguous => {
                let message = detail.unwrap_or(match outcome {
                    Outcome::Ambiguous => "interrupted during device write",
                    _ => "print failed",
                });
                self.client.fail_job(job_id, message, outcome).await?;
            }
        }
        info!(job_id = %job_id, %outcome, "outcome acknowledged");
        Ok(())
    }
}
