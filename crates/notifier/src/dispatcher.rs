//! Batch dispatcher.
//!
//! Every job runs as its own task. Each send attempt first passes the shared
//! rate gate; provider backpressure is retried under the configured
//! `RetryPolicy`, any other failure ends the job at once. Job failures are
//! reported, never raised: `dispatch` only errors when the batch cannot start.

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinSet;
use uuid::Uuid;

use airwatch_common::error::SendError;
use airwatch_common::retry::{InvalidRetryPolicy, RetryPolicy};
use airwatch_common::types::DispatchJob;

use crate::gate::RateGate;
use crate::sender::NotificationSender;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid retry policy: {0}")]
    InvalidPolicy(#[from] InvalidRetryPolicy),
}

/// Final state of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Delivered,
    /// Retry budget exhausted (`exhausted`) or a non-retryable provider error.
    PermanentFailure { error: SendError, exhausted: bool },
}

#[derive(Debug, Clone)]
pub struct JobReport {
    pub recipient: String,
    pub subscription_id: Option<Uuid>,
    pub attempts: u32,
    pub outcome: JobOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub jobs: Vec<JobReport>,
    /// Tasks that panicked or were cancelled before reporting.
    pub aborted: usize,
}

impl DispatchReport {
    pub fn succeeded(&self) -> usize {
        self.jobs
            .iter()
            .filter(|job| job.outcome == JobOutcome::Delivered)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.jobs.len() - self.succeeded() + self.aborted
    }
}

pub struct Dispatcher {
    sender: Arc<dyn NotificationSender>,
    gate: Arc<dyn RateGate>,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        sender: Arc<dyn NotificationSender>,
        gate: Arc<dyn RateGate>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            sender,
            gate,
            retry,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Send every job and return how many were delivered.
    pub async fn dispatch(&self, jobs: Vec<DispatchJob>) -> Result<usize, DispatchError> {
        Ok(self.dispatch_with_report(jobs).await?.succeeded())
    }

    /// Send every job and return per-job outcomes. Returns once every job has
    /// been delivered or has failed permanently.
    pub async fn dispatch_with_report(
        &self,
        jobs: Vec<DispatchJob>,
    ) -> Result<DispatchReport, DispatchError> {
        self.retry.validate()?;

        let total = jobs.len();
        if total == 0 {
            return Ok(DispatchReport::default());
        }

        tracing::info!(
            jobs = total,
            sender = self.sender.name(),
            max_attempts = self.retry.max_attempts,
            "Dispatching notification batch"
        );

        let mut tasks = JoinSet::new();
        for job in jobs {
            tasks.spawn(deliver(
                job,
                Arc::clone(&self.sender),
                Arc::clone(&self.gate),
                self.retry,
            ));
        }

        let mut report = DispatchReport {
            jobs: Vec::with_capacity(total),
            aborted: 0,
        };
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(job_report) => report.jobs.push(job_report),
                Err(e) => {
                    tracing::error!(error = %e, "Dispatch task aborted");
                    report.aborted += 1;
                }
            }
        }

        tracing::info!(
            jobs = total,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Notification batch finished"
        );

        Ok(report)
    }
}

async fn deliver(
    mut job: DispatchJob,
    sender: Arc<dyn NotificationSender>,
    gate: Arc<dyn RateGate>,
    retry: RetryPolicy,
) -> JobReport {
    let result = {
        let sender = sender.as_ref();
        let gate = gate.as_ref();
        let message = &job;
        retry
            .run(
                move |attempt| async move {
                    gate.acquire().await;
                    tracing::debug!(
                        subscription_id = ?message.subscription_id,
                        attempt,
                        "Sending notification"
                    );
                    sender
                        .send(&message.recipient, &message.subject, &message.body)
                        .await
                },
                SendError::is_backpressure,
            )
            .await
    };

    let outcome = match result {
        Ok(done) => {
            job.attempts = done.attempts;
            tracing::debug!(
                subscription_id = ?job.subscription_id,
                attempts = job.attempts,
                "Notification delivered"
            );
            JobOutcome::Delivered
        }
        Err(failure) => {
            job.attempts = failure.attempts;
            tracing::warn!(
                subscription_id = ?job.subscription_id,
                attempts = job.attempts,
                exhausted = failure.exhausted,
                error = %failure.error,
                "Notification permanently failed"
            );
            JobOutcome::PermanentFailure {
                error: failure.error,
                exhausted: failure.exhausted,
            }
        }
    };

    JobReport {
        recipient: job.recipient,
        subscription_id: job.subscription_id,
        attempts: job.attempts,
        outcome,
    }
}
