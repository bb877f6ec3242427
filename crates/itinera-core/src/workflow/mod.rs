//! Client-side model of the external AI workflow service.
//!
//! The service answers a run request in one of two shapes: the generated
//! itinerary directly, or an execute id that must be polled. That choice is
//! decided once at this boundary as the [`RunOutcome`] tagged union instead
//! of being re-inferred at every call site.

pub mod client;

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub use client::{HttpWorkflowClient, WorkflowConfig};

/// Trip parameters sent to the workflow service.
#[derive(Debug, Clone, Serialize)]
pub struct TripParams {
    pub origin: String,
    pub destination: String,
    pub travel_date: NaiveDate,
    pub days: i32,
    pub preferences: Vec<String>,
}

/// One recommended point of interest in a generated itinerary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointOfInterest {
    pub name: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rating: f64,
}

/// A successfully generated itinerary.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedPlan {
    pub text: String,
    pub points_of_interest: Vec<PointOfInterest>,
}

impl GeneratedPlan {
    /// The points of interest as a JSON array, for persistence.
    pub fn pois_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.points_of_interest).unwrap_or_else(|_| serde_json::json!([]))
    }
}

/// The two response shapes of a run request.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The service produced the itinerary synchronously.
    Immediate(GeneratedPlan),
    /// The run continues server-side; poll with the execute id.
    Pending { execute_id: String },
}

/// Result of polling a pending run.
#[derive(Debug, Clone)]
pub enum PollStatus {
    Pending,
    Success(GeneratedPlan),
    Failed { message: String },
}

/// Errors from the workflow service, classified once so the coordinator's
/// retry decision stays uniform.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// The service processed the request and declined it (success == false
    /// or a failed run). Retrying would produce the same answer.
    #[error("workflow rejected the request: {0}")]
    Rejected(String),

    /// The request itself was malformed or unauthorized (4xx).
    #[error("workflow request invalid: {0}")]
    InvalidRequest(String),

    /// Server-side error (5xx) -- likely transient.
    #[error("workflow service error: {0}")]
    Server(String),

    /// Connection or timeout failure -- likely transient.
    #[error("workflow network error: {0}")]
    Network(String),

    /// The response body did not match the expected shape.
    #[error("workflow response malformed: {0}")]
    Parse(String),

    /// A pending run did not settle within the polling budget. The run may
    /// still finish server-side; the caller may retry with a fresh run.
    #[error("workflow run {execute_id} still pending after {polls} polls")]
    PollTimeout { execute_id: String, polls: u32 },
}

impl WorkflowError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Server(_) | Self::Network(_) | Self::PollTimeout { .. }
        )
    }
}

/// The seam to the external AI workflow.
///
/// Production uses [`HttpWorkflowClient`]; tests substitute scripted stubs.
#[async_trait]
pub trait WorkflowService: Send + Sync {
    /// Start a generation run.
    async fn run(&self, params: &TripParams) -> Result<RunOutcome, WorkflowError>;

    /// Poll a pending run by execute id.
    async fn poll(&self, execute_id: &str) -> Result<PollStatus, WorkflowError>;
}

/// Resolve a run to a final plan, polling when the service answers with an
/// execute id.
///
/// Polling is bounded at `max_polls` iterations spaced `poll_interval` apart.
/// This is a soft upper bound on generation latency, not a hard cancellation
/// of the server-side run.
pub async fn resolve(
    service: &dyn WorkflowService,
    params: &TripParams,
    poll_interval: Duration,
    max_polls: u32,
) -> Result<GeneratedPlan, WorkflowError> {
    match service.run(params).await? {
        RunOutcome::Immediate(plan) => Ok(plan),
        RunOutcome::Pending { execute_id } => {
            for poll in 1..=max_polls {
                tokio::time::sleep(poll_interval).await;
                match service.poll(&execute_id).await? {
                    PollStatus::Pending => {
                        tracing::debug!(execute_id = %execute_id, poll, "workflow run still pending");
                    }
                    PollStatus::Success(plan) => return Ok(plan),
                    PollStatus::Failed { message } => return Err(WorkflowError::Rejected(message)),
                }
            }
            Err(WorkflowError::PollTimeout {
                execute_id,
                polls: max_polls,
            })
        }
    }
}
