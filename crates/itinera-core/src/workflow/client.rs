//! HTTP implementation of [`WorkflowService`] over the workflow platform's
//! REST surface: `POST /run` to start, `GET /status/{execute_id}` to poll.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{
    GeneratedPlan, PointOfInterest, PollStatus, RunOutcome, TripParams, WorkflowError,
    WorkflowService,
};

/// Connection settings for the workflow service.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Base URL of the workflow API, without a trailing slash.
    pub base_url: String,
    /// Identifier of the itinerary-generation workflow to run.
    pub workflow_id: String,
    /// Bearer token attached to every request.
    pub api_token: String,
    /// Per-request timeout. The overall generation latency is bounded by the
    /// caller's polling budget, not by this.
    pub request_timeout: Duration,
}

impl WorkflowConfig {
    pub fn new(
        base_url: impl Into<String>,
        workflow_id: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            workflow_id: workflow_id.into(),
            api_token: api_token.into(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Reqwest-backed workflow client.
#[derive(Debug, Clone)]
pub struct HttpWorkflowClient {
    client: Client,
    config: WorkflowConfig,
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct RunRequest<'a> {
    workflow_id: &'a str,
    parameters: &'a TripParams,
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    success: bool,
    #[serde(default)]
    output: Option<serde_json::Value>,
    #[serde(default)]
    execute_id: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    outputs: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

// ---------------------------------------------------------------------------

impl HttpWorkflowClient {
    pub fn new(config: WorkflowConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build workflow HTTP client")?;
        Ok(Self { client, config })
    }

    /// Send one request and map transport/status failures onto the error
    /// taxonomy. Success bodies are deserialized as `T`.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, WorkflowError> {
        let response = request
            .bearer_auth(&self.config.api_token)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    WorkflowError::Network(format!("request timed out: {err}"))
                } else if err.is_connect() {
                    WorkflowError::Network(format!("connection failed: {err}"))
                } else {
                    WorkflowError::Network(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|err| WorkflowError::Parse(err.to_string()))
    }
}

/// Map a non-2xx HTTP status onto the error taxonomy.
fn classify_status(status: StatusCode, body: &str) -> WorkflowError {
    match status.as_u16() {
        401 | 403 => WorkflowError::InvalidRequest(format!("unauthorized ({status}): {body}")),
        // Rate limiting cools off like a server fault.
        429 => WorkflowError::Server(format!("rate limited ({status}): {body}")),
        400..=499 => WorkflowError::InvalidRequest(format!("bad request ({status}): {body}")),
        _ => WorkflowError::Server(format!("{status}: {body}")),
    }
}

/// Extract a [`GeneratedPlan`] from a run output payload.
///
/// The payload is either the itinerary text directly, or an object with a
/// `text` field and an optional `points_of_interest` array.
fn plan_from_output(value: &serde_json::Value) -> Result<GeneratedPlan, WorkflowError> {
    if let Some(text) = value.as_str() {
        return Ok(GeneratedPlan {
            text: text.to_string(),
            points_of_interest: Vec::new(),
        });
    }

    let text = value
        .get("text")
        .and_then(|t| t.as_str())
        .ok_or_else(|| {
            WorkflowError::Parse(format!("output has no itinerary text: {value}"))
        })?
        .to_string();

    let points_of_interest: Vec<PointOfInterest> = match value.get("points_of_interest") {
        Some(pois) => serde_json::from_value(pois.clone())
            .map_err(|err| WorkflowError::Parse(format!("bad points_of_interest: {err}")))?,
        None => Vec::new(),
    };

    Ok(GeneratedPlan {
        text,
        points_of_interest,
    })
}

#[async_trait::async_trait]
impl WorkflowService for HttpWorkflowClient {
    async fn run(&self, params: &TripParams) -> Result<RunOutcome, WorkflowError> {
        let url = format!("{}/run", self.config.base_url);
        let body = RunRequest {
            workflow_id: &self.config.workflow_id,
            parameters: params,
        };

        let response: RunResponse = self.get_json(self.client.post(&url).json(&body)).await?;

        if !response.success {
            return Err(WorkflowError::Rejected(
                response
                    .message
                    .unwrap_or_else(|| "service reported failure".to_string()),
            ));
        }

        // The shape is decided exactly once, here.
        if let Some(output) = response.output {
            return Ok(RunOutcome::Immediate(plan_from_output(&output)?));
        }
        if let Some(execute_id) = response.execute_id {
            return Ok(RunOutcome::Pending { execute_id });
        }
        Err(WorkflowError::Parse(
            "successful run carried neither output nor execute_id".to_string(),
        ))
    }

    async fn poll(&self, execute_id: &str) -> Result<PollStatus, WorkflowError> {
        let url = format!("{}/status/{execute_id}", self.config.base_url);

        let response: StatusResponse = self.get_json(self.client.get(&url)).await?;

        match response.status.as_str() {
            "pending" => Ok(PollStatus::Pending),
            "success" => {
                let outputs = response.outputs.ok_or_else(|| {
                    WorkflowError::Parse("successful run carried no outputs".to_string())
                })?;
                Ok(PollStatus::Success(plan_from_output(&outputs)?))
            }
            "failed" => Ok(PollStatus::Failed {
                message: response
                    .message
                    .unwrap_or_else(|| "service reported failure".to_string()),
            }),
            other => Err(WorkflowError::Parse(format!(
                "unknown run status: {other:?}"
            ))),
        }
    }
}
