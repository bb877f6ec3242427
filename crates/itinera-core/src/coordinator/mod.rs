//! Plan generation coordinator.
//!
//! Submission is synchronous and cheap: validate, check the breaker and the
//! credit guard, persist a `generating` row, and return its id. Generation
//! itself runs as a detached background task (see [`generate`]) so the caller
//! can navigate to the detail view immediately and poll the row -- the AI
//! call may take anywhere from seconds to minutes.

mod generate;

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use itinera_db::models::PlanRequest;
use itinera_db::queries::credits as credits_db;
use itinera_db::queries::plans::{self as plans_db, NewPlanRequest};

use crate::breaker::{BreakerOpen, CircuitBreaker};
use crate::credits::{self, GENERATION_COST};
use crate::workflow::{TripParams, WorkflowService};

use generate::GenerationJob;

/// Sentinel preference tag substituted for an empty preference list.
pub const NO_PREFERENCE: &str = "无偏好";

/// Coordinator tuning knobs.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Credits debited per successful generation.
    pub generation_cost: i64,
    /// Maximum workflow attempts per submission.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles per further attempt.
    pub retry_backoff: Duration,
    /// Spacing between polls of a pending run.
    pub poll_interval: Duration,
    /// Maximum polls of a pending run per attempt.
    pub max_polls: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            generation_cost: GENERATION_COST,
            max_attempts: 3,
            retry_backoff: Duration::from_secs(2),
            poll_interval: Duration::from_secs(1),
            max_polls: 70,
        }
    }
}

/// A plan submission as received from the API layer.
#[derive(Debug, Clone)]
pub struct NewPlanSubmission {
    pub owner_id: String,
    pub origin: String,
    pub destination: String,
    pub travel_date: NaiveDate,
    pub days: i32,
    pub preferences: Vec<String>,
}

/// Synchronous submission failures. Background generation failures never
/// surface here -- they are recorded on the plan row.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// Rejected input; the message is shown to the submitter verbatim.
    #[error("{0}")]
    Validation(String),

    /// The credit guard refused the submission before anything was persisted.
    #[error("not enough credits: have {have}, need {need}")]
    InsufficientCredits { have: i64, need: i64 },

    /// The circuit breaker is open.
    #[error(transparent)]
    Unavailable(#[from] BreakerOpen),

    /// The initial persistence call failed; no plan id exists.
    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

/// The coordinator. One per process, shared behind an `Arc`.
pub struct PlanCoordinator {
    pool: PgPool,
    workflow: Arc<dyn WorkflowService>,
    breaker: Arc<CircuitBreaker>,
    config: CoordinatorConfig,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl PlanCoordinator {
    pub fn new(
        pool: PgPool,
        workflow: Arc<dyn WorkflowService>,
        breaker: Arc<CircuitBreaker>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            pool,
            workflow,
            breaker,
            config,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// The shared breaker (for status displays and tests).
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Submit a plan request.
    ///
    /// Returns the persisted `generating` row synchronously; the detail view
    /// keyed by its id is reachable immediately. Generation runs detached and
    /// writes its outcome back onto the row.
    pub async fn submit(&self, submission: NewPlanSubmission) -> Result<PlanRequest, SubmitError> {
        validate(&submission)?;
        let preferences = normalize_preferences(submission.preferences);

        // Fast local rejection while the workflow service is known-bad; no
        // row is created and no network call is made.
        self.breaker.check()?;

        // Advisory check so a hopeless submission fails before persistence.
        // The background debit remains the authoritative gate.
        if !credits::has_enough_credits(
            &self.pool,
            &submission.owner_id,
            self.config.generation_cost,
        )
        .await?
        {
            let have = credits_db::get_balance(&self.pool, &submission.owner_id).await?;
            return Err(SubmitError::InsufficientCredits {
                have,
                need: self.config.generation_cost,
            });
        }

        let plan = plans_db::insert_plan_request(
            &self.pool,
            &NewPlanRequest {
                owner_id: &submission.owner_id,
                origin: &submission.origin,
                destination: &submission.destination,
                travel_date: submission.travel_date,
                days: submission.days,
                preferences: &preferences,
            },
        )
        .await?;

        tracing::info!(
            plan_id = %plan.id,
            owner_id = %plan.owner_id,
            origin = %plan.origin,
            destination = %plan.destination,
            "plan request submitted"
        );

        let job = GenerationJob {
            pool: self.pool.clone(),
            workflow: Arc::clone(&self.workflow),
            breaker: Arc::clone(&self.breaker),
            config: self.config.clone(),
            cancel: self.cancel.child_token(),
            plan_id: plan.id,
            owner_id: plan.owner_id.clone(),
            params: TripParams {
                origin: plan.origin.clone(),
                destination: plan.destination.clone(),
                travel_date: plan.travel_date,
                days: plan.days,
                preferences: preferences.clone(),
            },
        };
        self.tracker.spawn(generate::run_generation(job));

        Ok(plan)
    }

    /// Whether `owner_id` can currently afford one generation.
    pub async fn has_enough_credits(&self, owner_id: &str) -> Result<bool, anyhow::Error> {
        credits::has_enough_credits(&self.pool, owner_id, self.config.generation_cost).await
    }

    /// Wait until every spawned generation task has finished, without
    /// interrupting them. Further submissions remain possible.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Graceful shutdown: cancel in-flight generation (pending polls stop at
    /// the next suspension point and record a failure reason) and wait for
    /// every task to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.wait_idle().await;
    }
}

/// Validate a submission. Messages are user-facing.
fn validate(submission: &NewPlanSubmission) -> Result<(), SubmitError> {
    if submission.owner_id.trim().is_empty() {
        return Err(SubmitError::Validation("owner must not be empty".into()));
    }
    if submission.origin.trim().is_empty() {
        return Err(SubmitError::Validation("origin must not be empty".into()));
    }
    if submission.destination.trim().is_empty() {
        return Err(SubmitError::Validation(
            "destination must not be empty".into(),
        ));
    }
    if submission.days < 1 {
        return Err(SubmitError::Validation("days must be at least 1".into()));
    }
    Ok(())
}

/// Drop blank tags; an empty list becomes the sentinel "no preference" tag.
fn normalize_preferences(preferences: Vec<String>) -> Vec<String> {
    let mut cleaned: Vec<String> = preferences
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    if cleaned.is_empty() {
        cleaned.push(NO_PREFERENCE.to_string());
    }
    cleaned
}
