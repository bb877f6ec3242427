//! Detached background generation.
//!
//! Every path through this module terminates in exactly one of two writes to
//! the plan row: the success result or a failure reason. Nothing propagates
//! as an error to the submitter -- by the time generation runs, the caller
//! has already navigated away.

use std::sync::Arc;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use itinera_db::queries::credits as credits_db;
use itinera_db::queries::plans as plans_db;

use crate::breaker::CircuitBreaker;
use crate::workflow::{self, GeneratedPlan, TripParams, WorkflowError, WorkflowService};

use super::CoordinatorConfig;

/// Everything one generation task needs, captured at submit time.
pub(super) struct GenerationJob {
    pub pool: PgPool,
    pub workflow: Arc<dyn WorkflowService>,
    pub breaker: Arc<CircuitBreaker>,
    pub config: CoordinatorConfig,
    pub cancel: CancellationToken,
    pub plan_id: Uuid,
    pub owner_id: String,
    pub params: TripParams,
}

/// Run one plan request to a terminal state.
pub(super) async fn run_generation(job: GenerationJob) {
    // The breaker may have opened between submit and spawn. Record the
    // rejection on the row; no network call, no breaker bookkeeping.
    if let Err(open) = job.breaker.check() {
        record_failure(&job, 0, &format!("generation skipped: {open}")).await;
        return;
    }

    let mut attempt: u32 = 0;
    let outcome: Result<GeneratedPlan, WorkflowError> = loop {
        attempt += 1;

        let generated = tokio::select! {
            res = workflow::resolve(
                job.workflow.as_ref(),
                &job.params,
                job.config.poll_interval,
                job.config.max_polls,
            ) => res,
            _ = job.cancel.cancelled() => {
                record_failure(&job, attempt, "generation aborted by shutdown").await;
                return;
            }
        };

        match generated {
            Ok(plan) => break Ok(plan),
            Err(err) if err.is_retryable() && attempt < job.config.max_attempts => {
                let backoff = job.config.retry_backoff * 2u32.pow(attempt - 1);
                tracing::warn!(
                    plan_id = %job.plan_id,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "workflow attempt failed, retrying"
                );
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = job.cancel.cancelled() => {
                        record_failure(&job, attempt, "generation aborted by shutdown").await;
                        return;
                    }
                }
            }
            Err(err) => break Err(err),
        }
    };

    match outcome {
        Ok(plan) => settle_success(&job, attempt, plan).await,
        Err(err) => {
            // One increment per submission that reaches a terminal failure,
            // not per attempt, so the threshold keeps its meaning.
            job.breaker.record_failure();
            record_failure(
                &job,
                attempt,
                &format!("itinerary generation failed after {attempt} attempt(s): {err}"),
            )
            .await;
        }
    }
}

/// The workflow reported success: debit, then persist the result.
///
/// The debit happens strictly after the service reported success -- never the
/// reverse -- so a failed generation is never charged.
async fn settle_success(job: &GenerationJob, attempt: u32, plan: GeneratedPlan) {
    let remark = format!("itinerary generation {}", job.plan_id);

    match credits_db::consume_credits(
        &job.pool,
        &job.owner_id,
        job.config.generation_cost,
        &remark,
    )
    .await
    {
        Ok(true) => {
            match plans_db::complete_plan_request(
                &job.pool,
                job.plan_id,
                &plan.text,
                &plan.pois_json(),
                attempt as i32,
            )
            .await
            {
                Ok(1) => {
                    job.breaker.record_success();
                    tracing::info!(
                        plan_id = %job.plan_id,
                        attempt,
                        pois = plan.points_of_interest.len(),
                        "plan generated and credits debited"
                    );
                }
                Ok(_) => {
                    // Row already terminal; the debit stands (the ledger
                    // recorded it) but the result has nowhere to go.
                    tracing::warn!(
                        plan_id = %job.plan_id,
                        "plan already in a terminal state, generated result dropped"
                    );
                }
                Err(err) => {
                    tracing::error!(
                        plan_id = %job.plan_id,
                        error = %format!("{err:#}"),
                        "failed to persist generated plan"
                    );
                }
            }
        }
        Ok(false) => {
            // Balance changed since the submission-time check. The service
            // was healthy, so the breaker is untouched.
            record_failure(
                job,
                attempt,
                "not enough credits to pay for the generated itinerary",
            )
            .await;
        }
        Err(err) => {
            record_failure(job, attempt, &format!("failed to debit credits: {err:#}")).await;
        }
    }
}

/// Best-effort terminal failure write; a persistence error here only logs.
async fn record_failure(job: &GenerationJob, attempts: u32, reason: &str) {
    tracing::warn!(
        plan_id = %job.plan_id,
        attempts,
        reason,
        "plan generation failed"
    );
    if let Err(err) =
        plans_db::record_plan_failure(&job.pool, job.plan_id, reason, attempts as i32).await
    {
        tracing::error!(
            plan_id = %job.plan_id,
            error = %format!("{err:#}"),
            "failed to record plan failure"
        );
    }
}
