//! Database query functions for the `plan_requests` table.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::PlanRequest;

/// Fields for a new plan request. The row is created in `generating` status
/// with empty result fields.
#[derive(Debug, Clone)]
pub struct NewPlanRequest<'a> {
    pub owner_id: &'a str,
    pub origin: &'a str,
    pub destination: &'a str,
    pub travel_date: NaiveDate,
    pub days: i32,
    pub preferences: &'a [String],
}

/// Insert a new plan request row. Returns the inserted row with
/// server-generated defaults (id, created_at, status).
pub async fn insert_plan_request(pool: &PgPool, new: &NewPlanRequest<'_>) -> Result<PlanRequest> {
    let plan = sqlx::query_as::<_, PlanRequest>(
        "INSERT INTO plan_requests (owner_id, origin, destination, travel_date, days, preferences) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING *",
    )
    .bind(new.owner_id)
    .bind(new.origin)
    .bind(new.destination)
    .bind(new.travel_date)
    .bind(new.days)
    .bind(new.preferences)
    .fetch_one(pool)
    .await
    .context("failed to insert plan request")?;

    Ok(plan)
}

/// Fetch a plan request by its ID.
pub async fn get_plan_request(pool: &PgPool, id: Uuid) -> Result<Option<PlanRequest>> {
    let plan = sqlx::query_as::<_, PlanRequest>("SELECT * FROM plan_requests WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch plan request")?;

    Ok(plan)
}

/// List all plan requests for an owner, newest first.
pub async fn list_plan_requests_for_owner(pool: &PgPool, owner_id: &str) -> Result<Vec<PlanRequest>> {
    let plans = sqlx::query_as::<_, PlanRequest>(
        "SELECT * FROM plan_requests WHERE owner_id = $1 ORDER BY created_at DESC",
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await
    .context("failed to list plan requests for owner")?;

    Ok(plans)
}

/// List all plan requests, newest first.
pub async fn list_plan_requests(pool: &PgPool) -> Result<Vec<PlanRequest>> {
    let plans =
        sqlx::query_as::<_, PlanRequest>("SELECT * FROM plan_requests ORDER BY created_at DESC")
            .fetch_all(pool)
            .await
            .context("failed to list plan requests")?;

    Ok(plans)
}

/// Write the success result onto a plan request.
///
/// Uses optimistic locking: only a row still in `generating` status is
/// updated, so the success path and the failure path are mutually exclusive
/// and each executes at most once. Returns the number of rows affected
/// (0 means the request already reached a terminal state).
pub async fn complete_plan_request(
    pool: &PgPool,
    id: Uuid,
    result_text: &str,
    points_of_interest: &serde_json::Value,
    attempts: i32,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE plan_requests \
         SET status = 'ready', \
             result_text = $1, \
             points_of_interest = $2, \
             failure_reason = NULL, \
             attempts = $3, \
             completed_at = now() \
         WHERE id = $4 AND status = 'generating'",
    )
    .bind(result_text)
    .bind(points_of_interest)
    .bind(attempts)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to complete plan request")?;

    Ok(result.rows_affected())
}

/// Write a failure reason onto a plan request.
///
/// Idempotent: may run from `generating` or `failed` status and always
/// overwrites the reason, so the last-written message wins. The
/// points-of-interest list stays empty. Never touches a `ready` row.
pub async fn record_plan_failure(
    pool: &PgPool,
    id: Uuid,
    reason: &str,
    attempts: i32,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE plan_requests \
         SET status = 'failed', \
             failure_reason = $1, \
             attempts = $2, \
             completed_at = now() \
         WHERE id = $3 AND status IN ('generating', 'failed')",
    )
    .bind(reason)
    .bind(attempts)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to record plan failure")?;

    Ok(result.rows_affected())
}

/// Status counts across all plan requests.
#[derive(Debug, Clone, Default)]
pub struct PlanCounts {
    pub generating: i64,
    pub ready: i64,
    pub failed: i64,
    pub total: i64,
}

/// Get a summary of plan request counts by status.
pub async fn count_by_status(pool: &PgPool) -> Result<PlanCounts> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status::text, COUNT(*) as cnt \
         FROM plan_requests \
         GROUP BY status",
    )
    .fetch_all(pool)
    .await
    .context("failed to count plan requests by status")?;

    let mut counts = PlanCounts::default();
    for (status, count) in &rows {
        match status.as_str() {
            "generating" => counts.generating = *count,
            "ready" => counts.ready = *count,
            "failed" => counts.failed = *count,
            _ => {}
        }
        counts.total += count;
    }
    Ok(counts)
}
