//! `itinera submit` command: submit one plan request and wait for the
//! background generation to settle.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::PgPool;

use itinera_core::breaker::CircuitBreaker;
use itinera_core::coordinator::{CoordinatorConfig, NewPlanSubmission, PlanCoordinator};
use itinera_core::workflow::{HttpWorkflowClient, WorkflowConfig};
use itinera_db::models::PlanStatus;
use itinera_db::queries::plans as plan_db;

#[allow(clippy::too_many_arguments)]
pub async fn run_submit(
    pool: &PgPool,
    workflow_config: WorkflowConfig,
    owner: &str,
    origin: &str,
    destination: &str,
    date: &str,
    days: i32,
    preferences: Vec<String>,
) -> Result<()> {
    let travel_date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .with_context(|| format!("invalid travel date (expected YYYY-MM-DD): {date}"))?;

    let workflow = HttpWorkflowClient::new(workflow_config)?;
    let coordinator = PlanCoordinator::new(
        pool.clone(),
        Arc::new(workflow),
        Arc::new(CircuitBreaker::default()),
        CoordinatorConfig::default(),
    );

    let plan = coordinator
        .submit(NewPlanSubmission {
            owner_id: owner.to_string(),
            origin: origin.to_string(),
            destination: destination.to_string(),
            travel_date,
            days,
            preferences,
        })
        .await?;

    println!("Plan request {} submitted, generating...", plan.id);

    // Unlike the server, the CLI has nothing else to do: wait for the
    // background task and report the outcome.
    coordinator.wait_idle().await;

    let done = plan_db::get_plan_request(pool, plan.id)
        .await?
        .context("plan request disappeared while generating")?;

    match done.status {
        PlanStatus::Ready => {
            println!("Generation succeeded ({} attempt(s)).", done.attempts);
            println!();
            if let Some(text) = &done.result_text {
                println!("{text}");
            }
            if let Some(pois) = done.points_of_interest.as_array() {
                if !pois.is_empty() {
                    println!();
                    println!("Points of interest:");
                    for poi in pois {
                        let name = poi["name"].as_str().unwrap_or("?");
                        let rating = poi["rating"].as_f64().unwrap_or(0.0);
                        println!("  {name} ({rating:.1})");
                    }
                }
            }
        }
        PlanStatus::Failed => {
            println!(
                "Generation failed: {}",
                done.failure_reason.as_deref().unwrap_or("unknown reason")
            );
        }
        PlanStatus::Generating => {
            // wait_idle returned, so the task is gone; this means the final
            // write itself failed.
            println!("Plan request is still marked generating; check the server logs.");
        }
    }

    Ok(())
}
