//! `itinera status` command: show one plan request, or a summary of all.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use itinera_db::queries::plans as plan_db;

/// Run the status command.
///
/// When `plan_id_str` is `Some`, shows detail for that plan request.
/// When `None`, lists all plan requests with a status summary.
pub async fn run_status(pool: &PgPool, plan_id_str: Option<&str>) -> Result<()> {
    match plan_id_str {
        Some(id_str) => run_plan_status(pool, id_str).await,
        None => run_overview(pool).await,
    }
}

/// Show detail for a single plan request.
async fn run_plan_status(pool: &PgPool, plan_id_str: &str) -> Result<()> {
    let plan_id =
        Uuid::parse_str(plan_id_str).with_context(|| format!("invalid plan ID: {plan_id_str}"))?;

    let plan = plan_db::get_plan_request(pool, plan_id)
        .await?
        .with_context(|| format!("plan {plan_id} not found"))?;

    println!("Plan: {} → {} ({})", plan.origin, plan.destination, plan.id);
    println!("Owner: {}", plan.owner_id);
    println!("Date: {} for {} day(s)", plan.travel_date, plan.days);
    println!("Preferences: {}", plan.preferences.join(", "));
    println!("Status: {}", plan.status);
    if plan.attempts > 0 {
        println!("Attempts: {}", plan.attempts);
    }
    if let Some(completed_at) = plan.completed_at {
        println!(
            "Completed: {}",
            completed_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    println!();

    if let Some(reason) = &plan.failure_reason {
        println!("Failure: {reason}");
    }
    if let Some(text) = &plan.result_text {
        println!("{text}");
    }
    if let Some(pois) = plan.points_of_interest.as_array() {
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

    Ok(())
}

/// List all plan requests with a status summary.
async fn run_overview(pool: &PgPool) -> Result<()> {
    let counts = plan_db::count_by_status(pool).await?;
    let plans = plan_db::list_plan_requests(pool).await?;

    if plans.is_empty() {
        println!("No plan requests found.");
        return Ok(());
    }

    println!(
        "{} total: {} generating, {} ready, {} failed",
        counts.total, counts.generating, counts.ready, counts.failed
    );
    println!();

    println!(
        "{:<38} {:<16} {:<24} {:<12}",
        "ID", "OWNER", "TRIP", "STATUS"
    );
    println!("{}", "-".repeat(92));

    for plan in &plans {
        let trip = format!("{} → {}", plan.origin, plan.destination);
        let trip_display = if trip.chars().count() > 22 {
            let prefix: String = trip.chars().take(19).collect();
            format!("{prefix}...")
        } else {
            trip
        };
        println!(
            "{:<38} {:<16} {:<24} {:<12}",
            plan.id, plan.owner_id, trip_display, plan.status
        );
    }

    Ok(())
}
