//! Credit guard: the submission-time balance check.
//!
//! This check is read-only and advisory: it exists to reject hopeless
//! submissions before anything is persisted. The authoritative gate is the
//! debit itself ([`itinera_db::queries::credits::consume_credits`]), which
//! atomically refuses to take the balance below zero -- the balance may have
//! changed between this check and the background debit.

use anyhow::Result;
use sqlx::PgPool;

use itinera_db::queries::credits as credits_db;

/// Fixed cost of one itinerary generation, in credits.
pub const GENERATION_COST: i64 = 50;

/// Whether `owner_id` currently holds at least `required` credits.
pub async fn has_enough_credits(pool: &PgPool, owner_id: &str, required: i64) -> Result<bool> {
    let balance = credits_db::get_balance(pool, owner_id).await?;
    Ok(balance >= required)
}
