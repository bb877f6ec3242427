//! Database query functions for the `credit_balances` and
//! `credit_transactions` tables.
//!
//! These functions are the only writers of credit state. Every balance
//! mutation commits together with its ledger entry in a single database
//! transaction, so the denormalized counter and the append-only ledger
//! cannot drift.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::CreditTransaction;

/// Fetch the current balance for an owner. Owners without a balance row
/// have zero credits.
pub async fn get_balance(pool: &PgPool, owner_id: &str) -> Result<i64> {
    let total: Option<i64> =
        sqlx::query_scalar("SELECT total FROM credit_balances WHERE owner_id = $1")
            .bind(owner_id)
            .fetch_optional(pool)
            .await
            .context("failed to fetch credit balance")?;

    Ok(total.unwrap_or(0))
}

/// Atomically debit `amount` credits from an owner and append the matching
/// `consume` ledger entry.
///
/// This is the authoritative gate for spending: the UPDATE only matches when
/// the stored balance covers the amount, so a stale earlier balance check can
/// never drive the counter negative. Returns `Ok(false)` when funds are
/// insufficient (nothing is written), `Ok(true)` on success.
pub async fn consume_credits(
    pool: &PgPool,
    owner_id: &str,
    amount: i64,
    remark: &str,
) -> Result<bool> {
    anyhow::ensure!(amount > 0, "consume amount must be positive, got {amount}");

    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    let updated = sqlx::query(
        "UPDATE credit_balances \
         SET total = total - $1, updated_at = now() \
         WHERE owner_id = $2 AND total >= $1",
    )
    .bind(amount)
    .bind(owner_id)
    .execute(&mut *tx)
    .await
    .context("failed to debit credit balance")?;

    if updated.rows_affected() == 0 {
        // Insufficient funds (or no balance row at all). Nothing to commit.
        tx.rollback().await.context("failed to roll back debit")?;
        return Ok(false);
    }

    sqlx::query(
        "INSERT INTO credit_transactions (owner_id, kind, amount, remark) \
         VALUES ($1, 'consume', $2, $3)",
    )
    .bind(owner_id)
    .bind(amount)
    .bind(remark)
    .execute(&mut *tx)
    .await
    .context("failed to insert consume ledger entry")?;

    tx.commit().await.context("failed to commit debit")?;
    Ok(true)
}

/// Atomically credit `amount` to an owner (creating the balance row if
/// needed) and append the matching `purchase` ledger entry.
///
/// Returns the new balance.
pub async fn purchase_credits(
    pool: &PgPool,
    owner_id: &str,
    amount: i64,
    remark: &str,
) -> Result<i64> {
    anyhow::ensure!(amount > 0, "purchase amount must be positive, got {amount}");

    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    let new_total: i64 = sqlx::query_scalar(
        "INSERT INTO credit_balances (owner_id, total) VALUES ($1, $2) \
         ON CONFLICT (owner_id) \
         DO UPDATE SET total = credit_balances.total + EXCLUDED.total, updated_at = now() \
         RETURNING total",
    )
    .bind(owner_id)
    .bind(amount)
    .fetch_one(&mut *tx)
    .await
    .context("failed to credit balance")?;

    sqlx::query(
        "INSERT INTO credit_transactions (owner_id, kind, amount, remark) \
         VALUES ($1, 'purchase', $2, $3)",
    )
    .bind(owner_id)
    .bind(amount)
    .bind(remark)
    .execute(&mut *tx)
    .await
    .context("failed to insert purchase ledger entry")?;

    tx.commit().await.context("failed to commit purchase")?;
    Ok(new_total)
}

/// List all ledger entries for an owner, newest first.
pub async fn list_transactions(pool: &PgPool, owner_id: &str) -> Result<Vec<CreditTransaction>> {
    let entries = sqlx::query_as::<_, CreditTransaction>(
        "SELECT * FROM credit_transactions WHERE owner_id = $1 ORDER BY created_at DESC, id",
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await
    .context("failed to list credit transactions")?;

    Ok(entries)
}

/// Sum of all purchases minus all consumes for an owner, straight from the
/// ledger. Reconciliation check: this must always equal the stored balance.
pub async fn ledger_total(pool: &PgPool, owner_id: &str) -> Result<i64> {
    let total: Option<i64> = sqlx::query_scalar(
        "SELECT SUM(CASE kind WHEN 'purchase' THEN amount ELSE -amount END)::bigint \
         FROM credit_transactions \
         WHERE owner_id = $1",
    )
    .bind(owner_id)
    .fetch_one(pool)
    .await
    .context("failed to total credit ledger")?;

    Ok(total.unwrap_or(0))
}
