//! `itinera credits` commands: balance, grants, and ledger history.

use anyhow::Result;
use sqlx::PgPool;

use itinera_db::queries::credits as credits_db;

use crate::CreditsCommands;

pub async fn run_credits_command(command: CreditsCommands, pool: &PgPool) -> Result<()> {
    match command {
        CreditsCommands::Show { owner } => run_show(pool, &owner).await,
        CreditsCommands::Grant {
            owner,
            amount,
            remark,
        } => run_grant(pool, &owner, amount, &remark).await,
        CreditsCommands::History { owner } => run_history(pool, &owner).await,
    }
}

/// Show the balance and verify it against the ledger.
async fn run_show(pool: &PgPool, owner: &str) -> Result<()> {
    let balance = credits_db::get_balance(pool, owner).await?;
    let ledger = credits_db::ledger_total(pool, owner).await?;

    println!("Owner: {owner}");
    println!("Balance: {balance}");
    if balance == ledger {
        println!("Ledger: {ledger} (reconciled)");
    } else {
        // Should be impossible: both sides commit in one transaction.
        println!("Ledger: {ledger} (MISMATCH -- investigate)");
    }

    Ok(())
}

/// Grant credits (operator-side purchase).
async fn run_grant(pool: &PgPool, owner: &str, amount: i64, remark: &str) -> Result<()> {
    let total = credits_db::purchase_credits(pool, owner, amount, remark).await?;
    println!("Granted {amount} credits to {owner}. New balance: {total}");
    Ok(())
}

/// Print the ledger, newest first.
async fn run_history(pool: &PgPool, owner: &str) -> Result<()> {
    let entries = credits_db::list_transactions(pool, owner).await?;

    if entries.is_empty() {
        println!("No transactions for {owner}.");
        return Ok(());
    }

    println!(
        "{:<20} {:<10} {:>8}  {}",
        "TIME", "KIND", "AMOUNT", "REMARK"
    );
    println!("{}", "-".repeat(64));
    for entry in &entries {
        println!(
            "{:<20} {:<10} {:>8}  {}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.kind,
            entry.amount,
            entry.remark
        );
    }

    Ok(())
}
