use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use itinera_core::coordinator::{NewPlanSubmission, PlanCoordinator, SubmitError};
use itinera_db::models::{CreditTransaction, PlanRequest};
use itinera_db::queries::{credits as credits_db, plans as plan_db};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: msg.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: "missing or invalid operator key".to_string(),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
        }
    }
}

impl From<SubmitError> for AppError {
    fn from(err: SubmitError) -> Self {
        let status = match &err {
            SubmitError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SubmitError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            SubmitError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            SubmitError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitPlanRequest {
    pub owner_id: String,
    pub origin: String,
    pub destination: String,
    pub travel_date: NaiveDate,
    pub days: i32,
    #[serde(default)]
    pub preferences: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub owner_id: String,
    pub total: i64,
    /// Whether the balance covers one generation -- the client-side check
    /// before offering the submit button. The debit itself re-checks.
    pub can_generate: bool,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    pub amount: i64,
    #[serde(default)]
    pub remark: String,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub coordinator: Arc<PlanCoordinator>,
    pub api_key: String,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/plans", get(list_plans).post(submit_plan))
        .route("/api/plans/{id}", get(get_plan))
        .route("/api/owners/{owner}/plans", get(list_owner_plans))
        .route("/api/credits/{owner}", get(get_credits))
        .route("/api/credits/{owner}/purchase", post(purchase_credits))
        .route("/api/credits/{owner}/transactions", get(list_transactions))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(state: AppState, bind: &str, port: u16) -> Result<()> {
    let coordinator = Arc::clone(&state.coordinator);
    let app = build_router(state);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("itinera serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop in-flight generation tasks and wait for them so their outcomes
    // land on the plan rows before the process exits.
    coordinator.shutdown().await;
    tracing::info!("itinera serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn index(State(state): State<AppState>) -> Result<axum::response::Response, AppError> {
    let plans = plan_db::list_plan_requests(&state.pool)
        .await
        .map_err(AppError::internal)?;

    let rows = if plans.is_empty() {
        "<tr><td colspan=\"4\">No plan requests found.</td></tr>".to_string()
    } else {
        plans
            .iter()
            .map(|p| {
                format!(
                    "<tr><td><a href=\"/api/plans/{id}\">{origin} → {destination}</a></td>\
                     <td>{owner}</td><td>{status}</td><td>{id}</td></tr>",
                    id = p.id,
                    origin = p.origin,
                    destination = p.destination,
                    owner = p.owner_id,
                    status = p.status,
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let html = format!(
        "<!DOCTYPE html>\
<html><head><title>itinera</title></head><body>\
<h1>itinera</h1>\
<p><a href=\"/api/plans\">/api/plans</a></p>\
<table><tr><th>Trip</th><th>Owner</th><th>Status</th><th>ID</th></tr>{rows}</table>\
</body></html>"
    );

    Ok(Html(html).into_response())
}

async fn submit_plan(
    State(state): State<AppState>,
    Json(req): Json<SubmitPlanRequest>,
) -> Result<axum::response::Response, AppError> {
    let plan = state
        .coordinator
        .submit(NewPlanSubmission {
            owner_id: req.owner_id,
            origin: req.origin,
            destination: req.destination,
            travel_date: req.travel_date,
            days: req.days,
            preferences: req.preferences,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(plan)).into_response())
}

async fn list_plans(State(state): State<AppState>) -> Result<Json<Vec<PlanRequest>>, AppError> {
    let plans = plan_db::list_plan_requests(&state.pool)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(plans))
}

async fn get_plan(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PlanRequest>, AppError> {
    let plan = plan_db::get_plan_request(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("plan {id} not found")))?;
    Ok(Json(plan))
}

async fn list_owner_plans(
    State(state): State<AppState>,
    Path(owner): Path<String>,
) -> Result<Json<Vec<PlanRequest>>, AppError> {
    let plans = plan_db::list_plan_requests_for_owner(&state.pool, &owner)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(plans))
}

async fn get_credits(
    State(state): State<AppState>,
    Path(owner): Path<String>,
) -> Result<Json<BalanceResponse>, AppError> {
    let total = credits_db::get_balance(&state.pool, &owner)
        .await
        .map_err(AppError::internal)?;
    let can_generate = state
        .coordinator
        .has_enough_credits(&owner)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(BalanceResponse {
        owner_id: owner,
        total,
        can_generate,
    }))
}

async fn purchase_credits(
    State(state): State<AppState>,
    Path(owner): Path<String>,
    headers: HeaderMap,
    Json(req): Json<PurchaseRequest>,
) -> Result<Json<BalanceResponse>, AppError> {
    require_operator_key(&headers, &state.api_key)?;

    if req.amount <= 0 {
        return Err(AppError::bad_request("amount must be positive"));
    }

    let total = credits_db::purchase_credits(&state.pool, &owner, req.amount, &req.remark)
        .await
        .map_err(AppError::internal)?;

    tracing::info!(owner_id = %owner, amount = req.amount, "credits purchased");
    let can_generate = state
        .coordinator
        .has_enough_credits(&owner)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(BalanceResponse {
        owner_id: owner,
        total,
        can_generate,
    }))
}

async fn list_transactions(
    State(state): State<AppState>,
    Path(owner): Path<String>,
) -> Result<Json<Vec<CreditTransaction>>, AppError> {
    let entries = credits_db::list_transactions(&state.pool, &owner)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(entries))
}

/// Check the `Authorization: Bearer <key>` header against the operator key.
fn require_operator_key(headers: &HeaderMap, api_key: &str) -> Result<(), AppError> {
    let provided = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(key) if key == api_key => Ok(()),
        _ => Err(AppError::unauthorized()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
