//! Integration tests for the plan generation coordinator: credit gating,
//! debit-iff-success ordering, retry behavior, breaker thresholds, and
//! shutdown handling. Uses scripted workflow stubs and a containerized
//! database.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;

use itinera_core::breaker::{BreakerConfig, CircuitBreaker};
use itinera_core::coordinator::{
    CoordinatorConfig, NewPlanSubmission, PlanCoordinator, SubmitError, NO_PREFERENCE,
};
use itinera_core::workflow::{
    GeneratedPlan, PointOfInterest, PollStatus, RunOutcome, TripParams, WorkflowError,
    WorkflowService,
};
use itinera_db::models::PlanStatus;
use itinera_db::queries::{credits, plans};
use itinera_test_utils::{create_test_db, drop_test_db};

// -----------------------------------------------------------------------
// Scripted workflow stubs
// -----------------------------------------------------------------------

fn generated_plan() -> GeneratedPlan {
    GeneratedPlan {
        text: "Day 1: 外滩. Day 2: 豫园. Day 3: 迪士尼.".to_string(),
        points_of_interest: vec![PointOfInterest {
            name: "外滩".to_string(),
            image_url: "https://example.com/bund.jpg".to_string(),
            description: "Riverside promenade".to_string(),
            rating: 4.8,
        }],
    }
}

/// Counts run calls; every run succeeds immediately.
struct ImmediateWorkflow {
    runs: AtomicU32,
}

impl ImmediateWorkflow {
    fn new() -> Self {
        Self {
            runs: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl WorkflowService for ImmediateWorkflow {
    async fn run(&self, _params: &TripParams) -> Result<RunOutcome, WorkflowError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(RunOutcome::Immediate(generated_plan()))
    }

    async fn poll(&self, _execute_id: &str) -> Result<PollStatus, WorkflowError> {
        panic!("immediate workflow must not be polled");
    }
}

/// Counts run calls; every run fails with the scripted error.
struct FailingWorkflow {
    runs: AtomicU32,
    retryable: bool,
}

impl FailingWorkflow {
    fn rejecting() -> Self {
        Self {
            runs: AtomicU32::new(0),
            retryable: false,
        }
    }

    fn flaky() -> Self {
        Self {
            runs: AtomicU32::new(0),
            retryable: true,
        }
    }
}

#[async_trait]
impl WorkflowService for FailingWorkflow {
    async fn run(&self, _params: &TripParams) -> Result<RunOutcome, WorkflowError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.retryable {
            Err(WorkflowError::Server("502 bad gateway".to_string()))
        } else {
            Err(WorkflowError::Rejected("no route found".to_string()))
        }
    }

    async fn poll(&self, _execute_id: &str) -> Result<PollStatus, WorkflowError> {
        panic!("failing workflow must not be polled");
    }
}

/// Fails with a transient error until the scripted attempt, then succeeds.
struct RecoveringWorkflow {
    runs: AtomicU32,
    succeed_on: u32,
}

#[async_trait]
impl WorkflowService for RecoveringWorkflow {
    async fn run(&self, _params: &TripParams) -> Result<RunOutcome, WorkflowError> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        if run < self.succeed_on {
            Err(WorkflowError::Network("connection reset".to_string()))
        } else {
            Ok(RunOutcome::Immediate(generated_plan()))
        }
    }

    async fn poll(&self, _execute_id: &str) -> Result<PollStatus, WorkflowError> {
        panic!("recovering workflow must not be polled");
    }
}

/// Succeeds only once released, so a test can interleave other work between
/// submission and settlement.
struct GatedWorkflow {
    release: tokio::sync::Semaphore,
}

impl GatedWorkflow {
    fn new() -> Self {
        Self {
            release: tokio::sync::Semaphore::new(0),
        }
    }
}

#[async_trait]
impl WorkflowService for GatedWorkflow {
    async fn run(&self, _params: &TripParams) -> Result<RunOutcome, WorkflowError> {
        let _permit = self
            .release
            .acquire()
            .await
            .map_err(|_| WorkflowError::Network("gate closed".to_string()))?;
        Ok(RunOutcome::Immediate(generated_plan()))
    }

    async fn poll(&self, _execute_id: &str) -> Result<PollStatus, WorkflowError> {
        panic!("gated workflow must not be polled");
    }
}

/// Always answers with an execute id whose run never settles.
struct StuckWorkflow;

#[async_trait]
impl WorkflowService for StuckWorkflow {
    async fn run(&self, _params: &TripParams) -> Result<RunOutcome, WorkflowError> {
        Ok(RunOutcome::Pending {
            execute_id: "exec-stuck".to_string(),
        })
    }

    async fn poll(&self, _execute_id: &str) -> Result<PollStatus, WorkflowError> {
        Ok(PollStatus::Pending)
    }
}

// -----------------------------------------------------------------------
// Helpers
// -----------------------------------------------------------------------

/// Fast test timings; the shape of the config matches production.
fn test_config() -> CoordinatorConfig {
    CoordinatorConfig {
        generation_cost: 50,
        max_attempts: 3,
        retry_backoff: Duration::from_millis(10),
        poll_interval: Duration::from_millis(10),
        max_polls: 5,
    }
}

fn coordinator(pool: &PgPool, workflow: Arc<dyn WorkflowService>) -> PlanCoordinator {
    PlanCoordinator::new(
        pool.clone(),
        workflow,
        Arc::new(CircuitBreaker::default()),
        test_config(),
    )
}

fn submission(owner: &str) -> NewPlanSubmission {
    NewPlanSubmission {
        owner_id: owner.to_string(),
        origin: "北京".to_string(),
        destination: "上海".to_string(),
        travel_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
        days: 3,
        preferences: vec![],
    }
}

// -----------------------------------------------------------------------
// Submission
// -----------------------------------------------------------------------

#[tokio::test]
async fn submit_returns_generating_row_with_normalized_preferences() {
    let (pool, db_name) = create_test_db().await;
    credits::purchase_credits(&pool, "user-1", 100, "top-up")
        .await
        .unwrap();

    let coord = coordinator(&pool, Arc::new(ImmediateWorkflow::new()));
    let plan = coord.submit(submission("user-1")).await.unwrap();

    // The detail view is reachable immediately, before generation settles.
    assert_eq!(plan.status, PlanStatus::Generating);
    assert_eq!(plan.preferences, vec![NO_PREFERENCE.to_string()]);
    let fetched = plans::get_plan_request(&pool, plan.id)
        .await
        .unwrap()
        .expect("row must exist right after submit");
    assert_eq!(fetched.id, plan.id);

    coord.wait_idle().await;

    let done = plans::get_plan_request(&pool, plan.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, PlanStatus::Ready);
    assert!(done.result_text.as_deref().unwrap().contains("外滩"));
    assert_eq!(done.points_of_interest[0]["rating"], 4.8);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn validation_error_is_synchronous_and_persists_nothing() {
    let (pool, db_name) = create_test_db().await;
    credits::purchase_credits(&pool, "user-1", 100, "top-up")
        .await
        .unwrap();

    let workflow = Arc::new(ImmediateWorkflow::new());
    let coord = coordinator(&pool, workflow.clone());

    let mut bad = submission("user-1");
    bad.destination = " ".to_string();
    let err = coord.submit(bad).await.unwrap_err();
    assert!(matches!(err, SubmitError::Validation(_)));

    coord.wait_idle().await;
    assert!(plans::list_plan_requests(&pool).await.unwrap().is_empty());
    assert_eq!(workflow.runs.load(Ordering::SeqCst), 0);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn insufficient_credits_reject_before_any_persistence_or_network() {
    let (pool, db_name) = create_test_db().await;
    credits::purchase_credits(&pool, "user-1", 49, "not quite enough")
        .await
        .unwrap();

    let workflow = Arc::new(ImmediateWorkflow::new());
    let coord = coordinator(&pool, workflow.clone());

    let err = coord.submit(submission("user-1")).await.unwrap_err();
    assert!(matches!(
        err,
        SubmitError::InsufficientCredits { have: 49, need: 50 }
    ));

    coord.wait_idle().await;
    assert!(plans::list_plan_requests(&pool).await.unwrap().is_empty());
    assert_eq!(
        workflow.runs.load(Ordering::SeqCst),
        0,
        "no workflow call may happen for a rejected submission"
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

// -----------------------------------------------------------------------
// Debit ordering
// -----------------------------------------------------------------------

#[tokio::test]
async fn successful_generation_debits_exactly_once() {
    let (pool, db_name) = create_test_db().await;
    credits::purchase_credits(&pool, "user-1", 100, "top-up")
        .await
        .unwrap();

    let coord = coordinator(&pool, Arc::new(ImmediateWorkflow::new()));
    let plan = coord.submit(submission("user-1")).await.unwrap();
    coord.wait_idle().await;

    assert_eq!(credits::get_balance(&pool, "user-1").await.unwrap(), 50);
    let entries = credits::list_transactions(&pool, "user-1").await.unwrap();
    let consumes: Vec<_> = entries
        .iter()
        .filter(|e| e.kind == itinera_db::models::TransactionKind::Consume)
        .collect();
    assert_eq!(consumes.len(), 1);
    assert_eq!(consumes[0].amount, 50);
    assert!(consumes[0].remark.contains(&plan.id.to_string()));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn failed_generation_never_debits() {
    let (pool, db_name) = create_test_db().await;
    credits::purchase_credits(&pool, "user-1", 100, "top-up")
        .await
        .unwrap();

    let coord = coordinator(&pool, Arc::new(FailingWorkflow::rejecting()));
    let plan = coord.submit(submission("user-1")).await.unwrap();
    coord.wait_idle().await;

    let done = plans::get_plan_request(&pool, plan.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, PlanStatus::Failed);
    assert!(
        done.failure_reason.as_deref().unwrap().contains("no route found"),
        "the underlying error text must reach the row: {:?}",
        done.failure_reason
    );
    assert_eq!(done.points_of_interest, serde_json::json!([]));

    assert_eq!(credits::get_balance(&pool, "user-1").await.unwrap(), 100);
    let entries = credits::list_transactions(&pool, "user-1").await.unwrap();
    assert!(
        entries
            .iter()
            .all(|e| e.kind == itinera_db::models::TransactionKind::Purchase),
        "no consume entry may exist for a failed generation"
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn balance_drained_between_submit_and_settle_fails_the_plan() {
    let (pool, db_name) = create_test_db().await;
    credits::purchase_credits(&pool, "user-1", 50, "top-up")
        .await
        .unwrap();

    let workflow = Arc::new(GatedWorkflow::new());
    let coord = coordinator(&pool, workflow.clone());

    // Submit passes the advisory check, then the credits are spent out from
    // under the in-flight generation.
    let plan = coord.submit(submission("user-1")).await.unwrap();
    let drained = credits::consume_credits(&pool, "user-1", 50, "spent elsewhere")
        .await
        .unwrap();
    assert!(drained);

    workflow.release.add_permits(1);
    coord.wait_idle().await;

    // The debit-time gate refused; the plan fails and the balance never went
    // negative.
    let done = plans::get_plan_request(&pool, plan.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, PlanStatus::Failed);
    assert!(
        done.failure_reason
            .as_deref()
            .unwrap()
            .contains("not enough credits"),
        "unexpected reason: {:?}",
        done.failure_reason
    );
    assert_eq!(credits::get_balance(&pool, "user-1").await.unwrap(), 0);
    // The only consume entry is the out-of-band spend.
    let entries = credits::list_transactions(&pool, "user-1").await.unwrap();
    let consumes: Vec<_> = entries
        .iter()
        .filter(|e| e.kind == itinera_db::models::TransactionKind::Consume)
        .collect();
    assert_eq!(consumes.len(), 1);
    assert_eq!(consumes[0].remark, "spent elsewhere");
    // The workflow itself was healthy.
    assert_eq!(coord.breaker().consecutive_failures(), 0);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn exact_balance_covers_one_generation_and_blocks_the_next() {
    let (pool, db_name) = create_test_db().await;
    credits::purchase_credits(&pool, "user-1", 50, "top-up")
        .await
        .unwrap();

    let coord = coordinator(&pool, Arc::new(ImmediateWorkflow::new()));
    coord.submit(submission("user-1")).await.unwrap();
    coord.wait_idle().await;

    assert_eq!(credits::get_balance(&pool, "user-1").await.unwrap(), 0);

    let err = coord.submit(submission("user-1")).await.unwrap_err();
    assert!(matches!(
        err,
        SubmitError::InsufficientCredits { have: 0, need: 50 }
    ));

    pool.close().await;
    drop_test_db(&db_name).await;
}

// -----------------------------------------------------------------------
// Retries
// -----------------------------------------------------------------------

#[tokio::test]
async fn transient_errors_are_retried_up_to_the_bound() {
    let (pool, db_name) = create_test_db().await;
    credits::purchase_credits(&pool, "user-1", 100, "top-up")
        .await
        .unwrap();

    let workflow = Arc::new(RecoveringWorkflow {
        runs: AtomicU32::new(0),
        succeed_on: 3,
    });
    let coord = coordinator(&pool, workflow.clone());
    let plan = coord.submit(submission("user-1")).await.unwrap();
    coord.wait_idle().await;

    let done = plans::get_plan_request(&pool, plan.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, PlanStatus::Ready);
    assert_eq!(done.attempts, 3);
    assert_eq!(workflow.runs.load(Ordering::SeqCst), 3);
    assert_eq!(
        coord.breaker().consecutive_failures(),
        0,
        "a recovered submission must not count as a breaker failure"
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn transient_errors_exhaust_the_attempt_budget() {
    let (pool, db_name) = create_test_db().await;
    credits::purchase_credits(&pool, "user-1", 100, "top-up")
        .await
        .unwrap();

    let workflow = Arc::new(FailingWorkflow::flaky());
    let coord = coordinator(&pool, workflow.clone());
    let plan = coord.submit(submission("user-1")).await.unwrap();
    coord.wait_idle().await;

    let done = plans::get_plan_request(&pool, plan.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, PlanStatus::Failed);
    assert_eq!(done.attempts, 3);
    assert!(
        done.failure_reason
            .as_deref()
            .unwrap()
            .contains("after 3 attempt(s)")
    );
    assert_eq!(workflow.runs.load(Ordering::SeqCst), 3);
    assert_eq!(coord.breaker().consecutive_failures(), 1);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn rejection_is_terminal_on_the_first_attempt() {
    let (pool, db_name) = create_test_db().await;
    credits::purchase_credits(&pool, "user-1", 100, "top-up")
        .await
        .unwrap();

    let workflow = Arc::new(FailingWorkflow::rejecting());
    let coord = coordinator(&pool, workflow.clone());
    let plan = coord.submit(submission("user-1")).await.unwrap();
    coord.wait_idle().await;

    let done = plans::get_plan_request(&pool, plan.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, PlanStatus::Failed);
    assert_eq!(done.attempts, 1);
    assert_eq!(
        workflow.runs.load(Ordering::SeqCst),
        1,
        "a definitive rejection must not be retried"
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

// -----------------------------------------------------------------------
// Circuit breaker
// -----------------------------------------------------------------------

#[tokio::test]
async fn three_failed_submissions_open_the_breaker() {
    let (pool, db_name) = create_test_db().await;
    credits::purchase_credits(&pool, "user-1", 1000, "top-up")
        .await
        .unwrap();

    let workflow = Arc::new(FailingWorkflow::rejecting());
    let coord = coordinator(&pool, workflow.clone());

    for _ in 0..3 {
        coord.submit(submission("user-1")).await.unwrap();
        coord.wait_idle().await;
    }
    assert_eq!(coord.breaker().consecutive_failures(), 3);

    // The 4th submission is rejected locally: no new row, no network call.
    let err = coord.submit(submission("user-1")).await.unwrap_err();
    assert!(matches!(err, SubmitError::Unavailable(_)));
    assert!(err.to_string().contains("temporarily unavailable"));

    assert_eq!(plans::list_plan_requests(&pool).await.unwrap().len(), 3);
    assert_eq!(workflow.runs.load(Ordering::SeqCst), 3);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn breaker_reopens_for_submissions_after_cooldown() {
    let (pool, db_name) = create_test_db().await;
    credits::purchase_credits(&pool, "user-1", 1000, "top-up")
        .await
        .unwrap();

    let breaker = Arc::new(CircuitBreaker::new(BreakerConfig {
        failure_threshold: 3,
        cooldown: Duration::from_millis(50),
    }));
    let coord = PlanCoordinator::new(
        pool.clone(),
        Arc::new(ImmediateWorkflow::new()),
        Arc::clone(&breaker),
        test_config(),
    );

    breaker.record_failure();
    breaker.record_failure();
    breaker.record_failure();
    assert!(matches!(
        coord.submit(submission("user-1")).await.unwrap_err(),
        SubmitError::Unavailable(_)
    ));

    tokio::time::sleep(Duration::from_millis(80)).await;

    // Cool-down elapsed: the attempt goes through again.
    let plan = coord.submit(submission("user-1")).await.unwrap();
    coord.wait_idle().await;
    let done = plans::get_plan_request(&pool, plan.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, PlanStatus::Ready);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn success_resets_the_breaker_counter() {
    let (pool, db_name) = create_test_db().await;
    credits::purchase_credits(&pool, "user-1", 1000, "top-up")
        .await
        .unwrap();

    let breaker = Arc::new(CircuitBreaker::default());
    let coord = PlanCoordinator::new(
        pool.clone(),
        Arc::new(ImmediateWorkflow::new()),
        Arc::clone(&breaker),
        test_config(),
    );

    breaker.record_failure();
    breaker.record_failure();

    coord.submit(submission("user-1")).await.unwrap();
    coord.wait_idle().await;

    assert_eq!(breaker.consecutive_failures(), 0);

    pool.close().await;
    drop_test_db(&db_name).await;
}

// -----------------------------------------------------------------------
// Shutdown
// -----------------------------------------------------------------------

#[tokio::test]
async fn shutdown_aborts_inflight_generation_and_records_the_reason() {
    let (pool, db_name) = create_test_db().await;
    credits::purchase_credits(&pool, "user-1", 100, "top-up")
        .await
        .unwrap();

    let config = CoordinatorConfig {
        poll_interval: Duration::from_millis(50),
        max_polls: 200,
        ..test_config()
    };
    let coord = PlanCoordinator::new(
        pool.clone(),
        Arc::new(StuckWorkflow),
        Arc::new(CircuitBreaker::default()),
        config,
    );

    let plan = coord.submit(submission("user-1")).await.unwrap();
    coord.shutdown().await;

    let done = plans::get_plan_request(&pool, plan.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, PlanStatus::Failed);
    assert!(
        done.failure_reason.as_deref().unwrap().contains("shutdown"),
        "unexpected reason: {:?}",
        done.failure_reason
    );
    // An aborted run was never charged.
    assert_eq!(credits::get_balance(&pool, "user-1").await.unwrap(), 100);

    pool.close().await;
    drop_test_db(&db_name).await;
}
