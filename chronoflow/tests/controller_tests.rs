//! Controller lifecycle tests
//!
//! Admission, cancellation, shutdown and accounting of queries driven by
//! scripted programs from `testutils::mock_program`.

#[path = "testutils/mod.rs"]
mod testutils;

use chronoflow::control::{ControlError, Controller, ControllerConfig, QueryContext, QueryState};
use chronoflow::execute::ExecutionError;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use testutils::fixtures::collect_results;
use testutils::mock_program::{Behavior, MockCompiler, MockProgram};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

fn controller(config: ControllerConfig) -> Controller {
    testutils::init_logging();
    Controller::new(config).expect("valid config")
}

/// Poll until query `id` satisfies `pred`
async fn wait_for_state<F>(controller: &Controller, id: u64, pred: F)
where
    F: Fn(QueryState) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let state = controller
                .queries()
                .into_iter()
                .find(|q| q.id == id)
                .map(|q| q.state);
            if state.map_or(false, &pred) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("query reached the expected state");
}

/// Poll until some query is waiting for a slot
async fn wait_for_queued(controller: &Controller) -> u64 {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(q) = controller
                .queries()
                .into_iter()
                .find(|q| q.state == QueryState::Queueing)
            {
                return q.id;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("a query was queued")
}

fn counter_value(controller: &Controller, name: &str, result: &str) -> f64 {
    controller
        .metrics_registry()
        .gather()
        .iter()
        .filter(|f| f.get_name() == name)
        .flat_map(|f| f.get_metric().iter())
        .filter(|m| {
            m.get_label()
                .iter()
                .any(|l| l.get_name() == "result" && l.get_value() == result)
        })
        .map(|m| m.get_counter().get_value())
        .sum()
}

fn gauge_total(controller: &Controller, name: &str) -> f64 {
    controller
        .metrics_registry()
        .gather()
        .iter()
        .filter(|f| f.get_name() == name)
        .flat_map(|f| f.get_metric().iter())
        .map(|m| m.get_gauge().get_value())
        .sum()
}

#[tokio::test]
async fn test_single_empty_result() {
    let controller = controller(ControllerConfig::default());
    let compiler = MockCompiler::behaving(Behavior::EmptyResult);

    let query = controller
        .query(&QueryContext::new(), &compiler)
        .await
        .expect("query admitted");
    assert_eq!(query.state(), QueryState::Executing);
    assert_eq!(controller.len(), 1);

    let mut results = query.results().expect("results available");
    assert!(query.results().is_none());
    let collected = collect_results(&mut results).await.unwrap();
    assert_eq!(collected.len(), 1);
    assert_eq!(collected[0].0, "_result");
    assert!(collected[0].1.is_empty());

    query.done();
    assert_eq!(query.state(), QueryState::Finished);
    assert!(query.err().is_none());
    assert!(controller.is_empty());
}

#[tokio::test]
async fn test_compile_error_leaves_no_entry() {
    let controller = controller(ControllerConfig::default());
    let compiler = MockCompiler::failing("boom");

    let err = controller
        .query(&QueryContext::new(), &compiler)
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::Compile(_)));
    assert!(err.to_string().contains("boom"));
    assert!(controller.is_empty());
    assert_eq!(
        counter_value(&controller, "chronoflow_qc_requests_total", "compile_error"),
        1.0
    );
}

#[tokio::test]
async fn test_cancel_blocked_query() {
    let controller = controller(ControllerConfig::default());
    let compiler = MockCompiler::behaving(Behavior::BlockUntilCanceled);

    let query = controller
        .query(&QueryContext::new(), &compiler)
        .await
        .unwrap();
    let mut results = query.results().unwrap();

    query.cancel();
    query.cancel();
    let _ = collect_results(&mut results).await;
    query.done();

    let state = query.state();
    assert!(state.is_terminal());
    assert!(matches!(state, QueryState::Canceled | QueryState::Finished));
    if state == QueryState::Canceled {
        assert_eq!(query.err(), Some(ControlError::Canceled));
    }
    assert!(controller.is_empty());
}

#[tokio::test]
async fn test_shutdown_without_queries() {
    let controller = controller(ControllerConfig::default());
    controller
        .shutdown(Duration::from_secs(1))
        .await
        .expect("nothing to drain");
    assert!(!controller.is_accepting());

    let err = controller
        .query(
            &QueryContext::new(),
            &MockCompiler::behaving(Behavior::EmptyResult),
        )
        .await
        .unwrap_err();
    assert_eq!(err, ControlError::ShuttingDown);
    assert!(controller.is_empty());
}

#[tokio::test]
async fn test_shutdown_deadline_exceeded() {
    let controller = controller(ControllerConfig::default());
    let gate = Arc::new(Notify::new());
    let compiler = MockCompiler::behaving(Behavior::BlockUntilReleased(Arc::clone(&gate)));

    let query = controller
        .query(&QueryContext::new(), &compiler)
        .await
        .unwrap();
    let mut results = query.results().unwrap();

    let err = controller
        .shutdown(Duration::from_millis(1))
        .await
        .unwrap_err();
    assert_eq!(err, ControlError::DeadlineExceeded);
    assert_eq!(query.state(), QueryState::Executing);

    gate.notify_one();
    let _ = collect_results(&mut results).await;
    wait_for_state(&controller, query.id(), |s| s.is_terminal()).await;
    assert_eq!(query.state(), QueryState::Canceled);

    controller
        .shutdown(Duration::from_secs(1))
        .await
        .expect("drained after release");
    query.done();
    assert!(controller.is_empty());
}

#[tokio::test]
async fn test_shutdown_drains_cancelable_queries() {
    let controller = controller(ControllerConfig::default());
    let mut handles = Vec::new();
    for _ in 0..3 {
        let compiler = MockCompiler::behaving(Behavior::BlockUntilCanceled);
        handles.push(
            controller
                .query(&QueryContext::new(), &compiler)
                .await
                .unwrap(),
        );
    }

    controller
        .shutdown(Duration::from_secs(5))
        .await
        .expect("every query observes cancellation");
    for handle in &handles {
        assert_eq!(handle.state(), QueryState::Canceled);
        handle.done();
    }
    assert!(controller.is_empty());
}

#[tokio::test]
async fn test_done_is_idempotent() {
    let controller = controller(ControllerConfig::default());
    let program = MockProgram::new(Behavior::Rows(10));
    let starts = program.starts();
    let query = controller
        .query(&QueryContext::new(), &MockCompiler::ok(program))
        .await
        .unwrap();
    let mut results = query.results().unwrap();
    let collected = collect_results(&mut results).await.unwrap();
    assert_eq!(collected[0].1[0].rows.len(), 10);

    query.done();
    let stats = query.statistics();
    query.done();
    query.done();
    assert_eq!(query.statistics(), stats);
    assert_eq!(query.state(), QueryState::Finished);
    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert!(controller.is_empty());

    assert!(stats.max_allocated > 0);
    assert_eq!(stats.concurrency, 1);
    assert!(stats.total_duration >= stats.execute_duration);
    assert_eq!(stats.metadata["program"], serde_json::json!("mock"));
}

#[tokio::test]
async fn test_execution_error_is_reported() {
    let controller = controller(ControllerConfig::default());
    let query = controller
        .query(
            &QueryContext::new(),
            &MockCompiler::behaving(Behavior::Fail("disk on fire".to_string())),
        )
        .await
        .unwrap();
    let mut results = query.results().unwrap();
    let collected = collect_results(&mut results).await.unwrap();
    assert!(collected.is_empty());

    query.done();
    assert_eq!(query.state(), QueryState::Errored);
    assert_eq!(
        query.err(),
        Some(ControlError::Execution(ExecutionError::RuntimeError(
            "disk on fire".to_string()
        )))
    );
}

#[tokio::test]
async fn test_start_error_is_runtime_error() {
    let controller = controller(ControllerConfig::default());
    let err = controller
        .query(
            &QueryContext::new(),
            &MockCompiler::behaving(Behavior::FailStart("no storage".to_string())),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::Start(_)));
    assert!(controller.is_empty());
    assert_eq!(
        counter_value(&controller, "chronoflow_qc_requests_total", "runtime_error"),
        1.0
    );
}

#[tokio::test]
async fn test_memory_quota_enforced() {
    let controller = controller(ControllerConfig::default().with_memory_quota(64));
    let query = controller
        .query(
            &QueryContext::new(),
            &MockCompiler::behaving(Behavior::Rows(1000)),
        )
        .await
        .unwrap();
    let mut results = query.results().unwrap();
    let _ = collect_results(&mut results).await;
    query.done();

    assert_eq!(query.state(), QueryState::Errored);
    assert!(matches!(
        query.err(),
        Some(ControlError::Execution(
            ExecutionError::MemoryLimitExceeded { limit: 64, .. }
        ))
    ));
}

#[tokio::test]
async fn test_queue_full() {
    let controller = controller(
        ControllerConfig::default()
            .with_concurrency_quota(1)
            .with_queue_size(0),
    );
    let gate = Arc::new(Notify::new());
    let running = controller
        .query(
            &QueryContext::new(),
            &MockCompiler::behaving(Behavior::BlockUntilReleased(Arc::clone(&gate))),
        )
        .await
        .unwrap();

    let err = controller
        .query(
            &QueryContext::new(),
            &MockCompiler::behaving(Behavior::EmptyResult),
        )
        .await
        .unwrap_err();
    assert_eq!(err, ControlError::QueueFull { size: 0 });
    assert_eq!(controller.len(), 1);
    assert_eq!(
        counter_value(&controller, "chronoflow_qc_requests_total", "queue_error"),
        1.0
    );

    gate.notify_one();
    let mut results = running.results().unwrap();
    let _ = collect_results(&mut results).await;
    running.done();
    assert_eq!(running.state(), QueryState::Finished);
}

#[tokio::test]
async fn test_queued_query_waits_for_slot() {
    let controller = controller(
        ControllerConfig::default()
            .with_concurrency_quota(1)
            .with_queue_size(1),
    );
    let gate = Arc::new(Notify::new());
    let first = controller
        .query(
            &QueryContext::new(),
            &MockCompiler::behaving(Behavior::BlockUntilReleased(Arc::clone(&gate))),
        )
        .await
        .unwrap();

    let waiter = controller.clone();
    let second = tokio::spawn(async move {
        waiter
            .query(
                &QueryContext::new(),
                &MockCompiler::behaving(Behavior::EmptyResult),
            )
            .await
    });
    let queued = wait_for_queued(&controller).await;
    assert_ne!(queued, first.id());

    gate.notify_one();
    let mut results = first.results().unwrap();
    let _ = collect_results(&mut results).await;
    first.done();

    let second = second.await.unwrap().expect("admitted once a slot freed");
    assert_eq!(second.id(), queued);
    assert!(second.statistics().queue_duration > Duration::ZERO);
    let mut results = second.results().unwrap();
    assert_eq!(collect_results(&mut results).await.unwrap().len(), 1);
    second.done();
    assert!(controller.is_empty());
}

#[tokio::test]
async fn test_cancel_while_queued() {
    let controller = controller(
        ControllerConfig::default()
            .with_concurrency_quota(1)
            .with_queue_size(4),
    );
    let gate = Arc::new(Notify::new());
    let first = controller
        .query(
            &QueryContext::new(),
            &MockCompiler::behaving(Behavior::BlockUntilReleased(Arc::clone(&gate))),
        )
        .await
        .unwrap();

    let token = CancellationToken::new();
    let ctx = QueryContext::new().with_cancel(token.clone());
    let waiter = controller.clone();
    let second = tokio::spawn(async move {
        waiter
            .query(&ctx, &MockCompiler::behaving(Behavior::EmptyResult))
            .await
    });
    wait_for_queued(&controller).await;
    token.cancel();

    let err = second.await.unwrap().unwrap_err();
    assert_eq!(err, ControlError::Canceled);
    assert_eq!(controller.len(), 1);

    gate.notify_one();
    first.done();
}

#[tokio::test]
async fn test_cancel_during_compile() {
    let controller = controller(ControllerConfig::default());
    let token = CancellationToken::new();
    let ctx = QueryContext::new().with_cancel(token.clone());

    let submitter = controller.clone();
    let pending = tokio::spawn(async move { submitter.query(&ctx, &MockCompiler::blocking()).await });
    tokio::time::timeout(Duration::from_secs(5), async {
        while controller.is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
    token.cancel();

    let err = pending.await.unwrap().unwrap_err();
    assert_eq!(err, ControlError::Canceled);
    assert!(controller.is_empty());
}

#[tokio::test]
async fn test_dropping_handle_finalizes() {
    let controller = controller(ControllerConfig::default());
    let query = controller
        .query(
            &QueryContext::new(),
            &MockCompiler::behaving(Behavior::BlockUntilCanceled),
        )
        .await
        .unwrap();
    assert_eq!(controller.len(), 1);
    drop(query);
    assert!(controller.is_empty());
}

#[tokio::test]
async fn test_query_ids_and_snapshot() {
    let controller = controller(ControllerConfig::default());
    let a = controller
        .query(
            &QueryContext::new(),
            &MockCompiler::behaving(Behavior::BlockUntilCanceled),
        )
        .await
        .unwrap();
    let b = controller
        .query(
            &QueryContext::new(),
            &MockCompiler::behaving(Behavior::BlockUntilCanceled),
        )
        .await
        .unwrap();
    assert!(b.id() > a.id());

    let infos = controller.queries();
    assert_eq!(infos.len(), 2);
    assert_eq!(infos[0].id, a.id());
    assert_eq!(infos[1].compiler_type, "mock");
    assert!(infos.iter().all(|q| q.state == QueryState::Executing));

    a.cancel();
    b.cancel();
    a.done();
    b.done();
}

#[tokio::test]
async fn test_metrics_follow_labels() {
    let controller = controller(
        ControllerConfig::default().with_metric_label_keys(vec!["org".to_string()]),
    );
    let ctx = QueryContext::new().with_label("org", "acme");
    let query = controller
        .query(&ctx, &MockCompiler::behaving(Behavior::EmptyResult))
        .await
        .unwrap();
    assert_eq!(gauge_total(&controller, "chronoflow_qc_all_active"), 1.0);
    assert_eq!(gauge_total(&controller, "chronoflow_qc_executing_active"), 1.0);

    let mut results = query.results().unwrap();
    let _ = collect_results(&mut results).await;
    query.done();

    assert_eq!(gauge_total(&controller, "chronoflow_qc_all_active"), 0.0);
    assert_eq!(gauge_total(&controller, "chronoflow_qc_executing_active"), 0.0);
    assert_eq!(gauge_total(&controller, "chronoflow_qc_compiling_active"), 0.0);
    assert_eq!(
        counter_value(&controller, "chronoflow_qc_requests_total", "success"),
        1.0
    );

    let families = controller.metrics_registry().gather();
    let requests = families
        .iter()
        .find(|f| f.get_name() == "chronoflow_qc_requests_total")
        .unwrap();
    assert!(requests.get_metric()[0]
        .get_label()
        .iter()
        .any(|l| l.get_name() == "org" && l.get_value() == "acme"));
}

#[test]
fn test_invalid_config_rejected() {
    let err = Controller::new(ControllerConfig::default().with_concurrency_quota(0)).unwrap_err();
    assert!(matches!(err, ControlError::InvalidConfig(_)));
}
