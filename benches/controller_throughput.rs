/// Benchmark for controller admission and execution
///
/// Measures end-to-end queries per second for small static plans, run
/// sequentially and with many concurrent submitters.

use chronoflow::control::{Controller, ControllerConfig, PlanCompiler, QueryContext};
use chronoflow::execute::ProcedureRegistry;
use chronoflow::plan::{AggregateKind, PlanSpec, ProcedureSpec, SourceSpec, StageSpec, StaticTable};
use chronoflow::table::{ColMeta, ColType, GroupKeyBuilder, Time, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn plan(hosts: usize, rows: usize) -> PlanSpec {
    let tables = (0..hosts)
        .map(|h| {
            let host = format!("host-{}", h);
            let key = GroupKeyBuilder::new()
                .add_string("host", &host)
                .build()
                .expect("valid key");
            let mut table = StaticTable::new(
                key,
                vec![
                    ColMeta::new("_time", ColType::Time),
                    ColMeta::new("host", ColType::String),
                    ColMeta::new("_value", ColType::Float),
                ],
            );
            for i in 0..rows {
                table = table.with_row(vec![
                    Value::Time(Time::from_secs(i as i64)),
                    Value::String(host.clone()),
                    Value::Float(fastrand::f64()),
                ]);
            }
            table
        })
        .collect();

    let mut plan = PlanSpec::new();
    plan.add_node(
        "src",
        ProcedureSpec::Source(SourceSpec::Static {
            tables,
            emit_watermarks: true,
        }),
    )
    .expect("fresh plan");
    plan.add_node(
        "mean",
        ProcedureSpec::Stage(StageSpec::Aggregate {
            kind: AggregateKind::Mean,
            column: "_value".to_string(),
        }),
    )
    .expect("fresh node");
    plan.connect("src", "mean").expect("known nodes");
    plan
}

async fn run_one(controller: &Controller, compiler: &PlanCompiler) -> usize {
    let query = controller
        .query(&QueryContext::new(), compiler)
        .await
        .expect("admitted");
    let mut tables = 0;
    if let Some(mut results) = query.results() {
        while let Some(mut result) = results.recv().await {
            tables += result.tables().drain().await.expect("no execution error");
        }
    }
    query.done();
    tables
}

fn main() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("tokio runtime");

    println!("=== Controller Throughput Benchmark ===\n");

    let registry = Arc::new(ProcedureRegistry::new());
    let compiler = Arc::new(PlanCompiler::new(plan(16, 64), registry));

    runtime.block_on(async {
        // Benchmark: one query at a time
        println!("📊 Benchmark: Sequential Queries");
        let controller = Controller::new(ControllerConfig::default()).expect("valid config");
        let iterations = 500;
        let start = Instant::now();
        let mut tables = 0;
        for _ in 0..iterations {
            tables += run_one(&controller, &compiler).await;
        }
        let duration = start.elapsed();
        println!("  Queries: {}", iterations);
        println!("  Tables: {}", tables);
        println!("  Time: {:?}", duration);
        println!(
            "  Throughput: {:.0} queries/sec",
            iterations as f64 / duration.as_secs_f64()
        );
        println!();

        // Benchmark: concurrent submitters contending for slots
        println!("📊 Benchmark: Concurrent Queries (quota 4)");
        let controller = Controller::new(
            ControllerConfig::default()
                .with_concurrency_quota(4)
                .with_queue_size(1024),
        )
        .expect("valid config");
        let submitters = 32;
        let per_submitter = 25;
        let start = Instant::now();
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..submitters {
            let controller = controller.clone();
            let compiler = Arc::clone(&compiler);
            tasks.spawn(async move {
                for _ in 0..per_submitter {
                    run_one(&controller, &compiler).await;
                }
            });
        }
        while tasks.join_next().await.is_some() {}
        let duration = start.elapsed();
        let total = submitters * per_submitter;
        println!("  Queries: {}", total);
        println!("  Time: {:?}", duration);
        println!(
            "  Throughput: {:.0} queries/sec",
            total as f64 / duration.as_secs_f64()
        );
        println!();

        controller
            .shutdown(Duration::from_secs(5))
            .await
            .expect("drained");
    });

    println!("=== Benchmark Complete ===");
}
