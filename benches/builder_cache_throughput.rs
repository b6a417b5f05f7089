/// Benchmark for per-group-key table building
///
/// Measures how fast a TableBuilderCache absorbs rows spread over many group
/// keys, and how fast a union stage driven through its transport emits them.

use chronoflow::execute::{
    AccumulationMode, Dataset, DatasetId, TableBuilderCache, TransformationHandle, TriggerSpec,
};
use chronoflow::execute::stages::UnionTransformation;
use chronoflow::memory::Allocator;
use chronoflow::table::{ColListTableBuilder, ColMeta, ColType, GroupKey, GroupKeyBuilder, Time};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

fn keys(n: usize) -> Vec<GroupKey> {
    (0..n)
        .map(|i| {
            GroupKeyBuilder::new()
                .add_string("host", &format!("host-{:04}", i))
                .build()
                .expect("valid key")
        })
        .collect()
}

fn main() {
    println!("=== Builder Cache Throughput Benchmark ===\n");

    let alloc = Arc::new(Allocator::unlimited());
    let group_keys = keys(256);
    let rows = 500_000;

    // Benchmark: random row routing into per-key builders
    println!("📊 Benchmark: TableBuilderCache - Random Key Appends");
    let mut cache = TableBuilderCache::new(Arc::clone(&alloc));
    let start = Instant::now();
    for i in 0..rows {
        let key = &group_keys[fastrand::usize(..group_keys.len())];
        let (builder, created) = cache.table_builder(key).expect("open key");
        if created {
            builder
                .add_col(ColMeta::new("_time", ColType::Time))
                .expect("fresh column");
            builder
                .add_col(ColMeta::new("_value", ColType::Float))
                .expect("fresh column");
        }
        builder
            .append_time(0, Time::from_secs(i as i64))
            .expect("time column");
        builder
            .append_float(1, fastrand::f64())
            .expect("float column");
    }
    let duration = start.elapsed();
    println!("  Rows: {}", rows);
    println!("  Keys: {}", cache.len());
    println!("  Time: {:?}", duration);
    println!(
        "  Throughput: {:.0} rows/sec",
        rows as f64 / duration.as_secs_f64()
    );
    println!();

    // Benchmark: materializing every key
    println!("📊 Benchmark: TableBuilderCache - Materialize Tables");
    let start = Instant::now();
    let mut bytes = 0;
    for key in cache.keys() {
        let chunk = cache.table(&key).expect("known key");
        bytes += chunk.size_bytes();
        chunk.release();
    }
    let duration = start.elapsed();
    println!("  Tables: {}", cache.len());
    println!("  Bytes: {}", bytes);
    println!("  Time: {:?}", duration);
    println!();

    // Benchmark: union stage through its transport
    println!("📊 Benchmark: Union Stage - Chunk Processing");
    let parent = DatasetId::from_node_id("bench-source");
    let mut builder_cache = TableBuilderCache::new(Arc::clone(&alloc));
    builder_cache.set_trigger_spec(TriggerSpec::OnFinish);
    let dataset = Dataset::new(
        DatasetId::from_node_id("bench-union"),
        AccumulationMode::Discarding,
        builder_cache,
        CancellationToken::new(),
    );
    let union = TransformationHandle::new(
        "union",
        &[parent],
        Box::new(UnionTransformation::new(dataset)),
    );

    let chunks = 20_000;
    let start = Instant::now();
    for i in 0..chunks {
        let key = group_keys[i % group_keys.len()].clone();
        let mut builder = ColListTableBuilder::new(key, Arc::clone(&alloc));
        builder
            .add_col(ColMeta::new("_value", ColType::Int))
            .expect("fresh column");
        for v in 0..32 {
            builder.append_int(0, v).expect("int column");
        }
        let chunk = builder.take_table().expect("chunk");
        union.process(parent, &chunk).expect("processed");
        chunk.release();
    }
    union.finish(parent, None);
    let duration = start.elapsed();
    println!("  Chunks: {}", chunks);
    println!("  Time: {:?}", duration);
    println!(
        "  Throughput: {:.0} chunks/sec",
        chunks as f64 / duration.as_secs_f64()
    );
    println!("  Peak memory: {}", alloc.stats().format_human_readable());
    println!();

    println!("=== Benchmark Complete ===");
}
