//! Tables, plans and result collection for dataflow tests

use chronoflow::execute::{ExecutionError, QueryResult};
use chronoflow::plan::{PlanSpec, ProcedureSpec, SourceSpec, StaticTable};
use chronoflow::table::{
    ColMeta, ColReader, ColType, GroupKey, GroupKeyBuilder, Time, Value, DEFAULT_TIME_LABEL,
    DEFAULT_VALUE_LABEL,
};
use tokio::sync::mpsc;

/// Group key with a single `host` column
pub fn host_key(host: &str) -> GroupKey {
    GroupKeyBuilder::new()
        .add_string("host", host)
        .build()
        .expect("valid key")
}

/// `_time`, `host`, `_value` columns of the tables built by [`host_table`]
pub fn host_cols() -> Vec<ColMeta> {
    vec![
        ColMeta::new(DEFAULT_TIME_LABEL, ColType::Time),
        ColMeta::new("host", ColType::String),
        ColMeta::new(DEFAULT_VALUE_LABEL, ColType::Int),
    ]
}

/// Table keyed by `host` with one row per `(seconds, value)` pair
pub fn host_table(host: &str, rows: &[(i64, i64)]) -> StaticTable {
    let mut table = StaticTable::new(host_key(host), host_cols());
    for &(secs, value) in rows {
        table = table.with_row(vec![
            Value::Time(Time::from_secs(secs)),
            Value::String(host.to_string()),
            Value::Int(value),
        ]);
    }
    table
}

/// Tables with `n` rows each of random values for hosts `h0..h{hosts}`
pub fn random_tables(hosts: usize, n: usize) -> Vec<StaticTable> {
    (0..hosts)
        .map(|h| {
            let rows: Vec<(i64, i64)> = (0..n)
                .map(|i| (i as i64, fastrand::i64(-1000..1000)))
                .collect();
            host_table(&format!("h{}", h), &rows)
        })
        .collect()
}

/// Single static source `src` feeding whatever the caller connects
pub fn source_plan(tables: Vec<StaticTable>, emit_watermarks: bool) -> PlanSpec {
    let mut plan = PlanSpec::new();
    plan.add_node(
        "src",
        ProcedureSpec::Source(SourceSpec::Static {
            tables,
            emit_watermarks,
        }),
    )
    .expect("fresh plan");
    plan
}

/// A table as plain rows, for comparisons
#[derive(Debug, Clone, PartialEq)]
pub struct TableSnapshot {
    pub key: GroupKey,
    pub labels: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl TableSnapshot {
    pub fn column(&self, label: &str) -> Vec<Value> {
        let j = self
            .labels
            .iter()
            .position(|l| l == label)
            .expect("column present");
        self.rows.iter().map(|row| row[j].clone()).collect()
    }
}

pub fn snapshot(table: &dyn ColReader) -> TableSnapshot {
    let rows = (0..table.len())
        .map(|i| (0..table.cols().len()).map(|j| table.value(i, j)).collect())
        .collect();
    TableSnapshot {
        key: table.key().clone(),
        labels: table.cols().iter().map(|c| c.label.clone()).collect(),
        rows,
    }
}

/// Drain every result, returning `(name, tables)` in arrival order
pub async fn collect_results(
    results: &mut mpsc::Receiver<QueryResult>,
) -> Result<Vec<(String, Vec<TableSnapshot>)>, ExecutionError> {
    let mut collected = Vec::new();
    while let Some(mut result) = results.recv().await {
        let mut tables = Vec::new();
        result
            .tables()
            .for_each(|table| {
                tables.push(snapshot(table));
                Ok(())
            })
            .await?;
        collected.push((result.name().to_string(), tables));
    }
    Ok(collected)
}
