//! Phased index rebuild
//!
//! Building the same index on a partitioned parent and its partitions in
//! parallel makes Postgres generate conflicting child index names
//! (`duplicate key value violates unique constraint`). The barrier therefore
//! runs one segment at a time, in order, and only parallelizes across the
//! indices of a single segment. A failed build is logged and reported but
//! never stops the remaining builds or segments.

use futures::future::join_all;
use tracing::{info, instrument, warn};

use super::catalog::{IndexKind, IndexLayout, IndexPlan, Segment};
use crate::db::SqlExecutor;
use crate::sql::Identifier;

/// An index build that did not complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFailure {
    /// `"<key>@<segment table>"`
    pub entry: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BarrierReport {
    /// `"<key>@<segment table>"` per successful build, in completion order
    /// within a segment and segment order across segments.
    pub built: Vec<String>,
    pub failed: Vec<IndexFailure>,
    pub attempted: usize,
}

impl BarrierReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub fn idx_entry(kind: IndexKind, table: &Identifier) -> String {
    format!("{}@{}", kind.key(), table.as_str())
}

#[derive(Debug, Clone)]
pub struct IndexBuildBarrier {
    segments: Vec<Segment>,
    layout: IndexLayout,
}

impl IndexBuildBarrier {
    pub fn new(layout: IndexLayout) -> Self {
        Self::with_segments(layout, Segment::default_order())
    }

    pub fn with_segments(layout: IndexLayout, segments: Vec<Segment>) -> Self {
        Self { segments, layout }
    }

    /// Total number of builds one run issues.
    pub fn planned(&self) -> usize {
        self.segments
            .iter()
            .map(|segment| IndexPlan::for_segment(self.layout, segment.clone()).len())
            .sum()
    }

    #[instrument(skip_all, fields(table = %base_table, layout = ?self.layout))]
    pub async fn run(
        &self,
        executor: &dyn SqlExecutor,
        schema: &Identifier,
        base_table: &Identifier,
    ) -> BarrierReport {
        let mut report = BarrierReport::default();

        for segment in &self.segments {
            let plan = IndexPlan::for_segment(self.layout, segment.clone());

            let table = match segment.table_for(base_table) {
                Ok(table) => table,
                Err(e) => {
                    warn!(segment = %segment, error = %e, "Segment table name rejected");
                    report.attempted += plan.len();
                    report.failed.extend(plan.indices.iter().map(|kind| IndexFailure {
                        entry: format!("{}@{}_{}", kind.key(), base_table, segment),
                        reason: e.to_string(),
                    }));
                    continue;
                }
            };

            let builds = plan
                .indices
                .iter()
                .map(|kind| Self::build(executor, schema, &table, *kind));
            let results = join_all(builds).await;

            report.attempted += results.len();
            for result in results {
                match result {
                    Ok(entry) => report.built.push(entry),
                    Err(failure) => report.failed.push(failure),
                }
            }

            info!(
                segment = %segment,
                table = %table,
                built = report.built.len(),
                failed = report.failed.len(),
                "Index segment complete"
            );
        }

        report
    }

    async fn build(
        executor: &dyn SqlExecutor,
        schema: &Identifier,
        table: &Identifier,
        kind: IndexKind,
    ) -> Result<String, IndexFailure> {
        let entry = idx_entry(kind, table);

        let statement = kind.statement(schema, table).map_err(|e| IndexFailure {
            entry: entry.clone(),
            reason: e.to_string(),
        })?;

        match executor.execute(&statement).await {
            Ok(_) => {
                info!(index = %entry, "Index created");
                Ok(entry)
            }
            Err(e) => {
                warn!(index = %entry, error = %e, "Index creation failed");
                Err(IndexFailure {
                    entry,
                    reason: e.to_string(),
                })
            }
        }
    }
}
