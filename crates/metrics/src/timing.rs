//! Timing wrapper for database operations.
//!
//! ```rust,ignore
//! let rows = handle
//!     .time_query("SELECT", "timetable")
//!     .run(|| sqlx::query("SELECT * FROM timetable").fetch_all(&pool))
//!     .await?;
//! ```

use std::{future::Future, sync::Arc, time::Instant};

use tracing::warn;

use crate::{
    definitions::{db, labels},
    registry::MetricsRegistry,
};

/// Outcome label recorded in `db_queries_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    Success,
    Error,
}

impl QueryOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Single-use timer for one unit of work against `table`.
#[must_use = "a timed operation records nothing until `run` is awaited"]
pub struct TimedOperation {
    registry: Option<Arc<MetricsRegistry>>,
    operation: String,
    table: String,
}

impl TimedOperation {
    pub fn new(
        registry: Arc<MetricsRegistry>,
        operation: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            registry: Some(registry),
            operation: operation.into(),
            table: table.into(),
        }
    }

    /// A timer that runs the work without recording anything.
    pub fn disabled() -> Self {
        Self {
            registry: None,
            operation: String::new(),
            table: String::new(),
        }
    }

    /// Invoke `work` and record its duration and outcome.
    ///
    /// The result is handed back untouched: `Ok` values and errors reach the
    /// caller exactly as `work` produced them. If the returned future is
    /// dropped before completion the query is recorded as an error.
    pub async fn run<F, Fut, T, E>(self, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut guard = OutcomeGuard {
            operation: self,
            start: Instant::now(),
            outcome: QueryOutcome::Error,
        };
        let result = work().await;
        if result.is_ok() {
            guard.outcome = QueryOutcome::Success;
        }
        drop(guard);
        result
    }

    fn record(&self, elapsed_seconds: f64, outcome: QueryOutcome) {
        let Some(registry) = &self.registry else {
            return;
        };
        let op = self.operation.as_str();
        let table = self.table.as_str();

        let duration = registry
            .histogram(db::QUERY_DURATION_SECONDS)
            .and_then(|h| h.observe(&[(labels::OPERATION, op), (labels::TABLE, table)], elapsed_seconds));
        let total = registry.counter(db::QUERIES_TOTAL).and_then(|c| {
            c.inc(&[
                (labels::OPERATION, op),
                (labels::TABLE, table),
                (labels::STATUS, outcome.as_str()),
            ])
        });
        for err in [duration.err(), total.err()].into_iter().flatten() {
            warn!(operation = op, table, error = %err, "failed to record query metrics");
        }
    }
}

/// Records on drop so cancellation is accounted for as well as completion.
struct OutcomeGuard {
    operation: TimedOperation,
    start: Instant,
    outcome: QueryOutcome,
}

impl Drop for OutcomeGuard {
    fn drop(&mut self) {
        self.operation
            .record(self.start.elapsed().as_secs_f64(), self.outcome);
    }
}
