use std::sync::Arc;

use timetable_metrics::{EventRecorder, MetricsHandle};

use crate::{cache::ScheduleCache, error::ApiError, store::TimetableStore};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<TimetableStore>,
    pub cache: Arc<ScheduleCache>,
    pub metrics: MetricsHandle,
    pub events: EventRecorder,
}

impl AppState {
    pub fn new(store: TimetableStore, cache: ScheduleCache, metrics: MetricsHandle) -> Self {
        let events = metrics.events();
        Self {
            store: Arc::new(store),
            cache: Arc::new(cache),
            metrics,
            events,
        }
    }

    /// Count a failed query as an application error and wrap it.
    pub(crate) fn database_error(&self, err: sqlx::Error) -> ApiError {
        self.events.record_error("database");
        ApiError::Database(err)
    }
}
