//! CRUD routes for timetable entries.

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    routing::get,
};

use {timetable_metrics::BusinessEvent, tracing::debug};

use crate::{
    error::ApiError,
    state::AppState,
    store::{TimetableEntry, TimetableInput},
    validation::validate,
};

/// Maximum number of entries returned by the list endpoint.
const LIST_LIMIT: i64 = 100;

pub fn timetable_router() -> Router<AppState> {
    Router::new()
        .route("/api/timetable", get(list_entries).post(create_entry))
        .route(
            "/api/timetable/{id}",
            get(get_entry).put(update_entry).delete(delete_entry),
        )
}

/// Record every violation and turn a non-empty list into a 400.
fn reject_invalid(state: &AppState, input: &TimetableInput) -> Result<(), ApiError> {
    let issues = validate(input);
    if issues.is_empty() {
        return Ok(());
    }
    for issue in &issues {
        state.events.record_validation_error(issue.field, issue.rule);
    }
    debug!(issues = issues.len(), "rejecting invalid timetable input");
    Err(ApiError::Validation(issues))
}

async fn list_entries(State(state): State<AppState>) -> Result<Json<Vec<TimetableEntry>>, ApiError> {
    let entries = state
        .store
        .list(LIST_LIMIT)
        .await
        .map_err(|e| state.database_error(e))?;
    Ok(Json(entries))
}

async fn create_entry(
    State(state): State<AppState>,
    payload: Result<Json<TimetableInput>, JsonRejection>,
) -> Result<(StatusCode, Json<TimetableEntry>), ApiError> {
    let failed = || {
        state
            .events
            .record_business(BusinessEvent::TimelineCreated { status: "failure" });
    };

    let input = match payload {
        Ok(Json(input)) => input,
        Err(rejection) => {
            failed();
            return Err(rejection.into());
        },
    };
    if let Err(e) = reject_invalid(&state, &input) {
        failed();
        return Err(e);
    }
    let stored = match state.store.class_exists(&input.class_name).await {
        Ok(known) => state.store.insert(&input).await.map(|entry| (entry, known)),
        Err(e) => Err(e),
    };
    let (entry, known_class) = match stored {
        Ok(stored) => stored,
        Err(e) => {
            failed();
            return Err(state.database_error(e));
        },
    };

    let events = &state.events;
    events.record_business(BusinessEvent::TimelineCreated { status: "success" });
    if !known_class {
        events.record_business(BusinessEvent::ClassCreated);
    }
    events.record_business(BusinessEvent::EventScheduled { kind: "lesson" });
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn get_entry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<TimetableEntry>, ApiError> {
    // Taken before the store read so a racing invalidation wins.
    let generation = state.cache.generation();
    if let Some(entry) = state.cache.get(id) {
        return Ok(Json(entry));
    }
    let entry = state
        .store
        .get(id)
        .await
        .map_err(|e| state.database_error(e))?
        .ok_or(ApiError::NotFound)?;
    state.cache.insert(entry.clone(), generation);
    Ok(Json(entry))
}

async fn update_entry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    payload: Result<Json<TimetableInput>, JsonRejection>,
) -> Result<Json<TimetableEntry>, ApiError> {
    let Json(input) = payload?;
    reject_invalid(&state, &input)?;
    let entry = state
        .store
        .update(id, &input)
        .await
        .map_err(|e| state.database_error(e))?
        .ok_or(ApiError::NotFound)?;
    state.cache.invalidate(id);

    state.events.record_business(BusinessEvent::TimelineUpdated);
    state
        .events
        .record_business(BusinessEvent::EventScheduled { kind: "reschedule" });
    Ok(Json(entry))
}

async fn delete_entry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let removed = state
        .store
        .delete(id)
        .await
        .map_err(|e| state.database_error(e))?;
    state.cache.invalidate(id);
    if removed {
        state.events.record_business(BusinessEvent::TimelineDeleted);
    }
    Ok(StatusCode::NO_CONTENT)
}
