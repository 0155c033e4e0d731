use {
    serde::{Deserialize, Serialize},
    sqlx::SqlitePool,
};

use timetable_metrics::{EventRecorder, MetricsHandle};

/// Table holding timetable entries.
pub const TABLE: &str = "timetable";

/// A stored timetable entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TimetableEntry {
    pub id: i64,
    pub class_name: String,
    pub day: String,
    pub start_time: String,
    pub end_time: String,
    pub subject: String,
}

/// Body of create and update requests. Missing fields deserialize as empty
/// strings and are reported by validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimetableInput {
    pub class_name: String,
    pub day: String,
    pub start_time: String,
    pub end_time: String,
    pub subject: String,
}

/// SQLite-backed timetable store. Every query is timed and the pool's
/// in-use connection count is published after each one.
pub struct TimetableStore {
    pool: SqlitePool,
    metrics: MetricsHandle,
    events: EventRecorder,
}

impl TimetableStore {
    pub fn new(pool: SqlitePool, metrics: MetricsHandle) -> Self {
        let events = metrics.events();
        Self {
            pool,
            metrics,
            events,
        }
    }

    /// Create the timetable table if it does not exist yet.
    pub async fn init(&self) -> sqlx::Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS timetable (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                class_name TEXT    NOT NULL,
                day        TEXT    NOT NULL,
                start_time TEXT    NOT NULL,
                end_time   TEXT    NOT NULL,
                subject    TEXT    NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent entries first.
    pub async fn list(&self, limit: i64) -> sqlx::Result<Vec<TimetableEntry>> {
        let rows = self
            .metrics
            .time_query("SELECT", TABLE)
            .run(|| {
                sqlx::query_as::<_, TimetableEntry>(
                    "SELECT * FROM timetable ORDER BY id DESC LIMIT ?",
                )
                .bind(limit)
                .fetch_all(&self.pool)
            })
            .await;
        self.publish_pool_usage();
        rows
    }

    pub async fn get(&self, id: i64) -> sqlx::Result<Option<TimetableEntry>> {
        let row = self
            .metrics
            .time_query("SELECT", TABLE)
            .run(|| {
                sqlx::query_as::<_, TimetableEntry>("SELECT * FROM timetable WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&self.pool)
            })
            .await;
        self.publish_pool_usage();
        row
    }

    /// Whether any entry already uses `class_name`.
    pub async fn class_exists(&self, class_name: &str) -> sqlx::Result<bool> {
        let found = self
            .metrics
            .time_query("SELECT", TABLE)
            .run(|| {
                sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM timetable WHERE class_name = ?",
                )
                .bind(class_name)
                .fetch_one(&self.pool)
            })
            .await;
        self.publish_pool_usage();
        Ok(found? > 0)
    }

    /// Insert a new entry and return it as stored.
    pub async fn insert(&self, input: &TimetableInput) -> sqlx::Result<TimetableEntry> {
        let inserted = self
            .metrics
            .time_query("INSERT", TABLE)
            .run(|| {
                sqlx::query(
                    "INSERT INTO timetable (class_name, day, start_time, end_time, subject)
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&input.class_name)
                .bind(&input.day)
                .bind(&input.start_time)
                .bind(&input.end_time)
                .bind(&input.subject)
                .execute(&self.pool)
            })
            .await;
        self.publish_pool_usage();
        let id = inserted?.last_insert_rowid();
        self.get(id).await?.ok_or(sqlx::Error::RowNotFound)
    }

    /// Replace every field of entry `id`. Returns `None` if it does not exist.
    pub async fn update(
        &self,
        id: i64,
        input: &TimetableInput,
    ) -> sqlx::Result<Option<TimetableEntry>> {
        let updated = self
            .metrics
            .time_query("UPDATE", TABLE)
            .run(|| {
                sqlx::query(
                    "UPDATE timetable
                     SET class_name = ?, day = ?, start_time = ?, end_time = ?, subject = ?
                     WHERE id = ?",
                )
                .bind(&input.class_name)
                .bind(&input.day)
                .bind(&input.start_time)
                .bind(&input.end_time)
                .bind(&input.subject)
                .bind(id)
                .execute(&self.pool)
            })
            .await;
        self.publish_pool_usage();
        if updated?.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(id).await
    }

    /// Delete entry `id`. Returns whether a row was removed.
    pub async fn delete(&self, id: i64) -> sqlx::Result<bool> {
        let deleted = self
            .metrics
            .time_query("DELETE", TABLE)
            .run(|| {
                sqlx::query("DELETE FROM timetable WHERE id = ?")
                    .bind(id)
                    .execute(&self.pool)
            })
            .await;
        self.publish_pool_usage();
        Ok(deleted?.rows_affected() > 0)
    }

    fn publish_pool_usage(&self) {
        let idle = u32::try_from(self.pool.num_idle()).unwrap_or(u32::MAX);
        self.events
            .set_active_connections(self.pool.size().saturating_sub(idle));
    }
}
