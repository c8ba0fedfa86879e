//! SQLite-backed `TaskStore` implementation.

use std::path::PathBuf;

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use tokio::sync::Mutex;

use crate::model::{DownloadRequest, TaskId, TaskRecord, TaskState};

fn state_to_str(state: TaskState) -> &'static str {
    match state {
        TaskState::Queued => "queued",
        TaskState::Scheduled => "scheduled",
        TaskState::Pending => "pending",
        TaskState::Downloading => "downloading",
        TaskState::Paused => "paused",
        TaskState::Completed => "completed",
        TaskState::Failed => "failed",
        TaskState::Canceled => "canceled",
    }
}

fn state_from_str(s: &str) -> Result<TaskState> {
    Ok(match s {
        "queued" => TaskState::Queued,
        "scheduled" => TaskState::Scheduled,
        "pending" => TaskState::Pending,
        "downloading" => TaskState::Downloading,
        "paused" => TaskState::Paused,
        "completed" => TaskState::Completed,
        "failed" => TaskState::Failed,
        "canceled" => TaskState::Canceled,
        other => anyhow::bail!("unknown task state in store: {other}"),
    })
}

/// Handle to the SQLite-backed task database.
///
/// Stored at `~/.local/state/dlkit/tasks.db` by default. A single
/// `save_lock` serialises all mutating calls per the store contract so
/// concurrent `save`s never interleave within one record.
#[derive(Clone)]
pub struct TaskStore {
    pool: Pool<Sqlite>,
    save_lock: Arc<Mutex<()>>,
}

impl TaskStore {
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("dlkit")?;
        let state_dir = xdg_dirs.get_state_home();
        tokio::fs::create_dir_all(&state_dir).await?;
        let db_path: PathBuf = state_dir.join("tasks.db");
        let uri = format!("sqlite://{}?mode=rwc", db_path.display());
        Self::open_uri(&uri).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        Self::open_uri("sqlite::memory:").await
    }

    async fn open_uri(uri: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(if uri.contains(":memory:") { 1 } else { 8 })
            .connect(uri)
            .await
            .with_context(|| format!("opening task store at {uri}"))?;
        let store = Self {
            pool,
            save_lock: Arc::new(Mutex::new(())),
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                task_id TEXT PRIMARY KEY,
                request TEXT NOT NULL,
                output_path TEXT,
                state TEXT NOT NULL,
                total_bytes INTEGER NOT NULL,
                error TEXT,
                segments TEXT,
                source_type TEXT,
                source_resume_state TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                preempted INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_state ON tasks(state)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Upsert by `task_id`.
    pub async fn save(&self, record: &TaskRecord) -> Result<()> {
        let _guard = self.save_lock.lock().await;
        let request_json = serde_json::to_string(&record.request)?;
        let segments_json = record
            .segments
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let resume_json = record
            .source_resume_state
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let output_path = record.output_path.as_ref().map(|p| p.display().to_string());

        sqlx::query(
            r#"
            INSERT INTO tasks
                (task_id, request, output_path, state, total_bytes, error, segments,
                 source_type, source_resume_state, created_at, updated_at, preempted)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(task_id) DO UPDATE SET
                request = excluded.request,
                output_path = excluded.output_path,
                state = excluded.state,
                total_bytes = excluded.total_bytes,
                error = excluded.error,
                segments = excluded.segments,
                source_type = excluded.source_type,
                source_resume_state = excluded.source_resume_state,
                updated_at = excluded.updated_at,
                preempted = excluded.preempted
            "#,
        )
        .bind(&record.task_id)
        .bind(request_json)
        .bind(output_path)
        .bind(state_to_str(record.state))
        .bind(record.total_bytes)
        .bind(&record.error)
        .bind(segments_json)
        .bind(&record.source_type)
        .bind(resume_json)
        .bind(record.created_at as i64)
        .bind(record.updated_at as i64)
        .bind(record.preempted as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE task_id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_record(&r)).transpose()
    }

    pub async fn load_all(&self) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query("SELECT * FROM tasks").fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }

    pub async fn remove(&self, task_id: &str) -> Result<()> {
        let _guard = self.save_lock.lock().await;
        sqlx::query("DELETE FROM tasks WHERE task_id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<TaskRecord> {
    let task_id: TaskId = row.try_get("task_id")?;
    let request_json: String = row.try_get("request")?;
    let request: DownloadRequest = serde_json::from_str(&request_json)?;
    let output_path: Option<String> = row.try_get("output_path")?;
    let state_str: String = row.try_get("state")?;
    let segments_json: Option<String> = row.try_get("segments")?;
    let resume_json: Option<String> = row.try_get("source_resume_state")?;
    let created_at: i64 = row.try_get("created_at")?;
    let updated_at: i64 = row.try_get("updated_at")?;
    let preempted: i64 = row.try_get("preempted")?;

    Ok(TaskRecord {
        task_id,
        request,
        output_path: output_path.map(PathBuf::from),
        state: state_from_str(&state_str)?,
        total_bytes: row.try_get("total_bytes")?,
        error: row.try_get("error")?,
        segments: segments_json.map(|s| serde_json::from_str(&s)).transpose()?,
        source_type: row.try_get("source_type")?,
        source_resume_state: resume_json.map(|s| serde_json::from_str(&s)).transpose()?,
        created_at: created_at as u64,
        updated_at: updated_at as u64,
        preempted: preempted != 0,
    })
}
