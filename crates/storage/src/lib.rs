use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{NewTask, Task, TaskId, TaskPatch, TaskQuery, TaskStatus, TASK_DATE_FORMAT};

const TASK_COLUMNS: &str = "id, title, description, date, assignee, status, report_note";

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to `sqlite::memory:` is its own database, so keep exactly one alive.
        let pool = if is_memory_url(database_url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(connect_options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(connect_options)
                .await?
        };
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_task(&self, task: &NewTask) -> Result<Task> {
        let id = TaskId(uuid::Uuid::new_v4().to_string());
        let date = task.date.format(TASK_DATE_FORMAT).to_string();
        sqlx::query(
            "INSERT INTO tasks (id, title, description, date, assignee, status)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id.as_str())
        .bind(&task.title)
        .bind(&task.description)
        .bind(&date)
        .bind(&task.assignee)
        .bind(TaskStatus::Incomplete.as_str())
        .execute(&self.pool)
        .await
        .context("failed to insert task")?;

        Ok(Task {
            id,
            title: task.title.clone(),
            description: task.description.clone(),
            date: task.date,
            assignee: task.assignee.clone(),
            status: TaskStatus::Incomplete,
            report_note: None,
        })
    }

    pub async fn get_task(&self, id: &TaskId) -> Result<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| task_from_row(&r)).transpose()
    }

    /// Field-level update; fields absent from the patch keep their stored value.
    /// Returns `None` when no task has this id.
    pub async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> Result<Option<Task>> {
        let result = sqlx::query(
            "UPDATE tasks SET
                title = COALESCE(?, title),
                description = COALESCE(?, description),
                status = COALESCE(?, status),
                report_note = COALESCE(?, report_note),
                updated_at = CURRENT_TIMESTAMP
             WHERE id = ?",
        )
        .bind(patch.title.as_deref())
        .bind(patch.description.as_deref())
        .bind(patch.status.map(TaskStatus::as_str))
        .bind(patch.report_note.as_deref())
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to update task {id}"))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_task(id).await
    }

    pub async fn delete_task(&self, id: &TaskId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to delete task {id}"))?;
        Ok(result.rows_affected() > 0)
    }

    /// Ordered by date, then creation order. Date bounds compare as text,
    /// which is calendar order for `yyyy-MM-dd`.
    pub async fn list_tasks(&self, query: &TaskQuery) -> Result<Vec<Task>> {
        let rows = match query {
            TaskQuery::All => {
                sqlx::query(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks ORDER BY date ASC, seq ASC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
            TaskQuery::Assignee { name } => {
                sqlx::query(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE assignee = ?
                     ORDER BY date ASC, seq ASC"
                ))
                .bind(name)
                .fetch_all(&self.pool)
                .await?
            }
            TaskQuery::DateRange { start, end } => {
                sqlx::query(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE date >= ? AND date <= ?
                     ORDER BY date ASC, seq ASC"
                ))
                .bind(start.format(TASK_DATE_FORMAT).to_string())
                .bind(end.format(TASK_DATE_FORMAT).to_string())
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(task_from_row).collect()
    }

    pub async fn set_credential(&self, email: &str, credential: &str) -> Result<()> {
        let email = normalize_email(email);
        sqlx::query(
            "INSERT INTO credentials (email, credential_hash) VALUES (?, ?)
             ON CONFLICT(email) DO UPDATE SET credential_hash = excluded.credential_hash,
                                              updated_at = CURRENT_TIMESTAMP",
        )
        .bind(&email)
        .bind(credential_hash(&email, credential))
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to store credential for {email}"))?;
        Ok(())
    }

    /// False both for a wrong credential and for an email with no credential at all.
    pub async fn verify_credential(&self, email: &str, credential: &str) -> Result<bool> {
        let email = normalize_email(email);
        let stored: Option<String> =
            sqlx::query_scalar("SELECT credential_hash FROM credentials WHERE email = ?")
                .bind(&email)
                .fetch_optional(&self.pool)
                .await?;
        Ok(stored.is_some_and(|hash| hash == credential_hash(&email, credential)))
    }
}

fn task_from_row(row: &SqliteRow) -> Result<Task> {
    let raw_date: String = row.try_get("date")?;
    let date = NaiveDate::parse_from_str(&raw_date, TASK_DATE_FORMAT)
        .with_context(|| format!("stored task has malformed date '{raw_date}'"))?;
    let raw_status: String = row.try_get("status")?;
    let status = raw_status
        .parse::<TaskStatus>()
        .map_err(|e| anyhow!("stored task has {e}"))?;
    Ok(Task {
        id: TaskId(row.try_get("id")?),
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        date,
        assignee: row.try_get("assignee")?,
        status,
        report_note: row.try_get("report_note")?,
    })
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn credential_hash(email: &str, credential: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(email.as_bytes());
    hasher.update(b":");
    hasher.update(credential.as_bytes());
    STANDARD.encode(hasher.finalize())
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.starts_with("sqlite::memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_memory_url(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
