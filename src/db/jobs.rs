//! Job store: durable job identity, cursor, counters and status.

use crate::error::{DatabaseError, JobError};
use crate::types::{Job, JobConfig, JobId, JobPatch, JobStats, JobStatus};
use crate::{Error, Result};
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite};

use super::{Database, JobRow};

/// Upper bound on id collisions tolerated for one creation call
const MAX_ID_ATTEMPTS: i64 = 1_000;

const JOB_COLUMNS: &str = r#"
    id, source_id, status, cursor, total_items_seen, processed_items,
    error_count, last_error, started_at, completed_at, config
"#;

impl Database {
    /// Create a new pending job for `source_id`
    ///
    /// The id is `{source_id}_{unix_millis}`; when another job already holds that id
    /// the millisecond component is bumped until it is unique.
    pub async fn create_job(&self, source_id: &str, config: &JobConfig) -> Result<Job> {
        let now = Utc::now();
        let config_json = serde_json::to_string(config)?;
        let base_millis = now.timestamp_millis();

        for offset in 0..MAX_ID_ATTEMPTS {
            let id = JobId::for_source(source_id, base_millis + offset);

            let result = sqlx::query(
                r#"
                INSERT INTO ingest_jobs (id, source_id, status, cursor, started_at, config)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO NOTHING
                "#,
            )
            .bind(&id)
            .bind(source_id)
            .bind(JobStatus::Pending.as_str())
            .bind(config.start_offset)
            .bind(now.timestamp())
            .bind(&config_json)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to insert job: {}",
                    e
                )))
            })?;

            if result.rows_affected() == 1 {
                return self
                    .get_job(&id)
                    .await?
                    .ok_or_else(|| Error::Job(JobError::NotFound { id: id.0.clone() }));
            }
        }

        Err(Error::Database(DatabaseError::QueryFailed(format!(
            "Failed to allocate a unique job id for {}",
            source_id
        ))))
    }

    /// Get a job by ID
    pub async fn get_job(&self, id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM ingest_jobs WHERE id = ?",
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get job: {}",
                e
            )))
        })?;

        row.map(Job::try_from).transpose()
    }

    /// Most recent non-terminal job for `source_id`
    ///
    /// Ties on `started_at` are broken by insertion order, newest first.
    pub async fn find_resumable_job(&self, source_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {} FROM ingest_jobs
            WHERE source_id = ? AND status IN ('pending', 'running', 'paused')
            ORDER BY started_at DESC, seq DESC
            LIMIT 1
            "#,
            JOB_COLUMNS
        ))
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to find resumable job: {}",
                e
            )))
        })?;

        row.map(Job::try_from).transpose()
    }

    /// Apply a sparse patch and return the updated job
    ///
    /// An empty patch returns the current record unchanged. Terminal jobs reject
    /// every patch with [`JobError::InvalidState`].
    pub async fn update_job(&self, id: &JobId, patch: &JobPatch) -> Result<Job> {
        let current = self
            .get_job(id)
            .await?
            .ok_or_else(|| Error::Job(JobError::NotFound { id: id.0.clone() }))?;

        if current.status.is_terminal() {
            return Err(terminal_error(&current));
        }
        if patch.is_empty() {
            return Ok(current);
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE ingest_jobs SET ");
        {
            let mut sets = qb.separated(", ");
            if let Some(status) = patch.status {
                sets.push("status = ").push_bind_unseparated(status.as_str());
            }
            if let Some(cursor) = patch.cursor {
                sets.push("cursor = ").push_bind_unseparated(cursor);
            }
            if let Some(total) = patch.total_items_seen {
                sets.push("total_items_seen = ")
                    .push_bind_unseparated(total as i64);
            }
            if let Some(processed) = patch.processed_items {
                sets.push("processed_items = ")
                    .push_bind_unseparated(processed as i64);
            }
            if let Some(errors) = patch.error_count {
                sets.push("error_count = ").push_bind_unseparated(errors as i64);
            }
            if let Some(last_error) = &patch.last_error {
                sets.push("last_error = ")
                    .push_bind_unseparated(last_error.clone());
            }
            if let Some(completed_at) = patch.completed_at {
                sets.push("completed_at = ")
                    .push_bind_unseparated(completed_at.timestamp());
            }
        }
        qb.push(" WHERE id = ")
            .push_bind(id.0.clone())
            .push(" AND status NOT IN ('completed', 'failed')");

        let result = qb.build().execute(&self.pool).await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update job: {}",
                e
            )))
        })?;

        let updated = self
            .get_job(id)
            .await?
            .ok_or_else(|| Error::Job(JobError::NotFound { id: id.0.clone() }))?;

        // Another writer finalized the job between our read and write
        if result.rows_affected() == 0 {
            return Err(terminal_error(&updated));
        }

        Ok(updated)
    }

    /// Job record plus derived duration and progress
    pub async fn job_stats(&self, id: &JobId) -> Result<Option<JobStats>> {
        let now = Utc::now();
        Ok(self
            .get_job(id)
            .await?
            .map(|job| JobStats::from_job(job, now)))
    }

    /// Jobs for `source_id`, newest first
    pub async fn list_jobs(&self, source_id: &str, limit: u32) -> Result<Vec<JobStats>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {} FROM ingest_jobs
            WHERE source_id = ?
            ORDER BY started_at DESC, seq DESC
            LIMIT ?
            "#,
            JOB_COLUMNS
        ))
        .bind(source_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list jobs: {}",
                e
            )))
        })?;

        let now = Utc::now();
        rows.into_iter()
            .map(|row| Job::try_from(row).map(|job| JobStats::from_job(job, now)))
            .collect()
    }

    /// Move jobs left `running` by an unclean exit to `paused`
    ///
    /// Returns the number of jobs touched.
    pub async fn mark_interrupted_jobs(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE ingest_jobs SET status = 'paused', last_error = ? WHERE status = 'running'",
        )
        .bind("interrupted: process exited while running")
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark interrupted jobs: {}",
                e
            )))
        })?;

        Ok(result.rows_affected())
    }
}

fn terminal_error(job: &Job) -> Error {
    Error::Job(JobError::InvalidState {
        id: job.id.0.clone(),
        operation: "update".into(),
        current_state: job.status.as_str().into(),
    })
}
