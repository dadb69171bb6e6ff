//! The persistent flag queue.
//!
//! One row per flag, keyed by token. The submission cycle is the only
//! writer of `status` during a run; external producers insert new `QUEUED`
//! rows concurrently, which never conflicts with the cycle's read/update
//! pattern.

use std::str::FromStr;
use std::time::Duration;

use adfarm_model::{Flag, FlagStatus, SubmitResult};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use super::DbError;

/// Store for the flag queue.
#[derive(Clone)]
pub struct FlagStore {
    pool: PgPool,
}

impl FlagStore {
    /// Create a new flag store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a newly captured flag in `QUEUED` status.
    ///
    /// Tokens are unique: re-capturing a known flag is a no-op. Returns
    /// true if the flag was actually inserted.
    pub async fn enqueue(
        &self,
        token: &str,
        exploit: &str,
        target: &str,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            INSERT INTO flags (token, exploit, target, status)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (token) DO NOTHING
            "#,
        )
        .bind(token)
        .bind(exploit)
        .bind(target)
        .bind(FlagStatus::Queued.as_str())
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark every queued flag older than `lifetime` as skipped.
    ///
    /// Skipped is terminal; such flags never appear in a later fetch.
    /// Returns the number of flags transitioned.
    pub async fn expire_stale(&self, lifetime: Duration) -> Result<u64, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE flags
            SET status = $1
            WHERE status = $2
              AND enqueued_at < now() - make_interval(secs => $3)
            "#,
        )
        .bind(FlagStatus::Skipped.as_str())
        .bind(FlagStatus::Queued.as_str())
        .bind(lifetime.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(result.rows_affected())
    }

    /// Read all flags currently queued for submission.
    pub async fn fetch_queued(&self) -> Result<Vec<Flag>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT token, exploit, target, status, enqueued_at, response
            FROM flags
            WHERE status = $1
            ORDER BY enqueued_at
            "#,
        )
        .bind(FlagStatus::Queued.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)?;

        rows.iter()
            .map(decode_flag)
            .collect::<Result<Vec<_>, _>>()
            .map_err(DbError::Query)
    }

    /// Write back status and response text for a batch of results.
    pub async fn persist_results(&self, results: &[SubmitResult]) -> Result<(), DbError> {
        if results.is_empty() {
            return Ok(());
        }

        let mut tokens = Vec::with_capacity(results.len());
        let mut statuses = Vec::with_capacity(results.len());
        let mut responses = Vec::with_capacity(results.len());
        for result in results {
            tokens.push(result.token.clone());
            statuses.push(result.status.as_str().to_string());
            responses.push(result.response.clone());
        }

        sqlx::query(
            r#"
            UPDATE flags AS f
            SET status = u.status, response = u.response
            FROM UNNEST($1::text[], $2::text[], $3::text[]) AS u(token, status, response)
            WHERE f.token = u.token
            "#,
        )
        .bind(&tokens)
        .bind(&statuses)
        .bind(&responses)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(())
    }
}

fn decode_flag(row: &PgRow) -> Result<Flag, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status = FlagStatus::from_str(&status).map_err(|e| sqlx::Error::ColumnDecode {
        index: "status".to_string(),
        source: Box::new(e),
    })?;

    Ok(Flag {
        token: row.try_get("token")?,
        exploit: row.try_get("exploit")?,
        target: row.try_get("target")?,
        status,
        enqueued_at: row.try_get("enqueued_at")?,
        response: row.try_get("response")?,
    })
}
