//! PostgreSQL storage backend.
//!
//! Feature-gated behind `postgres-backend` (on by default). Uses `sqlx` with
//! the Tokio/rustls runtime for fully async operations.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use orc_core::{AuditLogEntry, AuthorizationMode, DomainPolicy, Job, JobStatus, JobType, Priority, Strategy};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{StorageBackend, StorageError};

/// A storage backend backed by PostgreSQL. Thread-safe via `PgPool`.
#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresBackend").field("pool", &"[PgPool]").finish_non_exhaustive()
    }
}

impl PostgresBackend {
    /// Connect to PostgreSQL and run the initial migration.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if the connection or migration fails.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Open { target: database_url.to_owned(), reason: e.to_string() })?;

        Self::migrate(&pool).await.map_err(|e| StorageError::Open { target: database_url.to_owned(), reason: e.to_string() })?;

        Ok(Self { pool })
    }

    async fn migrate(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS jobs (
                id UUID PRIMARY KEY,
                domain TEXT NOT NULL,
                url TEXT NOT NULL,
                job_type TEXT NOT NULL,
                strategy TEXT NOT NULL,
                priority SMALLINT NOT NULL,
                status TEXT NOT NULL,
                payload JSONB NOT NULL,
                attempts INT NOT NULL,
                max_attempts INT NOT NULL,
                timeout_seconds BIGINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                started_at TIMESTAMPTZ,
                completed_at TIMESTAMPTZ,
                error TEXT,
                idempotency_key TEXT,
                authorization_mode TEXT NOT NULL,
                result JSONB
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_domain ON jobs (domain)").execute(pool).await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs (created_at DESC)").execute(pool).await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS domain_policies (
                id UUID PRIMARY KEY,
                domain TEXT UNIQUE NOT NULL,
                allowed BOOLEAN NOT NULL,
                denied BOOLEAN NOT NULL,
                rate_limit_per_minute INT,
                rate_limit_per_hour INT,
                max_concurrent_jobs INT,
                allowed_strategies JSONB NOT NULL,
                notes TEXT
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS audit_log (
                id UUID PRIMARY KEY,
                job_id UUID,
                domain TEXT NOT NULL,
                policy_id UUID,
                authorization_mode TEXT NOT NULL,
                strategy TEXT NOT NULL,
                action TEXT NOT NULL,
                allowed BOOLEAN NOT NULL,
                reason TEXT NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL,
                user_id TEXT,
                ip_address TEXT,
                context JSONB NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_log_timestamp ON audit_log (timestamp DESC)").execute(pool).await?;

        Ok(())
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn job_type_str(t: JobType) -> &'static str {
    match t {
        JobType::NavigateExtract => "navigate_extract",
        JobType::Authenticate => "authenticate",
        JobType::FormSubmit => "form_submit",
        JobType::FileDownload => "file_download",
        JobType::ScreenshotCapture => "screenshot_capture",
        JobType::ScreenshotDiff => "screenshot_diff",
        JobType::ApiIntercept => "api_intercept",
    }
}

fn job_type_from_str(s: &str) -> JobType {
    match s {
        "authenticate" => JobType::Authenticate,
        "form_submit" => JobType::FormSubmit,
        "file_download" => JobType::FileDownload,
        "screenshot_capture" => JobType::ScreenshotCapture,
        "screenshot_diff" => JobType::ScreenshotDiff,
        "api_intercept" => JobType::ApiIntercept,
        _ => JobType::NavigateExtract,
    }
}

fn strategy_str(s: Strategy) -> &'static str {
    match s {
        Strategy::Vanilla => "vanilla",
        Strategy::Stealth => "stealth",
        Strategy::Assault => "assault",
    }
}

fn strategy_from_str(s: &str) -> Strategy {
    match s {
        "stealth" => Strategy::Stealth,
        "assault" => Strategy::Assault,
        _ => Strategy::Vanilla,
    }
}

fn status_str(s: JobStatus) -> &'static str {
    match s {
        JobStatus::Pending => "pending",
        JobStatus::Running => "running",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
        JobStatus::Cancelled => "cancelled",
        JobStatus::RateLimited => "rate_limited",
        JobStatus::CircuitBroken => "circuit_broken",
    }
}

fn status_from_str(s: &str) -> JobStatus {
    match s {
        "running" => JobStatus::Running,
        "completed" => JobStatus::Completed,
        "failed" => JobStatus::Failed,
        "cancelled" => JobStatus::Cancelled,
        "rate_limited" => JobStatus::RateLimited,
        "circuit_broken" => JobStatus::CircuitBroken,
        _ => JobStatus::Pending,
    }
}

fn auth_mode_str(m: AuthorizationMode) -> &'static str {
    match m {
        AuthorizationMode::Public => "public",
        AuthorizationMode::CustomerAuthorized => "customer_authorized",
        AuthorizationMode::Internal => "internal",
    }
}

fn auth_mode_from_str(s: &str) -> AuthorizationMode {
    match s {
        "customer_authorized" => AuthorizationMode::CustomerAuthorized,
        "internal" => AuthorizationMode::Internal,
        _ => AuthorizationMode::Public,
    }
}

fn priority_from_i16(v: i16) -> Priority {
    Priority::from_u8(u8::try_from(v).unwrap_or(2)).unwrap_or(Priority::Normal)
}

fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<Job, sqlx::Error> {
    Ok(Job {
        id: row.try_get("id")?,
        domain: row.try_get("domain")?,
        url: row.try_get("url")?,
        job_type: job_type_from_str(row.try_get::<String, _>("job_type")?.as_str()),
        strategy: strategy_from_str(row.try_get::<String, _>("strategy")?.as_str()),
        priority: priority_from_i16(row.try_get("priority")?),
        status: status_from_str(row.try_get::<String, _>("status")?.as_str()),
        payload: row.try_get("payload")?,
        attempts: u32::try_from(row.try_get::<i32, _>("attempts")?).unwrap_or_default(),
        max_attempts: u32::try_from(row.try_get::<i32, _>("max_attempts")?).unwrap_or_default(),
        timeout_seconds: u64::try_from(row.try_get::<i64, _>("timeout_seconds")?).unwrap_or_default(),
        created_at: row.try_get("created_at")?,
        started_at: row.try_get::<Option<DateTime<Utc>>, _>("started_at")?,
        completed_at: row.try_get::<Option<DateTime<Utc>>, _>("completed_at")?,
        error: row.try_get("error")?,
        idempotency_key: row.try_get("idempotency_key")?,
        authorization_mode: auth_mode_from_str(row.try_get::<String, _>("authorization_mode")?.as_str()),
        result: row.try_get("result")?,
    })
}

#[async_trait::async_trait]
impl StorageBackend for PostgresBackend {
    async fn insert_job(&self, job: &Job) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO jobs (id, domain, url, job_type, strategy, priority, status, payload, attempts, \
             max_attempts, timeout_seconds, created_at, started_at, completed_at, error, idempotency_key, \
             authorization_mode, result) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18)",
        )
        .bind(job.id)
        .bind(&job.domain)
        .bind(&job.url)
        .bind(job_type_str(job.job_type))
        .bind(strategy_str(job.strategy))
        .bind(job.priority as i16)
        .bind(status_str(job.status))
        .bind(&job.payload)
        .bind(i32::try_from(job.attempts).unwrap_or(i32::MAX))
        .bind(i32::try_from(job.max_attempts).unwrap_or(i32::MAX))
        .bind(i64::try_from(job.timeout_seconds).unwrap_or(i64::MAX))
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.error)
        .bind(&job.idempotency_key)
        .bind(auth_mode_str(job.authorization_mode))
        .bind(&job.result)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Write { what: format!("job {}", job.id), reason: e.to_string() })?;
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StorageError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Read { what: format!("job {id}"), reason: e.to_string() })?;
        row.map(|r| row_to_job(&r)).transpose().map_err(|e| StorageError::Read { what: format!("job {id}"), reason: e.to_string() })
    }

    async fn update_job(&self, job: &Job) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE jobs SET status=$2, attempts=$3, started_at=$4, completed_at=$5, error=$6, result=$7 WHERE id=$1",
        )
        .bind(job.id)
        .bind(status_str(job.status))
        .bind(i32::try_from(job.attempts).unwrap_or(i32::MAX))
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.error)
        .bind(&job.result)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Write { what: format!("job {}", job.id), reason: e.to_string() })?;
        Ok(())
    }

    async fn recent_jobs(&self, limit: usize) -> Result<Vec<Job>, StorageError> {
        let rows = sqlx::query("SELECT * FROM jobs ORDER BY created_at DESC LIMIT $1")
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Read { what: "recent jobs".to_owned(), reason: e.to_string() })?;
        rows.iter().map(row_to_job).collect::<Result<Vec<_>, _>>().map_err(|e| StorageError::Read {
            what: "recent jobs".to_owned(),
            reason: e.to_string(),
        })
    }

    async fn count_active_jobs(&self, domain: &str) -> Result<u32, StorageError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM jobs WHERE domain = $1 AND status NOT IN \
             ('completed','failed','cancelled','rate_limited','circuit_broken')",
        )
        .bind(domain)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::Read { what: format!("active job count for {domain}"), reason: e.to_string() })?;
        let count: i64 = row.try_get("n").unwrap_or_default();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn recent_success_rate(&self, sample: usize) -> Result<f64, StorageError> {
        let rows = sqlx::query(
            "SELECT status FROM jobs WHERE status IN ('completed','failed','cancelled','rate_limited','circuit_broken') \
             ORDER BY created_at DESC LIMIT $1",
        )
        .bind(i64::try_from(sample).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Read { what: "recent success rate".to_owned(), reason: e.to_string() })?;
        if rows.is_empty() {
            return Ok(1.0);
        }
        let successes = rows.iter().filter(|r| r.try_get::<String, _>("status").as_deref() == Ok("completed")).count();
        #[allow(clippy::cast_precision_loss)]
        Ok(successes as f64 / rows.len() as f64)
    }

    async fn get_policy(&self, domain: &str) -> Result<Option<DomainPolicy>, StorageError> {
        let row = sqlx::query("SELECT * FROM domain_policies WHERE domain = $1")
            .bind(domain)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Read { what: format!("policy for {domain}"), reason: e.to_string() })?;

        let Some(row) = row else { return Ok(None) };
        let strategies: Vec<String> =
            serde_json::from_value(row.try_get("allowed_strategies").unwrap_or_default()).unwrap_or_default();
        Ok(Some(DomainPolicy {
            id: row.try_get("id").unwrap_or_default(),
            domain: row.try_get("domain").unwrap_or_default(),
            allowed: row.try_get("allowed").unwrap_or(true),
            denied: row.try_get("denied").unwrap_or(false),
            rate_limit_per_minute: row
                .try_get::<Option<i32>, _>("rate_limit_per_minute")
                .unwrap_or_default()
                .map(|v| u32::try_from(v).unwrap_or_default()),
            rate_limit_per_hour: row
                .try_get::<Option<i32>, _>("rate_limit_per_hour")
                .unwrap_or_default()
                .map(|v| u32::try_from(v).unwrap_or_default()),
            max_concurrent_jobs: row
                .try_get::<Option<i32>, _>("max_concurrent_jobs")
                .unwrap_or_default()
                .map(|v| u32::try_from(v).unwrap_or_default()),
            allowed_strategies: strategies.iter().map(|s| strategy_from_str(s)).collect::<HashSet<Strategy>>(),
            notes: row.try_get("notes").unwrap_or_default(),
        }))
    }

    async fn put_policy(&self, policy: &DomainPolicy) -> Result<(), StorageError> {
        let strategies: Vec<&str> = policy.allowed_strategies.iter().copied().map(strategy_str).collect();
        let strategies_json = serde_json::to_value(strategies).unwrap_or_default();
        sqlx::query(
            "INSERT INTO domain_policies (id, domain, allowed, denied, rate_limit_per_minute, rate_limit_per_hour, \
             max_concurrent_jobs, allowed_strategies, notes) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9) \
             ON CONFLICT (domain) DO UPDATE SET allowed=$3, denied=$4, rate_limit_per_minute=$5, \
             rate_limit_per_hour=$6, max_concurrent_jobs=$7, allowed_strategies=$8, notes=$9",
        )
        .bind(policy.id)
        .bind(&policy.domain)
        .bind(policy.allowed)
        .bind(policy.denied)
        .bind(policy.rate_limit_per_minute.map(|v| i32::try_from(v).unwrap_or(i32::MAX)))
        .bind(policy.rate_limit_per_hour.map(|v| i32::try_from(v).unwrap_or(i32::MAX)))
        .bind(policy.max_concurrent_jobs.map(|v| i32::try_from(v).unwrap_or(i32::MAX)))
        .bind(strategies_json)
        .bind(&policy.notes)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Write { what: format!("policy for {}", policy.domain), reason: e.to_string() })?;
        Ok(())
    }

    async fn append_audit(&self, entry: &AuditLogEntry) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO audit_log (id, job_id, domain, policy_id, authorization_mode, strategy, action, allowed, \
             reason, timestamp, user_id, ip_address, context) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)",
        )
        .bind(entry.id)
        .bind(entry.job_id)
        .bind(&entry.domain)
        .bind(entry.policy_id)
        .bind(auth_mode_str(entry.authorization_mode))
        .bind(strategy_str(entry.strategy))
        .bind(&entry.action)
        .bind(entry.allowed)
        .bind(&entry.reason)
        .bind(entry.timestamp)
        .bind(&entry.user_id)
        .bind(&entry.ip_address)
        .bind(&entry.context)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Write { what: format!("audit row {}", entry.id), reason: e.to_string() })?;
        Ok(())
    }

    async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
