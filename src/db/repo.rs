use super::model::{Connection, CopyJobView, JobEvent};
use crate::instagram::model::Connections;
use crate::model::{job_checksum, CopyJob, Job, JobFrequency, JobState, JobType};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{debug, instrument};

pub type Pool = SqlitePool;

/// The maximum number of connections per page returned by `find_copy_job`.
pub const MAX_COPY_RESULTS: i64 = 100;
/// The maximum number of jobs per page returned by `find_jobs`.
pub const MAX_JOBS_RESULT: i64 = 20;

const JOB_COLUMNS: &str = "id, checksum, job_type, label, last_run, metadata, next_run, state";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the
/// parent directory exists. Leaves in-memory URLs and other schemes untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = url["sqlite:".len()..].trim_start_matches("//");
    let (path_part, query_part) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match path_part.strip_prefix("~/") {
        Some(tail) => match std::env::var("HOME") {
            Ok(home) => format!("{}/{}", home.trim_end_matches('/'), tail),
            Err(_) => path_part.to_string(),
        },
        None => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query_part {
        Some(q) => format!("sqlite://{}?{}", expanded_path, q),
        None => format!("sqlite://{}", expanded_path),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let job_type: String = row.get("job_type");
    let state: String = row.get("state");
    let metadata: String = row.get("metadata");

    Ok(Job {
        id: row.get("id"),
        checksum: row.get("checksum"),
        job_type: JobType::parse_type(&job_type)
            .ok_or_else(|| anyhow!("unknown job type {}", job_type))?,
        label: row.get("label"),
        last_run: row.try_get("last_run").ok().flatten(),
        next_run: row.try_get("next_run").ok().flatten(),
        state: JobState::parse_state(&state)
            .ok_or_else(|| anyhow!("unknown job state {}", state))?,
        metadata: serde_json::from_str(&metadata).context("job has malformed metadata")?,
    })
}

fn connections_table(job_type: JobType) -> &'static str {
    match job_type {
        JobType::CopyFollowers => "user_followers",
        JobType::CopyFollowing => "user_following",
    }
}

/// Returns the first job of the given type that is ready for execution:
/// `state` active or new, earliest `next_run` in the past. `None` when no
/// job is eligible.
#[instrument(skip_all)]
pub async fn next_job(pool: &Pool, job_type: JobType) -> Result<Option<Job>> {
    let sql = format!(
        "SELECT {JOB_COLUMNS} FROM jobs \
         WHERE job_type = ? \
           AND next_run IS NOT NULL \
           AND datetime(next_run) <= CURRENT_TIMESTAMP \
           AND state IN (?, ?) \
         ORDER BY datetime(next_run) ASC \
         LIMIT 1"
    );

    let row = sqlx::query(&sql)
        .bind(job_type.as_str())
        .bind(JobState::Active.as_str())
        .bind(JobState::New.as_str())
        .fetch_optional(pool)
        .await?;

    row.map(|r| job_from_row(&r)).transpose()
}

/// Records that a job attempt started now.
#[instrument(skip_all)]
pub async fn touch_job(pool: &Pool, job_id: i64) -> Result<()> {
    sqlx::query("UPDATE jobs SET last_run = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Appends a new event to the job's audit trail.
#[instrument(skip_all)]
pub async fn insert_job_event(pool: &Pool, job_id: i64, event: &str) -> Result<()> {
    sqlx::query("INSERT INTO jobs_events (job_id, event_msg, ts) VALUES (?, ?, ?)")
        .bind(job_id)
        .bind(event)
        .bind(Utc::now())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_job_events(pool: &Pool, job_id: i64) -> Result<Vec<JobEvent>> {
    let rows = sqlx::query(
        "SELECT id, job_id, event_msg, ts FROM jobs_events WHERE job_id = ? ORDER BY id ASC",
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| JobEvent {
            id: row.get("id"),
            job_id: row.get("job_id"),
            event_msg: row.get("event_msg"),
            ts: row.get("ts"),
        })
        .collect())
}

/// Sets `next_run = now + delay` and moves the job back to the active state.
#[instrument(skip_all)]
pub async fn schedule_job(pool: &Pool, job_id: i64, delay: Duration) -> Result<()> {
    let delay = chrono::Duration::from_std(delay).context("delay out of range")?;
    sqlx::query("UPDATE jobs SET next_run = ?, state = ? WHERE id = ?")
        .bind(Utc::now() + delay)
        .bind(JobState::Active.as_str())
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn update_job_state(pool: &Pool, job_id: i64, state: JobState) -> Result<()> {
    sqlx::query("UPDATE jobs SET state = ? WHERE id = ?")
        .bind(state.as_str())
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Marks a job failed: state becomes `error` and the reason lands in the
/// audit trail. Failed jobs are not claimed again until an operator resets
/// their state and `next_run`.
#[instrument(skip_all)]
pub async fn mark_failed(pool: &Pool, job_id: i64, reason: &str) -> Result<()> {
    update_job_state(pool, job_id, JobState::Error).await?;
    insert_job_event(pool, job_id, reason).await?;
    Ok(())
}

/// Persists one page of copy results: upserts every user in the page keyed
/// by (account, user) and atomically stores the page's `next` cursor in the
/// job's metadata (cleared when the page was the last one).
#[instrument(skip_all)]
pub async fn store_copy_results(pool: &Pool, job: &CopyJob, page: &Connections) -> Result<()> {
    let table = connections_table(job.job.job_type);
    let upsert = format!(
        "INSERT INTO {table} (account_id, user_id, handler, pic_url, first_seen, last_seen) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT (account_id, user_id) DO UPDATE \
         SET last_seen = excluded.last_seen, handler = excluded.handler, pic_url = excluded.pic_url"
    );

    let mut tx = pool.begin().await?;
    let now = Utc::now();

    for user in &page.users {
        debug!(job.id = job.job.id, user.id = user.id, "upsert into {}", table);

        sqlx::query(&upsert)
            .bind(job.metadata.user_id)
            .bind(user.id)
            .bind(&user.handler)
            .bind(&user.picture_url)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
    }

    let next = page.next.as_deref().filter(|c| !c.is_empty());
    sqlx::query("UPDATE jobs SET metadata = json_set(metadata, '$.cursor', ?), state = ? WHERE id = ?")
        .bind(next)
        .bind(JobState::Active.as_str())
        .bind(job.job.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Input data for [`new_copy_job`].
#[derive(Debug, Clone)]
pub struct NewCopyJobParams {
    pub label: String,
    pub job_type: JobType,
    pub user_id: i64,
    pub frequency: JobFrequency,
    pub next_run: Option<DateTime<Utc>>,
}

/// Creates a new copy job. The checksum derived from (type, userID) is
/// unique, so a second job for the same account and direction fails on the
/// jobs table constraint.
#[instrument(skip_all)]
pub async fn new_copy_job(pool: &Pool, params: &NewCopyJobParams) -> Result<CopyJob> {
    if params.user_id < 1 {
        return Err(anyhow!("invalid user ID"));
    }

    let metadata = serde_json::json!({
        "userID": params.user_id,
        "cursor": null,
        "frequency": params.frequency.as_str(),
    });

    let sql = format!(
        "INSERT INTO jobs (checksum, job_type, label, last_run, metadata, next_run, state) \
         VALUES (?, ?, ?, NULL, ?, ?, ?) \
         RETURNING {JOB_COLUMNS}"
    );

    let row = sqlx::query(&sql)
        .bind(job_checksum(params.job_type, params.user_id))
        .bind(params.job_type.as_str())
        .bind(&params.label)
        .bind(metadata.to_string())
        .bind(params.next_run)
        .bind(JobState::New.as_str())
        .fetch_one(pool)
        .await
        .context("failed to create job")?;

    CopyJob::new(job_from_row(&row)?)
}

/// Search parameters for [`find_job`]. At least one of `id` / `checksum`
/// is required.
#[derive(Debug, Clone, Default)]
pub struct FindJobParams {
    pub id: Option<i64>,
    pub checksum: Option<String>,
    pub state: Option<JobState>,
    pub job_type: Option<JobType>,
}

/// Finds a job by its ID or checksum, optionally narrowed by state/type.
/// Does not error if the job isn't found, it returns `None`.
#[instrument(skip_all)]
pub async fn find_job(pool: &Pool, params: &FindJobParams) -> Result<Option<Job>> {
    if params.id.is_none() && params.checksum.is_none() {
        return Err(anyhow!("requires id or checksum"));
    }

    let mut conds = Vec::new();
    if params.id.is_some() {
        conds.push("id = ?");
    }
    if params.checksum.is_some() {
        conds.push("checksum = ?");
    }
    if params.state.is_some() {
        conds.push("state = ?");
    }
    if params.job_type.is_some() {
        conds.push("job_type = ?");
    }

    let sql = format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE {}",
        conds.join(" AND ")
    );

    let mut query = sqlx::query(&sql);
    if let Some(id) = params.id {
        query = query.bind(id);
    }
    if let Some(checksum) = &params.checksum {
        query = query.bind(checksum);
    }
    if let Some(state) = params.state {
        query = query.bind(state.as_str());
    }
    if let Some(job_type) = params.job_type {
        query = query.bind(job_type.as_str());
    }

    let row = query.fetch_optional(pool).await?;
    row.map(|r| job_from_row(&r)).transpose()
}

/// Search parameters for [`find_jobs`].
#[derive(Debug, Clone, Default)]
pub struct FindJobsParams {
    pub state: Option<JobState>,
    pub job_type: Option<JobType>,
    pub order: Option<String>,
    pub page: i64,
}

/// Returns a page of jobs, newest runs first unless ordered otherwise.
#[instrument(skip_all)]
pub async fn find_jobs(pool: &Pool, params: &FindJobsParams) -> Result<Vec<Job>> {
    let mut conds = Vec::new();
    if params.state.is_some() {
        conds.push("state = ?");
    }
    if params.job_type.is_some() {
        conds.push("job_type = ?");
    }
    let where_clause = if conds.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conds.join(" AND "))
    };

    // Sortable columns are whitelisted; anything else falls back to the
    // default ordering.
    let (order, dir) = match params.order.as_deref() {
        Some("last_run") => ("last_run", "ASC"),
        Some("next_run") => ("next_run", "ASC"),
        Some("-next_run") => ("next_run", "DESC"),
        Some("state") => ("state", "ASC"),
        Some("-state") => ("state", "DESC"),
        Some("label") => ("label", "ASC"),
        Some("-label") => ("label", "DESC"),
        _ => ("last_run", "DESC"),
    };

    let page = params.page.max(0);
    let sql = format!(
        "SELECT {JOB_COLUMNS} FROM jobs {where_clause} ORDER BY {order} {dir} LIMIT {MAX_JOBS_RESULT} OFFSET {}",
        page * MAX_JOBS_RESULT
    );

    let mut query = sqlx::query(&sql);
    if let Some(state) = params.state {
        query = query.bind(state.as_str());
    }
    if let Some(job_type) = params.job_type {
        query = query.bind(job_type.as_str());
    }

    let rows = query.fetch_all(pool).await?;
    rows.iter().map(job_from_row).collect()
}

/// Finds a copy job by account and direction, augmented with the total
/// number of connections already harvested. If `with_page` is set, that
/// slice of persisted results is included too.
#[instrument(skip_all)]
pub async fn find_copy_job(
    pool: &Pool,
    job_type: JobType,
    user_id: i64,
    with_page: Option<i64>,
) -> Result<Option<CopyJobView>> {
    let params = FindJobParams {
        checksum: Some(job_checksum(job_type, user_id)),
        job_type: Some(job_type),
        ..Default::default()
    };

    let Some(job) = find_job(pool, &params).await? else {
        return Ok(None);
    };
    let job = CopyJob::new(job)?;

    let total = count_connections(pool, job_type, user_id).await?;
    let results = match with_page {
        Some(page) if page >= 0 => {
            list_connections(pool, job_type, user_id, MAX_COPY_RESULTS, page * MAX_COPY_RESULTS)
                .await?
        }
        _ => Vec::new(),
    };

    Ok(Some(CopyJobView { job, results, total }))
}

pub async fn count_connections(pool: &Pool, job_type: JobType, account_id: i64) -> Result<i64> {
    let table = connections_table(job_type);
    let sql = format!("SELECT COUNT(*) FROM {table} WHERE account_id = ?");
    let count: i64 = sqlx::query_scalar(&sql)
        .bind(account_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn list_connections(
    pool: &Pool,
    job_type: JobType,
    account_id: i64,
    limit: i64,
    offset: i64,
) -> Result<Vec<Connection>> {
    let table = connections_table(job_type);
    let sql = format!(
        "SELECT user_id, handler, pic_url, first_seen, last_seen FROM {table} \
         WHERE account_id = ? \
         ORDER BY datetime(first_seen) DESC, user_id ASC \
         LIMIT ? OFFSET ?"
    );

    let rows = sqlx::query(&sql)
        .bind(account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| Connection {
            user_id: row.get("user_id"),
            handler: row.get("handler"),
            pic_url: row.try_get("pic_url").ok().flatten(),
            first_seen: row.get("first_seen"),
            last_seen: row.get("last_seen"),
        })
        .collect())
}
