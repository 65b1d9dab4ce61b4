use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Job execution state as stored in the `jobs.state` column.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    New,
    Active,
    Error,
    #[serde(rename = "pause")]
    Paused,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::New => "new",
            JobState::Active => "active",
            JobState::Error => "error",
            JobState::Paused => "pause",
        }
    }

    pub fn parse_state(s: &str) -> Option<Self> {
        match s {
            "new" => Some(JobState::New),
            "active" => Some(JobState::Active),
            "error" => Some(JobState::Error),
            "pause" => Some(JobState::Paused),
            _ => None,
        }
    }
}

/// Job type as stored in the `jobs.job_type` column.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobType {
    #[serde(rename = "copy-followers")]
    CopyFollowers,
    #[serde(rename = "copy-following")]
    CopyFollowing,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::CopyFollowers => "copy-followers",
            JobType::CopyFollowing => "copy-following",
        }
    }

    pub fn parse_type(s: &str) -> Option<Self> {
        match s {
            "copy-followers" => Some(JobType::CopyFollowers),
            "copy-following" => Some(JobType::CopyFollowing),
            _ => None,
        }
    }

    /// Maps the `direction` query parameter of the copy-job endpoints.
    pub fn from_direction(direction: &str) -> Option<Self> {
        match direction {
            "followers" => Some(JobType::CopyFollowers),
            "following" => Some(JobType::CopyFollowing),
            _ => None,
        }
    }
}

/// How often a copy job re-runs after a completed sync.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobFrequency {
    #[default]
    Daily,
    Weekly,
}

impl JobFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobFrequency::Daily => "daily",
            JobFrequency::Weekly => "weekly",
        }
    }

    pub fn parse_frequency(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(JobFrequency::Daily),
            "weekly" => Some(JobFrequency::Weekly),
            _ => None,
        }
    }
}

/// A record of the `jobs` table.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: i64,
    pub checksum: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub label: String,
    #[serde(rename = "lastRun")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(rename = "nextRun")]
    pub next_run: Option<DateTime<Utc>>,
    pub state: JobState,
    /// Raw job-type-specific payload; decode with [`CopyJob::new`].
    pub metadata: serde_json::Value,
}

/// Decoded metadata payload for `copy-followers` / `copy-following` jobs.
///
/// `cursor` is the only field mutated mid-run; it resumes a partially
/// fetched sync across invocations.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CopyJobMetadata {
    #[serde(rename = "userID")]
    pub user_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub frequency: JobFrequency,
}

// Loose wire shape: frequency kept as a plain string so an invalid stored
// value normalizes to the default instead of failing the decode.
#[derive(Debug, Deserialize)]
struct RawCopyJobMetadata {
    #[serde(rename = "userID")]
    user_id: i64,
    #[serde(default)]
    cursor: Option<String>,
    #[serde(default)]
    frequency: String,
}

/// A `jobs` record of type `copy-followers` or `copy-following`, with its
/// metadata decoded and validated.
#[derive(Debug, Clone)]
pub struct CopyJob {
    pub job: Job,
    pub metadata: CopyJobMetadata,
}

impl CopyJob {
    /// Morphs a [`Job`] into a [`CopyJob`], validating its metadata.
    ///
    /// Rejects non-positive user IDs; normalizes an empty cursor to `None`
    /// and an invalid frequency to daily.
    pub fn new(job: Job) -> Result<Self> {
        let raw: RawCopyJobMetadata = serde_json::from_value(job.metadata.clone())
            .map_err(|err| anyhow!("job {} has invalid metadata: {}", job.id, err))?;

        if raw.user_id < 1 {
            return Err(anyhow!("job {} has invalid user ID", job.id));
        }

        let metadata = CopyJobMetadata {
            user_id: raw.user_id,
            cursor: raw.cursor.filter(|c| !c.is_empty()),
            frequency: JobFrequency::parse_frequency(&raw.frequency).unwrap_or_default(),
        };

        Ok(Self { job, metadata })
    }
}

/// Deterministic checksum that prevents duplicate jobs for the same
/// account and direction, e.g. `copy-followers:123`.
pub fn job_checksum(job_type: JobType, user_id: i64) -> String {
    format!("{}:{}", job_type.as_str(), user_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job_with_metadata(metadata: serde_json::Value) -> Job {
        Job {
            id: 7,
            checksum: "copy-followers:42".into(),
            job_type: JobType::CopyFollowers,
            label: "test".into(),
            last_run: None,
            next_run: None,
            state: JobState::New,
            metadata,
        }
    }

    #[test]
    fn copy_job_decodes_valid_metadata() {
        let job = job_with_metadata(json!({
            "userID": 42,
            "cursor": "abc",
            "frequency": "weekly",
        }));
        let cj = CopyJob::new(job).unwrap();
        assert_eq!(cj.metadata.user_id, 42);
        assert_eq!(cj.metadata.cursor.as_deref(), Some("abc"));
        assert_eq!(cj.metadata.frequency, JobFrequency::Weekly);
    }

    #[test]
    fn copy_job_rejects_invalid_user_id() {
        let job = job_with_metadata(json!({ "userID": 0, "frequency": "daily" }));
        let err = CopyJob::new(job).unwrap_err();
        assert!(err.to_string().contains("invalid user ID"));
    }

    #[test]
    fn copy_job_normalizes_empty_cursor() {
        let job = job_with_metadata(json!({ "userID": 1, "cursor": "" }));
        let cj = CopyJob::new(job).unwrap();
        assert!(cj.metadata.cursor.is_none());
    }

    #[test]
    fn copy_job_defaults_invalid_frequency() {
        let job = job_with_metadata(json!({ "userID": 1, "frequency": "hourly" }));
        let cj = CopyJob::new(job).unwrap();
        assert_eq!(cj.metadata.frequency, JobFrequency::Daily);
    }

    #[test]
    fn checksum_format() {
        assert_eq!(job_checksum(JobType::CopyFollowers, 5), "copy-followers:5");
        assert_eq!(job_checksum(JobType::CopyFollowing, 5), "copy-following:5");
    }

    #[test]
    fn state_round_trip() {
        for s in ["new", "active", "error", "pause"] {
            assert_eq!(JobState::parse_state(s).unwrap().as_str(), s);
        }
        assert!(JobState::parse_state("paused").is_none());
    }
}
