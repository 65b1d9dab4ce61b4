//! Database view models used by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business
//! logic should live in higher layers.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::CopyJob;

/// A persisted connection row from `user_followers` / `user_following`.
///
/// `first_seen` is set once when the connection is first indexed;
/// `last_seen` is refreshed every time the user reappears in a page.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Connection {
    #[serde(rename = "id")]
    pub user_id: i64,
    pub handler: String,
    #[serde(rename = "pictureURL", skip_serializing_if = "Option::is_none")]
    pub pic_url: Option<String>,
    #[serde(rename = "firstSeen")]
    pub first_seen: DateTime<Utc>,
    #[serde(rename = "lastSeen")]
    pub last_seen: DateTime<Utc>,
}

/// One line of a job's audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub id: i64,
    #[serde(rename = "jobID")]
    pub job_id: i64,
    #[serde(rename = "message")]
    pub event_msg: String,
    pub ts: DateTime<Utc>,
}

/// A copy job augmented with its harvested connections, as served by the
/// copy-job detail endpoint.
#[derive(Debug, Clone)]
pub struct CopyJobView {
    pub job: CopyJob,
    pub results: Vec<Connection>,
    pub total: i64,
}
