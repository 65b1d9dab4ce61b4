//! Wire models mirroring the instaproxy JSON responses.

use serde::{Deserialize, Serialize};

/// The primary account, as returned by instaproxy's `/me` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub id: i64,
    pub handler: String,
    #[serde(rename = "fullName", default)]
    pub full_name: String,
    #[serde(default)]
    pub biography: String,
    #[serde(rename = "pictureURL", default, skip_serializing_if = "Option::is_none")]
    pub picture_url: Option<String>,
}

/// A user appearing in a followers/following page or an account lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub handler: String,
    #[serde(rename = "fullName", default)]
    pub full_name: String,
    #[serde(rename = "pictureURL", default, skip_serializing_if = "Option::is_none")]
    pub picture_url: Option<String>,
}

/// One page of connections, plus the cursor for the next page.
/// `next` is absent on the final page.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Connections {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default)]
    pub users: Vec<User>,
}
