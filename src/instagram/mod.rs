//! HTTP connector to the instaproxy service.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::fmt;
use thiserror::Error;
use tracing::info;

use crate::config::Config;
use crate::instagram::model::{Account, Connections, User};

pub mod model;

const DEFAULT_USER_AGENT: &str = "instaman/0.1";

/// Failures talking to instaproxy. All variants are fatal for the current
/// attempt; callers do not retry inline.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("resource not found")]
    NotFound,
    #[error("unexpected status code {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("malformed response: {0}")]
    InvalidJson(#[source] reqwest::Error),
    #[error("invalid instaproxy URL")]
    InvalidUrl,
}

/// Read-only view of the account-data proxy. The worker and the API depend
/// on this trait so tests can substitute a recording fake.
#[async_trait]
pub trait InstagramService: Send + Sync {
    async fn get_account(&self) -> Result<Account, ProxyError>;

    async fn get_user(&self, username: &str) -> Result<User, ProxyError>;

    async fn get_user_by_id(&self, user_id: i64) -> Result<User, ProxyError>;

    async fn get_followers(
        &self,
        user_id: i64,
        cursor: Option<&str>,
    ) -> Result<Connections, ProxyError>;

    async fn get_following(
        &self,
        user_id: i64,
        cursor: Option<&str>,
    ) -> Result<Connections, ProxyError>;
}

/// An instaproxy API client.
#[derive(Clone)]
pub struct InstagramClient {
    http: Client,
    base_url: Url,
}

impl fmt::Debug for InstagramClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstagramClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl InstagramClient {
    pub fn new(base_url: &str) -> Result<Self, ProxyError> {
        // Normalize to a trailing slash so Url::join keeps the base path.
        let base_url = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
            .map_err(|_| ProxyError::InvalidUrl)?;
        if base_url.scheme() != "http" && base_url.scheme() != "https" {
            return Err(ProxyError::InvalidUrl);
        }

        let http = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .no_proxy()
            .build()
            .expect("reqwest client");

        Ok(Self { http, base_url })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, ProxyError> {
        Self::new(&cfg.instaproxy.base_url)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ProxyError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ProxyError::InvalidUrl)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ProxyError> {
        info!(http.method = "GET", http.route = url.path(), "instaproxy request");

        let res = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(ProxyError::Transport)?;

        match res.status() {
            StatusCode::NOT_FOUND => Err(ProxyError::NotFound),
            status if !status.is_success() => Err(ProxyError::Status(status.as_u16())),
            _ => res.json::<T>().await.map_err(ProxyError::InvalidJson),
        }
    }

    async fn get_connections(
        &self,
        direction: &str,
        user_id: i64,
        cursor: Option<&str>,
    ) -> Result<Connections, ProxyError> {
        let mut url = self.endpoint(&[direction, &user_id.to_string()])?;
        if let Some(cursor) = cursor {
            url.query_pairs_mut().append_pair("next_cursor", cursor);
        }

        let mut page: Connections = self.get_json(url).await?;
        // The proxy occasionally sends an empty string for the final page.
        page.next = page.next.filter(|c| !c.is_empty());

        Ok(page)
    }
}

#[async_trait]
impl InstagramService for InstagramClient {
    async fn get_account(&self) -> Result<Account, ProxyError> {
        self.get_json(self.endpoint(&["me"])?).await
    }

    async fn get_user(&self, username: &str) -> Result<User, ProxyError> {
        self.get_json(self.endpoint(&["account", username])?).await
    }

    async fn get_user_by_id(&self, user_id: i64) -> Result<User, ProxyError> {
        self.get_json(self.endpoint(&["account-id", &user_id.to_string()])?)
            .await
    }

    async fn get_followers(
        &self,
        user_id: i64,
        cursor: Option<&str>,
    ) -> Result<Connections, ProxyError> {
        self.get_connections("followers", user_id, cursor).await
    }

    async fn get_following(
        &self,
        user_id: i64,
        cursor: Option<&str>,
    ) -> Result<Connections, ProxyError> {
        self.get_connections("following", user_id, cursor).await
    }
}
