use axum::body::Body;
use axum::http::{self, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use instaman::api::{self, AppState};
use instaman::instagram::model::{Account, Connections, User};
use instaman::instagram::{InstagramService, ProxyError};

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

/// Canned proxy responses; flips to not-found when asked to.
#[derive(Clone, Default)]
struct StubInstagram {
    not_found: bool,
}

#[async_trait::async_trait]
impl InstagramService for StubInstagram {
    async fn get_account(&self) -> Result<Account, ProxyError> {
        if self.not_found {
            return Err(ProxyError::NotFound);
        }
        Ok(Account {
            id: 1,
            handler: "owner".into(),
            full_name: "Owner".into(),
            biography: "bio".into(),
            picture_url: None,
        })
    }

    async fn get_user(&self, username: &str) -> Result<User, ProxyError> {
        if self.not_found {
            return Err(ProxyError::NotFound);
        }
        Ok(User {
            id: 2,
            handler: username.into(),
            full_name: "Someone".into(),
            picture_url: None,
        })
    }

    async fn get_user_by_id(&self, user_id: i64) -> Result<User, ProxyError> {
        if self.not_found {
            return Err(ProxyError::NotFound);
        }
        Ok(User {
            id: user_id,
            handler: "someone".into(),
            full_name: "Someone".into(),
            picture_url: None,
        })
    }

    async fn get_followers(
        &self,
        _user_id: i64,
        cursor: Option<&str>,
    ) -> Result<Connections, ProxyError> {
        if self.not_found {
            return Err(ProxyError::NotFound);
        }
        Ok(Connections {
            next: cursor.map(|_| "next-page".to_string()),
            users: vec![User {
                id: 3,
                handler: "follower".into(),
                full_name: "Follower".into(),
                picture_url: None,
            }],
        })
    }

    async fn get_following(
        &self,
        _user_id: i64,
        _cursor: Option<&str>,
    ) -> Result<Connections, ProxyError> {
        if self.not_found {
            return Err(ProxyError::NotFound);
        }
        Ok(Connections::default())
    }
}

async fn setup_app(not_found: bool) -> (Router, sqlx::SqlitePool) {
    let pool = setup_pool().await;
    let state = AppState {
        pool: pool.clone(),
        instagram: Arc::new(StubInstagram { not_found }),
    };
    (api::build_router(state), pool)
}

async fn body_json(res: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(http::Method::POST)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

#[tokio::test]
async fn create_copy_job_and_fetch_it_back() {
    let (app, _pool) = setup_app(false).await;

    let body = json!({
        "label": "Copy followers of 9",
        "type": "copy-followers",
        "nextRun": "2026-08-01T00:00:00Z",
        "metadata": { "userID": 9, "frequency": "weekly" },
    });

    let res = app
        .clone()
        .oneshot(post_json("/instaman/jobs/copy", &body))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let created = body_json(res).await;
    assert_eq!(created["checksum"], "copy-followers:9");
    assert_eq!(created["state"], "new");
    assert_eq!(created["metadata"]["userID"], 9);
    assert_eq!(created["metadata"]["frequency"], "weekly");
    assert_eq!(created["resultsCount"], 0);

    let res = app
        .clone()
        .oneshot(get("/instaman/jobs?checksum=copy-followers:9"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let fetched = body_json(res).await;
    assert_eq!(fetched["type"], "copy-followers");
    assert_eq!(fetched["id"], created["id"]);

    let res = app
        .clone()
        .oneshot(get("/instaman/jobs/copy?direction=followers&userID=9"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let detail = body_json(res).await;
    assert_eq!(detail["metadata"]["userID"], 9);
    assert_eq!(detail["resultsCount"], 0);
}

#[tokio::test]
async fn create_copy_job_rejects_duplicates_and_bad_input() {
    let (app, _pool) = setup_app(false).await;

    let body = json!({
        "label": "dup",
        "type": "copy-following",
        "metadata": { "userID": 5 },
    });

    let res = app
        .clone()
        .oneshot(post_json("/instaman/jobs/copy", &body))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .clone()
        .oneshot(post_json("/instaman/jobs/copy", &body))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(res).await["error"], "job already exists");

    let res = app
        .clone()
        .oneshot(post_json(
            "/instaman/jobs/copy",
            &json!({ "type": "copy-everything", "metadata": { "userID": 5 } }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = app
        .clone()
        .oneshot(post_json(
            "/instaman/jobs/copy",
            &json!({ "type": "copy-followers", "metadata": { "userID": 0 } }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn find_job_requires_id_or_checksum() {
    let (app, _pool) = setup_app(false).await;

    let res = app.clone().oneshot(get("/instaman/jobs")).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = app
        .clone()
        .oneshot(get("/instaman/jobs?id=12345"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_jobs_returns_all_matching() {
    let (app, _pool) = setup_app(false).await;

    for user_id in [1, 2] {
        let body = json!({
            "label": format!("job {user_id}"),
            "type": "copy-followers",
            "metadata": { "userID": user_id },
        });
        let res = app
            .clone()
            .oneshot(post_json("/instaman/jobs/copy", &body))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    let res = app
        .clone()
        .oneshot(get("/instaman/jobs/all?type=copy-followers&state=new"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let jobs = body_json(res).await;
    assert_eq!(jobs.as_array().unwrap().len(), 2);

    let res = app
        .clone()
        .oneshot(get("/instaman/jobs/all?state=bogus"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn copy_job_detail_validates_direction() {
    let (app, _pool) = setup_app(false).await;

    let res = app
        .clone()
        .oneshot(get("/instaman/jobs/copy?userID=5"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = app
        .clone()
        .oneshot(get("/instaman/jobs/copy?direction=sideways&userID=5"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = app
        .clone()
        .oneshot(get("/instaman/jobs/copy?direction=followers&userID=5"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn instagram_relays_map_proxy_responses() {
    let (app, _pool) = setup_app(false).await;

    let res = app.clone().oneshot(get("/instagram/me")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["handler"], "owner");

    let res = app
        .clone()
        .oneshot(get("/instagram/account/someone"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["handler"], "someone");

    let res = app
        .clone()
        .oneshot(get("/instagram/followers/7?next_cursor=abc"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let page = body_json(res).await;
    assert_eq!(page["next"], "next-page");
    assert_eq!(page["users"][0]["handler"], "follower");
}

#[tokio::test]
async fn instagram_relays_map_not_found() {
    let (app, _pool) = setup_app(true).await;

    let res = app.clone().oneshot(get("/instagram/me")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(res).await["error"], "resource not found");

    let res = app
        .clone()
        .oneshot(get("/instagram/account-id/999"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
