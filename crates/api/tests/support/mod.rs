//! Shared helpers for `homeboard-api` HTTP tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::ConnectInfo;
use axum::http::{Request, Response};
use axum::Router;
use homeboard_api::{router, AppContext};
use homeboard_domain::{Config, SourceConfig, SourceKind};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

pub const ADMIN_TOKEN: &str = "admin-secret";
pub const DISPLAY_TOKEN: &str = "kitchen-kiosk";
pub const BURST: f64 = 3.0;

/// Application wired against a throwaway database.
///
/// Scheduled sync is disabled so nothing runs unless a test triggers it.
pub struct TestApp {
    pub ctx: Arc<AppContext>,
    pub app: Router,
    _temp_dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut Config)) -> Self {
        let temp_dir = TempDir::new().expect("temp dir should be created");

        let mut config = Config::default();
        config.database.path = temp_dir.path().join("homeboard.db").display().to_string();
        config.database.pool_size = 2;
        config.server.admin_token = Some(ADMIN_TOKEN.to_string());
        config.server.display_tokens = vec![DISPLAY_TOKEN.to_string()];
        config.sync.enabled = false;
        config.rate_limit.max_tokens = BURST;
        config.rate_limit.refill_per_sec = 0.01;
        customize(&mut config);

        let ctx = Arc::new(AppContext::new(config).await.expect("context should build"));
        ctx.start().await.expect("context should start");
        let app = router(Arc::clone(&ctx));

        Self { ctx, app, _temp_dir: temp_dir }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.expect("router is infallible")
    }

    pub async fn shutdown(self) {
        self.ctx.shutdown().await;
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).expect("valid request")
}

pub fn get_from(uri: &str, peer: &str) -> Request<Body> {
    let mut request = get(uri);
    let addr: SocketAddr = peer.parse().expect("valid socket address");
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

pub fn admin(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-admin-token", ADMIN_TOKEN);
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .expect("valid request"),
        None => builder.body(Body::empty()).expect("valid request"),
    }
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body should be readable");
    serde_json::from_slice(&bytes).expect("body should be JSON")
}

pub fn roster_source(id: &str, url: &str) -> SourceConfig {
    SourceConfig {
        id: id.to_string(),
        kind: SourceKind::Roster,
        name: "Hospital rota".to_string(),
        color: Some("#f97316".to_string()),
        url: url.to_string(),
        credential_ref: None,
        write_policy: Default::default(),
        enabled: true,
        options: Default::default(),
    }
}
