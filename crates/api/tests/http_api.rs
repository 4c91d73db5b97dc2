//! End-to-end tests of the HTTP surface against a temporary database.

mod support;

use std::time::Duration;

use axum::http::{header, Request, StatusCode};
use axum::body::Body;
use futures::StreamExt;
use serde_json::json;
use support::{admin, get, get_from, json_body, roster_source, TestApp, DISPLAY_TOKEN};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn roster_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rota"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "shifts": [
                {
                    "id": "early-0304",
                    "role": "Early",
                    "start": "2024-03-04T06:00:00Z",
                    "end": "2024-03-04T14:00:00Z"
                },
                {
                    "id": "late-0305",
                    "role": "Late",
                    "start": "2024-03-05T14:00:00Z",
                    "end": "2024-03-05T22:00:00Z"
                }
            ]
        })))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn health_reports_components() {
    let app = TestApp::new().await;

    let response = app.send(get("/health")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["is_healthy"], true);
    let names: Vec<&str> =
        body["components"].as_array().unwrap().iter().map(|c| c["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["database", "scheduler", "live"]);

    app.shutdown().await;
}

#[tokio::test]
async fn empty_store_still_answers_events() {
    let app = TestApp::new().await;

    let response = app
        .send(get_from("/api/calendar/events?start=2024-03-01&end=2024-03-08", "10.0.0.1:5000"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["window"]["start"], "2024-03-01T00:00:00Z");
    assert_eq!(body["window"]["end"], "2024-03-08T00:00:00Z");
    assert_eq!(body["events"], json!([]));
    assert_eq!(body["partial"], false);

    app.shutdown().await;
}

#[tokio::test]
async fn garbage_window_falls_back_to_defaults() {
    let app = TestApp::new().await;

    let response =
        app.send(get_from("/api/calendar/events?start=soon&end=later", "10.0.0.2:5000")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    let start = body["window"]["start"].as_str().unwrap();
    assert!(start.ends_with("T00:00:00Z"), "default start is UTC midnight, got {start}");

    app.shutdown().await;
}

#[tokio::test]
async fn read_path_is_rate_limited_per_peer() {
    let app = TestApp::new().await;

    for expected in ["2", "1", "0"] {
        let response = app.send(get_from("/api/calendar/events", "10.0.0.3:5000")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-remaining"], expected);
    }

    let rejected = app.send(get_from("/api/calendar/events", "10.0.0.3:6000")).await;
    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(rejected.headers()["x-ratelimit-remaining"], "0");
    let retry_after: u64 =
        rejected.headers()[header::RETRY_AFTER].to_str().unwrap().parse().unwrap();
    assert!(retry_after >= 1);
    assert_eq!(json_body(rejected).await["error"], "rate_limited");

    let other_peer = app.send(get_from("/api/calendar/events", "10.0.0.4:5000")).await;
    assert_eq!(other_peer.status(), StatusCode::OK);

    app.shutdown().await;
}

#[tokio::test]
async fn glacial_refill_still_answers_with_retry_after() {
    let app = TestApp::with_config(|config| {
        config.rate_limit.max_tokens = 1.0;
        config.rate_limit.refill_per_sec = 1e-30;
    })
    .await;

    assert_eq!(app.send(get_from("/api/calendar/events", "10.0.0.9:5000")).await.status(), StatusCode::OK);
    let rejected = app.send(get_from("/api/calendar/events", "10.0.0.9:5000")).await;
    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(rejected.headers()[header::RETRY_AFTER], u64::MAX.to_string().as_str());

    app.shutdown().await;
}

#[tokio::test]
async fn display_token_gets_its_own_bucket() {
    let app = TestApp::new().await;

    for _ in 0..3 {
        app.send(get_from("/api/calendar/events", "10.0.0.5:5000")).await;
    }
    let exhausted = app.send(get_from("/api/calendar/events", "10.0.0.5:5000")).await;
    assert_eq!(exhausted.status(), StatusCode::TOO_MANY_REQUESTS);

    let mut with_header = get_from("/api/calendar/events", "10.0.0.5:5000");
    with_header.headers_mut().insert("x-display-token", DISPLAY_TOKEN.parse().unwrap());
    assert_eq!(app.send(with_header).await.status(), StatusCode::OK);

    let with_query =
        get_from(&format!("/api/calendar/events?token={DISPLAY_TOKEN}"), "10.0.0.5:5000");
    let response = app.send(with_query).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "1");

    // Unknown tokens are rate limited by address
    let unknown = get_from("/api/calendar/events?token=nope", "10.0.0.5:5000");
    assert_eq!(app.send(unknown).await.status(), StatusCode::TOO_MANY_REQUESTS);

    app.shutdown().await;
}

#[tokio::test]
async fn live_stream_opens_with_connected_and_is_rate_limited() {
    let app = TestApp::new().await;

    let response = app.send(get_from("/api/live", "10.0.0.7:5000")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "2");

    let mut frames = response.into_body().into_data_stream();
    let first = tokio::time::timeout(Duration::from_secs(5), frames.next())
        .await
        .expect("first frame arrives")
        .expect("stream is open")
        .expect("frame is readable");
    let first = String::from_utf8(first.to_vec()).unwrap();
    assert!(first.starts_with("event: connected\n"), "got {first:?}");
    assert!(first.contains("data: {"), "got {first:?}");
    assert_eq!(app.ctx.broadcaster.client_count(), 1);

    for _ in 0..2 {
        app.send(get_from("/api/live", "10.0.0.7:6000")).await;
    }
    let rejected = app.send(get_from("/api/live", "10.0.0.7:7000")).await;
    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(rejected.headers().contains_key(header::RETRY_AFTER));

    drop(frames);
    app.shutdown().await;
}

#[tokio::test]
async fn admin_requires_the_token() {
    let app = TestApp::new().await;

    let missing = app.send(get("/api/admin/sources")).await;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(missing).await["error"], "unauthorized");

    let wrong = Request::get("/api/admin/sources")
        .header(header::AUTHORIZATION, "Bearer admin-secreT")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.send(wrong).await.status(), StatusCode::UNAUTHORIZED);

    let bearer = Request::get("/api/admin/sources")
        .header(header::AUTHORIZATION, "Bearer admin-secret")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.send(bearer).await.status(), StatusCode::OK);

    app.shutdown().await;
}

#[tokio::test]
async fn admin_is_closed_without_a_configured_token() {
    let app = TestApp::with_config(|config| config.server.admin_token = None).await;

    let response = app.send(admin("GET", "/api/admin/sources", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.shutdown().await;
}

#[tokio::test]
async fn configured_sources_are_seeded() {
    let app = TestApp::with_config(|config| {
        config.sources.push(roster_source("rota", "http://127.0.0.1:9/rota"));
    })
    .await;

    let body = json_body(app.send(admin("GET", "/api/admin/sources", None)).await).await;
    let sources = body.as_array().unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0]["id"], "rota");
    assert_eq!(sources[0]["kind"], "roster");
    assert_eq!(sources[0]["color"], "#f97316");

    app.shutdown().await;
}

#[tokio::test]
async fn sources_can_be_saved_listed_and_deleted() {
    let app = TestApp::new().await;

    let body = json!({
        "kind": "ics_feed",
        "name": "School",
        "url": "https://school.example.org/calendar.ics",
        "color": "#22c55e"
    });
    let saved = app.send(admin("PUT", "/api/admin/sources/school", Some(body))).await;
    assert_eq!(saved.status(), StatusCode::OK);
    let saved = json_body(saved).await;
    assert_eq!(saved["id"], "school");
    assert_eq!(saved["enabled"], true);
    assert_eq!(saved["consecutive_errors"], 0);

    let listed = json_body(app.send(admin("GET", "/api/admin/sources", None)).await).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let deleted = app.send(admin("DELETE", "/api/admin/sources/school", None)).await;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let again = app.send(admin("DELETE", "/api/admin/sources/school", None)).await;
    assert_eq!(again.status(), StatusCode::NOT_FOUND);

    app.shutdown().await;
}

#[tokio::test]
async fn malformed_source_body_is_a_bad_request() {
    let app = TestApp::new().await;

    let body = json!({ "kind": "fax_machine", "name": "Nope", "url": "https://example.org" });
    let response = app.send(admin("PUT", "/api/admin/sources/nope", Some(body))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "bad_request");

    app.shutdown().await;
}

#[tokio::test]
async fn trigger_syncs_and_feeds_the_merged_read() {
    let server = roster_server().await;
    let app = TestApp::with_config(|config| {
        config.sources.push(roster_source("rota", &format!("{}/rota", server.uri())));
    })
    .await;

    let report = app.send(admin("POST", "/api/admin/sources/rota/sync", None)).await;
    assert_eq!(report.status(), StatusCode::OK);
    let report = json_body(report).await;
    assert_eq!(report["source_id"], "rota");
    assert_eq!(report["fetched"], 2);
    assert_eq!(report["new"], 2);

    let events = app
        .send(get_from("/api/calendar/events?start=2024-03-04&end=2024-03-05", "10.0.0.6:5000"))
        .await;
    let events = json_body(events).await;
    let events = events["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["title"], "Early");
    assert_eq!(events[0]["color"], "#f97316");
    assert_eq!(events[0]["origin"]["source_id"], "rota");

    let limited = app.send(admin("POST", "/api/admin/sources/rota/sync", None)).await;
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(limited.headers().contains_key(header::RETRY_AFTER));

    let forced = app.send(admin("POST", "/api/admin/sources/rota/sync?force=true", None)).await;
    assert_eq!(forced.status(), StatusCode::OK);
    let forced = json_body(forced).await;
    assert_eq!(forced["new"], 0);
    assert_eq!(forced["updated"], 0);

    app.shutdown().await;
}

#[tokio::test]
async fn trigger_for_unknown_source_is_not_found() {
    let app = TestApp::new().await;

    let response = app.send(admin("POST", "/api/admin/sources/ghost/sync", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.shutdown().await;
}

#[tokio::test]
async fn sync_all_reports_per_source_outcomes() {
    let server = roster_server().await;
    let app = TestApp::with_config(|config| {
        config.sources.push(roster_source("rota", &format!("{}/rota", server.uri())));
        config.sources.push(roster_source("broken", &format!("{}/missing", server.uri())));
    })
    .await;

    let response = app.send(admin("POST", "/api/admin/sync", None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let summary = json_body(response).await;
    assert_eq!(summary["sources"], 2);
    assert_eq!(summary["fetched"], 2);
    assert_eq!(summary["upserts"], 2);
    assert_eq!(summary["errors"], 1);

    let status = json_body(app.send(get("/api/sync/status")).await).await;
    assert_eq!(status["status"], "degraded");
    let broken = status["sources"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["id"] == "broken")
        .unwrap();
    assert_eq!(broken["consecutive_errors"], 1);

    app.shutdown().await;
}

#[tokio::test]
async fn sync_status_shape() {
    let app = TestApp::new().await;

    let response = app.send(get("/api/sync/status")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connected_clients"], 0);
    assert_eq!(body["active_schedules"], json!([]));
    assert_eq!(body["metrics"]["cycles_started"], 0);
    assert!(body["fetch"].is_object());
    assert!(body["generated_at"].is_string());

    app.shutdown().await;
}
