use super::*;
use std::time::Duration;

use axum::{body, body::Body, http::Request, response::Response};
use futures::StreamExt;
use shared::domain::TaskStatus;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tower::ServiceExt;

async fn test_state() -> Arc<AppState> {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    for (email, credential) in [
        ("leader@example.com", "lead-pw"),
        ("member@example.com", "member-pw"),
        ("outsider@example.com", "pw"),
    ] {
        storage
            .set_credential(email, credential)
            .await
            .expect("credential");
    }
    let api = ApiContext {
        storage,
        roster: shared::roster::Roster::default_team(),
        sessions: SessionAuthority {
            secret: "test-secret".into(),
            ttl_seconds: 60,
        },
    };
    Arc::new(AppState::new(api))
}

async fn test_app() -> (Router, Arc<AppState>) {
    let state = test_state().await;
    (build_router(Arc::clone(&state)), state)
}

async fn json_body<T: serde::de::DeserializeOwned>(response: Response) -> T {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

fn json_request(
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: serde_json::Value,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).expect("request")
}

fn bare_request(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .expect("request")
}

async fn token_for(app: &Router, email: &str, credential: &str) -> String {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/login",
            None,
            serde_json::json!({ "email": email, "credential": credential }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let login: LoginResponse = json_body(response).await;
    login.token
}

async fn create(app: &Router, token: &str, title: &str, date: &str) -> Response {
    app.clone()
        .oneshot(json_request(
            "POST",
            "/tasks",
            Some(token),
            serde_json::json!({
                "title": title,
                "description": "",
                "date": date,
                "assignee": "嵐欽",
            }),
        ))
        .await
        .expect("response")
}

async fn next_snapshot<S>(ws: &mut S) -> Vec<Task>
where
    S: futures::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("message before timeout")
            .expect("stream open")
            .expect("frame");
        if let WsMessage::Text(text) = message {
            match serde_json::from_str::<ServerEvent>(&text).expect("event") {
                ServerEvent::TaskSnapshot { tasks } => return tasks,
                ServerEvent::Error(err) => panic!("feed error: {err}"),
            }
        }
    }
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let (app, _state) = test_app().await;
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn login_failures_map_to_401_and_403() {
    let (app, _state) = test_app().await;
    let wrong = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/login",
            None,
            serde_json::json!({ "email": "leader@example.com", "credential": "nope" }),
        ))
        .await
        .expect("response");
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    let err: ApiError = json_body(wrong).await;
    assert_eq!(err.code, ErrorCode::InvalidCredential);

    let outsider = app
        .oneshot(json_request(
            "POST",
            "/login",
            None,
            serde_json::json!({ "email": "outsider@example.com", "credential": "pw" }),
        ))
        .await
        .expect("response");
    assert_eq!(outsider.status(), StatusCode::FORBIDDEN);
    let err: ApiError = json_body(outsider).await;
    assert_eq!(err.code, ErrorCode::UnauthorizedUser);
}

#[tokio::test]
async fn login_response_carries_the_server_roster() {
    let (app, _state) = test_app().await;
    let response = app
        .oneshot(json_request(
            "POST",
            "/login",
            None,
            serde_json::json!({ "email": "member@example.com", "credential": "member-pw" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let login: LoginResponse = json_body(response).await;
    assert_eq!(login.user.name, "嵐欽");
    assert_eq!(login.roster, shared::roster::Roster::default_team().users());
}

#[tokio::test]
async fn task_routes_require_bearer_token() {
    let (app, _state) = test_app().await;
    let response = app
        .oneshot(Request::get("/tasks").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn leader_creates_and_member_is_refused() {
    let (app, state) = test_app().await;
    let leader = token_for(&app, "leader@example.com", "lead-pw").await;
    let member = token_for(&app, "member@example.com", "member-pw").await;
    let mut changes = state.changes.subscribe();

    let response = create(&app, &leader, "Check valve", "2025-01-10").await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let task: Task = json_body(response).await;
    assert_eq!(task.status, TaskStatus::Incomplete);
    assert!(changes.try_recv().is_ok(), "mutation notifies feeds");

    let response = create(&app, &member, "Sneaky", "2025-01-10").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let err: ApiError = json_body(response).await;
    assert_eq!(err.code, ErrorCode::PermissionDenied);
    assert!(changes.try_recv().is_err());
}

#[tokio::test]
async fn range_query_filters_and_half_ranges_are_rejected() {
    let (app, _state) = test_app().await;
    let leader = token_for(&app, "leader@example.com", "lead-pw").await;
    for (title, date) in [
        ("Before", "2024-12-31"),
        ("First", "2025-01-01"),
        ("Last", "2025-01-31"),
        ("After", "2025-02-01"),
    ] {
        assert_eq!(
            create(&app, &leader, title, date).await.status(),
            StatusCode::CREATED
        );
    }

    let response = app
        .clone()
        .oneshot(bare_request(
            "GET",
            "/tasks?from=2025-01-01&to=2025-01-31",
            &leader,
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let tasks: Vec<Task> = json_body(response).await;
    let titles: Vec<_> = tasks.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, vec!["First", "Last"]);

    let response = app
        .oneshot(bare_request("GET", "/tasks?from=2025-01-01", &leader))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn member_reports_but_cannot_delete() {
    let (app, _state) = test_app().await;
    let leader = token_for(&app, "leader@example.com", "lead-pw").await;
    let member = token_for(&app, "member@example.com", "member-pw").await;
    let task: Task = json_body(create(&app, &leader, "Check valve", "2025-01-10").await).await;
    let uri = format!("/tasks/{}", task.id);

    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &uri,
            Some(&member),
            serde_json::json!({ "status": "complete", "report_note": "done, no leaks" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let updated: Task = json_body(response).await;
    assert_eq!(updated.status, TaskStatus::Complete);
    assert_eq!(updated.report_note.as_deref(), Some("done, no leaks"));

    let response = app
        .clone()
        .oneshot(bare_request("DELETE", &uri, &member))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .clone()
        .oneshot(bare_request("DELETE", &uri, &leader))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(bare_request("GET", &uri, &leader))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let (app, _state) = test_app().await;
    let leader = token_for(&app, "leader@example.com", "lead-pw").await;
    let huge = "x".repeat(MAX_BODY_BYTES + 1);
    let response = create(&app, &leader, &huge, "2025-01-10").await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn websocket_feed_pushes_snapshot_on_connect_and_after_change() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let (app, _state) = test_app().await;
    let leader = token_for(&app, "leader@example.com", "lead-pw").await;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    let served = app.clone();
    tokio::spawn(async move {
        let _ = axum::serve(listener, served).await;
    });

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws?token={leader}"))
        .await
        .expect("connect");
    assert!(next_snapshot(&mut ws).await.is_empty());
    assert_eq!(
        create(&app, &leader, "Check valve", "2025-01-10").await.status(),
        StatusCode::CREATED
    );
    let tasks = next_snapshot(&mut ws).await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "Check valve");
}
