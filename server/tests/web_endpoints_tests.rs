use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use sea_orm::DatabaseConnection;
use taskflow_server::auth::AuthState;
use taskflow_server::config::Config;
use taskflow_server::task::web::TaskState;
use taskflow_server::web::create_app;
use tower::ServiceExt;

mod common;

use common::setup;

fn test_config() -> Config {
    Config {
        db_url: "unused".to_string(),
        port: 0,
        jwt_secret: "test-secret".to_string(),
    }
}

fn create_test_app(db: DatabaseConnection) -> Router {
    let db = Arc::new(db);
    let auth_state = Arc::new(AuthState::new(&test_config(), db.clone()));
    let task_state = Arc::new(TaskState { db });
    create_app(auth_state, task_state)
}

async fn body_text(response: axum::response::Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

fn form_request(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Registers a user through the web form and logs in, returning the
/// `auth_token` cookie pair.
async fn register_and_login(app: &Router, username: &str) -> String {
    let register_body = format!(
        "username={u}&email={u}%40example.com&password=secret123&confirm_password=secret123",
        u = username
    );
    let response = app
        .clone()
        .oneshot(form_request("/register", &register_body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers()[header::LOCATION],
        "/login?registered=1"
    );

    let login_body = format!("username={}&password=secret123", username);
    let response = app
        .clone()
        .oneshot(form_request("/login", &login_body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "/tasks");

    let set_cookie = response.headers()[header::SET_COOKIE]
        .to_str()
        .unwrap()
        .to_string();
    assert!(set_cookie.starts_with("auth_token="));
    // Keep only the name=value pair for subsequent requests.
    set_cookie.split(';').next().unwrap().to_string()
}

#[tokio::test]
async fn can_check_health_endpoint() -> anyhow::Result<()> {
    let state = setup().await?;
    let app = create_test_app(state.db);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "OK");
    Ok(())
}

#[tokio::test]
async fn unauthenticated_tasks_page_redirects_to_login() -> anyhow::Result<()> {
    let state = setup().await?;
    let app = create_test_app(state.db);

    let response = app
        .oneshot(Request::builder().uri("/tasks").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "/login");
    Ok(())
}

#[tokio::test]
async fn invalid_login_rerenders_form_with_error() -> anyhow::Result<()> {
    let state = setup().await?;
    let app = create_test_app(state.db);

    let response = app
        .oneshot(form_request("/login", "username=ghost&password=nope"))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    assert!(body.contains("Invalid username or password"));
    Ok(())
}

#[tokio::test]
async fn duplicate_registration_rerenders_form_with_error() -> anyhow::Result<()> {
    let state = setup().await?;
    let app = create_test_app(state.db);

    register_and_login(&app, "alice").await;

    let response = app
        .oneshot(form_request(
            "/register",
            "username=alice&email=fresh%40example.com&password=secret123&confirm_password=secret123",
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_text(response).await;
    assert!(body.contains("Username or email already exists"));
    Ok(())
}

#[tokio::test]
async fn can_create_and_list_tasks_through_web_flow() -> anyhow::Result<()> {
    let state = setup().await?;
    let app = create_test_app(state.db);

    let cookie = register_and_login(&app, "alice").await;

    let mut request = form_request("/tasks/new", "title=Write+report&description=Q3+numbers");
    request
        .headers_mut()
        .insert(header::COOKIE, cookie.parse().unwrap());
    let response = app.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "/tasks");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/tasks")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    assert!(body.contains("Write report"));
    assert!(body.contains("Pending"));
    Ok(())
}

#[tokio::test]
async fn empty_title_rerenders_new_task_form() -> anyhow::Result<()> {
    let state = setup().await?;
    let app = create_test_app(state.db);

    let cookie = register_and_login(&app, "alice").await;

    let mut request = form_request("/tasks/new", "title=++&description=");
    request
        .headers_mut()
        .insert(header::COOKIE, cookie.parse().unwrap());
    let response = app.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_text(response).await;
    assert!(body.contains("Task title cannot be empty"));
    Ok(())
}

#[tokio::test]
async fn users_cannot_see_each_others_tasks() -> anyhow::Result<()> {
    let state = setup().await?;
    let app = create_test_app(state.db);

    let alice_cookie = register_and_login(&app, "alice").await;
    let bob_cookie = register_and_login(&app, "bob").await;

    let mut request = form_request("/tasks/new", "title=Alice+secret");
    request
        .headers_mut()
        .insert(header::COOKIE, alice_cookie.parse().unwrap());
    let response = app.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/tasks")
                .header(header::COOKIE, &bob_cookie)
                .body(Body::empty())?,
        )
        .await?;
    let body = body_text(response).await;
    assert!(!body.contains("Alice secret"));
    Ok(())
}

#[tokio::test]
async fn api_requires_bearer_token() -> anyhow::Result<()> {
    let state = setup().await?;
    let app = create_test_app(state.db);

    let response = app
        .oneshot(Request::builder().uri("/api/v1/tasks").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn can_list_tasks_through_json_api() -> anyhow::Result<()> {
    let state = setup().await?;
    let app = create_test_app(state.db);

    let cookie = register_and_login(&app, "alice").await;
    let mut request = form_request("/tasks/new", "title=Write+report");
    request
        .headers_mut()
        .insert(header::COOKIE, cookie.parse().unwrap());
    app.clone().oneshot(request).await?;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r#"{"username":"alice","password":"secret123"}"#,
                ))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let login: serde_json::Value = serde_json::from_str(&body_text(response).await)?;
    let token = login["token"].as_str().expect("token in login response");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/tasks")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let tasks: serde_json::Value = serde_json::from_str(&body_text(response).await)?;
    assert_eq!(tasks["count"], 1);
    assert_eq!(tasks["tasks"][0]["title"], "Write report");
    assert_eq!(tasks["tasks"][0]["status"], "Pending");
    Ok(())
}

#[tokio::test]
async fn api_rejects_invalid_credentials() -> anyhow::Result<()> {
    let state = setup().await?;
    let app = create_test_app(state.db);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"username":"ghost","password":"nope"}"#))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let error: serde_json::Value = serde_json::from_str(&body_text(response).await)?;
    assert_eq!(error["error"], "INVALID_CREDENTIALS");
    Ok(())
}
