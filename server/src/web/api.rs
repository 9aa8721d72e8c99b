use std::sync::Arc;

use crate::{
    auth::{self, AuthState},
    task::{self, web::TaskState},
};

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
};

use tower::ServiceBuilder;
use utoipa::OpenApi;

pub mod v1 {
    use serde::{Deserialize, Serialize};
    use utoipa::ToSchema;

    /// JSON error envelope for server-side API failures.
    #[derive(Debug, Serialize, Deserialize, ToSchema)]
    pub struct ServerErrorResponse {
        /// Human-readable description of the failure
        pub error: String,
    }

    impl ServerErrorResponse {
        pub fn new(error: String) -> Self {
            Self { error }
        }
    }
}

/// OpenAPI document for the JSON API.
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::task::api::v1::get_tasks_handler,
        crate::task::api::v1::get_events_handler,
    ),
    components(schemas(
        crate::task::api::v1::TaskJson,
        crate::task::api::v1::TasksResponse,
        crate::task::api::v1::EventJson,
        v1::ServerErrorResponse,
    )),
    tags((name = "Tasks", description = "Task listing and calendar export"))
)]
pub struct ApiDoc;

/// Creates the API routes for JSON API endpoints.
pub fn create_api_router(auth_state: Arc<AuthState>, task_state: Arc<TaskState>) -> axum::Router {
    let login_router = auth::api::v1::create_api_router(auth_state.clone());
    let tasks_router = task::api::v1::create_api_router(task_state.clone());
    let protected_routes = tasks_router
        .layer(ServiceBuilder::new().layer(from_fn(auth::api::v1::require_auth_middleware)));
    let public_routes = login_router;
    let api_routes = public_routes.merge(protected_routes);
    Router::new()
        .nest("/api/v1", api_routes)
        .layer(ServiceBuilder::new().layer(from_fn_with_state(
            auth_state,
            auth::api::v1::auth_user_middleware,
        )))
}
