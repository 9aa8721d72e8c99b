use crate::auth::CurrentUser;
use crate::task::web::TaskState;
use crate::task::{SortKey, Task, TaskEvent, TaskService};
use crate::web::api::v1::ServerErrorResponse;
use axum::{
    Router,
    extract::{Extension, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

/// JSON representation of a Task for API responses. The status field
/// carries the effective status as of the request.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskJson {
    /// Unique identifier for the task
    id: i32,
    /// Title of the task
    title: String,
    /// Optional free-form description
    description: Option<String>,
    /// Effective status: "Not started", "Pending" or "Completed"
    status: String,
    /// Start date as YYYY-MM-DD, if set
    start_date: Option<String>,
    /// Due date as YYYY-MM-DD, if set
    due_date: Option<String>,
    /// Creation timestamp
    created_at: String,
}

impl TaskJson {
    fn from_task(task: &Task, today: chrono::NaiveDate) -> Self {
        Self {
            id: task.id(),
            title: task.title().to_string(),
            description: task.description().map(str::to_string),
            status: task.effective_status(today).to_string(),
            start_date: task.start_date().map(|d| d.format("%Y-%m-%d").to_string()),
            due_date: task.due_date().map(|d| d.format("%Y-%m-%d").to_string()),
            created_at: task.created_at().format("%Y-%m-%dT%H:%M:%S").to_string(),
        }
    }
}

/// API response for listing the acting user's tasks.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TasksResponse {
    /// Ordered list of tasks
    pub tasks: Vec<TaskJson>,
    /// Total number of tasks
    pub count: usize,
}

/// JSON representation of a task projected as a calendar event.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EventJson {
    /// Unique identifier for the task
    pub id: i32,
    /// Title of the task
    pub title: String,
    /// Optional free-form description
    pub description: Option<String>,
    /// Event start as YYYY-MM-DD, if set
    pub start: Option<String>,
    /// Event end (the due date) as YYYY-MM-DD, if set
    pub end: Option<String>,
    /// Effective status of the task
    pub status: String,
}

impl From<TaskEvent> for EventJson {
    fn from(event: TaskEvent) -> Self {
        Self {
            id: event.id,
            title: event.title,
            description: event.description,
            start: event.start,
            end: event.end,
            status: event.status,
        }
    }
}

/// Query parameters for ordering the task listing.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TasksQuery {
    /// Sort order: "created" (default), "start_date" or "due_date"
    #[serde(default)]
    sort: Option<String>,
}

/// Handler for GET /api/v1/tasks - Returns the acting user's tasks in
/// JSON format.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/api/v1/tasks",
    params(
        ("sort" = Option<String>, Query, description = "Sort order: created (default), start_date or due_date")
    ),
    responses(
        (status = 200, description = "Successfully retrieved tasks", body = TasksResponse),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 500, description = "Internal server error", body = ServerErrorResponse)
    ),
    tag = "Tasks"
)]
pub async fn get_tasks_handler(
    State(state): State<Arc<TaskState>>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<TasksQuery>,
) -> Result<Json<TasksResponse>, (StatusCode, Json<ServerErrorResponse>)> {
    let service = TaskService::new(&state.db);
    let sort = SortKey::from_param(query.sort.as_deref());

    match service.list_tasks(user.id, sort).await {
        Ok(tasks) => {
            let today = Utc::now().date_naive();
            let json_tasks: Vec<TaskJson> = tasks
                .iter()
                .map(|task| TaskJson::from_task(task, today))
                .collect();
            let count = json_tasks.len();

            Ok(Json(TasksResponse {
                tasks: json_tasks,
                count,
            }))
        }
        Err(err) => {
            tracing::error!("Failed to list tasks: {}", err);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ServerErrorResponse::new(
                    "Failed to retrieve tasks".to_string(),
                )),
            ))
        }
    }
}

/// Handler for GET /api/v1/events - Returns the acting user's tasks
/// projected as calendar events.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/api/v1/events",
    responses(
        (status = 200, description = "Successfully exported events", body = [EventJson]),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 500, description = "Internal server error", body = ServerErrorResponse)
    ),
    tag = "Tasks"
)]
pub async fn get_events_handler(
    State(state): State<Arc<TaskState>>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<Vec<EventJson>>, (StatusCode, Json<ServerErrorResponse>)> {
    let service = TaskService::new(&state.db);

    match service.export_events(user.id).await {
        Ok(events) => Ok(Json(events.into_iter().map(EventJson::from).collect())),
        Err(err) => {
            tracing::error!("Failed to export events: {}", err);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ServerErrorResponse::new(
                    "Failed to export events".to_string(),
                )),
            ))
        }
    }
}

/// Creates and returns the tasks API router.
pub fn create_api_router(state: Arc<TaskState>) -> Router {
    Router::new()
        .route("/tasks", get(get_tasks_handler))
        .route("/events", get(get_events_handler))
        .with_state(state)
}
