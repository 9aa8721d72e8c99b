use askama::Template;
use axum::{
    Form, Router,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use crate::auth::CurrentUser;
use crate::task::{NewTask, SortKey, Task, TaskService, TaskServiceError, TaskUpdate};

#[derive(Debug, Deserialize)]
pub struct TaskForm {
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    due_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EditTaskForm {
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    due_date: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    sort: Option<String>,
}

/// Custom error type for task handler operations.
#[derive(Debug, thiserror::Error)]
enum TaskWebError {
    /// Represents an error during template rendering.
    #[error("Template rendering failed")]
    Template(#[from] askama::Error),
    /// Represents a task service error.
    #[error("Task service error")]
    Service(#[from] TaskServiceError),
}

impl axum::response::IntoResponse for TaskWebError {
    fn into_response(self) -> axum::response::Response {
        let (status_code, user_facing_error_message) = match &self {
            TaskWebError::Service(TaskServiceError::TaskNotFound(_)) => {
                (StatusCode::NOT_FOUND, "Task not found.".to_string())
            }
            TaskWebError::Service(err @ TaskServiceError::Forbidden(_)) => {
                (StatusCode::FORBIDDEN, err.to_string())
            }
            TaskWebError::Service(err) if err.is_validation() => {
                (StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
            }
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An unexpected error occurred while processing your request. Please try again later."
                    .to_string(),
            ),
        };

        let error_template = ErrorPageTemplate::new(user_facing_error_message);
        let Ok(rendered) = error_template.render() else {
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        };

        (status_code, Html(rendered)).into_response()
    }
}

/// One task row, preformatted for display.
struct TaskRowView {
    id: i32,
    title: String,
    description: String,
    status: String,
    start_date: String,
    due_date: String,
    created_at: String,
}

impl TaskRowView {
    fn from_task(task: &Task, today: chrono::NaiveDate) -> Self {
        Self {
            id: task.id(),
            title: task.title().to_string(),
            description: task.description().unwrap_or_default().to_string(),
            status: task.effective_status(today).to_string(),
            start_date: task
                .start_date()
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            due_date: task
                .due_date()
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            created_at: task.created_at().format("%Y-%m-%d %H:%M").to_string(),
        }
    }
}

#[derive(Template)]
#[template(path = "tasks.html")]
struct TasksTemplate {
    username: String,
    sort: &'static str,
    tasks: Vec<TaskRowView>,
}

#[derive(Template)]
#[template(path = "tasks/new_task_form.html")]
struct NewTaskFormTemplate {
    error: Option<String>,
    title: String,
    description: String,
    start_date: String,
    due_date: String,
}

impl NewTaskFormTemplate {
    fn empty() -> Self {
        Self {
            error: None,
            title: String::new(),
            description: String::new(),
            start_date: String::new(),
            due_date: String::new(),
        }
    }

    fn refilled(form: &TaskForm, error: String) -> Self {
        Self {
            error: Some(error),
            title: form.title.clone(),
            description: form.description.clone().unwrap_or_default(),
            start_date: form.start_date.clone().unwrap_or_default(),
            due_date: form.due_date.clone().unwrap_or_default(),
        }
    }
}

#[derive(Template)]
#[template(path = "tasks/edit_task_form.html")]
struct EditTaskFormTemplate {
    error: Option<String>,
    id: i32,
    title: String,
    description: String,
    start_date: String,
    due_date: String,
    status: String,
}

impl EditTaskFormTemplate {
    fn from_task(task: &Task) -> Self {
        Self {
            error: None,
            id: task.id(),
            title: task.title().to_string(),
            description: task.description().unwrap_or_default().to_string(),
            start_date: task
                .start_date()
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            due_date: task
                .due_date()
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            status: task.status().to_string(),
        }
    }

    fn refilled(id: i32, form: &EditTaskForm, error: String) -> Self {
        Self {
            error: Some(error),
            id,
            title: form.title.clone(),
            description: form.description.clone().unwrap_or_default(),
            start_date: form.start_date.clone().unwrap_or_default(),
            due_date: form.due_date.clone().unwrap_or_default(),
            status: form.status.clone().unwrap_or_default(),
        }
    }
}

#[derive(Template)]
#[template(path = "error.html")]
struct ErrorPageTemplate {
    message: String,
}

impl ErrorPageTemplate {
    fn new(message: String) -> Self {
        Self { message }
    }
}

#[derive(Clone, Debug)]
pub struct TaskState {
    pub db: Arc<sea_orm::DatabaseConnection>,
}

/// Handler for the /tasks endpoint that lists the acting user's tasks in
/// the requested order.
#[tracing::instrument(skip(state))]
async fn list_tasks_handler(
    State(state): State<Arc<TaskState>>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<ListQuery>,
) -> Result<Html<String>, TaskWebError> {
    let task_service = TaskService::new(&state.db);
    let sort = SortKey::from_param(query.sort.as_deref());
    let tasks = task_service.list_tasks(user.id, sort).await?;

    let today = Utc::now().date_naive();
    let template = TasksTemplate {
        username: user.username,
        sort: sort.as_param(),
        tasks: tasks
            .iter()
            .map(|task| TaskRowView::from_task(task, today))
            .collect(),
    };
    template.render().map(Html).map_err(TaskWebError::from)
}

/// Handler for serving the new task form.
#[tracing::instrument]
async fn new_task_form_handler() -> Result<Html<String>, TaskWebError> {
    let template = NewTaskFormTemplate::empty();
    template.render().map(Html).map_err(TaskWebError::from)
}

/// Handler for creating a new task via POST request. Validation failures
/// re-render the form with the submitted values and a message.
#[tracing::instrument(skip(state))]
async fn create_task_handler(
    State(state): State<Arc<TaskState>>,
    Extension(user): Extension<CurrentUser>,
    Form(form): Form<TaskForm>,
) -> Result<Response, TaskWebError> {
    let task_service = TaskService::new(&state.db);
    let new_task = NewTask {
        title: form.title.clone(),
        description: form.description.clone(),
        start_date: form.start_date.clone(),
        due_date: form.due_date.clone(),
    };

    match task_service.create_task(user.id, new_task).await {
        Ok(_) => Ok(Redirect::to("/tasks").into_response()),
        Err(err) if err.is_validation() => {
            let template = NewTaskFormTemplate::refilled(&form, err.to_string());
            let html = template.render().map_err(TaskWebError::from)?;
            Ok((StatusCode::UNPROCESSABLE_ENTITY, Html(html)).into_response())
        }
        Err(err) => Err(TaskWebError::Service(err)),
    }
}

/// Handler for serving the edit task form.
#[tracing::instrument(skip(state))]
async fn edit_task_form_handler(
    State(state): State<Arc<TaskState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> Result<Html<String>, TaskWebError> {
    let task_service = TaskService::new(&state.db);
    let task = task_service.get_task(user.id, id).await?;
    let template = EditTaskFormTemplate::from_task(&task);
    template.render().map(Html).map_err(TaskWebError::from)
}

/// Handler for updating a task via POST request.
#[tracing::instrument(skip(state))]
async fn update_task_handler(
    State(state): State<Arc<TaskState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Form(form): Form<EditTaskForm>,
) -> Result<Response, TaskWebError> {
    let task_service = TaskService::new(&state.db);
    let update = TaskUpdate {
        title: form.title.clone(),
        description: form.description.clone(),
        start_date: form.start_date.clone(),
        due_date: form.due_date.clone(),
        status: form.status.clone(),
    };

    match task_service.edit_task(user.id, id, update).await {
        Ok(_) => Ok(Redirect::to("/tasks").into_response()),
        Err(err) if err.is_validation() => {
            let template = EditTaskFormTemplate::refilled(id, &form, err.to_string());
            let html = template.render().map_err(TaskWebError::from)?;
            Ok((StatusCode::UNPROCESSABLE_ENTITY, Html(html)).into_response())
        }
        Err(err) => Err(TaskWebError::Service(err)),
    }
}

/// Handler for deleting a task via POST request.
#[tracing::instrument(skip(state))]
async fn delete_task_handler(
    State(state): State<Arc<TaskState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> Result<Redirect, TaskWebError> {
    let task_service = TaskService::new(&state.db);
    task_service.delete_task(user.id, id).await?;
    Ok(Redirect::to("/tasks"))
}

/// Handler for marking a task completed via POST request.
#[tracing::instrument(skip(state))]
async fn complete_task_handler(
    State(state): State<Arc<TaskState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> Result<Redirect, TaskWebError> {
    let task_service = TaskService::new(&state.db);
    task_service.complete_task(user.id, id).await?;
    Ok(Redirect::to("/tasks"))
}

/// Creates and returns the task router with all task-related routes.
/// Mutations are POST-only.
pub fn create_task_router(state: Arc<TaskState>) -> Router {
    Router::new()
        .route("/tasks", get(list_tasks_handler))
        .route(
            "/tasks/new",
            get(new_task_form_handler).post(create_task_handler),
        )
        .route(
            "/tasks/{id}/edit",
            get(edit_task_form_handler).post(update_task_handler),
        )
        .route("/tasks/{id}/delete", post(delete_task_handler))
        .route("/tasks/{id}/complete", post(complete_task_handler))
        .with_state(state)
}
