use crate::entities::*;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use sea_orm::*;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

pub mod api;
pub mod web;

/// Status of a task. The database stores the display string; only these
/// three values are ever written.
#[derive(Debug, PartialEq, Clone, Copy, Eq, Hash)]
pub enum TaskStatus {
    NotStarted,
    Pending,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "Not started",
            TaskStatus::Pending => "Pending",
            TaskStatus::Completed => "Completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = TaskServiceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Not started" => Ok(TaskStatus::NotStarted),
            "Pending" => Ok(TaskStatus::Pending),
            "Completed" => Ok(TaskStatus::Completed),
            other => Err(TaskServiceError::InvalidStatus(other.to_string())),
        }
    }
}

/// Returns the status a task should carry given its stored status, its
/// start date, and the current calendar date.
///
/// Completed is sticky: recomputation never moves a completed task
/// elsewhere. Otherwise the status is purely a function of the start date:
/// not yet started (or no start date at all) means `NotStarted`, a start
/// date of today or earlier means `Pending`.
pub fn effective_status(
    stored: TaskStatus,
    start_date: Option<NaiveDate>,
    today: NaiveDate,
) -> TaskStatus {
    if stored == TaskStatus::Completed {
        return TaskStatus::Completed;
    }
    match start_date {
        None => TaskStatus::NotStarted,
        Some(start) if today < start => TaskStatus::NotStarted,
        Some(_) => TaskStatus::Pending,
    }
}

/// Which date field failed to parse, for error reporting.
#[derive(Debug, PartialEq, Clone, Copy, Eq)]
pub enum DateField {
    Start,
    Due,
}

impl fmt::Display for DateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateField::Start => f.write_str("start"),
            DateField::Due => f.write_str("due"),
        }
    }
}

/// The mutation being attempted, used to word ownership violations.
#[derive(Debug, PartialEq, Clone, Copy, Eq)]
pub enum TaskAction {
    Edit,
    Delete,
    Modify,
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskAction::Edit => f.write_str("edit"),
            TaskAction::Delete => f.write_str("delete"),
            TaskAction::Modify => f.write_str("modify"),
        }
    }
}

/// Error type for TaskService operations.
#[derive(Debug, thiserror::Error)]
pub enum TaskServiceError {
    /// Represents a missing or blank task title.
    #[error("Task title cannot be empty")]
    EmptyTitle,
    /// Represents an unparseable calendar date in the named field.
    #[error("Invalid {0} date, expected YYYY-MM-DD")]
    DateFormat(DateField),
    /// Represents a status value outside the known set.
    #[error("Invalid status value '{0}'")]
    InvalidStatus(String),
    /// Represents an ownership violation on a task mutation.
    #[error("You can only {0} your own tasks")]
    Forbidden(TaskAction),
    /// Represents a task not found error.
    #[error("Task with ID {0} not found")]
    TaskNotFound(i32),
    /// Represents a database error.
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

impl TaskServiceError {
    /// True for input errors that should re-render the submitting form
    /// rather than surface an error page.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TaskServiceError::EmptyTitle
                | TaskServiceError::DateFormat(_)
                | TaskServiceError::InvalidStatus(_)
        )
    }
}

#[derive(Debug, PartialEq, Clone, Eq)]
pub struct Task {
    id: i32,
    title: String,
    description: Option<String>,
    status: TaskStatus,
    created_at: NaiveDateTime,
    start_date: Option<NaiveDate>,
    due_date: Option<NaiveDate>,
    user_id: i32,
}

impl Task {
    /// Returns the ID of the task.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Returns the title of the task.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Returns the description of the task, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns the stored status of the task.
    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Returns the creation timestamp of the task.
    pub fn created_at(&self) -> NaiveDateTime {
        self.created_at
    }

    /// Returns the start date of the task, if any.
    pub fn start_date(&self) -> Option<NaiveDate> {
        self.start_date
    }

    /// Returns the due date of the task, if any.
    pub fn due_date(&self) -> Option<NaiveDate> {
        self.due_date
    }

    /// Returns the ID of the owning user.
    pub fn user_id(&self) -> i32 {
        self.user_id
    }

    /// Returns the status the task should display as of `today`.
    pub fn effective_status(&self, today: NaiveDate) -> TaskStatus {
        effective_status(self.status, self.start_date, today)
    }
}

impl TryFrom<task::Model> for Task {
    type Error = TaskServiceError;

    fn try_from(model: task::Model) -> Result<Self, Self::Error> {
        Ok(Task {
            id: model.id,
            title: model.title,
            description: model.description,
            status: model.status.parse()?,
            created_at: model.created_at,
            start_date: model.start_date,
            due_date: model.due_date,
            user_id: model.user_id,
        })
    }
}

/// Fields accepted when creating a task. Dates arrive as optional
/// `YYYY-MM-DD` strings straight from the form or API payload.
#[derive(Debug)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub start_date: Option<String>,
    pub due_date: Option<String>,
}

/// Fields accepted when editing a task. An explicit `status` value, when
/// present, is applied before the effective-status recompute.
#[derive(Debug)]
pub struct TaskUpdate {
    pub title: String,
    pub description: Option<String>,
    pub start_date: Option<String>,
    pub due_date: Option<String>,
    pub status: Option<String>,
}

/// Ordering applied to a task listing.
#[derive(Debug, PartialEq, Clone, Copy, Eq, Default)]
pub enum SortKey {
    #[default]
    Created,
    StartDate,
    DueDate,
}

impl SortKey {
    /// Parses the `sort` query parameter; anything unrecognized falls back
    /// to the default created-descending order.
    pub fn from_param(param: Option<&str>) -> Self {
        match param {
            Some("start_date") => SortKey::StartDate,
            Some("due_date") => SortKey::DueDate,
            _ => SortKey::Created,
        }
    }

    pub fn as_param(&self) -> &'static str {
        match self {
            SortKey::Created => "created",
            SortKey::StartDate => "start_date",
            SortKey::DueDate => "due_date",
        }
    }
}

/// Sorts tasks in place. Date orders are ascending with tasks lacking the
/// date strictly last; the default order is newest-created first. The sort
/// is stable, so ties keep their original order.
pub fn sort_tasks(tasks: &mut [Task], key: SortKey) {
    match key {
        SortKey::Created => tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        SortKey::StartDate => tasks.sort_by(|a, b| cmp_missing_last(a.start_date, b.start_date)),
        SortKey::DueDate => tasks.sort_by(|a, b| cmp_missing_last(a.due_date, b.due_date)),
    }
}

fn cmp_missing_last(a: Option<NaiveDate>, b: Option<NaiveDate>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn parse_date(value: Option<&str>, field: DateField) -> Result<Option<NaiveDate>, TaskServiceError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| TaskServiceError::DateFormat(field)),
    }
}

fn normalize_description(description: Option<String>) -> Option<String> {
    description.filter(|d| !d.trim().is_empty())
}

/// A task projected as a calendar event for external rendering.
#[derive(Debug, PartialEq, Clone, Eq)]
pub struct TaskEvent {
    pub id: i32,
    pub title: String,
    pub description: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub status: String,
}

pub struct TaskService<'a> {
    db: &'a sea_orm::DatabaseConnection,
}

impl TaskService<'_> {
    pub fn new(db: &sea_orm::DatabaseConnection) -> TaskService {
        TaskService { db }
    }

    /// Retrieves all tasks owned by the given user, ordered by `sort`.
    #[tracing::instrument(skip(self))]
    pub async fn list_tasks(
        &self,
        owner_id: i32,
        sort: SortKey,
    ) -> Result<Vec<Task>, TaskServiceError> {
        let models = task::Entity::find()
            .filter(task::Column::UserId.eq(owner_id))
            .order_by_asc(task::Column::Id)
            .all(self.db)
            .await?;
        let mut tasks = models
            .into_iter()
            .map(Task::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        sort_tasks(&mut tasks, sort);
        Ok(tasks)
    }

    /// Creates a new task owned by the given user.
    ///
    /// The stored status is initialized from the effective-status function:
    /// a task whose start date lies in the future is born `NotStarted`, one
    /// starting today or earlier is born `Pending`. An omitted start date
    /// defaults to the creation day.
    #[tracing::instrument(skip(self))]
    pub async fn create_task(&self, owner_id: i32, new: NewTask) -> Result<Task, TaskServiceError> {
        if new.title.trim().is_empty() {
            return Err(TaskServiceError::EmptyTitle);
        }
        let start_date = parse_date(new.start_date.as_deref(), DateField::Start)?;
        let due_date = parse_date(new.due_date.as_deref(), DateField::Due)?;

        let today = Utc::now().date_naive();
        let start_date = Some(start_date.unwrap_or(today));
        let status = effective_status(TaskStatus::NotStarted, start_date, today);

        let active_model = task::ActiveModel {
            title: ActiveValue::Set(new.title),
            description: ActiveValue::Set(normalize_description(new.description)),
            status: ActiveValue::Set(status.as_str().to_string()),
            created_at: ActiveValue::Set(Utc::now().naive_utc()),
            start_date: ActiveValue::Set(start_date),
            due_date: ActiveValue::Set(due_date),
            user_id: ActiveValue::Set(owner_id),
            ..Default::default()
        };
        let created_model = active_model.insert(self.db).await?;
        Task::try_from(created_model)
    }

    /// Retrieves a task by its ID, enforcing ownership.
    #[tracing::instrument(skip(self))]
    pub async fn get_task(&self, owner_id: i32, id: i32) -> Result<Task, TaskServiceError> {
        let model = self
            .find_owned_task(self.db, owner_id, id, TaskAction::Edit)
            .await?;
        Task::try_from(model)
    }

    /// Edits a task, enforcing ownership and recomputing the status.
    ///
    /// An explicit status from the update is applied first; when the result
    /// is anything other than `Completed` it is re-derived from the (new)
    /// start date. The whole operation runs in one transaction.
    #[tracing::instrument(skip(self))]
    pub async fn edit_task(
        &self,
        owner_id: i32,
        id: i32,
        update: TaskUpdate,
    ) -> Result<Task, TaskServiceError> {
        if update.title.trim().is_empty() {
            return Err(TaskServiceError::EmptyTitle);
        }
        let start_date = parse_date(update.start_date.as_deref(), DateField::Start)?;
        let due_date = parse_date(update.due_date.as_deref(), DateField::Due)?;
        let explicit_status = match update.status.as_deref() {
            None => None,
            Some(s) => Some(s.parse::<TaskStatus>()?),
        };

        let txn = self.db.begin().await?;
        let model = self
            .find_owned_task(&txn, owner_id, id, TaskAction::Edit)
            .await?;

        let mut status = match explicit_status {
            Some(status) => status,
            None => model.status.parse()?,
        };
        if status != TaskStatus::Completed {
            status = effective_status(status, start_date, Utc::now().date_naive());
        }

        let mut active_model: task::ActiveModel = model.into();
        active_model.title = ActiveValue::Set(update.title);
        active_model.description = ActiveValue::Set(normalize_description(update.description));
        active_model.start_date = ActiveValue::Set(start_date);
        active_model.due_date = ActiveValue::Set(due_date);
        active_model.status = ActiveValue::Set(status.as_str().to_string());
        let updated_model = active_model.update(&txn).await?;
        txn.commit().await?;

        Task::try_from(updated_model)
    }

    /// Deletes a task permanently, enforcing ownership.
    #[tracing::instrument(skip(self))]
    pub async fn delete_task(&self, owner_id: i32, id: i32) -> Result<Task, TaskServiceError> {
        let txn = self.db.begin().await?;
        let model = self
            .find_owned_task(&txn, owner_id, id, TaskAction::Delete)
            .await?;
        let deleted = Task::try_from(model)?;
        task::Entity::delete_by_id(id).exec(&txn).await?;
        txn.commit().await?;
        Ok(deleted)
    }

    /// Marks a task as completed, enforcing ownership. Completing an
    /// already-completed task is a no-op success.
    #[tracing::instrument(skip(self))]
    pub async fn complete_task(&self, owner_id: i32, id: i32) -> Result<Task, TaskServiceError> {
        let txn = self.db.begin().await?;
        let model = self
            .find_owned_task(&txn, owner_id, id, TaskAction::Modify)
            .await?;
        let mut active_model: task::ActiveModel = model.into();
        active_model.status = ActiveValue::Set(TaskStatus::Completed.as_str().to_string());
        let updated_model = active_model.update(&txn).await?;
        txn.commit().await?;
        Task::try_from(updated_model)
    }

    /// Projects all tasks owned by the given user as calendar events with
    /// `YYYY-MM-DD` date strings and the effective status.
    #[tracing::instrument(skip(self))]
    pub async fn export_events(&self, owner_id: i32) -> Result<Vec<TaskEvent>, TaskServiceError> {
        let today = Utc::now().date_naive();
        let tasks = self.list_tasks(owner_id, SortKey::Created).await?;
        Ok(tasks
            .into_iter()
            .map(|task| TaskEvent {
                id: task.id,
                title: task.title.clone(),
                description: task.description.clone(),
                start: task.start_date.map(|d| d.format("%Y-%m-%d").to_string()),
                end: task.due_date.map(|d| d.format("%Y-%m-%d").to_string()),
                status: task.effective_status(today).to_string(),
            })
            .collect())
    }

    /// Loads a task by ID and verifies the acting user owns it. A missing
    /// ID yields `TaskNotFound` before any ownership comparison.
    async fn find_owned_task<C: ConnectionTrait>(
        &self,
        conn: &C,
        owner_id: i32,
        id: i32,
        action: TaskAction,
    ) -> Result<task::Model, TaskServiceError> {
        let model = task::Entity::find_by_id(id)
            .one(conn)
            .await?
            .ok_or(TaskServiceError::TaskNotFound(id))?;
        if model.user_id != owner_id {
            return Err(TaskServiceError::Forbidden(action));
        }
        Ok(model)
    }
}
