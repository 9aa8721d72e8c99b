use askama::Template;
use axum::{
    Form, Router,
    extract::{Extension, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
};
use axum_extra::extract::CookieJar;
use std::sync::Arc;

use crate::auth::{AuthState, CurrentUser, build_auth_cookie, encode_jwt};
use crate::user::{User, UserService, UserServiceError};

#[derive(Debug, serde::Deserialize)]
pub struct RegisterForm {
    username: String,
    email: String,
    password: String,
    confirm_password: String,
}

/// Account form shared by both profile updates and password changes; the
/// presence of a non-empty `current_password` selects the password flow.
#[derive(Debug, serde::Deserialize)]
pub struct AccountForm {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    current_password: Option<String>,
    #[serde(default)]
    new_password: Option<String>,
    #[serde(default)]
    confirm_new_password: Option<String>,
}

impl AccountForm {
    fn is_password_change(&self) -> bool {
        self.current_password
            .as_deref()
            .is_some_and(|p| !p.is_empty())
    }
}

/// Custom error type for user handler operations.
#[derive(Debug, thiserror::Error)]
enum UserWebError {
    /// Represents an error during template rendering.
    #[error("Template rendering failed")]
    Template(#[from] askama::Error),
    /// Represents a user service error.
    #[error("User service error")]
    Service(#[from] UserServiceError),
    /// Represents a failure to re-issue the session cookie.
    #[error("JWT operation failed")]
    JwtError,
}

impl axum::response::IntoResponse for UserWebError {
    fn into_response(self) -> axum::response::Response {
        let (status_code, user_facing_error_message) = match &self {
            UserWebError::Service(UserServiceError::UserNotFound(_)) => {
                (StatusCode::NOT_FOUND, "User not found.")
            }
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An unexpected error occurred while processing your request. Please try again later.",
            ),
        };

        (
            status_code,
            Html(format!(
                "<h1>Error</h1><p>{}</p>",
                user_facing_error_message
            )),
        )
            .into_response()
    }
}

/// True for register/account input errors that should re-render the form
/// with a message instead of surfacing an error page.
fn is_user_input_error(err: &UserServiceError) -> bool {
    matches!(
        err,
        UserServiceError::EmptyPassword
            | UserServiceError::PasswordMismatch
            | UserServiceError::AlreadyExists
            | UserServiceError::PasswordTooShort
            | UserServiceError::InvalidCurrentPassword
            | UserServiceError::StoreUnavailable(_)
    )
}

#[derive(Template)]
#[template(path = "register.html")]
struct RegisterTemplate {
    error: Option<String>,
    username: String,
    email: String,
}

impl RegisterTemplate {
    fn empty() -> Self {
        Self {
            error: None,
            username: String::new(),
            email: String::new(),
        }
    }

    fn refilled(form: &RegisterForm, error: String) -> Self {
        Self {
            error: Some(error),
            username: form.username.clone(),
            email: form.email.clone(),
        }
    }
}

#[derive(Template)]
#[template(path = "account.html")]
struct AccountTemplate {
    username: String,
    email: String,
    error: Option<String>,
    message: Option<String>,
}

impl AccountTemplate {
    fn for_user(user: &User) -> Self {
        Self {
            username: user.username().to_string(),
            email: user.email().to_string(),
            error: None,
            message: None,
        }
    }

    fn with_error(user: &User, error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::for_user(user)
        }
    }

    fn with_message(user: &User, message: String) -> Self {
        Self {
            message: Some(message),
            ..Self::for_user(user)
        }
    }
}

/// Handler for serving the registration form.
#[tracing::instrument]
async fn register_page_handler() -> Result<Html<String>, UserWebError> {
    let template = RegisterTemplate::empty();
    template.render().map(Html).map_err(UserWebError::from)
}

/// Handler for registering a new user. Success redirects to the login
/// page; validation failures re-render the form with a message.
#[tracing::instrument(skip(state, form))]
async fn register_handler(
    State(state): State<Arc<AuthState>>,
    Form(form): Form<RegisterForm>,
) -> Result<Response, UserWebError> {
    let user_service = UserService::new(&state.db);

    match user_service
        .register(
            &form.username,
            &form.email,
            &form.password,
            &form.confirm_password,
        )
        .await
    {
        Ok(_) => Ok(Redirect::to("/login?registered=1").into_response()),
        Err(err) if is_user_input_error(&err) => {
            let template = RegisterTemplate::refilled(&form, err.to_string());
            let html = template.render().map_err(UserWebError::from)?;
            Ok((StatusCode::UNPROCESSABLE_ENTITY, Html(html)).into_response())
        }
        Err(err) => Err(UserWebError::Service(err)),
    }
}

/// Handler for serving the account page with the current profile values.
#[tracing::instrument(skip(state))]
async fn account_page_handler(
    State(state): State<Arc<AuthState>>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Html<String>, UserWebError> {
    let user_service = UserService::new(&state.db);
    let user = user_service.get_user(current_user.id).await?;
    let template = AccountTemplate::for_user(&user);
    template.render().map(Html).map_err(UserWebError::from)
}

/// Handler for account updates. A non-empty `current_password` field
/// selects the password-change flow; otherwise the profile fields are
/// updated and the session cookie is re-issued under the new username.
#[tracing::instrument(skip(state, jar, form))]
async fn account_update_handler(
    State(state): State<Arc<AuthState>>,
    Extension(current_user): Extension<CurrentUser>,
    jar: CookieJar,
    Form(form): Form<AccountForm>,
) -> Result<(CookieJar, Response), UserWebError> {
    let user_service = UserService::new(&state.db);

    if form.is_password_change() {
        let result = user_service
            .change_password(
                current_user.id,
                form.current_password.as_deref().unwrap_or_default(),
                form.new_password.as_deref().unwrap_or_default(),
                form.confirm_new_password.as_deref().unwrap_or_default(),
            )
            .await;

        let user = user_service.get_user(current_user.id).await?;
        let response = match result {
            Ok(()) => {
                let template =
                    AccountTemplate::with_message(&user, "Password changed successfully.".to_string());
                Html(template.render().map_err(UserWebError::from)?).into_response()
            }
            Err(err) if is_user_input_error(&err) => {
                let template = AccountTemplate::with_error(&user, err.to_string());
                let html = template.render().map_err(UserWebError::from)?;
                (StatusCode::UNPROCESSABLE_ENTITY, Html(html)).into_response()
            }
            Err(err) => return Err(UserWebError::Service(err)),
        };
        return Ok((jar, response));
    }

    let new_username = form.username.as_deref().unwrap_or_default();
    let new_email = form.email.as_deref().unwrap_or_default();

    match user_service
        .update_profile(current_user.id, new_username, new_email)
        .await
    {
        Ok(user) => {
            // The session cookie carries the username, so a rename needs a
            // fresh token.
            let jwt_token = encode_jwt(user.id(), user.username().to_string(), &state.jwt_secret)
                .await
                .map_err(|_| UserWebError::JwtError)?;
            let updated_jar = jar.add(build_auth_cookie(jwt_token));

            let template =
                AccountTemplate::with_message(&user, "Profile updated successfully.".to_string());
            let html = template.render().map_err(UserWebError::from)?;
            Ok((updated_jar, Html(html).into_response()))
        }
        Err(err) if is_user_input_error(&err) => {
            let user = user_service.get_user(current_user.id).await?;
            let template = AccountTemplate::with_error(&user, err.to_string());
            let html = template.render().map_err(UserWebError::from)?;
            Ok((
                jar,
                (StatusCode::UNPROCESSABLE_ENTITY, Html(html)).into_response(),
            ))
        }
        Err(err) => Err(UserWebError::Service(err)),
    }
}

/// Creates the public registration router.
pub fn create_register_router(state: Arc<AuthState>) -> Router {
    Router::new()
        .route(
            "/register",
            get(register_page_handler).post(register_handler),
        )
        .with_state(state)
}

/// Creates the protected account router.
pub fn create_account_router(state: Arc<AuthState>) -> Router {
    Router::new()
        .route(
            "/account",
            get(account_page_handler).post(account_update_handler),
        )
        .with_state(state)
}
