use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use chrono::Utc;
use sea_orm::*;

use crate::entities::*;

pub mod web;

#[derive(Debug, PartialEq, Clone, Eq)]
pub struct User {
    id: i32,
    username: String,
    email: String,
}

impl User {
    pub fn new(id: i32, username: String, email: String) -> Self {
        Self {
            id,
            username,
            email,
        }
    }

    /// Returns the ID of the user.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Returns the username of the user.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns the email address of the user.
    pub fn email(&self) -> &str {
        &self.email
    }
}

impl From<user::Model> for User {
    fn from(model: user::Model) -> Self {
        User::new(model.id, model.username, model.email)
    }
}

/// Error type for UserService operations.
#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    /// Represents a registration with an empty password.
    #[error("Password cannot be empty")]
    EmptyPassword,
    /// Represents a password/confirmation mismatch.
    #[error("Passwords do not match")]
    PasswordMismatch,
    /// Represents a username or email collision. Both fields are checked
    /// together and reported identically.
    #[error("Username or email already exists")]
    AlreadyExists,
    /// Represents a new password below the minimum length.
    #[error("New password must be at least 6 characters long")]
    PasswordTooShort,
    /// Represents a failed verification of the current password.
    #[error("Current password is incorrect")]
    InvalidCurrentPassword,
    /// Represents a user not found error.
    #[error("User with ID {0} not found")]
    UserNotFound(i32),
    /// Represents a password hashing failure.
    #[error("Password hashing failed")]
    Hash(#[from] argon2::password_hash::Error),
    /// Represents a persistence layer fault, surfaced distinctly from
    /// invalid credentials.
    #[error("Database not initialized")]
    StoreUnavailable(#[from] sea_orm::DbErr),
}

/// Hashes a password with Argon2id and a fresh random salt.
fn hash_password(password: &str) -> Result<String, UserServiceError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verifies a password against a stored hash. An unparseable hash counts
/// as a failed verification rather than an error.
fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

pub struct UserService<'a> {
    db: &'a sea_orm::DatabaseConnection,
}

impl UserService<'_> {
    pub fn new(db: &sea_orm::DatabaseConnection) -> UserService {
        UserService { db }
    }

    /// Registers a new user.
    ///
    /// Fails when the password is empty or does not match its confirmation,
    /// or when the username or email collides with an existing user (one
    /// combined check, one message). Only the salted hash is persisted.
    #[tracing::instrument(skip(self, password, confirm_password))]
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<User, UserServiceError> {
        if password.is_empty() {
            return Err(UserServiceError::EmptyPassword);
        }
        if password != confirm_password {
            return Err(UserServiceError::PasswordMismatch);
        }

        let password_hash = hash_password(password)?;

        let txn = self.db.begin().await?;
        if Self::credentials_taken(&txn, username, email, None).await? {
            return Err(UserServiceError::AlreadyExists);
        }

        let active_model = user::ActiveModel {
            username: ActiveValue::Set(username.to_string()),
            email: ActiveValue::Set(email.to_string()),
            password_hash: ActiveValue::Set(password_hash),
            created_at: ActiveValue::Set(Utc::now().naive_utc()),
            ..Default::default()
        };
        let created_model = active_model.insert(&txn).await?;
        txn.commit().await?;

        Ok(User::from(created_model))
    }

    /// Authenticates a user by exact username match and password
    /// verification. Returns `None` for unknown usernames and failed
    /// verifications alike; storage faults surface as `StoreUnavailable`.
    #[tracing::instrument(skip(self, password))]
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<User>, UserServiceError> {
        let model = user::Entity::find()
            .filter(user::Column::Username.eq(username))
            .one(self.db)
            .await?;

        Ok(model
            .filter(|m| verify_password(password, &m.password_hash))
            .map(User::from))
    }

    /// Retrieves a user by their ID.
    #[tracing::instrument(skip(self))]
    pub async fn get_user(&self, id: i32) -> Result<User, UserServiceError> {
        let model = user::Entity::find_by_id(id)
            .one(self.db)
            .await?
            .ok_or(UserServiceError::UserNotFound(id))?;
        Ok(User::from(model))
    }

    /// Changes a user's password after verifying the current one. The new
    /// password must match its confirmation and be at least 6 characters.
    #[tracing::instrument(skip(self, current_password, new_password, confirm_new_password))]
    pub async fn change_password(
        &self,
        id: i32,
        current_password: &str,
        new_password: &str,
        confirm_new_password: &str,
    ) -> Result<(), UserServiceError> {
        let txn = self.db.begin().await?;
        let model = user::Entity::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or(UserServiceError::UserNotFound(id))?;

        if !verify_password(current_password, &model.password_hash) {
            return Err(UserServiceError::InvalidCurrentPassword);
        }
        if new_password != confirm_new_password {
            return Err(UserServiceError::PasswordMismatch);
        }
        if new_password.len() < 6 {
            return Err(UserServiceError::PasswordTooShort);
        }

        let mut active_model: user::ActiveModel = model.into();
        active_model.password_hash = ActiveValue::Set(hash_password(new_password)?);
        active_model.update(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    /// Updates a user's username and email. Collisions with a *different*
    /// user fail; keeping one's own values passes.
    #[tracing::instrument(skip(self))]
    pub async fn update_profile(
        &self,
        id: i32,
        new_username: &str,
        new_email: &str,
    ) -> Result<User, UserServiceError> {
        let txn = self.db.begin().await?;
        let model = user::Entity::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or(UserServiceError::UserNotFound(id))?;

        if Self::credentials_taken(&txn, new_username, new_email, Some(id)).await? {
            return Err(UserServiceError::AlreadyExists);
        }

        let mut active_model: user::ActiveModel = model.into();
        active_model.username = ActiveValue::Set(new_username.to_string());
        active_model.email = ActiveValue::Set(new_email.to_string());
        let updated_model = active_model.update(&txn).await?;
        txn.commit().await?;

        Ok(User::from(updated_model))
    }

    /// Checks whether the username or email is already taken, optionally
    /// excluding one user ID (for self-collisions on profile updates).
    async fn credentials_taken<C: ConnectionTrait>(
        conn: &C,
        username: &str,
        email: &str,
        exclude_id: Option<i32>,
    ) -> Result<bool, UserServiceError> {
        let mut query = user::Entity::find().filter(
            Condition::any()
                .add(user::Column::Username.eq(username))
                .add(user::Column::Email.eq(email)),
        );
        if let Some(id) = exclude_id {
            query = query.filter(user::Column::Id.ne(id));
        }
        Ok(query.one(conn).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_salted_and_irreversible() {
        let first = hash_password("secret123").unwrap();
        let second = hash_password("secret123").unwrap();
        assert_ne!(first, "secret123");
        // A fresh salt every time means no two hashes collide.
        assert_ne!(first, second);
        assert!(first.starts_with("$argon2"));
    }

    #[test]
    fn can_verify_correct_password_only() {
        let hash = hash_password("secret123").unwrap();
        assert!(verify_password("secret123", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn garbage_hash_fails_verification() {
        assert!(!verify_password("secret123", "not-a-hash"));
    }

    #[tokio::test]
    async fn store_fault_surfaces_as_store_unavailable() {
        use sea_orm::{DatabaseBackend, MockDatabase};

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_errors(vec![DbErr::Conn(RuntimeErr::Internal(
                "connection refused".to_string(),
            ))])
            .into_connection();

        // A failing user store must not masquerade as bad credentials.
        let err = UserService::new(&db)
            .authenticate("alice", "secret123")
            .await
            .expect_err("query failure should propagate as an error");
        assert!(matches!(err, UserServiceError::StoreUnavailable(_)));
        assert_eq!(err.to_string(), "Database not initialized");
    }
}
