use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::db::{Credentials, StoreError, UserRepository};
use crate::models::{ProfilePatch, Role, User};

pub const MIN_PASSWORD_LEN: usize = 6;
const SESSION_TTL_MINUTES: i64 = 60;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("email not confirmed")]
    EmailNotConfirmed,
    #[error("an account with this email already exists")]
    EmailTaken,
    #[error("invalid email address")]
    InvalidEmail,
    #[error("password must be at least 6 characters")]
    WeakPassword,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("not signed in")]
    NoSession,
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "user_id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEvent {
    SignedIn(String),
    SignedOut,
    TokenRefreshed(String),
    UserUpdated(String),
    PasswordRecovery(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// `role` is a request. Self-registration never grants [`Role::Admin`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignUpProfile {
    pub display_name: String,
    pub phone: Option<String>,
    pub role: Role,
}

fn self_service_role(requested: Role) -> Role {
    match requested {
        Role::Admin => Role::Runner,
        other => other,
    }
}

/// Result of a sign-up. The token is what the confirmation mail carries.
#[derive(Debug, Clone)]
pub struct PendingConfirmation {
    pub user: User,
    pub confirmation_token: String,
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b"|");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn normalize_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(AuthError::InvalidEmail),
    }
}

fn check_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        Err(AuthError::WeakPassword)
    } else {
        Ok(())
    }
}

pub struct AuthService {
    users: Arc<dyn UserRepository>,
    session: Mutex<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
}

impl AuthService {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            users,
            session: Mutex::new(None),
            events,
        }
    }

    /// Auth state changes, delivered to every subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: AuthEvent) {
        tracing::debug!(?event, "auth state change");
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn current(&self) -> std::sync::MutexGuard<'_, Option<Session>> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn sign_up(
        &self,
        email: &str,
        password: &str,
        profile: SignUpProfile,
    ) -> Result<PendingConfirmation, AuthError> {
        let email = normalize_email(email)?;
        check_password(password)?;
        if self.users.get_user_by_email(&email)?.is_some() {
            return Err(AuthError::EmailTaken);
        }

        let display_name = match profile.display_name.trim() {
            "" => email.split('@').next().unwrap_or_default().to_string(),
            name => name.to_string(),
        };
        let user = User {
            id: format!("usr_{}", random_token(12).to_lowercase()),
            email,
            display_name,
            phone: profile.phone.filter(|p| !p.trim().is_empty()),
            role: self_service_role(profile.role),
            created_at: Utc::now(),
        };
        let salt = random_token(16);
        let confirmation_token = random_token(32);
        let credentials = Credentials {
            digest: digest(&salt, password),
            salt,
            confirmed: false,
            confirmation_token: Some(confirmation_token.clone()),
            reset_token: None,
        };

        match self.users.insert_user(&user, &credentials) {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => return Err(AuthError::EmailTaken),
            Err(err) => return Err(err.into()),
        }
        if user.role != profile.role {
            tracing::warn!(user_id = %user.id, requested = ?profile.role, "requested role not granted");
        }
        tracing::info!(user_id = %user.id, "sign-up pending email confirmation");
        Ok(PendingConfirmation {
            user,
            confirmation_token,
        })
    }

    pub fn confirm_email(&self, email: &str, token: &str) -> Result<User, AuthError> {
        let user = self
            .users
            .get_user_by_email(&normalize_email(email)?)?
            .ok_or(AuthError::InvalidToken)?;
        let mut credentials = self
            .users
            .get_credentials(&user.id)?
            .ok_or(AuthError::InvalidToken)?;
        if credentials.confirmation_token.as_deref() != Some(token) {
            return Err(AuthError::InvalidToken);
        }
        credentials.confirmed = true;
        credentials.confirmation_token = None;
        self.users.put_credentials(&user.id, &credentials)?;
        Ok(user)
    }

    pub fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let email = normalize_email(email).map_err(|_| AuthError::InvalidCredentials)?;
        let user = self
            .users
            .get_user_by_email(&email)?
            .ok_or(AuthError::InvalidCredentials)?;
        let credentials = self
            .users
            .get_credentials(&user.id)?
            .ok_or(AuthError::InvalidCredentials)?;
        if digest(&credentials.salt, password) != credentials.digest {
            return Err(AuthError::InvalidCredentials);
        }
        if !credentials.confirmed {
            return Err(AuthError::EmailNotConfirmed);
        }

        let session = Session {
            user,
            access_token: random_token(40),
            refresh_token: random_token(40),
            expires_at: Utc::now() + Duration::minutes(SESSION_TTL_MINUTES),
        };
        *self.current() = Some(session.clone());
        self.emit(AuthEvent::SignedIn(session.user.id.clone()));
        Ok(session)
    }

    pub fn sign_out(&self) {
        let previous = self.current().take();
        if previous.is_some() {
            self.emit(AuthEvent::SignedOut);
        }
    }

    /// The live session, if any. Expired sessions are not returned.
    pub fn session(&self) -> Option<Session> {
        self.current().clone().filter(|s| !s.is_expired())
    }

    pub fn refresh(&self) -> Result<Session, AuthError> {
        let mut guard = self.current();
        let session = guard.as_mut().ok_or(AuthError::NoSession)?;
        session.access_token = random_token(40);
        session.refresh_token = random_token(40);
        session.expires_at = Utc::now() + Duration::minutes(SESSION_TTL_MINUTES);
        let refreshed = session.clone();
        drop(guard);
        self.emit(AuthEvent::TokenRefreshed(refreshed.user.id.clone()));
        Ok(refreshed)
    }

    /// Returns the reset token for the recovery mail. Unknown addresses give
    /// `None` so callers cannot enumerate accounts.
    pub fn request_password_reset(&self, email: &str) -> Result<Option<String>, AuthError> {
        let email = normalize_email(email)?;
        let Some(user) = self.users.get_user_by_email(&email)? else {
            return Ok(None);
        };
        let Some(mut credentials) = self.users.get_credentials(&user.id)? else {
            return Ok(None);
        };
        let token = random_token(32);
        credentials.reset_token = Some(token.clone());
        self.users.put_credentials(&user.id, &credentials)?;
        self.emit(AuthEvent::PasswordRecovery(user.id));
        Ok(Some(token))
    }

    pub fn reset_password(
        &self,
        email: &str,
        token: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        check_password(new_password)?;
        let user = self
            .users
            .get_user_by_email(&normalize_email(email)?)?
            .ok_or(AuthError::InvalidToken)?;
        let mut credentials = self
            .users
            .get_credentials(&user.id)?
            .ok_or(AuthError::InvalidToken)?;
        if credentials.reset_token.as_deref() != Some(token) {
            return Err(AuthError::InvalidToken);
        }
        credentials.salt = random_token(16);
        credentials.digest = digest(&credentials.salt, new_password);
        credentials.reset_token = None;
        self.users.put_credentials(&user.id, &credentials)?;
        Ok(())
    }

    pub fn update_profile(&self, patch: ProfilePatch) -> Result<User, AuthError> {
        let mut guard = self.current();
        let session = guard.as_mut().ok_or(AuthError::NoSession)?;
        let mut user = session.user.clone();
        if let Some(name) = patch.display_name.filter(|n| !n.trim().is_empty()) {
            user.display_name = name.trim().to_string();
        }
        if let Some(phone) = patch.phone {
            user.phone = Some(phone.trim().to_string()).filter(|p| !p.is_empty());
        }
        self.users.update_user(&user)?;
        session.user = user.clone();
        drop(guard);
        self.emit(AuthEvent::UserUpdated(user.id.clone()));
        Ok(user)
    }
}
