//! Single-flight login session shared by every upload task
//!
//! The async mutex is held across the login call, so when several tasks find
//! the session missing or expired only the first one reaches the record
//! store; the rest wait and then reuse its session.

use super::api::UploadApi;
use crate::config::Config;
use crate::error::AuthError;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Login material for the record store
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Username from the config, password from the configured variable
    pub fn from_config(config: &Config) -> Result<Self, AuthError> {
        let password = config
            .record_store_password()
            .ok_or_else(|| AuthError::MissingCredential(config.record_store.password_env.clone()))?;
        Ok(Self::new(config.record_store.username.clone(), password))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Identifies the session a caller used
///
/// Passed back to [`SessionManager::invalidate`] so a failure observed on an
/// old session cannot discard a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTicket(u64);

#[derive(Debug, Default)]
struct SessionState {
    generation: u64,
    established_at: Option<Instant>,
}

#[derive(Debug)]
pub struct SessionManager {
    credentials: Credentials,
    ttl: Duration,
    state: Mutex<SessionState>,
}

impl SessionManager {
    pub fn new(credentials: Credentials, ttl: Duration) -> Self {
        Self {
            credentials,
            ttl,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Return the live session, logging in first when there is none
    pub async fn ensure(&self, api: &dyn UploadApi) -> Result<SessionTicket, AuthError> {
        let mut state = self.state.lock().await;

        if let Some(at) = state.established_at
            && at.elapsed() < self.ttl
        {
            return Ok(SessionTicket(state.generation));
        }

        tracing::debug!(username = %self.credentials.username, "Logging in to record store");
        let outcome = api
            .login(&self.credentials.username, &self.credentials.password)
            .await?;

        if !outcome.is_authenticated {
            state.established_at = None;
            tracing::warn!(message = %outcome.message, "Record store rejected login");
            return Err(AuthError::Rejected(outcome.message));
        }

        state.generation += 1;
        state.established_at = Some(Instant::now());
        tracing::info!(message = %outcome.message, "Authenticated with record store");
        Ok(SessionTicket(state.generation))
    }

    /// Forget the session identified by `ticket`, if it is still current
    pub async fn invalidate(&self, ticket: SessionTicket) {
        let mut state = self.state.lock().await;
        if state.generation == ticket.0 && state.established_at.is_some() {
            state.established_at = None;
            tracing::debug!(generation = ticket.0, "Invalidated record store session");
        }
    }

    pub async fn is_active(&self) -> bool {
        self.state
            .lock()
            .await
            .established_at
            .is_some_and(|at| at.elapsed() < self.ttl)
    }
}
