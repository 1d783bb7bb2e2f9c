//! Cached admin-flow token for server-to-server calls.
//!
//! One slot keyed `"token"`. A miss performs a fresh session login with the
//! admin credentials and caches the result without expiry; the token lives
//! until [`TokenCache::invalidate`] or a restart.
use crate::auth::session::{SessionError, SessionManager};
use crate::config::AdminLoginConfig;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

const TOKEN_KEY: &str = "token";
const SESSION_CREATE_TIMEOUT: Duration = Duration::from_secs(100);

/// Creates sessions from username/password pairs.
#[async_trait]
pub trait SessionClient: Send + Sync {
    async fn create_session(&self, username: &str, password: &str)
    -> Result<String, SessionError>;
}

#[async_trait]
impl SessionClient for SessionManager {
    async fn create_session(
        &self,
        username: &str,
        password: &str,
    ) -> Result<String, SessionError> {
        self.login_local(username, password)
    }
}

pub struct TokenCache {
    slot: DashMap<&'static str, String>,
    client: Arc<dyn SessionClient>,
    username: String,
    password: Option<String>,
    timeout: Duration,
}

impl TokenCache {
    pub fn new(client: Arc<dyn SessionClient>, admin: &AdminLoginConfig) -> Self {
        Self {
            slot: DashMap::new(),
            client,
            username: admin.username.clone(),
            password: admin.password.clone(),
            timeout: SESSION_CREATE_TIMEOUT,
        }
    }

    /// The cached token, logging in on a miss.
    ///
    /// # Errors
    /// - `InvalidCredentials` when no admin password is configured or the login fails.
    /// - `Timeout` when the session call exceeds its deadline.
    pub async fn get(&self) -> Result<String, SessionError> {
        if let Some(token) = self.slot.get(TOKEN_KEY) {
            return Ok(token.clone());
        }
        let password = self
            .password
            .as_deref()
            .ok_or(SessionError::InvalidCredentials)?;
        let token = tokio::time::timeout(
            self.timeout,
            self.client.create_session(&self.username, password),
        )
        .await
        .map_err(|_| SessionError::Timeout)??;
        self.slot.insert(TOKEN_KEY, token.clone());
        tracing::debug!("admin token cached");
        Ok(token)
    }

    pub fn invalidate(&self) {
        self.slot.remove(TOKEN_KEY);
    }
}
