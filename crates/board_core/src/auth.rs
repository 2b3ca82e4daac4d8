use chrono::{DateTime, Utc};
use shared::protocol::UserSummary;
use tokio::sync::RwLock;
use tracing::info;

/// A confirmed login: who is signed in and the bearer token that proves it.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user: UserSummary,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
}

/// Explicitly passed authentication state. Constructed once per app session
/// and injected into whatever needs it; populated after login, cleared at
/// logout. There is no module-level singleton.
#[derive(Default)]
pub struct AuthContext {
    session: RwLock<Option<AuthSession>>,
}

impl AuthContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn begin_session(&self, session: AuthSession) {
        info!(user_id = session.user.user_id.0, username = %session.user.username, "session begun");
        *self.session.write().await = Some(session);
    }

    pub async fn end_session(&self) {
        if let Some(session) = self.session.write().await.take() {
            info!(user_id = session.user.user_id.0, "session ended");
        }
    }

    pub async fn is_authenticated(&self) -> bool {
        self.session.read().await.is_some()
    }

    pub async fn current_user(&self) -> Option<UserSummary> {
        self.session.read().await.as_ref().map(|s| s.user.clone())
    }

    pub async fn bearer_token(&self) -> Option<String> {
        self.session.read().await.as_ref().map(|s| s.token.clone())
    }
}
