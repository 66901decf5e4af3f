//! Bearer token authentication

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lgx_common::api::{hash_token, Actor};
use lgx_common::time::{Clock, SystemClock};
use lgx_common::Result;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::db::sessions;

/// Resolves a bearer token to the acting user
#[async_trait]
pub trait SessionService: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<Option<Actor>>;
}

/// Sessions stored in the service database
pub struct DbSessionService {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl DbSessionService {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Register (or replace) a session for `token`
    pub async fn register(
        &self,
        token: &str,
        actor: &Actor,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sessions::upsert_session(&self.pool, &hash_token(token), actor, expires_at).await
    }

    pub async fn cleanup_expired(&self) -> Result<u64> {
        sessions::cleanup_expired_sessions(&self.pool, self.clock.now()).await
    }
}

#[async_trait]
impl SessionService for DbSessionService {
    async fn authenticate(&self, token: &str) -> Result<Option<Actor>> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(None);
        }
        sessions::find_session(&self.pool, &hash_token(token), self.clock.now()).await
    }
}
