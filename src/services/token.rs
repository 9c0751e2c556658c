//! Stream-token verification against the external user store
//!
//! Tokens are cached in-memory as a set; a miss triggers a repopulate from
//! the database before the final verdict. Tokens are only ever checked here,
//! never minted.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use sqlx::SqlitePool;

use crate::db::repository::users;
use crate::error::AppError;

#[derive(Clone)]
pub struct StreamTokenVerifier {
    pool: SqlitePool,
    cache: Arc<RwLock<HashSet<String>>>,
}

impl StreamTokenVerifier {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            cache: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Check a stream token, repopulating the cache from the user store on a
    /// miss. Fails with `Forbidden` when the token is unknown.
    pub async fn verify(&self, token: &str) -> Result<(), AppError> {
        if self.in_cache(token) {
            return Ok(());
        }

        self.repopulate().await?;

        if self.in_cache(token) {
            Ok(())
        } else {
            tracing::debug!("Invalid stream token attempted");
            Err(AppError::Forbidden(
                "Invalid or missing stream token".to_string(),
            ))
        }
    }

    /// XC auth: `(username, password)` must match `(username, stream_token)`.
    /// Returns the stream token for reuse in generated URLs.
    pub async fn check_xc_auth(&self, username: &str, password: &str) -> Result<String, AppError> {
        let token = users::stream_token_for_credentials(&self.pool, username, password).await?;
        match token {
            Some(token) => Ok(token),
            None => Err(AppError::Unauthorized(
                "Invalid username or password".to_string(),
            )),
        }
    }

    fn in_cache(&self, token: &str) -> bool {
        match self.cache.read() {
            Ok(cache) => cache.contains(token),
            Err(_) => false,
        }
    }

    async fn repopulate(&self) -> Result<(), AppError> {
        let tokens = users::all_stream_tokens(&self.pool).await?;
        if let Ok(mut cache) = self.cache.write() {
            *cache = tokens.into_iter().collect();
        }
        Ok(())
    }
}
