//! Single-use cache of recently issued pairing tokens.
//!
//! When a token for a peer was issued moments ago, the resolver can trust the
//! peer with it instead of asking the user to pair interactively. Tokens are
//! consumed on read and expire after a configured TTL.

use crate::config::TokenConfig;
use clipsync_types::AppInstanceId;
use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct CachedToken {
    token: u32,
    issued_at: Instant,
}

/// Process-wide token cache.
#[derive(Debug)]
pub struct TokenCache {
    tokens: DashMap<AppInstanceId, CachedToken>,
    ttl: Duration,
}

impl TokenCache {
    /// Create a cache whose tokens expire after `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            tokens: DashMap::new(),
            ttl,
        }
    }

    /// Create a cache from the `[token]` configuration section.
    pub fn from_config(config: &TokenConfig) -> Self {
        Self::new(config.ttl())
    }

    /// Cache `token` for `id`, replacing any earlier one.
    pub fn set_token(&self, id: AppInstanceId, token: u32) {
        self.tokens.insert(
            id,
            CachedToken {
                token,
                issued_at: Instant::now(),
            },
        );
    }

    /// Take the token for `id`. The entry is removed whether or not it is fresh.
    pub fn take_token(&self, id: &AppInstanceId) -> Option<u32> {
        let (_, cached) = self.tokens.remove(id)?;
        if cached.issued_at.elapsed() >= self.ttl {
            tracing::debug!("Discarding expired token for {}", id);
            return None;
        }
        Some(cached.token)
    }

    /// Whether any token is cached for `id`, fresh or not.
    pub fn contains(&self, id: &AppInstanceId) -> bool {
        self.tokens.contains_key(id)
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}
