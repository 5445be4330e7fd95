//! Access token cache.
//!
//! WeChat access tokens live for about two hours and every message send needs
//! one. The cache hands out the current token while it is comfortably valid and
//! refreshes it once it gets within [`REFRESH_MARGIN`] of its expiry.
//!
//! Refreshes are single-flight: the exchange runs while the write lock is held,
//! so concurrent callers queue behind it. A caller that was queued while someone
//! else's refresh completed takes that refresh's outcome (token or failure)
//! instead of issuing a second exchange.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::TokenSource;
use crate::error::CredentialError;

/// Tokens this close to expiry are refreshed before use.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct TokenState {
    current: Option<CachedToken>,
    /// Outcome of the most recently completed refresh.
    last_outcome: Option<Result<String, CredentialError>>,
}

impl TokenState {
    fn valid_token(&self, now: Instant) -> Option<&str> {
        self.current.as_ref().and_then(|cached| {
            let refresh_at = cached
                .expires_at
                .checked_sub(REFRESH_MARGIN)
                .unwrap_or(cached.expires_at);
            (now < refresh_at).then_some(cached.token.as_str())
        })
    }
}

/// Cached access token with refresh-before-expiry.
pub struct AccessTokenCache<S> {
    source: S,
    state: RwLock<TokenState>,
    /// Bumped when a refresh completes, under the write lock.
    generation: AtomicU64,
    exchanges: AtomicU64,
}

impl<S: TokenSource> AccessTokenCache<S> {
    /// Create an empty cache; the first `get_token` performs the exchange.
    pub fn new(source: S) -> Self {
        Self {
            source,
            state: RwLock::new(TokenState::default()),
            generation: AtomicU64::new(0),
            exchanges: AtomicU64::new(0),
        }
    }

    /// Get a usable access token, refreshing it if needed.
    pub async fn get_token(&self) -> Result<String, CredentialError> {
        // Observed before any waiting, so a refresh that completes while this
        // call is queued shows up as a generation change.
        let seen_generation = self.generation.load(Ordering::Acquire);

        {
            let state = self.state.read().await;
            if let Some(token) = state.valid_token(Instant::now()) {
                return Ok(token.to_string());
            }
        }

        let mut state = self.state.write().await;

        // Another caller may have refreshed while we waited for the lock.
        if let Some(token) = state.valid_token(Instant::now()) {
            return Ok(token.to_string());
        }
        if self.generation.load(Ordering::Acquire) != seen_generation
            && let Some(outcome) = state.last_outcome.clone()
        {
            debug!("Reusing outcome of concurrent token refresh");
            return outcome;
        }

        self.exchanges.fetch_add(1, Ordering::Relaxed);

        let outcome = match self.source.fetch_token().await {
            Ok(access) if access.token.is_empty() => {
                warn!("Token exchange returned an empty access token");
                Err(CredentialError::unavailable("empty access token received"))
            }
            Ok(access) => {
                info!(
                    expires_in_secs = access.expires_in.as_secs(),
                    "Refreshed WeChat access token"
                );
                state.current = Some(CachedToken {
                    token: access.token.clone(),
                    expires_at: Instant::now() + access.expires_in,
                });
                Ok(access.token)
            }
            Err(e) => {
                warn!(error = %e, "Failed to refresh WeChat access token");
                Err(CredentialError::from(e))
            }
        };

        state.last_outcome = Some(outcome.clone());
        self.generation.fetch_add(1, Ordering::Release);
        outcome
    }

    /// Drop the cached token so the next call exchanges a new one.
    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        state.current = None;
        state.last_outcome = None;
        self.generation.fetch_add(1, Ordering::Release);
        debug!("Invalidated cached WeChat access token");
    }

    /// Number of exchange calls issued so far.
    pub fn exchange_count(&self) -> u64 {
        self.exchanges.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    use async_trait::async_trait;

    use super::*;
    use crate::error::{ApiError, Result};
    use crate::models::AccessToken;

    struct FakeSource {
        calls: AtomicUsize,
        fail: AtomicBool,
        expires_in: Duration,
        delay: Duration,
        token_override: Option<String>,
    }

    impl FakeSource {
        fn new(expires_in_secs: u64) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                expires_in: Duration::from_secs(expires_in_secs),
                delay: Duration::ZERO,
                token_override: None,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenSource for FakeSource {
        async fn fetch_token(&self) -> Result<AccessToken> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(ApiError::api(40013, "invalid appid"));
            }
            Ok(AccessToken {
                token: self
                    .token_override
                    .clone()
                    .unwrap_or_else(|| format!("token-{n}")),
                expires_in: self.expires_in,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_token_is_cached() {
        let source = Arc::new(FakeSource::new(7200));
        let cache = AccessTokenCache::new(source.clone());

        assert_eq!(cache.get_token().await.unwrap(), "token-1");
        assert_eq!(cache.get_token().await.unwrap(), "token-1");
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_inside_margin() {
        let source = Arc::new(FakeSource::new(600));
        let cache = AccessTokenCache::new(source.clone());

        assert_eq!(cache.get_token().await.unwrap(), "token-1");

        tokio::time::advance(Duration::from_secs(100)).await;
        assert_eq!(cache.get_token().await.unwrap(), "token-1");
        assert_eq!(source.calls(), 1);

        tokio::time::advance(Duration::from_secs(495)).await;
        assert_eq!(cache.get_token().await.unwrap(), "token-2");
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_lived_token_returned_as_is() {
        // Lifetime below the margin: every call refreshes, but the caller that
        // triggered the exchange still gets the token it fetched.
        let source = Arc::new(FakeSource::new(60));
        let cache = AccessTokenCache::new(source.clone());

        assert_eq!(cache.get_token().await.unwrap(), "token-1");
        assert_eq!(cache.get_token().await.unwrap(), "token-2");
        assert_eq!(cache.exchange_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_exchange() {
        let source = Arc::new(FakeSource::new(7200).with_delay(Duration::from_millis(200)));
        let cache = Arc::new(AccessTokenCache::new(source.clone()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_token().await })
            })
            .collect();

        let results = futures::future::join_all(handles).await;
        for result in results {
            assert_eq!(result.unwrap().unwrap(), "token-1");
        }
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_failure() {
        let source = Arc::new(FakeSource::new(7200).with_delay(Duration::from_millis(200)));
        source.fail.store(true, Ordering::SeqCst);
        let cache = Arc::new(AccessTokenCache::new(source.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_token().await })
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            let err = result.unwrap().unwrap_err();
            assert!(err.to_string().contains("40013"));
        }
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_cached_state_and_next_call_retries() {
        let source = Arc::new(FakeSource::new(600));
        let cache = AccessTokenCache::new(source.clone());

        assert_eq!(cache.get_token().await.unwrap(), "token-1");
        tokio::time::advance(Duration::from_secs(400)).await;

        source.fail.store(true, Ordering::SeqCst);
        assert!(cache.get_token().await.is_err());
        {
            let state = cache.state.read().await;
            assert_eq!(state.current.as_ref().unwrap().token, "token-1");
        }

        source.fail.store(false, Ordering::SeqCst);
        assert_eq!(cache.get_token().await.unwrap(), "token-3");
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_empty_token_is_unavailable() {
        let mut source = FakeSource::new(7200);
        source.token_override = Some(String::new());
        let cache = AccessTokenCache::new(source);

        let err = cache.get_token().await.unwrap_err();
        assert_eq!(
            err,
            CredentialError::unavailable("empty access token received")
        );
    }

    #[tokio::test]
    async fn test_invalidate_forces_exchange() {
        let source = Arc::new(FakeSource::new(7200));
        let cache = AccessTokenCache::new(source.clone());

        assert_eq!(cache.get_token().await.unwrap(), "token-1");
        cache.invalidate().await;
        assert_eq!(cache.get_token().await.unwrap(), "token-2");
    }
}
