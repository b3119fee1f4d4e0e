//! Installation-token cache.
//!
//! [`TokenCache`] hands out the credential used for an organization. With a
//! static personal token configured it simply tags that token; otherwise it
//! keeps one installation token per installation id and refreshes it through
//! an [`InstallationTokenSource`] once it expires.
//!
//! Refreshes are not coordinated: two callers racing on an expired entry may
//! both request a token, and the last write wins.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, info};

use crate::client::{ApiClient, RestRequest};
use crate::credential::Credential;
use crate::error::{ApiError, Result};

/// Lifetime assigned to a freshly issued installation token.
pub const INSTALLATION_TOKEN_VALIDITY_SECS: i64 = 3000;

/// Source of the current time, injectable for expiry tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock [`Clock`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Issues installation access tokens.
#[async_trait]
pub trait InstallationTokenSource: Send + Sync {
    /// Return a raw token secret for `installation_id`.
    async fn issue_token(&self, installation_id: u64) -> Result<String>;
}

/// Token provider service reached over HTTP.
///
/// Calls `GET <provider>/get-installation-token?github_api_url=..&installation_id=..`
/// with the provider secret as bearer token and reads `access_token`.
pub struct TokenProviderClient {
    client: ApiClient,
    provider_url: String,
    provider_secret: String,
    github_api_url: String,
}

impl TokenProviderClient {
    pub fn new(
        client: ApiClient,
        provider_url: &str,
        provider_secret: &str,
        github_api_url: &str,
    ) -> Self {
        Self {
            client,
            provider_url: provider_url.trim_end_matches('/').to_string(),
            provider_secret: provider_secret.to_string(),
            github_api_url: github_api_url.to_string(),
        }
    }
}

#[async_trait]
impl InstallationTokenSource for TokenProviderClient {
    async fn issue_token(&self, installation_id: u64) -> Result<String> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/get-installation-token", self.provider_url),
            &[
                ("github_api_url", self.github_api_url.clone()),
                ("installation_id", installation_id.to_string()),
            ],
        )
        .map_err(|e| ApiError::UnexpectedResponse(format!("invalid token provider URL: {e}")))?;

        let response = self
            .client
            .rest_request(&RestRequest::get(url.as_str()), Some(&self.provider_secret))
            .await?;
        response
            .get("access_token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ApiError::UnexpectedResponse("token provider returned no access_token".into()))
    }
}

/// How the cache obtains credentials.
#[derive(Clone)]
pub enum TokenMode {
    /// A static personal token; never cached or refreshed.
    Personal(Credential),
    /// A fixed installation whose short-lived tokens are cached.
    Installation {
        installation_id: u64,
        source: Arc<dyn InstallationTokenSource>,
    },
}

/// Process-wide credential cache keyed by installation id.
pub struct TokenCache {
    mode: TokenMode,
    validity: Duration,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<u64, Arc<Credential>>>,
}

impl TokenCache {
    pub fn new(mode: TokenMode) -> Self {
        Self::with_clock(mode, Arc::new(SystemClock))
    }

    pub fn with_clock(mode: TokenMode, clock: Arc<dyn Clock>) -> Self {
        Self {
            mode,
            validity: Duration::seconds(INSTALLATION_TOKEN_VALIDITY_SECS),
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Override the validity window given to refreshed tokens.
    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    /// Credential to act on `organization` with.
    pub async fn get_token(&self, organization: Option<&str>) -> Result<Credential> {
        let (installation_id, source) = match &self.mode {
            TokenMode::Personal(credential) => return Ok(credential.with_org(organization)),
            TokenMode::Installation {
                installation_id,
                source,
            } => (*installation_id, source),
        };

        let now = self.clock.now();
        if let Some(cached) = self.cached(installation_id) {
            if !cached.is_expired(now) {
                debug!(installation_id, "using cached installation token");
                return Ok(cached.with_org(organization));
            }
        }

        let secret = source.issue_token(installation_id).await?;
        let fresh = Arc::new(Credential::installation(
            secret,
            installation_id,
            now + self.validity,
        )?);
        self.store(installation_id, Arc::clone(&fresh));
        info!(installation_id, expires_at = %now + self.validity, "refreshed installation token");
        Ok(fresh.with_org(organization))
    }

    /// Number of cached installation entries.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached(&self, installation_id: u64) -> Option<Arc<Credential>> {
        // A poisoned map only means another refresh panicked; the data is
        // still a complete HashMap.
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(&installation_id).cloned()
    }

    fn store(&self, installation_id: u64, credential: Arc<Credential>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(installation_id, credential);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct FixedClock(Mutex<DateTime<Utc>>);

    impl FixedClock {
        fn advance(&self, by: Duration) {
            let mut now = self.0.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    #[derive(Default)]
    struct CountingSource {
        issued: AtomicU32,
    }

    #[async_trait]
    impl InstallationTokenSource for CountingSource {
        async fn issue_token(&self, _installation_id: u64) -> Result<String> {
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("ghs_token{n}"))
        }
    }

    fn installation_cache(source: Arc<CountingSource>, clock: Arc<FixedClock>) -> TokenCache {
        TokenCache::with_clock(
            TokenMode::Installation {
                installation_id: 7,
                source,
            },
            clock,
        )
    }

    #[tokio::test]
    async fn personal_token_is_tagged_not_cached() {
        let cache = TokenCache::new(TokenMode::Personal(
            Credential::personal("github_pat_static").unwrap(),
        ));
        let cred = cache.get_token(Some("acme")).await.unwrap();
        assert_eq!(cred.secret(), "github_pat_static");
        assert_eq!(cred.org(), Some("acme"));
        assert!(!cred.is_installation());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn installation_token_is_reused_until_expiry() {
        let source = Arc::new(CountingSource::default());
        let clock = Arc::new(FixedClock(Mutex::new(Utc::now())));
        let cache = installation_cache(Arc::clone(&source), Arc::clone(&clock));

        let first = cache.get_token(Some("acme")).await.unwrap();
        let second = cache.get_token(Some("other")).await.unwrap();
        assert_eq!(first.secret(), "ghs_token1");
        assert_eq!(second.secret(), "ghs_token1");
        assert_eq!(second.org(), Some("other"));
        assert_eq!(source.issued.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);

        clock.advance(Duration::seconds(INSTALLATION_TOKEN_VALIDITY_SECS));
        let third = cache.get_token(Some("acme")).await.unwrap();
        assert_eq!(third.secret(), "ghs_token2");
        assert_eq!(source.issued.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn refreshed_token_carries_installation_identity() {
        let source = Arc::new(CountingSource::default());
        let now = Utc::now();
        let clock = Arc::new(FixedClock(Mutex::new(now)));
        let cache = installation_cache(source, clock).with_validity(Duration::seconds(60));

        let cred = cache.get_token(None).await.unwrap();
        assert!(cred.is_installation());
        assert_eq!(cred.installation_id(), Some(7));
        assert_eq!(cred.expires_at(), Some(now + Duration::seconds(60)));
    }

    #[tokio::test]
    async fn source_failure_propagates_and_caches_nothing() {
        struct Failing;
        #[async_trait]
        impl InstallationTokenSource for Failing {
            async fn issue_token(&self, _id: u64) -> Result<String> {
                Err(ApiError::Status {
                    status: 401,
                    message: "bad provider secret".into(),
                    body: String::new(),
                    retryable: false,
                })
            }
        }

        let cache = TokenCache::new(TokenMode::Installation {
            installation_id: 1,
            source: Arc::new(Failing),
        });
        let err = cache.get_token(Some("acme")).await.unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert!(cache.is_empty());
    }
}
