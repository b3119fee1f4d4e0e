//! Bearer credentials accepted by the GitHub API and git remotes.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::{ApiError, Result};

/// Prefix of short-lived GitHub App installation tokens.
pub const INSTALLATION_TOKEN_PREFIX: &str = "ghs_";
/// Prefix of fine-grained personal access tokens.
pub const PERSONAL_TOKEN_PREFIX: &str = "github_pat_";

/// An opaque GitHub token plus the scope it was issued for.
///
/// A credential is an installation credential iff it carries an
/// installation id. Instances are never mutated after construction; the
/// `with_*` helpers return new values.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    secret: String,
    installation_id: Option<u64>,
    org: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Build a credential from a static personal access token.
    pub fn personal(secret: impl Into<String>) -> Result<Self> {
        let secret = secret.into();
        validate_secret(&secret)?;
        Ok(Self {
            secret,
            installation_id: None,
            org: None,
            expires_at: None,
        })
    }

    /// Build a credential issued for a GitHub App installation.
    pub fn installation(
        secret: impl Into<String>,
        installation_id: u64,
        expires_at: DateTime<Utc>,
    ) -> Result<Self> {
        let secret = secret.into();
        validate_secret(&secret)?;
        Ok(Self {
            secret,
            installation_id: Some(installation_id),
            org: None,
            expires_at: Some(expires_at),
        })
    }

    /// Copy of this credential tagged with the organization it serves.
    pub fn with_org(&self, org: Option<&str>) -> Self {
        Self {
            org: org.map(str::to_string),
            ..self.clone()
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn installation_id(&self) -> Option<u64> {
        self.installation_id
    }

    pub fn org(&self) -> Option<&str> {
        self.org.as_deref()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_installation(&self) -> bool {
        self.installation_id.is_some()
    }

    /// Credentials without an expiry never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("secret", &"<redacted>")
            .field("installation_id", &self.installation_id)
            .field("org", &self.org)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

fn validate_secret(secret: &str) -> Result<()> {
    if secret.starts_with(INSTALLATION_TOKEN_PREFIX) || secret.starts_with(PERSONAL_TOKEN_PREFIX) {
        Ok(())
    } else {
        Err(ApiError::InvalidCredential(format!(
            "expected a fine-grained personal access token ({PERSONAL_TOKEN_PREFIX}...) \
             or an installation token ({INSTALLATION_TOKEN_PREFIX}...)"
        )))
    }
}
