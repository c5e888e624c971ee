//! Credential access.
//!
//! Sign-in and session storage belong to the host. The core only asks for
//! the current user's identity and bearer token right before each backend
//! call, so a sign-out or token refresh is picked up without notifying it.

use async_trait::async_trait;
use std::fmt;

use crate::error::Result;

/// Identity attached to backend calls.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    /// Backend user identifier, used in request paths and bodies.
    pub user_id: String,
    /// Bearer token sent in the `Authorization` header.
    pub bearer_token: String,
}

impl SessionCredentials {
    pub fn new(user_id: impl Into<String>, bearer_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            bearer_token: bearer_token.into(),
        }
    }
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("user_id", &self.user_id)
            .field("bearer_token", &"[REDACTED]")
            .finish()
    }
}

/// Source of the signed-in user's credentials.
///
/// # Returns
///
/// `Ok(None)` when nobody is signed in. The core skips the backend call in
/// that case and reports it as a failed sync.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credentials(&self) -> Result<Option<SessionCredentials>>;
}

/// Provider returning a fixed credential set. Useful for tools and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(Option<SessionCredentials>);

impl StaticCredentials {
    pub fn new(credentials: SessionCredentials) -> Self {
        Self(Some(credentials))
    }

    /// Provider for a signed-out session.
    pub fn signed_out() -> Self {
        Self(None)
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credentials(&self) -> Result<Option<SessionCredentials>> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_token() {
        let creds = SessionCredentials::new("user-1", "very-secret");
        let printed = format!("{:?}", creds);
        assert!(printed.contains("user-1"));
        assert!(!printed.contains("very-secret"));
    }

    #[tokio::test]
    async fn static_provider_returns_credentials() {
        let provider = StaticCredentials::new(SessionCredentials::new("u", "t"));
        let creds = provider.credentials().await.unwrap().unwrap();
        assert_eq!(creds.user_id, "u");

        assert!(StaticCredentials::signed_out()
            .credentials()
            .await
            .unwrap()
            .is_none());
    }
}
