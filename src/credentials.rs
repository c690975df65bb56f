//! Credential source for the notification engine.
//!
//! The engine never caches a token: every connection attempt and every API
//! call asks the [`CredentialSource`] again, so a refreshed token is picked up
//! on the next reconnect without tearing anything down.

// Rust guideline compliant 2026-02

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use std::sync::{Arc, PoisonError, RwLock};

use crate::constants::ROLE_CLAIM;

/// Portal role carried in the token's role claim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    /// Administrator: receives admin notifications.
    Admin,
    /// Student: receives student notifications.
    Student,
    /// Any other role string.
    Other(String),
}

impl Role {
    /// Parse a role claim value. Matching is exact, like the portal's guards.
    pub fn parse(value: &str) -> Self {
        match value {
            "Admin" => Self::Admin,
            "Student" => Self::Student,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Supplies the current bearer token and the roles decoded from it.
pub trait CredentialSource: Send + Sync + std::fmt::Debug {
    /// Current bearer token, or `None` when absent or blank.
    fn token(&self) -> Option<String>;

    /// Roles decoded from the current token.
    fn roles(&self) -> Vec<Role> {
        self.token().map(|t| decode_roles(&t)).unwrap_or_default()
    }
}

/// Token factory handed to the push transport, invoked once per connect attempt.
pub type CredentialFactory = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Build a [`CredentialFactory`] that reads `source` lazily.
pub fn factory(source: Arc<dyn CredentialSource>) -> CredentialFactory {
    Arc::new(move || source.token())
}

/// In-memory credential for one authenticated session.
///
/// Login stores the token, logout clears it. Cloning shares the same slot.
#[derive(Debug, Clone, Default)]
pub struct SessionCredentials {
    token: Arc<RwLock<Option<String>>>,
}

impl SessionCredentials {
    /// Create an empty session (no token).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session holding `token`.
    pub fn with_token(token: impl Into<String>) -> Self {
        let creds = Self::new();
        creds.set_token(token);
        creds
    }

    /// Replace the stored token.
    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
    }

    /// Forget the stored token.
    pub fn clear(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl CredentialSource for SessionCredentials {
    fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .filter(|t| !t.trim().is_empty())
    }
}

/// Decode the role claim from a JWT without verifying it.
///
/// Accepts the claim as a string or an array of strings, falling back to a
/// plain `role` claim. Anything malformed yields no roles.
pub fn decode_roles(token: &str) -> Vec<Role> {
    let Some(payload) = token.split('.').nth(1) else {
        log::debug!("[Credentials] Token is not a JWT, no roles");
        return Vec::new();
    };

    let claims: serde_json::Value = match URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
    {
        Some(claims) => claims,
        None => {
            log::debug!("[Credentials] Could not decode token payload");
            return Vec::new();
        }
    };

    let claim = claims.get(ROLE_CLAIM).or_else(|| claims.get("role"));
    match claim {
        Some(serde_json::Value::String(role)) => vec![Role::parse(role)],
        Some(serde_json::Value::Array(roles)) => roles
            .iter()
            .filter_map(serde_json::Value::as_str)
            .map(Role::parse)
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
pub(crate) fn jwt_with_claims(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_single_role() {
        let token = jwt_with_claims(&json!({ ROLE_CLAIM: "Student", "name": "s1" }));
        assert_eq!(decode_roles(&token), vec![Role::Student]);
    }

    #[test]
    fn test_decode_role_array() {
        let token = jwt_with_claims(&json!({ ROLE_CLAIM: ["Admin", "Auditor"] }));
        assert_eq!(
            decode_roles(&token),
            vec![Role::Admin, Role::Other("Auditor".to_string())]
        );
    }

    #[test]
    fn test_decode_plain_role_claim() {
        let token = jwt_with_claims(&json!({ "role": "Admin" }));
        assert_eq!(decode_roles(&token), vec![Role::Admin]);
    }

    #[test]
    fn test_malformed_token_has_no_roles() {
        assert!(decode_roles("not-a-jwt").is_empty());
        assert!(decode_roles("a.%%%.c").is_empty());
        assert!(decode_roles(&jwt_with_claims(&json!({ "name": "x" }))).is_empty());
    }

    #[test]
    fn test_session_credentials_lifecycle() {
        let creds = SessionCredentials::new();
        assert!(creds.token().is_none());

        creds.set_token("t1");
        let shared = creds.clone();
        assert_eq!(shared.token().as_deref(), Some("t1"));

        creds.clear();
        assert!(shared.token().is_none());
    }

    #[test]
    fn test_blank_token_is_absent() {
        let creds = SessionCredentials::with_token("   ");
        assert!(creds.token().is_none());
        assert!(creds.roles().is_empty());
    }

    #[test]
    fn test_factory_reads_fresh_token() {
        let creds = SessionCredentials::with_token("old");
        let make_token = factory(Arc::new(creds.clone()));
        assert_eq!(make_token().as_deref(), Some("old"));

        creds.set_token("new");
        assert_eq!(make_token().as_deref(), Some("new"));
    }
}
