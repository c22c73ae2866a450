//! Access token claims.
//!
//! The API issues JWTs whose claims use the WS-Federation URIs. Signatures
//! are not checked here: the API verifies every token it receives, and the
//! client only needs the payload to build its identity view.

use crate::{AuthError, AuthResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const CLAIM_NAME_IDENTIFIER: &str =
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier";
const CLAIM_NAME: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/name";
const CLAIM_EMAIL: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress";
const CLAIM_ROLE: &str = "http://schemas.microsoft.com/ws/2008/06/identity/claims/role";
const CLAIM_SUBJECT: &str = "sub";
const CLAIM_EXPIRY: &str = "exp";
const CLAIM_PREFERRED_LANGUAGE: &str = "PreferredLanguage";
const CLAIM_PREFERRED_THEME: &str = "PreferredTheme";

/// Role name that grants access to the admin panel.
pub const ADMIN_ROLE: &str = "Admin";

/// The authenticated user, as described by the current access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub roles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_theme: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl Identity {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(ADMIN_ROLE)
    }
}

/// Decode the claims of `token` into an [`Identity`].
///
/// Fails with [`AuthError::InvalidClaims`] when the token is not a JWT, the
/// payload is not a JSON object, or a required claim (user id, display name,
/// `exp`) is missing.
pub fn decode_access_token(token: &str) -> AuthResult<Identity> {
    let claims = decode_payload(token)?;

    let user_id = string_claim(&claims, CLAIM_NAME_IDENTIFIER)
        .or_else(|| string_claim(&claims, CLAIM_SUBJECT))
        .ok_or_else(|| missing(CLAIM_NAME_IDENTIFIER))?;
    let display_name = string_claim(&claims, CLAIM_NAME).ok_or_else(|| missing(CLAIM_NAME))?;
    let expires_at = expiry_claim(&claims)?;

    Ok(Identity {
        user_id,
        display_name,
        email: string_claim(&claims, CLAIM_EMAIL),
        roles: role_claim(&claims),
        preferred_language: string_claim(&claims, CLAIM_PREFERRED_LANGUAGE),
        preferred_theme: string_claim(&claims, CLAIM_PREFERRED_THEME),
        expires_at,
    })
}

fn decode_payload(token: &str) -> AuthResult<Map<String, Value>> {
    let parts: Vec<&str> = token.splitn(3, '.').collect();
    if parts.len() != 3 {
        return Err(AuthError::InvalidClaims(
            "Invalid JWT format: expected 3 segments".into(),
        ));
    }

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .map_err(|e| AuthError::InvalidClaims(format!("Invalid JWT payload base64: {}", e)))?;

    match serde_json::from_slice(&payload_bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(AuthError::InvalidClaims(
            "JWT payload is not an object".into(),
        )),
        Err(e) => Err(AuthError::InvalidClaims(format!(
            "Invalid JWT payload JSON: {}",
            e
        ))),
    }
}

fn missing(claim: &str) -> AuthError {
    AuthError::InvalidClaims(format!("Missing '{}' claim", claim))
}

fn string_claim(claims: &Map<String, Value>, key: &str) -> Option<String> {
    claims
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn role_claim(claims: &Map<String, Value>) -> Vec<String> {
    match claims.get(CLAIM_ROLE) {
        Some(Value::String(role)) => vec![role.clone()],
        Some(Value::Array(roles)) => roles
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn expiry_claim(claims: &Map<String, Value>) -> AuthResult<DateTime<Utc>> {
    let value = claims.get(CLAIM_EXPIRY).ok_or_else(|| missing(CLAIM_EXPIRY))?;
    let seconds = value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .ok_or_else(|| AuthError::InvalidClaims("'exp' claim is not a number".into()))?;

    DateTime::<Utc>::from_timestamp(seconds, 0)
        .ok_or_else(|| AuthError::InvalidClaims("'exp' claim is out of range".into()))
}


#[cfg(test)]
mod tests {
    use super::test_tokens::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_full_identity() {
        let token = token_with_claims(json!({
            CLAIM_NAME_IDENTIFIER: "42",
            CLAIM_NAME: "Grace",
            CLAIM_EMAIL: "grace@example.com",
            CLAIM_ROLE: ["User", "Admin"],
            "exp": 1_900_000_000,
            "PreferredLanguage": "pl",
            "PreferredTheme": "dark",
        }));

        let identity = decode_access_token(&token).unwrap();
        assert_eq!(identity.user_id, "42");
        assert_eq!(identity.display_name, "Grace");
        assert_eq!(identity.email.as_deref(), Some("grace@example.com"));
        assert_eq!(identity.roles, vec!["User", "Admin"]);
        assert!(identity.is_admin());
        assert_eq!(identity.preferred_language.as_deref(), Some("pl"));
        assert_eq!(identity.preferred_theme.as_deref(), Some("dark"));
        assert_eq!(identity.expires_at.timestamp(), 1_900_000_000);
    }

    #[test]
    fn test_single_role_string_and_sub_fallback() {
        let token = token_with_claims(json!({
            "sub": "user-7",
            CLAIM_NAME: "Linus",
            CLAIM_ROLE: "User",
            "exp": 1_900_000_000,
        }));

        let identity = decode_access_token(&token).unwrap();
        assert_eq!(identity.user_id, "user-7");
        assert_eq!(identity.roles, vec!["User"]);
        assert!(identity.email.is_none());
        assert!(!identity.is_admin());
        assert!(identity.has_role("User"));
    }

    #[test]
    fn test_missing_required_claims() {
        let no_name = token_with_claims(json!({ "sub": "1", "exp": 1_900_000_000 }));
        assert!(matches!(
            decode_access_token(&no_name),
            Err(AuthError::InvalidClaims(_))
        ));

        let no_exp = token_with_claims(json!({ "sub": "1", CLAIM_NAME: "A" }));
        assert!(matches!(
            decode_access_token(&no_exp),
            Err(AuthError::InvalidClaims(_))
        ));

        let no_user = token_with_claims(json!({ CLAIM_NAME: "A", "exp": 1_900_000_000 }));
        assert!(matches!(
            decode_access_token(&no_user),
            Err(AuthError::InvalidClaims(_))
        ));
    }

    #[test]
    fn test_malformed_tokens() {
        for token in ["", "abc", "a.b", "a.!!!.c"] {
            assert!(
                matches!(decode_access_token(token), Err(AuthError::InvalidClaims(_))),
                "token {:?} should be rejected",
                token
            );
        }

        let array_payload = format!("h.{}.s", URL_SAFE_NO_PAD.encode("[1,2]"));
        assert!(matches!(
            decode_access_token(&array_payload),
            Err(AuthError::InvalidClaims(_))
        ));
    }
}
