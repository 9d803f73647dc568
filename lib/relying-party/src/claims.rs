//! Identity claims carried in the Casdoor access token.
//!
//! The payload is decoded without verifying the token signature. The token
//! is only ever obtained from the back-channel exchange, whose TLS channel
//! to the configured backend is the trust anchor. A deployment that accepts
//! tokens from any other source must verify signatures against the
//! provider's published keys first.

use crate::error::AuthFlowError;
use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde::Deserialize;

/// URL-safe base64 that accepts payloads with or without padding.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Identity of the signed-in Casdoor user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityClaims {
    subject: String,
    email: Option<String>,
    display_name: Option<String>,
    is_global_admin: bool,
}

impl IdentityClaims {
    #[must_use]
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            email: None,
            display_name: None,
            is_global_admin: false,
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    #[must_use]
    pub fn with_global_admin(mut self, is_global_admin: bool) -> Self {
        self.is_global_admin = is_global_admin;
        self
    }

    /// Casdoor username.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    #[must_use]
    pub fn is_global_admin(&self) -> bool {
        self.is_global_admin
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Payload {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    is_global_admin: bool,
}

/// Decodes access tokens into identity claims.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityExtractor;

impl IdentityExtractor {
    /// Decodes the payload segment of `token`.
    ///
    /// # Errors
    ///
    /// Returns `MalformedToken` if the token does not have exactly three
    /// segments, the payload is not base64url JSON, or it carries no
    /// username.
    pub fn decode(&self, token: &str) -> Result<IdentityClaims, AuthFlowError> {
        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 {
            return Err(AuthFlowError::MalformedToken {
                reason: format!("expected 3 segments, found {}", segments.len()),
            });
        }

        let bytes = URL_SAFE_LENIENT
            .decode(segments[1])
            .map_err(|e| AuthFlowError::MalformedToken {
                reason: format!("payload is not base64url: {e}"),
            })?;

        let payload: Payload =
            serde_json::from_slice(&bytes).map_err(|e| AuthFlowError::MalformedToken {
                reason: format!("payload is not a JSON claim set: {e}"),
            })?;

        let subject = payload
            .name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| AuthFlowError::MalformedToken {
                reason: "payload has no name claim".to_string(),
            })?;

        Ok(IdentityClaims {
            subject,
            email: payload.email.filter(|e| !e.trim().is_empty()),
            display_name: payload.display_name.filter(|d| !d.trim().is_empty()),
            is_global_admin: payload.is_global_admin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    fn token_with(payload: &serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{header}.{body}.signature")
    }

    #[test]
    fn decodes_casdoor_claims() {
        let token = token_with(&serde_json::json!({
            "name": "alice",
            "email": "alice@example.com",
            "displayName": "Alice Liddell",
            "isGlobalAdmin": true,
            "owner": "built-in"
        }));

        let claims = IdentityExtractor.decode(&token).expect("valid token");

        assert_eq!(claims.subject(), "alice");
        assert_eq!(claims.email(), Some("alice@example.com"));
        assert_eq!(claims.display_name(), Some("Alice Liddell"));
        assert!(claims.is_global_admin());
    }

    #[test]
    fn optional_claims_default() {
        let token = token_with(&serde_json::json!({ "name": "bob", "email": "" }));

        let claims = IdentityExtractor.decode(&token).expect("valid token");

        assert_eq!(claims, IdentityClaims::new("bob"));
    }

    #[test]
    fn accepts_padded_payload() {
        let payload = base64::engine::general_purpose::URL_SAFE.encode(r#"{"name":"carol"}"#);
        let token = format!("h.{payload}.s");

        let claims = IdentityExtractor.decode(&token).expect("valid token");

        assert_eq!(claims.subject(), "carol");
    }

    #[test]
    fn rejects_wrong_segment_count() {
        for token in ["", "only-one", "two.segments", "a.b.c.d"] {
            let err = IdentityExtractor.decode(token).expect_err("malformed");
            assert!(matches!(err, AuthFlowError::MalformedToken { .. }));
            assert_eq!(err.status_code(), 400);
        }
    }

    #[test]
    fn rejects_undecodable_payload() {
        let err = IdentityExtractor
            .decode("h.!!!not-base64!!!.s")
            .expect_err("malformed");
        assert!(matches!(err, AuthFlowError::MalformedToken { .. }));

        let not_json = URL_SAFE_NO_PAD.encode("plain text");
        let err = IdentityExtractor
            .decode(&format!("h.{not_json}.s"))
            .expect_err("malformed");
        assert!(matches!(err, AuthFlowError::MalformedToken { .. }));
    }

    #[test]
    fn rejects_payload_without_name() {
        let token = token_with(&serde_json::json!({ "email": "x@example.com" }));
        let err = IdentityExtractor.decode(&token).expect_err("malformed");
        assert!(matches!(err, AuthFlowError::MalformedToken { .. }));
    }
}
