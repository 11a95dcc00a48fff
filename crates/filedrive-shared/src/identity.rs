use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::constants::STATE_TOKEN_BYTES;
use crate::error::ProfileError;

/// A user identity asserted by the external identity provider.
///
/// Only ever constructed from a successfully parsed provider profile, so every
/// required field is known to be present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedIdentity {
    /// Provider subject id (the federated identity key).
    pub federated_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar_url: String,
}

/// Profile document as returned by the provider's userinfo endpoint.
///
/// Every field is optional at the wire; [`VerifiedIdentity::try_from`] decides
/// which ones are required.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderProfile {
    pub id: Option<String>,
    pub email: Option<String>,
    pub verified_email: Option<bool>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub picture: Option<String>,
}

impl TryFrom<ProviderProfile> for VerifiedIdentity {
    type Error = ProfileError;

    fn try_from(profile: ProviderProfile) -> Result<Self, Self::Error> {
        let federated_id = required(profile.id, "id")?;
        let email = required(profile.email, "email")?;

        if profile.verified_email == Some(false) {
            return Err(ProfileError::UnverifiedEmail);
        }

        Ok(Self {
            federated_id,
            email,
            first_name: profile.given_name.unwrap_or_default(),
            last_name: profile.family_name.unwrap_or_default(),
            avatar_url: profile.picture.unwrap_or_default(),
        })
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ProfileError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ProfileError::MissingField(field)),
    }
}

/// Decode a userinfo response body into a verified identity.
pub fn parse_profile(body: &[u8]) -> Result<VerifiedIdentity, ProfileError> {
    let profile: ProviderProfile =
        serde_json::from_slice(body).map_err(|e| ProfileError::Decode(e.to_string()))?;
    VerifiedIdentity::try_from(profile)
}

/// Generate an opaque, URL-safe anti-forgery token for the login handshake.
pub fn generate_state_token() -> String {
    let mut bytes = [0u8; STATE_TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compare the state echoed by the provider with the one from the cookie.
pub fn states_match(returned: &str, expected: &str) -> bool {
    let a = returned.as_bytes();
    let b = expected.as_bytes();
    !a.is_empty() && a.len() == b.len() && a.ct_eq(b).unwrap_u8() == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_profile() {
        let body = br#"{
            "id": "1234567890",
            "email": "ada@example.com",
            "verified_email": true,
            "given_name": "Ada",
            "family_name": "Lovelace",
            "picture": "https://example.com/ada.png"
        }"#;

        let identity = parse_profile(body).unwrap();
        assert_eq!(identity.federated_id, "1234567890");
        assert_eq!(identity.email, "ada@example.com");
        assert_eq!(identity.first_name, "Ada");
        assert_eq!(identity.last_name, "Lovelace");
        assert_eq!(identity.avatar_url, "https://example.com/ada.png");
    }

    #[test]
    fn test_missing_required_fields_are_named() {
        let err = parse_profile(br#"{"email": "a@example.com"}"#).unwrap_err();
        assert_eq!(err, ProfileError::MissingField("id"));

        let err = parse_profile(br#"{"id": "1", "email": "  "}"#).unwrap_err();
        assert_eq!(err, ProfileError::MissingField("email"));
    }

    #[test]
    fn test_optional_fields_default() {
        let identity = parse_profile(br#"{"id": "1", "email": "a@example.com"}"#).unwrap();
        assert_eq!(identity.first_name, "");
        assert_eq!(identity.avatar_url, "");
    }

    #[test]
    fn test_unverified_email_rejected() {
        let err = parse_profile(br#"{"id": "1", "email": "a@example.com", "verified_email": false}"#)
            .unwrap_err();
        assert_eq!(err, ProfileError::UnverifiedEmail);
    }

    #[test]
    fn test_non_object_body() {
        assert!(matches!(parse_profile(b"[1,2]"), Err(ProfileError::Decode(_))));
    }

    #[test]
    fn test_state_tokens() {
        let a = generate_state_token();
        let b = generate_state_token();
        // 16 bytes -> 22 base64url chars without padding
        assert_eq!(a.len(), 22);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(a, b);

        assert!(states_match(&a, &a.clone()));
        assert!(!states_match(&a, &b));
        assert!(!states_match("", ""));
    }
}
