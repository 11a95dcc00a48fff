use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::constants::{
    ACCESS_TOKEN_TTL_SECS, REFRESH_TOKEN_TTL_SECS, TOKEN_TYPE_BEARER,
};
use crate::error::{CredentialError, RejectReason};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "HS256";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// Payload carried by both halves of a credential pair. Timestamps are unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub iss: String,
    pub jti: Uuid,
    pub kind: CredentialKind,
}

impl Claims {
    /// The user identifier encoded in `sub`.
    pub fn subject(&self) -> Result<Uuid, CredentialError> {
        Uuid::parse_str(&self.sub).map_err(|_| RejectReason::Subject.into())
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// What external callers receive after login or refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access credential lifetime in seconds.
    pub expires_in: i64,
}

/// Mints and validates HS256-signed access/refresh credentials.
///
/// Issuance is stateless: validity is purely a function of the signature and
/// the timestamp claims. Both credentials of a pair are signed with the same
/// shared secret and carry the same subject and email.
#[derive(Clone)]
pub struct CredentialIssuer {
    secret: Vec<u8>,
    issuer: String,
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
}

impl fmt::Debug for CredentialIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialIssuer")
            .field("issuer", &self.issuer)
            .field("access_ttl_secs", &self.access_ttl_secs)
            .field("refresh_ttl_secs", &self.refresh_ttl_secs)
            .finish_non_exhaustive()
    }
}

impl CredentialIssuer {
    pub fn new(secret: impl Into<Vec<u8>>, issuer: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            issuer: issuer.into(),
            access_ttl_secs: ACCESS_TOKEN_TTL_SECS,
            refresh_ttl_secs: REFRESH_TOKEN_TTL_SECS,
        }
    }

    /// Issue a fresh pair for `user_id` as of now.
    pub fn issue_pair(&self, user_id: Uuid, email: &str) -> Result<CredentialPair, CredentialError> {
        self.issue_pair_at(user_id, email, Utc::now())
    }

    /// Issue a pair as of `now`. Deterministic apart from the random credential ids.
    pub fn issue_pair_at(
        &self,
        user_id: Uuid,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<CredentialPair, CredentialError> {
        let access = self.claims_for(user_id, email, now, CredentialKind::Access);
        let refresh = self.claims_for(user_id, email, now, CredentialKind::Refresh);

        Ok(CredentialPair {
            access_token: self.sign(&access)?,
            refresh_token: self.sign(&refresh)?,
            token_type: TOKEN_TYPE_BEARER.to_string(),
            expires_in: self.access_ttl_secs,
        })
    }

    /// Verify signature, issuer, kind and time window as of now.
    pub fn verify(&self, token: &str, kind: CredentialKind) -> Result<Claims, CredentialError> {
        self.verify_at(token, kind, Utc::now())
    }

    pub fn verify_at(
        &self,
        token: &str,
        kind: CredentialKind,
        now: DateTime<Utc>,
    ) -> Result<Claims, CredentialError> {
        let mut segments = token.split('.');
        let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(RejectReason::Malformed.into());
        };

        let header: Header = decode_segment(header_b64)?;
        if header.alg != ALGORITHM {
            return Err(RejectReason::Algorithm.into());
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| RejectReason::Malformed)?;
        let mut mac = self.mac().map_err(|_| RejectReason::Signature)?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(payload_b64.as_bytes());
        // constant-time comparison
        mac.verify_slice(&signature)
            .map_err(|_| RejectReason::Signature)?;

        let claims: Claims = decode_segment(payload_b64)?;

        if claims.iss != self.issuer {
            return Err(RejectReason::Issuer.into());
        }
        if claims.kind != kind {
            return Err(RejectReason::Kind.into());
        }

        let ts = now.timestamp();
        if claims.exp <= ts {
            return Err(RejectReason::Expired.into());
        }
        if claims.nbf > ts {
            return Err(RejectReason::NotYetValid.into());
        }

        claims.subject()?;
        Ok(claims)
    }

    fn claims_for(
        &self,
        user_id: Uuid,
        email: &str,
        now: DateTime<Utc>,
        kind: CredentialKind,
    ) -> Claims {
        let iat = now.timestamp();
        let ttl = match kind {
            CredentialKind::Access => self.access_ttl_secs,
            CredentialKind::Refresh => self.refresh_ttl_secs,
        };

        Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            iat,
            nbf: iat,
            exp: iat + ttl,
            iss: self.issuer.clone(),
            jti: Uuid::new_v4(),
            kind,
        }
    }

    fn sign(&self, claims: &Claims) -> Result<String, CredentialError> {
        let header = Header {
            alg: ALGORITHM.to_string(),
            typ: "JWT".to_string(),
        };
        let header_b64 = encode_segment(&header)?;
        let payload_b64 = encode_segment(claims)?;

        let mut mac = self.mac()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(payload_b64.as_bytes());
        let signature = mac.finalize().into_bytes();

        Ok(format!(
            "{header_b64}.{payload_b64}.{}",
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    fn mac(&self) -> Result<HmacSha256, CredentialError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|_| CredentialError::SigningFailed)
    }
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String, CredentialError> {
    let json = serde_json::to_vec(value).map_err(|_| CredentialError::SigningFailed)?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn decode_segment<T: DeserializeOwned>(segment: &str) -> Result<T, CredentialError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| RejectReason::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| RejectReason::Malformed.into())
}
