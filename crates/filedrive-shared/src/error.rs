use std::fmt;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Credential signing failed")]
    SigningFailed,

    #[error("Invalid credential ({0})")]
    Invalid(RejectReason),
}

/// Why a credential was rejected. Only ever logged, never sent to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Malformed,
    Algorithm,
    Signature,
    Issuer,
    Kind,
    Expired,
    NotYetValid,
    Subject,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectReason::Malformed => "malformed",
            RejectReason::Algorithm => "unsupported algorithm",
            RejectReason::Signature => "bad signature",
            RejectReason::Issuer => "wrong issuer",
            RejectReason::Kind => "wrong credential kind",
            RejectReason::Expired => "expired",
            RejectReason::NotYetValid => "not yet valid",
            RejectReason::Subject => "malformed subject",
        };
        f.write_str(s)
    }
}

impl From<RejectReason> for CredentialError {
    fn from(reason: RejectReason) -> Self {
        CredentialError::Invalid(reason)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProfileError {
    #[error("Profile is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("Provider reports the email address as unverified")]
    UnverifiedEmail,

    #[error("Profile could not be decoded: {0}")]
    Decode(String),

    #[error("Profile request failed: {0}")]
    Transport(String),
}
