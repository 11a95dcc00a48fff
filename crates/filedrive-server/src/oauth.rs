//! Authorization-code login against an external identity provider.
//!
//! The server never stores anything while a login is in flight: the
//! anti-forgery state lives in a short-lived cookie on the client, and the
//! provider round trip either produces a [`VerifiedIdentity`] or fails.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use filedrive_shared::identity::{generate_state_token, parse_profile, states_match};
use filedrive_shared::{ProfileError, VerifiedIdentity};

use crate::config::FederationConfig;

#[derive(Debug, Error)]
pub enum FederationError {
    #[error("Login state does not match")]
    StateMismatch,

    #[error("Authorization code exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("Profile fetch failed: {0}")]
    ProfileFetchFailed(#[from] ProfileError),

    #[error("Identity provider timed out")]
    TimedOut,

    #[error("Invalid identity provider configuration: {0}")]
    Config(String),
}

/// The provider half of the authorization-code flow.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Where to send the browser to start a login carrying `state`.
    fn authorization_url(&self, state: &str) -> String;

    /// Trade an authorization code for a provider access token.
    async fn exchange_code(&self, code: &str) -> Result<String, FederationError>;

    /// Fetch and validate the profile behind a provider access token.
    async fn fetch_profile(&self, access_token: &str) -> Result<VerifiedIdentity, FederationError>;
}

// ---------------------------------------------------------------------------
// Google
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct GoogleProvider {
    http: reqwest::Client,
    config: FederationConfig,
    auth_url: Url,
    token_url: Url,
    userinfo_url: Url,
}

impl GoogleProvider {
    pub fn new(config: FederationConfig) -> Result<Self, FederationError> {
        let parse = |url: &str| {
            Url::parse(url).map_err(|e| FederationError::Config(format!("{url}: {e}")))
        };
        let auth_url = parse(&config.auth_url)?;
        let token_url = parse(&config.token_url)?;
        let userinfo_url = parse(&config.userinfo_url)?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FederationError::Config(e.to_string()))?;

        Ok(Self {
            http,
            config,
            auth_url,
            token_url,
            userinfo_url,
        })
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn authorization_url(&self, state: &str) -> String {
        let mut url = self.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_url)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("state", state)
            .append_pair("access_type", "offline");
        url.to_string()
    }

    async fn exchange_code(&self, code: &str) -> Result<String, FederationError> {
        let form = [
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose()),
            ("redirect_uri", self.config.redirect_url.as_str()),
            ("grant_type", "authorization_code"),
        ];

        let response = self
            .http
            .post(self.token_url.clone())
            .form(&form)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| FederationError::ExchangeFailed(e.to_string()))?;

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| FederationError::ExchangeFailed(e.to_string()))?;

        Ok(token.access_token)
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<VerifiedIdentity, FederationError> {
        let response = self
            .http
            .get(self.userinfo_url.clone())
            .bearer_auth(access_token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ProfileError::Transport(e.to_string()))?;

        let body = response
            .bytes()
            .await
            .map_err(|e| ProfileError::Transport(e.to_string()))?;

        Ok(parse_profile(&body)?)
    }
}

// ---------------------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------------------

/// Result of starting a login: the provider URL and the state to remember.
#[derive(Debug, Clone)]
pub struct LoginRedirect {
    pub redirect_url: String,
    pub state: String,
}

/// Drives a login through an [`IdentityProvider`] under a time limit.
#[derive(Clone)]
pub struct FederationExchange {
    provider: Arc<dyn IdentityProvider>,
    timeout: Duration,
}

impl FederationExchange {
    pub fn new(provider: Arc<dyn IdentityProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    pub fn begin_login(&self) -> LoginRedirect {
        let state = generate_state_token();
        LoginRedirect {
            redirect_url: self.provider.authorization_url(&state),
            state,
        }
    }

    /// Check the echoed state against the cookie, then run the code exchange
    /// and profile fetch. A missing cookie counts as a mismatch.
    pub async fn complete_login(
        &self,
        returned_state: &str,
        cookie_state: Option<&str>,
        code: &str,
    ) -> Result<VerifiedIdentity, FederationError> {
        let expected = cookie_state.unwrap_or_default();
        if !states_match(returned_state, expected) {
            debug!(cookie_present = cookie_state.is_some(), "login state mismatch");
            return Err(FederationError::StateMismatch);
        }

        let round_trip = async {
            let access_token = self.provider.exchange_code(code).await?;
            self.provider.fetch_profile(&access_token).await
        };

        let identity = tokio::time::timeout(self.timeout, round_trip)
            .await
            .map_err(|_| FederationError::TimedOut)??;

        info!(federated_id = %identity.federated_id, "identity verified by provider");
        Ok(identity)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// What the fake provider does once the state check has passed.
    #[derive(Clone)]
    pub enum FakeOutcome {
        Identity(VerifiedIdentity),
        ExchangeFails,
        ProfileMissingEmail,
        Hangs,
    }

    pub struct FakeProvider {
        pub outcome: FakeOutcome,
    }

    pub fn identity(federated_id: &str, email: &str) -> VerifiedIdentity {
        VerifiedIdentity {
            federated_id: federated_id.to_string(),
            email: email.to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            avatar_url: String::new(),
        }
    }

    #[async_trait]
    impl IdentityProvider for FakeProvider {
        fn authorization_url(&self, state: &str) -> String {
            format!("https://idp.test/auth?state={state}")
        }

        async fn exchange_code(&self, code: &str) -> Result<String, FederationError> {
            match self.outcome {
                FakeOutcome::ExchangeFails => {
                    Err(FederationError::ExchangeFailed("invalid_grant".into()))
                }
                FakeOutcome::Hangs => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(format!("token-for-{code}"))
                }
                _ => Ok(format!("token-for-{code}")),
            }
        }

        async fn fetch_profile(
            &self,
            _access_token: &str,
        ) -> Result<VerifiedIdentity, FederationError> {
            match &self.outcome {
                FakeOutcome::Identity(identity) => Ok(identity.clone()),
                FakeOutcome::ProfileMissingEmail => Err(ProfileError::MissingField("email").into()),
                _ => Err(FederationError::ExchangeFailed("unreachable".into())),
            }
        }
    }

    pub fn exchange(outcome: FakeOutcome) -> FederationExchange {
        FederationExchange::new(
            Arc::new(FakeProvider { outcome }),
            Duration::from_millis(100),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_begin_login_embeds_state() {
        let ex = exchange(FakeOutcome::ExchangeFails);
        let login = ex.begin_login();
        assert_eq!(login.state.len(), 22);
        assert!(login.redirect_url.ends_with(&login.state));
        assert_ne!(ex.begin_login().state, login.state);
    }

    #[test]
    fn test_google_authorization_url() {
        let mut config = FederationConfig::default();
        config.client_id = "client-123".to_string();
        let provider = GoogleProvider::new(config).unwrap();

        let url = Url::parse(&provider.authorization_url("abc")).unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_id"], "client-123");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["state"], "abc");
        assert_eq!(pairs["access_type"], "offline");
        assert!(pairs["scope"].contains("email"));
    }

    #[test]
    fn test_bad_provider_url_rejected() {
        let mut config = FederationConfig::default();
        config.token_url = "not a url".to_string();
        assert!(matches!(
            GoogleProvider::new(config),
            Err(FederationError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_complete_login_success() {
        let ex = exchange(FakeOutcome::Identity(identity("g-1", "ada@example.com")));
        let id = ex.complete_login("s", Some("s"), "code").await.unwrap();
        assert_eq!(id.federated_id, "g-1");
    }

    #[tokio::test]
    async fn test_state_mismatch() {
        let ex = exchange(FakeOutcome::Identity(identity("g-1", "ada@example.com")));
        assert!(matches!(
            ex.complete_login("a", Some("b"), "code").await,
            Err(FederationError::StateMismatch)
        ));
        assert!(matches!(
            ex.complete_login("a", None, "code").await,
            Err(FederationError::StateMismatch)
        ));
        assert!(matches!(
            ex.complete_login("", Some(""), "code").await,
            Err(FederationError::StateMismatch)
        ));
    }

    #[tokio::test]
    async fn test_provider_failures() {
        let ex = exchange(FakeOutcome::ExchangeFails);
        assert!(matches!(
            ex.complete_login("s", Some("s"), "code").await,
            Err(FederationError::ExchangeFailed(_))
        ));

        let ex = exchange(FakeOutcome::ProfileMissingEmail);
        assert!(matches!(
            ex.complete_login("s", Some("s"), "code").await,
            Err(FederationError::ProfileFetchFailed(ProfileError::MissingField("email")))
        ));
    }

    #[tokio::test]
    async fn test_timeout() {
        let ex = exchange(FakeOutcome::Hangs);
        assert!(matches!(
            ex.complete_login("s", Some("s"), "code").await,
            Err(FederationError::TimedOut)
        ));
    }
}
