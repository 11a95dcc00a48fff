//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the server can start with zero
//! configuration for local development. The loaded [`ServerConfig`] is built
//! once in `main` and passed down explicitly; nothing else reads the
//! environment.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;

use filedrive_shared::constants::{
    DEFAULT_HTTP_PORT, DEFAULT_ISSUER, GOOGLE_AUTH_URL, GOOGLE_SCOPES, GOOGLE_TOKEN_URL,
    GOOGLE_USERINFO_URL,
};

/// A string that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Identity-provider settings for the authorization-code flow.
#[derive(Debug, Clone)]
pub struct FederationConfig {
    /// Env: `GOOGLE_CLIENT_ID`
    pub client_id: String,
    /// Env: `GOOGLE_CLIENT_SECRET`
    pub client_secret: Secret,
    /// Where the provider sends the user back to.
    /// Env: `GOOGLE_REDIRECT_URL`
    /// Default: `http://localhost:8080/api/auth/google/callback`
    pub redirect_url: String,
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub scopes: Vec<String>,
    /// Upper bound on the whole code-exchange + profile round trip.
    /// Env: `OAUTH_TIMEOUT_SECS`
    /// Default: 10 seconds
    pub timeout: Duration,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: Secret::new(""),
            redirect_url: format!("http://localhost:{DEFAULT_HTTP_PORT}/api/auth/google/callback"),
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            userinfo_url: GOOGLE_USERINFO_URL.to_string(),
            scopes: GOOGLE_SCOPES.iter().map(|s| s.to_string()).collect(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./data/filedrive.db`
    pub database_path: PathBuf,

    /// Base URL of the web frontend; login results are redirected here and
    /// it is the only CORS origin allowed.
    /// Env: `FRONTEND_URL`
    /// Default: `http://localhost:5173`
    pub frontend_url: String,

    /// HMAC secret for signing credentials.
    /// Env: `JWT_SECRET`
    /// Default: random per process (credentials do not survive a restart).
    pub jwt_secret: Secret,

    /// Issuer claim.
    /// Env: `JWT_ISSUER`
    pub jwt_issuer: String,

    /// Whether the state cookie carries the `Secure` attribute.
    /// Env: `COOKIE_SECURE` (true/false)
    /// Default: `false`
    pub cookie_secure: bool,

    pub federation: FederationConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./data/filedrive.db"),
            frontend_url: "http://localhost:5173".to_string(),
            jwt_secret: Secret::new(random_secret()),
            jwt_issuer: DEFAULT_ISSUER.to_string(),
            cookie_secure: false,
            federation: FederationConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(url) = lookup("FRONTEND_URL") {
            config.frontend_url = url.trim_end_matches('/').to_string();
        }

        match lookup("JWT_SECRET") {
            Some(secret) if !secret.is_empty() => config.jwt_secret = Secret::new(secret),
            _ => tracing::warn!(
                "JWT_SECRET not set, using a random per-process secret (dev-only)"
            ),
        }

        if let Some(issuer) = lookup("JWT_ISSUER") {
            if !issuer.is_empty() {
                config.jwt_issuer = issuer;
            }
        }

        if let Some(val) = lookup("COOKIE_SECURE") {
            config.cookie_secure = val == "true" || val == "1";
        }

        // -- Identity provider --

        if let Some(id) = lookup("GOOGLE_CLIENT_ID") {
            config.federation.client_id = id;
        }

        if let Some(secret) = lookup("GOOGLE_CLIENT_SECRET") {
            config.federation.client_secret = Secret::new(secret);
        }

        if let Some(url) = lookup("GOOGLE_REDIRECT_URL") {
            config.federation.redirect_url = url;
        }

        if let Some(val) = lookup("OAUTH_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.federation.timeout = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid OAUTH_TIMEOUT_SECS, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn random_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
