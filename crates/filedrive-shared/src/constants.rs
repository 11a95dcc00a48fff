/// Issuer claim stamped into every credential unless configured otherwise
pub const DEFAULT_ISSUER: &str = "filedrive";

/// Access credential lifetime in seconds (1 hour)
pub const ACCESS_TOKEN_TTL_SECS: i64 = 60 * 60;

/// Refresh credential lifetime in seconds (7 days)
pub const REFRESH_TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Value of `token_type` in credential responses
pub const TOKEN_TYPE_BEARER: &str = "Bearer";

/// Bytes of entropy in an anti-forgery login state token
pub const STATE_TOKEN_BYTES: usize = 16;

/// Cookie carrying the anti-forgery state between redirect and callback
pub const STATE_COOKIE_NAME: &str = "oauth_state";

/// Lifetime of the state cookie in seconds (1 hour)
pub const STATE_COOKIE_MAX_AGE_SECS: i64 = 60 * 60;

/// Maximum folder / file name length in characters
pub const MAX_NAME_LEN: usize = 255;

/// Upper bound on ancestor walks through the folder tree
pub const MAX_TREE_DEPTH: usize = 256;

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Google OAuth 2.0 endpoints
pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

/// Scopes requested from the provider
pub const GOOGLE_SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/userinfo.profile",
];
