//! Credential lifecycle for HTTP callers: issue, authenticate, refresh and
//! logout, plus the bearer middleware for protected routes.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use tokio::sync::Mutex;
use tracing::{debug, info};

use filedrive_shared::{
    AuthenticatedUser, Claims, CredentialIssuer, CredentialKind, CredentialPair,
};
use filedrive_store::{Database, StoreError, User};

use crate::error::ServerError;
use crate::revocation::RevocationList;

#[derive(Clone)]
pub struct SessionService {
    issuer: CredentialIssuer,
    revoked: RevocationList,
}

impl SessionService {
    pub fn new(issuer: CredentialIssuer, revoked: RevocationList) -> Self {
        Self { issuer, revoked }
    }

    pub fn revocations(&self) -> &RevocationList {
        &self.revoked
    }

    pub fn issue(&self, user: &User) -> Result<CredentialPair, ServerError> {
        Ok(self.issuer.issue_pair(user.id, &user.email)?)
    }

    /// Resolve a bearer access credential to the caller it identifies.
    pub async fn authenticate(
        &self,
        access_token: &str,
    ) -> Result<(AuthenticatedUser, Claims), ServerError> {
        let claims = self.verify_live(access_token, CredentialKind::Access).await?;
        let user = AuthenticatedUser {
            user_id: claims.subject()?,
            email: claims.email.clone(),
        };
        Ok((user, claims))
    }

    /// Trade a refresh credential for a new pair. The subject must still exist.
    ///
    /// The presented refresh credential stays valid until it expires or is
    /// logged out; rotation does not revoke it.
    pub async fn refresh(
        &self,
        db: &Mutex<Database>,
        refresh_token: &str,
    ) -> Result<CredentialPair, ServerError> {
        let claims = self.verify_live(refresh_token, CredentialKind::Refresh).await?;
        let user_id = claims.subject()?;

        let user = db.lock().await.get_user(user_id).map_err(|e| match e {
            StoreError::NotFound => ServerError::UserNotFound(user_id),
            other => other.into(),
        })?;

        debug!(user_id = %user.id, "credentials refreshed");
        self.issue(&user)
    }

    /// Deny-list the access credential and, when presented, the caller's
    /// refresh credential. A refresh credential that fails verification or
    /// belongs to someone else is ignored.
    pub async fn logout(&self, access: &Claims, refresh_token: Option<&str>) {
        self.revoked.revoke(access.jti, access.expires_at()).await;

        if let Some(token) = refresh_token {
            match self.issuer.verify(token, CredentialKind::Refresh) {
                Ok(refresh) if refresh.sub == access.sub => {
                    self.revoked.revoke(refresh.jti, refresh.expires_at()).await;
                }
                Ok(_) => debug!("refresh credential for another subject ignored at logout"),
                Err(e) => debug!(error = %e, "unusable refresh credential ignored at logout"),
            }
        }

        info!(user = %access.sub, "logged out");
    }

    async fn verify_live(&self, token: &str, kind: CredentialKind) -> Result<Claims, ServerError> {
        let claims = self.issuer.verify(token, kind)?;
        if self.revoked.is_revoked(claims.jti).await {
            debug!(jti = %claims.jti, "revoked credential presented");
            return Err(ServerError::InvalidCredential);
        }
        Ok(claims)
    }
}

/// Pull the credential out of an `Authorization: Bearer ...` header value.
pub fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Reject requests without a live access credential; otherwise expose the
/// caller as `AuthenticatedUser` and the raw `Claims` as request extensions.
pub async fn require_auth(
    State(sessions): State<SessionService>,
    mut req: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .ok_or(ServerError::InvalidCredential)?;

    let (user, claims) = sessions.authenticate(token).await?;
    req.extensions_mut().insert(user);
    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filedrive_store::NewUser;

    fn service() -> SessionService {
        SessionService::new(
            CredentialIssuer::new(b"test-secret".to_vec(), "filedrive"),
            RevocationList::new(),
        )
    }

    fn db_with_user() -> (Mutex<Database>, User) {
        let db = Database::open_in_memory().unwrap();
        let user = db
            .create_user(&NewUser {
                email: "ada@example.com".to_string(),
                first_name: "Ada".to_string(),
                last_name: "Lovelace".to_string(),
                avatar_url: String::new(),
            })
            .unwrap();
        (Mutex::new(db), user)
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("abc"), None);
    }

    #[tokio::test]
    async fn test_authenticate() {
        let (_db, user) = db_with_user();
        let sessions = service();
        let pair = sessions.issue(&user).unwrap();

        let (caller, claims) = sessions.authenticate(&pair.access_token).await.unwrap();
        assert_eq!(caller.user_id, user.id);
        assert_eq!(caller.email, "ada@example.com");
        assert_eq!(claims.kind, CredentialKind::Access);

        // a refresh credential is not a bearer credential
        assert!(matches!(
            sessions.authenticate(&pair.refresh_token).await,
            Err(ServerError::InvalidCredential)
        ));
    }

    #[tokio::test]
    async fn test_refresh() {
        let (db, user) = db_with_user();
        let sessions = service();
        let pair = sessions.issue(&user).unwrap();

        let fresh = sessions.refresh(&db, &pair.refresh_token).await.unwrap();
        assert_eq!(fresh.expires_in, 3600);
        assert_eq!(fresh.token_type, "Bearer");
        sessions.authenticate(&fresh.access_token).await.unwrap();

        // rotation leaves the old refresh credential usable
        sessions.refresh(&db, &pair.refresh_token).await.unwrap();

        assert!(matches!(
            sessions.refresh(&db, &pair.access_token).await,
            Err(ServerError::InvalidCredential)
        ));
    }

    #[tokio::test]
    async fn test_refresh_for_missing_user() {
        let (db, _) = db_with_user();
        let sessions = service();
        let ghost = User {
            id: uuid::Uuid::new_v4(),
            federated_id: None,
            email: "ghost@example.com".to_string(),
            first_name: String::new(),
            last_name: String::new(),
            avatar_url: String::new(),
            created_at: chrono::Utc::now(),
            last_login_at: None,
        };
        let pair = sessions.issue(&ghost).unwrap();

        assert!(matches!(
            sessions.refresh(&db, &pair.refresh_token).await,
            Err(ServerError::UserNotFound(id)) if id == ghost.id
        ));
    }

    #[tokio::test]
    async fn test_logout_revokes_both() {
        let (db, user) = db_with_user();
        let sessions = service();
        let pair = sessions.issue(&user).unwrap();
        let (_, claims) = sessions.authenticate(&pair.access_token).await.unwrap();

        sessions.logout(&claims, Some(&pair.refresh_token)).await;

        assert!(sessions.authenticate(&pair.access_token).await.is_err());
        assert!(sessions.refresh(&db, &pair.refresh_token).await.is_err());
        assert_eq!(sessions.revocations().len().await, 2);

        // a newly issued pair is unaffected
        let other = sessions.issue(&user).unwrap();
        sessions.authenticate(&other.access_token).await.unwrap();
    }
}
