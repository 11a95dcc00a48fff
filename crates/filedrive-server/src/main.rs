//! # filedrive-server
//!
//! HTTP backend for the FileDrive service.
//!
//! This binary provides:
//! - **Federated login** through an external identity provider, finishing
//!   with a locally issued access/refresh credential pair
//! - **Credential lifecycle**: bearer authentication, refresh and logout
//! - **Resource tree** of folders and file metadata per owner, with
//!   inherited viewer/editor/owner grants
//! - **REST API** (axum) exposing all of the above to the web frontend

mod api;
mod config;
mod error;
mod oauth;
mod revocation;
mod session;
mod tree;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use filedrive_shared::CredentialIssuer;
use filedrive_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::oauth::{FederationExchange, GoogleProvider};
use crate::revocation::RevocationList;
use crate::session::SessionService;

/// How often expired deny-list entries are dropped.
const REVOCATION_PURGE_INTERVAL: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,filedrive_server=debug")),
        )
        .init();

    info!("Starting FileDrive server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    if config.federation.client_id.is_empty() {
        warn!("GOOGLE_CLIENT_ID not set, federated login will fail");
    }

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // SQLite store (creates the file and runs migrations if needed)
    let db = Database::open_at(&config.database_path)?;
    info!(path = %config.database_path.display(), "Database ready");

    let issuer = CredentialIssuer::new(
        config.jwt_secret.expose().as_bytes().to_vec(),
        config.jwt_issuer.clone(),
    );
    let sessions = SessionService::new(issuer, RevocationList::new());

    let provider = GoogleProvider::new(config.federation.clone())?;
    let federation = FederationExchange::new(Arc::new(provider), config.federation.timeout);

    let http_addr = config.http_addr;
    let app_state = AppState {
        db: Arc::new(Mutex::new(db)),
        sessions: sessions.clone(),
        federation,
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic deny-list cleanup (every 10 minutes)
    let revoked = sessions.revocations().clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(REVOCATION_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            revoked.purge_expired().await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
