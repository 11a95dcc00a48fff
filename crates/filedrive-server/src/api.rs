use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, Method, StatusCode,
    },
    middleware,
    response::{IntoResponse, Redirect, Response},
    routing::{get, patch, post, put},
    Extension, Json, Router,
};
use chrono::Utc;
use reqwest::Url;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use filedrive_shared::constants::{STATE_COOKIE_MAX_AGE_SECS, STATE_COOKIE_NAME};
use filedrive_shared::identity::states_match;
use filedrive_shared::{
    AuthenticatedUser, Claims, CredentialPair, PermissionLevel, ResourceRef,
};
use filedrive_store::{
    Database, File, Folder, NewFile, NewUser, ResourcePermission, StoreError, UploadStatus, User,
};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::oauth::{FederationError, FederationExchange};
use crate::session::{require_auth, SessionService};
use crate::tree;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub sessions: SessionService,
    pub federation: FederationExchange,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/auth/logout", post(logout))
        .route("/api/users/me", get(current_user))
        .route("/api/users", get(list_users).post(create_user))
        .route("/api/folder", get(list_folders).post(create_folder))
        .route("/api/folder/:id", patch(update_folder).delete(delete_folder))
        .route("/api/folder/:id/access", get(folder_access))
        .route("/api/files", get(list_files).post(create_file))
        .route("/api/files/:id", get(get_file).delete(delete_file))
        .route("/api/files/:id/status", put(set_upload_status))
        .route("/api/files/:id/chunks/:index", put(ack_chunk))
        .route(
            "/api/permissions",
            get(list_grants).post(grant_permission).delete(revoke_permission),
        )
        .route("/api/shared", get(shared_with_me))
        .route_layer(middleware::from_fn_with_state(
            state.sessions.clone(),
            require_auth,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/google/login", get(google_login))
        .route("/api/auth/google/callback", get(google_callback))
        .route("/api/auth/refresh", post(refresh))
        .merge(protected)
        .layer(cors_layer(&state.config.frontend_url))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(frontend_url: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    match HeaderValue::from_str(frontend_url) {
        Ok(origin) => cors.allow_origin(origin).allow_credentials(true),
        Err(_) => {
            warn!(frontend_url, "Frontend URL is not a valid origin, CORS disabled");
            cors
        }
    }
}

// ─── Request / response bodies ───

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

#[derive(Deserialize)]
struct LogoutRequest {
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FolderQuery {
    parent_id: Option<Uuid>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateFolderRequest {
    name: String,
    parent_id: Option<Uuid>,
}

/// `parentId` absent leaves the folder in place; `null` moves it to the root.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateFolderRequest {
    name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    parent_id: Option<Option<Uuid>>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AccessResponse {
    folder_id: Uuid,
    level: PermissionLevel,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileQuery {
    folder_id: Option<Uuid>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateFileRequest {
    name: String,
    folder_id: Option<Uuid>,
    #[serde(default)]
    size: i64,
    mime_type: Option<String>,
    bucket: String,
    object_key: String,
    total_chunks: Option<u32>,
}

impl From<CreateFileRequest> for NewFile {
    fn from(req: CreateFileRequest) -> Self {
        NewFile {
            name: req.name,
            folder_id: req.folder_id,
            size: req.size,
            mime_type: req.mime_type,
            bucket: req.bucket,
            object_key: req.object_key,
            total_chunks: req.total_chunks,
        }
    }
}

#[derive(Deserialize)]
struct UploadStatusRequest {
    status: UploadStatus,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChunkAckResponse {
    uploaded_chunks: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceQuery {
    folder_id: Option<Uuid>,
    file_id: Option<Uuid>,
}

impl ResourceQuery {
    fn resource(&self) -> Result<ResourceRef, ServerError> {
        match (self.folder_id, self.file_id) {
            (Some(id), None) => Ok(ResourceRef::Folder(id)),
            (None, Some(id)) => Ok(ResourceRef::File(id)),
            _ => Err(ServerError::BadRequest(
                "exactly one of folderId or fileId is required".into(),
            )),
        }
    }
}

#[derive(Deserialize)]
struct GrantRequest {
    email: String,
    resource: ResourceRef,
    level: PermissionLevel,
}

#[derive(Deserialize)]
struct RevokeRequest {
    email: String,
    resource: ResourceRef,
}

// ─── Auth ───

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn state_cookie(value: &str, max_age: i64, secure: bool) -> String {
    let mut cookie = format!(
        "{STATE_COOKIE_NAME}={value}; HttpOnly; Path=/; Max-Age={max_age}; SameSite=Lax"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Value of cookie `name` from the request's `Cookie` headers.
fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

async fn google_login(State(state): State<AppState>) -> impl IntoResponse {
    let login = state.federation.begin_login();
    let cookie = state_cookie(
        &login.state,
        STATE_COOKIE_MAX_AGE_SECS,
        state.config.cookie_secure,
    );
    ([(SET_COOKIE, cookie)], Redirect::temporary(&login.redirect_url))
}

async fn google_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Response {
    let cookie_state = cookie_value(&headers, STATE_COOKIE_NAME);
    let clear = state_cookie("", 0, state.config.cookie_secure);

    match finish_login(&state, &params, cookie_state.as_deref()).await {
        Ok(target) => ([(SET_COOKIE, clear)], Redirect::temporary(&target)).into_response(),
        Err(ServerError::Federation(FederationError::StateMismatch)) => {
            let target = format!("{}/login?error=invalid_state", state.config.frontend_url);
            ([(SET_COOKIE, clear)], Redirect::temporary(&target)).into_response()
        }
        Err(e) => ([(SET_COOKIE, clear)], e).into_response(),
    }
}

/// Run the provider exchange, record the login and build the frontend URL
/// carrying the new credentials.
async fn finish_login(
    state: &AppState,
    params: &CallbackParams,
    cookie_state: Option<&str>,
) -> Result<String, ServerError> {
    let returned = params.state.as_deref().unwrap_or_default();

    let code = match (&params.code, &params.error) {
        (Some(code), None) => code.as_str(),
        (_, error) => {
            if !states_match(returned, cookie_state.unwrap_or_default()) {
                return Err(FederationError::StateMismatch.into());
            }
            let reason = error
                .clone()
                .unwrap_or_else(|| "missing authorization code".to_string());
            return Err(FederationError::ExchangeFailed(reason).into());
        }
    };

    let identity = state
        .federation
        .complete_login(returned, cookie_state, code)
        .await?;

    let user = state
        .db
        .lock()
        .await
        .upsert_by_federated_id(&identity, Utc::now())?;
    let pair = state.sessions.issue(&user)?;

    let mut target = Url::parse(&format!("{}/oauth-callback", state.config.frontend_url))
        .map_err(|e| ServerError::Internal(format!("Invalid frontend URL: {e}")))?;
    target
        .query_pairs_mut()
        .append_pair("access_token", &pair.access_token)
        .append_pair("refresh_token", &pair.refresh_token)
        .append_pair("expires_in", &pair.expires_in.to_string());

    info!(user_id = %user.id, "User logged in");
    Ok(target.to_string())
}

/// A body that does not carry a refresh credential is treated like an
/// invalid one.
async fn refresh(
    State(state): State<AppState>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<CredentialPair>, ServerError> {
    let Json(req) = payload.map_err(|e| {
        tracing::debug!(error = %e, "unreadable refresh body");
        ServerError::InvalidCredential
    })?;
    let pair = state.sessions.refresh(&state.db, &req.refresh_token).await?;
    Ok(Json(pair))
}

async fn logout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    body: Option<Json<LogoutRequest>>,
) -> StatusCode {
    let refresh_token = body.and_then(|Json(req)| req.refresh_token);
    state
        .sessions
        .logout(&claims, refresh_token.as_deref())
        .await;
    StatusCode::NO_CONTENT
}

// ─── Users ───

async fn current_user(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
) -> Result<Json<User>, ServerError> {
    let user = state
        .db
        .lock()
        .await
        .get_user(caller.user_id)
        .map_err(|e| match e {
            StoreError::NotFound => ServerError::UserNotFound(caller.user_id),
            other => other.into(),
        })?;
    Ok(Json(user))
}

async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, ServerError> {
    Ok(Json(state.db.lock().await.list_users()?))
}

async fn create_user(
    State(state): State<AppState>,
    Json(new_user): Json<NewUser>,
) -> Result<(StatusCode, Json<User>), ServerError> {
    if new_user.email.trim().is_empty() {
        return Err(ServerError::BadRequest("email is required".into()));
    }
    let user = state.db.lock().await.create_user(&new_user)?;
    info!(user_id = %user.id, "User created");
    Ok((StatusCode::CREATED, Json(user)))
}

// ─── Folders ───

async fn list_folders(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Query(query): Query<FolderQuery>,
) -> Result<Json<Vec<Folder>>, ServerError> {
    let db = state.db.lock().await;
    Ok(Json(tree::list_folders(&db, caller.user_id, query.parent_id)?))
}

async fn create_folder(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Json(req): Json<CreateFolderRequest>,
) -> Result<(StatusCode, Json<Folder>), ServerError> {
    let db = state.db.lock().await;
    let folder = tree::create_folder(&db, caller.user_id, &req.name, req.parent_id)?;
    Ok((StatusCode::CREATED, Json(folder)))
}

async fn update_folder(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateFolderRequest>,
) -> Result<Json<Folder>, ServerError> {
    if req.name.is_none() && req.parent_id.is_none() {
        return Err(ServerError::BadRequest("nothing to update".into()));
    }
    let db = state.db.lock().await;
    let folder = tree::update_folder(&db, caller.user_id, id, req.name.as_deref(), req.parent_id)?;
    Ok(Json(folder))
}

async fn delete_folder(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ServerError> {
    let db = state.db.lock().await;
    tree::delete_folder(&db, caller.user_id, id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn folder_access(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<AccessResponse>, ServerError> {
    let db = state.db.lock().await;
    let level = tree::access_level(&db, caller.user_id, ResourceRef::Folder(id))?;
    Ok(Json(AccessResponse {
        folder_id: id,
        level,
    }))
}

// ─── Files ───

async fn list_files(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Query(query): Query<FileQuery>,
) -> Result<Json<Vec<File>>, ServerError> {
    let db = state.db.lock().await;
    Ok(Json(tree::list_files(&db, caller.user_id, query.folder_id)?))
}

async fn create_file(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Json(req): Json<CreateFileRequest>,
) -> Result<(StatusCode, Json<File>), ServerError> {
    let db = state.db.lock().await;
    let file = tree::create_file(&db, caller.user_id, &req.into())?;
    Ok((StatusCode::CREATED, Json(file)))
}

async fn get_file(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<File>, ServerError> {
    let db = state.db.lock().await;
    Ok(Json(tree::get_file(&db, caller.user_id, id)?))
}

async fn delete_file(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ServerError> {
    let db = state.db.lock().await;
    tree::delete_file(&db, caller.user_id, id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_upload_status(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<UploadStatusRequest>,
) -> Result<Json<File>, ServerError> {
    let db = state.db.lock().await;
    Ok(Json(tree::set_upload_status(&db, caller.user_id, id, req.status)?))
}

async fn ack_chunk(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path((id, index)): Path<(Uuid, u32)>,
) -> Result<Json<ChunkAckResponse>, ServerError> {
    let db = state.db.lock().await;
    let uploaded_chunks = tree::ack_chunk(&db, caller.user_id, id, index)?;
    Ok(Json(ChunkAckResponse { uploaded_chunks }))
}

// ─── Permissions ───

async fn list_grants(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Query(query): Query<ResourceQuery>,
) -> Result<Json<Vec<ResourcePermission>>, ServerError> {
    let resource = query.resource()?;
    let db = state.db.lock().await;
    Ok(Json(tree::list_grants(&db, caller.user_id, resource)?))
}

async fn grant_permission(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Json(req): Json<GrantRequest>,
) -> Result<Json<ResourcePermission>, ServerError> {
    let db = state.db.lock().await;
    let permission = tree::grant(&db, caller.user_id, &req.email, req.resource, req.level)?;
    Ok(Json(permission))
}

async fn revoke_permission(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    Json(req): Json<RevokeRequest>,
) -> Result<StatusCode, ServerError> {
    let db = state.db.lock().await;
    tree::revoke(&db, caller.user_id, &req.email, req.resource)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn shared_with_me(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<ResourcePermission>>, ServerError> {
    let db = state.db.lock().await;
    Ok(Json(tree::shared_with(&db, caller.user_id)?))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
