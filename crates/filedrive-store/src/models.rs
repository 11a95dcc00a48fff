//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the HTTP layer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use filedrive_shared::{PermissionLevel, ResourceRef};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A local user record, keyed by a stable UUID and linked to a federated identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Stable, immutable identifier.
    pub id: Uuid,
    /// Provider subject id. `None` for users created explicitly.
    pub federated_id: Option<String>,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar_url: String,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// Input for explicit (non-federated) user creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewUser {
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub avatar_url: String,
}

// ---------------------------------------------------------------------------
// Folder
// ---------------------------------------------------------------------------

/// A node in an owner's folder tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Folder {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    /// `None` for root-level folders.
    pub parent_id: Option<Uuid>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

/// Upload progress of a file's object. Only moves forward:
/// pending -> in_progress -> {completed, failed}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn can_transition_to(&self, next: UploadStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
        )
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownUploadStatus(pub String);

impl fmt::Display for UnknownUploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown upload status: {}", self.0)
    }
}

impl std::error::Error for UnknownUploadStatus {}

impl FromStr for UploadStatus {
    type Err = UnknownUploadStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownUploadStatus(other.to_string())),
        }
    }
}

/// File metadata. The bytes live in external object storage at
/// `bucket`/`object_key`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct File {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    /// Containing folder, `None` at the root.
    pub folder_id: Option<Uuid>,
    pub size: i64,
    pub mime_type: Option<String>,
    pub bucket: String,
    pub object_key: String,
    pub upload_status: UploadStatus,
    pub total_chunks: Option<u32>,
    /// Number of acknowledged chunks; never exceeds `total_chunks`.
    pub uploaded_chunks: u32,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for file metadata creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewFile {
    pub name: String,
    pub folder_id: Option<Uuid>,
    #[serde(default)]
    pub size: i64,
    pub mime_type: Option<String>,
    pub bucket: String,
    pub object_key: String,
    pub total_chunks: Option<u32>,
}

// ---------------------------------------------------------------------------
// ResourcePermission
// ---------------------------------------------------------------------------

/// An explicit grant of `level` on one file or folder to `user_id`.
///
/// Granting `Owner` delegates owner-level access; it never changes the
/// resource's structural `owner_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourcePermission {
    pub id: Uuid,
    pub resource: ResourceRef,
    pub granted_by: Uuid,
    /// Grantee.
    pub user_id: Uuid,
    pub level: PermissionLevel,
    pub created_at: DateTime<Utc>,
}
