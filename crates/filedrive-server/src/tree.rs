//! Authorization gate in front of the resource tree.
//!
//! The store enforces structural rules (ownership of parents, cycles, names);
//! this layer decides whether the *caller* may touch a resource at all. Every
//! denial surfaces as [`ServerError::NoAccess`], which renders exactly like a
//! missing resource.

use uuid::Uuid;

use filedrive_shared::{PermissionLevel, ResourceRef};
use filedrive_store::{
    Database, File, Folder, NewFile, ResourcePermission, StoreError, UploadStatus,
};

use crate::error::ServerError;

/// The caller's effective level on `resource`, or `NoAccess`.
pub fn access_level(
    db: &Database,
    caller: Uuid,
    resource: ResourceRef,
) -> Result<PermissionLevel, ServerError> {
    db.effective_level(caller, resource)?
        .ok_or(ServerError::NoAccess)
}

fn require(
    db: &Database,
    caller: Uuid,
    resource: ResourceRef,
    required: PermissionLevel,
) -> Result<PermissionLevel, ServerError> {
    let level = access_level(db, caller, resource)?;
    if !level.allows(required) {
        tracing::debug!(%caller, %resource, %level, %required, "insufficient access");
        return Err(ServerError::NoAccess);
    }
    Ok(level)
}

/// Decide whether `caller` may place something under `parent`.
///
/// Only the tree's owner may. A non-owner without at least editor access is
/// told the parent does not exist; one with editor access gets
/// `InvalidParent`, since trees never mix owners.
fn check_parent(db: &Database, caller: Uuid, parent: Uuid) -> Result<(), ServerError> {
    let owned = match db.get_folder(parent) {
        Ok(folder) => folder.owner_id == caller,
        Err(StoreError::NotFound) => false,
        Err(e) => return Err(e.into()),
    };
    if owned {
        return Ok(());
    }

    match db.effective_level(caller, ResourceRef::Folder(parent))? {
        Some(level) if level.allows(PermissionLevel::Editor) => {
            Err(ServerError::InvalidParent(parent))
        }
        _ => Err(ServerError::NoAccess),
    }
}

/// A folder `caller` owns and that is still live.
fn owned_folder(db: &Database, caller: Uuid, id: Uuid) -> Result<Folder, ServerError> {
    match db.get_folder(id) {
        Ok(folder) if folder.owner_id == caller && !folder.is_deleted => Ok(folder),
        Ok(_) | Err(StoreError::NotFound) => Err(ServerError::NoAccess),
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// Folders
// ---------------------------------------------------------------------------

pub fn create_folder(
    db: &Database,
    caller: Uuid,
    name: &str,
    parent_id: Option<Uuid>,
) -> Result<Folder, ServerError> {
    if let Some(parent) = parent_id {
        check_parent(db, caller, parent)?;
    }
    Ok(db.create_folder(caller, name, parent_id)?)
}

/// Children of `parent_id` (or the caller's root). Only the owner may list a folder.
pub fn list_folders(
    db: &Database,
    caller: Uuid,
    parent_id: Option<Uuid>,
) -> Result<Vec<Folder>, ServerError> {
    if let Some(parent) = parent_id {
        owned_folder(db, caller, parent)?;
    }
    Ok(db.list_children(caller, parent_id)?)
}

/// Rename needs editor access; moving is reserved to the structural owner.
///
/// `new_parent` is `None` to leave the folder where it is and `Some(None)`
/// to move it to the root.
pub fn update_folder(
    db: &Database,
    caller: Uuid,
    id: Uuid,
    name: Option<&str>,
    new_parent: Option<Option<Uuid>>,
) -> Result<Folder, ServerError> {
    let folder = db.get_folder(id).map_err(|e| match e {
        StoreError::NotFound => ServerError::NoAccess,
        other => other.into(),
    })?;

    if name.is_some() {
        require(db, caller, ResourceRef::Folder(id), PermissionLevel::Editor)?;
    }
    if let Some(parent) = new_parent {
        if folder.owner_id != caller {
            return Err(ServerError::NoAccess);
        }
        if let Some(parent) = parent {
            check_parent(db, caller, parent)?;
        }
    }
    if name.is_none() && new_parent.is_none() {
        return Ok(folder);
    }

    // both changes are applied together or not at all
    Ok(db.update_folder(folder.owner_id, id, name, new_parent)?)
}

/// Soft-delete a folder subtree. Requires owner-level access.
pub fn delete_folder(db: &Database, caller: Uuid, id: Uuid) -> Result<usize, ServerError> {
    require(db, caller, ResourceRef::Folder(id), PermissionLevel::Owner)?;
    let folder = db.get_folder(id)?;
    Ok(db.soft_delete_folder(folder.owner_id, id)?)
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

pub fn create_file(db: &Database, caller: Uuid, new_file: &NewFile) -> Result<File, ServerError> {
    if let Some(folder) = new_file.folder_id {
        check_parent(db, caller, folder)?;
    }
    Ok(db.create_file(caller, new_file)?)
}

pub fn list_files(
    db: &Database,
    caller: Uuid,
    folder_id: Option<Uuid>,
) -> Result<Vec<File>, ServerError> {
    if let Some(folder) = folder_id {
        owned_folder(db, caller, folder)?;
    }
    Ok(db.list_files(caller, folder_id)?)
}

pub fn get_file(db: &Database, caller: Uuid, id: Uuid) -> Result<File, ServerError> {
    require(db, caller, ResourceRef::File(id), PermissionLevel::Viewer)?;
    Ok(db.get_file(id)?)
}

pub fn delete_file(db: &Database, caller: Uuid, id: Uuid) -> Result<(), ServerError> {
    require(db, caller, ResourceRef::File(id), PermissionLevel::Owner)?;
    let file = db.get_file(id)?;
    Ok(db.soft_delete_file(file.owner_id, id)?)
}

/// Advance a file's upload state. Requires editor access.
pub fn set_upload_status(
    db: &Database,
    caller: Uuid,
    id: Uuid,
    status: UploadStatus,
) -> Result<File, ServerError> {
    require(db, caller, ResourceRef::File(id), PermissionLevel::Editor)?;
    Ok(db.set_upload_status(id, status)?)
}

pub fn ack_chunk(db: &Database, caller: Uuid, id: Uuid, index: u32) -> Result<u32, ServerError> {
    require(db, caller, ResourceRef::File(id), PermissionLevel::Editor)?;
    Ok(db.ack_chunk(id, index)?)
}

// ---------------------------------------------------------------------------
// Grants
// ---------------------------------------------------------------------------

fn grantee_by_email(db: &Database, caller: Uuid, email: &str) -> Result<Uuid, ServerError> {
    let grantee = match db.get_user_by_email(email.trim()) {
        Ok(user) => user.id,
        Err(StoreError::NotFound) => {
            return Err(ServerError::BadRequest(format!("no user with email {email}")))
        }
        Err(e) => return Err(e.into()),
    };
    if grantee == caller {
        return Err(ServerError::BadRequest("cannot change your own access".into()));
    }
    Ok(grantee)
}

/// Give the user registered under `email` `level` on `resource`.
/// Only callers with owner-level access may grant.
pub fn grant(
    db: &Database,
    caller: Uuid,
    email: &str,
    resource: ResourceRef,
    level: PermissionLevel,
) -> Result<ResourcePermission, ServerError> {
    require(db, caller, resource, PermissionLevel::Owner)?;
    let grantee = grantee_by_email(db, caller, email)?;
    Ok(db.grant_permission(caller, grantee, resource, level)?)
}

pub fn revoke(
    db: &Database,
    caller: Uuid,
    email: &str,
    resource: ResourceRef,
) -> Result<(), ServerError> {
    require(db, caller, resource, PermissionLevel::Owner)?;
    let grantee = grantee_by_email(db, caller, email)?;
    if !db.revoke_permission(grantee, resource)? {
        return Err(ServerError::NotFound);
    }
    tracing::info!(%resource, %grantee, revoked_by = %caller, "permission revoked");
    Ok(())
}

/// Direct grants on `resource`. Visible to anyone with owner-level access.
pub fn list_grants(
    db: &Database,
    caller: Uuid,
    resource: ResourceRef,
) -> Result<Vec<ResourcePermission>, ServerError> {
    require(db, caller, resource, PermissionLevel::Owner)?;
    Ok(db.list_permissions(resource)?)
}

pub fn shared_with(db: &Database, caller: Uuid) -> Result<Vec<ResourcePermission>, ServerError> {
    Ok(db.shared_with(caller)?)
}
