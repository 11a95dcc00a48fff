//! Explicit grants and effective permission resolution.
//!
//! Resolution for a `(user, resource)` pair walks from the resource towards
//! the root. At each node the structural owner wins outright, otherwise a
//! direct grant for the user settles the answer; failing both, the walk moves
//! to the containing folder. The nearest grant therefore overrides anything
//! granted further up. A soft-deleted node anywhere on the walk means no
//! access: grants on a deleted subtree stay in the table but are masked.

use std::collections::HashSet;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use filedrive_shared::constants::MAX_TREE_DEPTH;
use filedrive_shared::{PermissionLevel, ResourceRef};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::ResourcePermission;
use crate::sql::{conversion_failure, opt_uuid_at, ts_at, uuid_at};

const PERMISSION_COLUMNS: &str = "id, file_id, folder_id, granted_by, user_id, level, created_at";

/// The parts of a file or folder the resolver needs.
struct Node {
    owner_id: Uuid,
    parent: Option<Uuid>,
    is_deleted: bool,
}

impl Database {
    /// Effective level of `user` on `resource`, or `None` for no access.
    ///
    /// A missing resource also resolves to `None`, so callers cannot tell
    /// "does not exist" from "not yours".
    pub fn effective_level(
        &self,
        user: Uuid,
        resource: ResourceRef,
    ) -> Result<Option<PermissionLevel>> {
        let conn = self.conn();
        let mut current = resource;
        let mut seen = HashSet::new();

        loop {
            if !seen.insert(current) || seen.len() > MAX_TREE_DEPTH + 1 {
                return Err(StoreError::CycleDetected(current.id()));
            }

            let Some(node) = load_node(conn, current)? else {
                return Ok(None);
            };
            if node.is_deleted {
                return Ok(None);
            }
            if node.owner_id == user {
                return Ok(Some(PermissionLevel::Owner));
            }
            if let Some(level) = direct_level(conn, user, current)? {
                return Ok(Some(level));
            }

            match node.parent {
                Some(folder) => current = ResourceRef::Folder(folder),
                None => return Ok(None),
            }
        }
    }

    /// The grant held by `user` on exactly `resource`, ignoring inheritance.
    pub fn direct_permission(
        &self,
        user: Uuid,
        resource: ResourceRef,
    ) -> Result<Option<ResourcePermission>> {
        let (column, id) = target_column(resource);
        self.conn()
            .query_row(
                &format!(
                    "SELECT {PERMISSION_COLUMNS} FROM resource_permissions
                     WHERE user_id = ?1 AND {column} = ?2"
                ),
                params![user.to_string(), id],
                row_to_permission,
            )
            .optional()
            .map_err(StoreError::Sqlite)
    }

    /// Record (or replace) `grantee`'s grant on `resource`.
    ///
    /// One record per (grantee, target): a second grant overwrites the level
    /// and granter of the first. Granting never touches the resource's
    /// structural owner, and granting to that owner is rejected.
    pub fn grant_permission(
        &self,
        granted_by: Uuid,
        grantee: Uuid,
        resource: ResourceRef,
        level: PermissionLevel,
    ) -> Result<ResourcePermission> {
        let tx = self.conn().unchecked_transaction()?;

        let node = load_node(&tx, resource)?.ok_or(StoreError::NotFound)?;
        if node.is_deleted {
            return Err(StoreError::NotFound);
        }
        if node.owner_id == grantee {
            return Err(StoreError::InvalidGrant(
                "grantee already owns the resource".into(),
            ));
        }

        let (column, target) = target_column(resource);
        let permission = tx.query_row(
            &format!(
                "INSERT INTO resource_permissions (id, {column}, granted_by, user_id, level, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(user_id, {column}) DO UPDATE SET
                     level      = excluded.level,
                     granted_by = excluded.granted_by,
                     created_at = excluded.created_at
                 RETURNING {PERMISSION_COLUMNS}"
            ),
            params![
                Uuid::new_v4().to_string(),
                target,
                granted_by.to_string(),
                grantee.to_string(),
                level.as_str(),
                Utc::now().to_rfc3339(),
            ],
            row_to_permission,
        )?;
        tx.commit()?;

        tracing::info!(
            resource = %resource,
            grantee = %grantee,
            granted_by = %granted_by,
            level = %level,
            "permission granted"
        );
        Ok(permission)
    }

    /// Remove `grantee`'s direct grant on `resource`. Returns `true` if one existed.
    pub fn revoke_permission(&self, grantee: Uuid, resource: ResourceRef) -> Result<bool> {
        let (column, target) = target_column(resource);
        let affected = self.conn().execute(
            &format!("DELETE FROM resource_permissions WHERE user_id = ?1 AND {column} = ?2"),
            params![grantee.to_string(), target],
        )?;
        Ok(affected > 0)
    }

    /// Every direct grant on `resource`.
    pub fn list_permissions(&self, resource: ResourceRef) -> Result<Vec<ResourcePermission>> {
        let (column, target) = target_column(resource);
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM resource_permissions
             WHERE {column} = ?1 ORDER BY created_at ASC"
        ))?;
        let rows = stmt.query_map(params![target], row_to_permission)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)
    }

    /// Grants held by `user` on resources that are still live.
    pub fn shared_with(&self, user: Uuid) -> Result<Vec<ResourcePermission>> {
        let mut stmt = self.conn().prepare(
            "SELECT p.id, p.file_id, p.folder_id, p.granted_by, p.user_id, p.level, p.created_at
             FROM resource_permissions p
             LEFT JOIN folders d ON d.id = p.folder_id
             LEFT JOIN files f ON f.id = p.file_id
             WHERE p.user_id = ?1
               AND COALESCE(d.is_deleted, f.is_deleted, 1) = 0
             ORDER BY p.created_at DESC",
        )?;
        let rows = stmt.query_map(params![user.to_string()], row_to_permission)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn target_column(resource: ResourceRef) -> (&'static str, String) {
    match resource {
        ResourceRef::Folder(id) => ("folder_id", id.to_string()),
        ResourceRef::File(id) => ("file_id", id.to_string()),
    }
}

fn load_node(conn: &Connection, resource: ResourceRef) -> Result<Option<Node>> {
    let sql = match resource {
        ResourceRef::Folder(_) => "SELECT owner_id, parent_id, is_deleted FROM folders WHERE id = ?1",
        ResourceRef::File(_) => "SELECT owner_id, folder_id, is_deleted FROM files WHERE id = ?1",
    };
    conn.query_row(sql, params![resource.id().to_string()], |row| {
        Ok(Node {
            owner_id: uuid_at(row, 0)?,
            parent: opt_uuid_at(row, 1)?,
            is_deleted: row.get(2)?,
        })
    })
    .optional()
    .map_err(StoreError::Sqlite)
}

fn direct_level(
    conn: &Connection,
    user: Uuid,
    resource: ResourceRef,
) -> Result<Option<PermissionLevel>> {
    let (column, target) = target_column(resource);
    conn.query_row(
        &format!("SELECT level FROM resource_permissions WHERE user_id = ?1 AND {column} = ?2"),
        params![user.to_string(), target],
        |row| {
            let level: String = row.get(0)?;
            level
                .parse::<PermissionLevel>()
                .map_err(|e| conversion_failure(0, e))
        },
    )
    .optional()
    .map_err(StoreError::Sqlite)
}

fn row_to_permission(row: &rusqlite::Row<'_>) -> rusqlite::Result<ResourcePermission> {
    let file_id = opt_uuid_at(row, 1)?;
    let folder_id = opt_uuid_at(row, 2)?;
    let resource = match (file_id, folder_id) {
        (Some(file), None) => ResourceRef::File(file),
        (None, Some(folder)) => ResourceRef::Folder(folder),
        _ => {
            return Err(rusqlite::Error::InvalidColumnType(
                1,
                "file_id/folder_id".to_string(),
                rusqlite::types::Type::Null,
            ))
        }
    };

    let level: String = row.get(5)?;
    let level = level
        .parse::<PermissionLevel>()
        .map_err(|e| conversion_failure(5, e))?;

    Ok(ResourcePermission {
        id: uuid_at(row, 0)?,
        resource,
        granted_by: uuid_at(row, 3)?,
        user_id: uuid_at(row, 4)?,
        level,
        created_at: ts_at(row, 6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewFile, NewUser};

    use PermissionLevel::{Editor, Owner, Viewer};

    fn user(db: &Database, email: &str) -> Uuid {
        db.create_user(&NewUser {
            email: email.to_string(),
            first_name: String::new(),
            last_name: String::new(),
            avatar_url: String::new(),
        })
        .unwrap()
        .id
    }

    fn setup() -> (Database, Uuid, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let u1 = user(&db, "u1@example.com");
        let u2 = user(&db, "u2@example.com");
        (db, u1, u2)
    }

    #[test]
    fn owner_short_circuits() {
        let (db, u1, u2) = setup();
        let docs = db.create_folder(u1, "Docs", None).unwrap();

        assert_eq!(db.effective_level(u1, ResourceRef::Folder(docs.id)).unwrap(), Some(Owner));
        assert_eq!(db.effective_level(u2, ResourceRef::Folder(docs.id)).unwrap(), None);
    }

    #[test]
    fn grant_inherits_down_and_nearest_wins() {
        let (db, u1, u2) = setup();
        let a = db.create_folder(u1, "A", None).unwrap();
        let b = db.create_folder(u1, "B", Some(a.id)).unwrap();
        let c = db.create_folder(u1, "C", Some(b.id)).unwrap();

        db.grant_permission(u1, u2, ResourceRef::Folder(a.id), Editor).unwrap();
        assert_eq!(db.effective_level(u2, ResourceRef::Folder(b.id)).unwrap(), Some(Editor));
        assert_eq!(db.effective_level(u2, ResourceRef::Folder(c.id)).unwrap(), Some(Editor));

        db.grant_permission(u1, u2, ResourceRef::Folder(b.id), Viewer).unwrap();
        assert_eq!(db.effective_level(u2, ResourceRef::Folder(b.id)).unwrap(), Some(Viewer));
        assert_eq!(db.effective_level(u2, ResourceRef::Folder(c.id)).unwrap(), Some(Viewer));
        assert_eq!(db.effective_level(u2, ResourceRef::Folder(a.id)).unwrap(), Some(Editor));
    }

    #[test]
    fn files_inherit_from_their_folder() {
        let (db, u1, u2) = setup();
        let docs = db.create_folder(u1, "Docs", None).unwrap();
        let file = db
            .create_file(
                u1,
                &NewFile {
                    name: "a.txt".to_string(),
                    folder_id: Some(docs.id),
                    size: 1,
                    mime_type: None,
                    bucket: "b".to_string(),
                    object_key: "k".to_string(),
                    total_chunks: None,
                },
            )
            .unwrap();

        assert_eq!(db.effective_level(u2, ResourceRef::File(file.id)).unwrap(), None);
        db.grant_permission(u1, u2, ResourceRef::Folder(docs.id), Viewer).unwrap();
        assert_eq!(db.effective_level(u2, ResourceRef::File(file.id)).unwrap(), Some(Viewer));
        db.grant_permission(u1, u2, ResourceRef::File(file.id), Editor).unwrap();
        assert_eq!(db.effective_level(u2, ResourceRef::File(file.id)).unwrap(), Some(Editor));
    }

    #[test]
    fn one_record_per_grantee_and_target() {
        let (db, u1, u2) = setup();
        let docs = db.create_folder(u1, "Docs", None).unwrap();
        let target = ResourceRef::Folder(docs.id);

        let first = db.grant_permission(u1, u2, target, Viewer).unwrap();
        let second = db.grant_permission(u1, u2, target, Owner).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.level, Owner);
        assert_eq!(db.list_permissions(target).unwrap().len(), 1);
        // owner-level grant leaves structural ownership alone
        assert_eq!(db.get_folder(docs.id).unwrap().owner_id, u1);
    }

    #[test]
    fn cannot_grant_to_structural_owner() {
        let (db, u1, u2) = setup();
        let docs = db.create_folder(u1, "Docs", None).unwrap();
        assert!(matches!(
            db.grant_permission(u2, u1, ResourceRef::Folder(docs.id), Viewer),
            Err(StoreError::InvalidGrant(_))
        ));
        assert!(matches!(
            db.grant_permission(u1, u2, ResourceRef::Folder(Uuid::new_v4()), Viewer),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn soft_delete_masks_grants_and_hard_delete_prunes() {
        let (db, u1, u2) = setup();
        let a = db.create_folder(u1, "A", None).unwrap();
        let b = db.create_folder(u1, "B", Some(a.id)).unwrap();
        db.grant_permission(u1, u2, ResourceRef::Folder(b.id), Editor).unwrap();
        assert_eq!(db.shared_with(u2).unwrap().len(), 1);

        db.soft_delete_folder(u1, a.id).unwrap();
        assert_eq!(db.effective_level(u2, ResourceRef::Folder(b.id)).unwrap(), None);
        assert!(db.shared_with(u2).unwrap().is_empty());
        // masked, not pruned
        assert!(db.direct_permission(u2, ResourceRef::Folder(b.id)).unwrap().is_some());

        db.delete_folder(a.id).unwrap();
        assert!(db.direct_permission(u2, ResourceRef::Folder(b.id)).unwrap().is_none());
    }

    #[test]
    fn revoke_removes_direct_grant() {
        let (db, u1, u2) = setup();
        let docs = db.create_folder(u1, "Docs", None).unwrap();
        let target = ResourceRef::Folder(docs.id);
        db.grant_permission(u1, u2, target, Viewer).unwrap();

        assert!(db.revoke_permission(u2, target).unwrap());
        assert!(!db.revoke_permission(u2, target).unwrap());
        assert_eq!(db.effective_level(u2, target).unwrap(), None);
    }

    #[test]
    fn shared_tree_never_leaks_into_listing() {
        let (db, u1, u2) = setup();
        let docs = db.create_folder(u1, "Docs", None).unwrap();
        db.create_folder(u1, "Taxes", Some(docs.id)).unwrap();
        db.grant_permission(u1, u2, ResourceRef::Folder(docs.id), Owner).unwrap();

        assert!(db.list_children(u2, None).unwrap().is_empty());
        assert!(db.list_children(u2, Some(docs.id)).unwrap().is_empty());
    }
}
