//! CRUD and tree operations for [`Folder`] records.
//!
//! Folders form one tree per owner. Parent references are plain ids; every
//! walk up the tree is iterative and bounded by [`MAX_TREE_DEPTH`], and a
//! revisited id is reported as [`StoreError::CycleDetected`] rather than
//! looping.

use std::collections::HashSet;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use filedrive_shared::constants::MAX_TREE_DEPTH;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Folder;
use crate::sql::{not_found, opt_uuid_at, ts_at, uuid_at, validate_name};

const FOLDER_COLUMNS: &str = "id, name, owner_id, parent_id, is_deleted, created_at, updated_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Create a folder owned by `owner`, at the root or under `parent_id`.
    ///
    /// The parent must exist, must not be soft-deleted and must belong to
    /// `owner`; anything else is [`StoreError::InvalidParent`]. The check and
    /// the insert share one transaction.
    pub fn create_folder(&self, owner: Uuid, name: &str, parent_id: Option<Uuid>) -> Result<Folder> {
        let name = validate_name(name)?;
        let tx = self.conn().unchecked_transaction()?;

        if let Some(parent) = parent_id {
            ensure_valid_parent(&tx, owner, parent)?;
        }

        let now = Utc::now();
        let folder = Folder {
            id: Uuid::new_v4(),
            name,
            owner_id: owner,
            parent_id,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };

        tx.execute(
            "INSERT INTO folders (id, name, owner_id, parent_id, is_deleted, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
            params![
                folder.id.to_string(),
                folder.name,
                folder.owner_id.to_string(),
                folder.parent_id.map(|p| p.to_string()),
                now.to_rfc3339(),
            ],
        )?;
        tx.commit()?;

        tracing::debug!(folder_id = %folder.id, owner = %owner, "folder created");
        Ok(folder)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a folder by id, including soft-deleted ones.
    pub fn get_folder(&self, id: Uuid) -> Result<Folder> {
        get_folder_on(self.conn(), id)
    }

    /// List the live children of `parent_id` (or the root level) in `owner`'s tree.
    ///
    /// Owner-scoped: folders shared with `owner` by someone else never appear
    /// here, they are reachable through permission grants instead.
    pub fn list_children(&self, owner: Uuid, parent_id: Option<Uuid>) -> Result<Vec<Folder>> {
        let mut folders = Vec::new();

        match parent_id {
            None => {
                let mut stmt = self.conn().prepare(&format!(
                    "SELECT {FOLDER_COLUMNS} FROM folders
                     WHERE owner_id = ?1 AND parent_id IS NULL AND is_deleted = 0
                     ORDER BY name ASC"
                ))?;
                let rows = stmt.query_map(params![owner.to_string()], row_to_folder)?;
                for row in rows {
                    folders.push(row?);
                }
            }
            Some(parent) => {
                let mut stmt = self.conn().prepare(&format!(
                    "SELECT {FOLDER_COLUMNS} FROM folders
                     WHERE owner_id = ?1 AND parent_id = ?2 AND is_deleted = 0
                     ORDER BY name ASC"
                ))?;
                let rows = stmt.query_map(
                    params![owner.to_string(), parent.to_string()],
                    row_to_folder,
                )?;
                for row in rows {
                    folders.push(row?);
                }
            }
        }

        Ok(folders)
    }

    /// Ancestors of `id`, nearest first, ending at a root.
    pub fn ancestors(&self, id: Uuid) -> Result<Vec<Folder>> {
        ancestors_on(self.conn(), id)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Rename and/or re-parent a folder in `owner`'s tree in one transaction;
    /// either both changes land or neither does.
    ///
    /// `new_parent` is `None` to stay put and `Some(None)` to move to the root.
    /// Moving a folder under itself or any of its descendants is
    /// [`StoreError::CycleDetected`].
    pub fn update_folder(
        &self,
        owner: Uuid,
        id: Uuid,
        name: Option<&str>,
        new_parent: Option<Option<Uuid>>,
    ) -> Result<Folder> {
        let name = name.map(validate_name).transpose()?;
        let tx = self.conn().unchecked_transaction()?;

        let folder = get_folder_on(&tx, id)?;
        if folder.owner_id != owner || folder.is_deleted {
            return Err(StoreError::NotFound);
        }

        if let Some(Some(parent)) = new_parent {
            if parent == id {
                return Err(StoreError::CycleDetected(id));
            }
            ensure_valid_parent(&tx, owner, parent)?;
            if ancestors_on(&tx, parent)?.iter().any(|a| a.id == id) {
                return Err(StoreError::CycleDetected(id));
            }
        }

        let now = Utc::now().to_rfc3339();
        if let Some(name) = &name {
            tx.execute(
                "UPDATE folders SET name = ?1, updated_at = ?2 WHERE id = ?3",
                params![name, now, id.to_string()],
            )?;
        }
        if let Some(parent) = new_parent {
            tx.execute(
                "UPDATE folders SET parent_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![parent.map(|p| p.to_string()), now, id.to_string()],
            )?;
        }
        let updated = get_folder_on(&tx, id)?;
        tx.commit()?;

        tracing::debug!(folder_id = %id, renamed = name.is_some(), parent = ?new_parent, "folder updated");
        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Soft-delete a folder together with every descendant folder and file.
    ///
    /// Returns the number of folders marked. Grants on the subtree are kept
    /// but no longer resolve, since resolution ignores deleted resources.
    pub fn soft_delete_folder(&self, owner: Uuid, id: Uuid) -> Result<usize> {
        let tx = self.conn().unchecked_transaction()?;

        let folder = get_folder_on(&tx, id)?;
        if folder.owner_id != owner || folder.is_deleted {
            return Err(StoreError::NotFound);
        }

        let now = Utc::now().to_rfc3339();
        let folders = tx.execute(
            "WITH RECURSIVE subtree(id) AS (
                 SELECT id FROM folders WHERE id = ?1
                 UNION
                 SELECT f.id FROM folders f JOIN subtree s ON f.parent_id = s.id
             )
             UPDATE folders SET is_deleted = 1, updated_at = ?2
             WHERE id IN (SELECT id FROM subtree)",
            params![id.to_string(), now],
        )?;
        let files = tx.execute(
            "WITH RECURSIVE subtree(id) AS (
                 SELECT id FROM folders WHERE id = ?1
                 UNION
                 SELECT f.id FROM folders f JOIN subtree s ON f.parent_id = s.id
             )
             UPDATE files SET is_deleted = 1, updated_at = ?2
             WHERE folder_id IN (SELECT id FROM subtree)",
            params![id.to_string(), now],
        )?;
        tx.commit()?;

        tracing::info!(folder_id = %id, folders, files, "folder subtree soft-deleted");
        Ok(folders)
    }

    /// Hard-delete a folder. `ON DELETE CASCADE` removes descendants, their
    /// files and every grant on them. Returns `true` if a row was deleted.
    pub fn delete_folder(&self, id: Uuid) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM folders WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn get_folder_on(conn: &Connection, id: Uuid) -> Result<Folder> {
    conn.query_row(
        &format!("SELECT {FOLDER_COLUMNS} FROM folders WHERE id = ?1"),
        params![id.to_string()],
        row_to_folder,
    )
    .map_err(not_found)
}

/// A usable parent exists, is live, and belongs to `owner`.
pub(crate) fn ensure_valid_parent(conn: &Connection, owner: Uuid, parent: Uuid) -> Result<()> {
    let row: Option<(String, bool)> = conn
        .query_row(
            "SELECT owner_id, is_deleted FROM folders WHERE id = ?1",
            params![parent.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match row {
        Some((parent_owner, false)) if parent_owner == owner.to_string() => Ok(()),
        _ => Err(StoreError::InvalidParent(parent)),
    }
}

fn ancestors_on(conn: &Connection, id: Uuid) -> Result<Vec<Folder>> {
    let mut chain = Vec::new();
    let mut seen = HashSet::from([id]);
    let mut next = get_folder_on(conn, id)?.parent_id;

    while let Some(parent_id) = next {
        if !seen.insert(parent_id) || chain.len() >= MAX_TREE_DEPTH {
            return Err(StoreError::CycleDetected(parent_id));
        }
        let parent = get_folder_on(conn, parent_id)?;
        next = parent.parent_id;
        chain.push(parent);
    }

    Ok(chain)
}

/// Map a `rusqlite::Row` to a [`Folder`].
fn row_to_folder(row: &rusqlite::Row<'_>) -> rusqlite::Result<Folder> {
    Ok(Folder {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        owner_id: uuid_at(row, 2)?,
        parent_id: opt_uuid_at(row, 3)?,
        is_deleted: row.get(4)?,
        created_at: ts_at(row, 5)?,
        updated_at: ts_at(row, 6)?,
    })
}
