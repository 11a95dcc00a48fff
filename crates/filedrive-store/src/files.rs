//! CRUD operations for [`File`] metadata and its upload state machine.
//!
//! No bytes pass through here; the object itself lives in external storage.
//! The store only tracks where it is and how far its upload has progressed.

use chrono::Utc;
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::folders::ensure_valid_parent;
use crate::models::{File, NewFile, UploadStatus};
use crate::sql::{conversion_failure, not_found, opt_uuid_at, ts_at, uuid_at, validate_name};

const FILE_COLUMNS: &str = "id, name, owner_id, folder_id, size, mime_type, bucket, object_key, \
     upload_status, total_chunks, \
     (SELECT COUNT(*) FROM file_chunks c WHERE c.file_id = files.id), \
     is_deleted, created_at, updated_at";

impl Database {
    /// Record a new file in `owner`'s tree. The folder, if any, must satisfy
    /// the same rules as a folder parent.
    pub fn create_file(&self, owner: Uuid, new_file: &NewFile) -> Result<File> {
        let name = validate_name(&new_file.name)?;
        let tx = self.conn().unchecked_transaction()?;

        if let Some(folder) = new_file.folder_id {
            ensure_valid_parent(&tx, owner, folder)?;
        }

        let now = Utc::now();
        let file = File {
            id: Uuid::new_v4(),
            name,
            owner_id: owner,
            folder_id: new_file.folder_id,
            size: new_file.size.max(0),
            mime_type: new_file.mime_type.clone(),
            bucket: new_file.bucket.clone(),
            object_key: new_file.object_key.clone(),
            upload_status: UploadStatus::Pending,
            total_chunks: new_file.total_chunks,
            uploaded_chunks: 0,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };

        tx.execute(
            "INSERT INTO files (id, name, owner_id, folder_id, size, mime_type, bucket, object_key,
                                upload_status, total_chunks, is_deleted, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?11)",
            params![
                file.id.to_string(),
                file.name,
                file.owner_id.to_string(),
                file.folder_id.map(|f| f.to_string()),
                file.size,
                file.mime_type,
                file.bucket,
                file.object_key,
                file.upload_status.as_str(),
                file.total_chunks,
                now.to_rfc3339(),
            ],
        )?;
        tx.commit()?;

        Ok(file)
    }

    /// Fetch a file by id, including soft-deleted ones.
    pub fn get_file(&self, id: Uuid) -> Result<File> {
        get_file_on(self.conn(), id)
    }

    /// List live files directly inside `folder_id` (or at the root) of `owner`'s tree.
    pub fn list_files(&self, owner: Uuid, folder_id: Option<Uuid>) -> Result<Vec<File>> {
        let (sql, folder) = match folder_id {
            None => (
                format!(
                    "SELECT {FILE_COLUMNS} FROM files
                     WHERE owner_id = ?1 AND folder_id IS NULL AND is_deleted = 0
                     ORDER BY name ASC"
                ),
                None,
            ),
            Some(f) => (
                format!(
                    "SELECT {FILE_COLUMNS} FROM files
                     WHERE owner_id = ?1 AND folder_id = ?2 AND is_deleted = 0
                     ORDER BY name ASC"
                ),
                Some(f.to_string()),
            ),
        };

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = match folder {
            None => stmt.query_map(params![owner.to_string()], row_to_file)?,
            Some(f) => stmt.query_map(params![owner.to_string(), f], row_to_file)?,
        }
        .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn soft_delete_file(&self, owner: Uuid, id: Uuid) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE files SET is_deleted = 1, updated_at = ?1
             WHERE id = ?2 AND owner_id = ?3 AND is_deleted = 0",
            params![Utc::now().to_rfc3339(), id.to_string(), owner.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Advance the upload state. Completing requires every declared chunk to
    /// have been acknowledged.
    pub fn set_upload_status(&self, id: Uuid, next: UploadStatus) -> Result<File> {
        let tx = self.conn().unchecked_transaction()?;
        let file = get_file_on(&tx, id)?;

        if !file.upload_status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                from: file.upload_status,
                to: next,
            });
        }
        if next == UploadStatus::Completed {
            if let Some(total) = file.total_chunks {
                if file.uploaded_chunks < total {
                    return Err(StoreError::InvalidTransition {
                        from: file.upload_status,
                        to: next,
                    });
                }
            }
        }

        tx.execute(
            "UPDATE files SET upload_status = ?1, updated_at = ?2 WHERE id = ?3",
            params![next.as_str(), Utc::now().to_rfc3339(), id.to_string()],
        )?;
        let updated = get_file_on(&tx, id)?;
        tx.commit()?;

        tracing::debug!(file_id = %id, status = %next, "upload status changed");
        Ok(updated)
    }

    /// Acknowledge one uploaded chunk. Idempotent per index. Returns the
    /// number of distinct chunks acknowledged so far.
    pub fn ack_chunk(&self, id: Uuid, index: u32) -> Result<u32> {
        let tx = self.conn().unchecked_transaction()?;
        let file = get_file_on(&tx, id)?;

        if file.upload_status != UploadStatus::InProgress {
            return Err(StoreError::InvalidTransition {
                from: file.upload_status,
                to: UploadStatus::InProgress,
            });
        }
        let total = file.total_chunks.unwrap_or(0);
        if index >= total {
            return Err(StoreError::ChunkOutOfRange { index, total });
        }

        tx.execute(
            "INSERT OR IGNORE INTO file_chunks (file_id, chunk_index) VALUES (?1, ?2)",
            params![id.to_string(), index],
        )?;
        let count = get_file_on(&tx, id)?.uploaded_chunks;
        tx.commit()?;
        Ok(count)
    }

    /// Acknowledged chunk indices, ascending.
    pub fn uploaded_chunk_indices(&self, id: Uuid) -> Result<Vec<u32>> {
        let mut stmt = self.conn().prepare(
            "SELECT chunk_index FROM file_chunks WHERE file_id = ?1 ORDER BY chunk_index ASC",
        )?;
        let rows = stmt.query_map(params![id.to_string()], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<u32>>>()
            .map_err(StoreError::Sqlite)
    }
}

fn get_file_on(conn: &Connection, id: Uuid) -> Result<File> {
    conn.query_row(
        &format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?1"),
        params![id.to_string()],
        row_to_file,
    )
    .map_err(not_found)
}

fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<File> {
    let status: String = row.get(8)?;
    let upload_status = status
        .parse::<UploadStatus>()
        .map_err(|e| conversion_failure(8, e))?;

    Ok(File {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        owner_id: uuid_at(row, 2)?,
        folder_id: opt_uuid_at(row, 3)?,
        size: row.get(4)?,
        mime_type: row.get(5)?,
        bucket: row.get(6)?,
        object_key: row.get(7)?,
        upload_status,
        total_chunks: row.get(9)?,
        uploaded_chunks: row.get(10)?,
        is_deleted: row.get(11)?,
        created_at: ts_at(row, 12)?,
        updated_at: ts_at(row, 13)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewUser;

    fn setup() -> (Database, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let owner = db
            .create_user(&NewUser {
                email: "owner@example.com".to_string(),
                first_name: String::new(),
                last_name: String::new(),
                avatar_url: String::new(),
            })
            .unwrap()
            .id;
        (db, owner)
    }

    fn new_file(folder_id: Option<Uuid>, total_chunks: Option<u32>) -> NewFile {
        NewFile {
            name: "report.pdf".to_string(),
            folder_id,
            size: 1024,
            mime_type: Some("application/pdf".to_string()),
            bucket: "filedrive-bucket".to_string(),
            object_key: "u/report.pdf".to_string(),
            total_chunks,
        }
    }

    #[test]
    fn create_and_list_in_folder() {
        let (db, owner) = setup();
        let docs = db.create_folder(owner, "Docs", None).unwrap();
        let file = db.create_file(owner, &new_file(Some(docs.id), None)).unwrap();

        assert_eq!(file.upload_status, UploadStatus::Pending);
        assert_eq!(db.get_file(file.id).unwrap(), file);
        assert_eq!(db.list_files(owner, Some(docs.id)).unwrap().len(), 1);
        assert!(db.list_files(owner, None).unwrap().is_empty());
    }

    #[test]
    fn file_in_missing_folder_rejected() {
        let (db, owner) = setup();
        assert!(matches!(
            db.create_file(owner, &new_file(Some(Uuid::new_v4()), None)),
            Err(StoreError::InvalidParent(_))
        ));
    }

    #[test]
    fn upload_state_machine() {
        let (db, owner) = setup();
        let file = db.create_file(owner, &new_file(None, Some(2))).unwrap();

        // pending -> completed is not allowed
        assert!(matches!(
            db.set_upload_status(file.id, UploadStatus::Completed),
            Err(StoreError::InvalidTransition { .. })
        ));
        // chunks only while in progress
        assert!(db.ack_chunk(file.id, 0).is_err());

        db.set_upload_status(file.id, UploadStatus::InProgress).unwrap();
        assert_eq!(db.ack_chunk(file.id, 0).unwrap(), 1);
        assert_eq!(db.ack_chunk(file.id, 0).unwrap(), 1);
        assert!(matches!(
            db.ack_chunk(file.id, 2),
            Err(StoreError::ChunkOutOfRange { index: 2, total: 2 })
        ));

        // not all chunks acknowledged yet
        assert!(db.set_upload_status(file.id, UploadStatus::Completed).is_err());
        assert_eq!(db.ack_chunk(file.id, 1).unwrap(), 2);
        let done = db.set_upload_status(file.id, UploadStatus::Completed).unwrap();
        assert_eq!(done.upload_status, UploadStatus::Completed);
        assert_eq!(done.uploaded_chunks, 2);
        assert_eq!(db.uploaded_chunk_indices(file.id).unwrap(), vec![0, 1]);

        // terminal
        assert!(db.set_upload_status(file.id, UploadStatus::Failed).is_err());
    }

    #[test]
    fn soft_deleted_folder_hides_files() {
        let (db, owner) = setup();
        let docs = db.create_folder(owner, "Docs", None).unwrap();
        let file = db.create_file(owner, &new_file(Some(docs.id), None)).unwrap();

        db.soft_delete_folder(owner, docs.id).unwrap();
        assert!(db.get_file(file.id).unwrap().is_deleted);
        assert!(db.list_files(owner, Some(docs.id)).unwrap().is_empty());
    }

    #[test]
    fn soft_delete_file_once() {
        let (db, owner) = setup();
        let file = db.create_file(owner, &new_file(None, None)).unwrap();
        db.soft_delete_file(owner, file.id).unwrap();
        assert!(matches!(
            db.soft_delete_file(owner, file.id),
            Err(StoreError::NotFound)
        ));
    }
}
