//! v001 -- Initial schema creation.
//!
//! Creates `users`, `folders`, `files`, `file_chunks` and
//! `resource_permissions`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    federated_id  TEXT UNIQUE,                 -- provider subject id, NULL for explicit creation
    email         TEXT NOT NULL UNIQUE,
    first_name    TEXT NOT NULL DEFAULT '',
    last_name     TEXT NOT NULL DEFAULT '',
    avatar_url    TEXT NOT NULL DEFAULT '',
    created_at    TEXT NOT NULL,               -- RFC-3339
    last_login_at TEXT                         -- RFC-3339
);

-- ----------------------------------------------------------------
-- Folders (self-referencing tree)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS folders (
    id         TEXT PRIMARY KEY NOT NULL,      -- UUID v4
    name       TEXT NOT NULL,
    owner_id   TEXT NOT NULL,                  -- FK -> users(id)
    parent_id  TEXT,                           -- nullable FK -> folders(id), NULL = root
    is_deleted INTEGER NOT NULL DEFAULT 0,     -- boolean 0/1
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (owner_id)  REFERENCES users(id)   ON DELETE CASCADE,
    FOREIGN KEY (parent_id) REFERENCES folders(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_folders_parent_id ON folders(parent_id);
CREATE INDEX IF NOT EXISTS idx_folders_owner_parent ON folders(owner_id, parent_id);

-- ----------------------------------------------------------------
-- Files (metadata only; bytes live in object storage)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS files (
    id            TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    name          TEXT NOT NULL,
    owner_id      TEXT NOT NULL,               -- FK -> users(id)
    folder_id     TEXT,                        -- nullable FK -> folders(id)
    size          INTEGER NOT NULL DEFAULT 0,
    mime_type     TEXT,
    bucket        TEXT NOT NULL,
    object_key    TEXT NOT NULL,
    upload_status TEXT NOT NULL DEFAULT 'pending',
    total_chunks  INTEGER,
    is_deleted    INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,

    FOREIGN KEY (owner_id)  REFERENCES users(id)   ON DELETE CASCADE,
    FOREIGN KEY (folder_id) REFERENCES folders(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_files_folder_id ON files(folder_id);
CREATE INDEX IF NOT EXISTS idx_files_owner_folder ON files(owner_id, folder_id);

-- Acknowledged chunk indices; one row per chunk.
CREATE TABLE IF NOT EXISTS file_chunks (
    file_id     TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,

    PRIMARY KEY (file_id, chunk_index),
    FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Resource permissions (explicit grants)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS resource_permissions (
    id         TEXT PRIMARY KEY NOT NULL,      -- UUID v4
    file_id    TEXT,                           -- exactly one of file_id / folder_id
    folder_id  TEXT,
    granted_by TEXT NOT NULL,                  -- FK -> users(id)
    user_id    TEXT NOT NULL,                  -- grantee, FK -> users(id)
    level      TEXT NOT NULL DEFAULT 'viewer'
               CHECK (level IN ('viewer', 'editor', 'owner')),
    created_at TEXT NOT NULL,

    CHECK ((file_id IS NULL) <> (folder_id IS NULL)),
    FOREIGN KEY (file_id)    REFERENCES files(id)   ON DELETE CASCADE,
    FOREIGN KEY (folder_id)  REFERENCES folders(id) ON DELETE CASCADE,
    FOREIGN KEY (granted_by) REFERENCES users(id)   ON DELETE CASCADE,
    FOREIGN KEY (user_id)    REFERENCES users(id)   ON DELETE CASCADE
);

-- NULLs are distinct in SQLite unique indexes, so each index only constrains
-- grants of its own target type.
CREATE UNIQUE INDEX IF NOT EXISTS idx_permissions_user_folder
    ON resource_permissions(user_id, folder_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_permissions_user_file
    ON resource_permissions(user_id, file_id);
CREATE INDEX IF NOT EXISTS idx_permissions_folder ON resource_permissions(folder_id);
CREATE INDEX IF NOT EXISTS idx_permissions_file ON resource_permissions(file_id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
