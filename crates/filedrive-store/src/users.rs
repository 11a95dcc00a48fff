//! User directory: federated-identity upsert and lookups.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use filedrive_shared::VerifiedIdentity;

use crate::database::Database;
use crate::error::Result;
use crate::models::{NewUser, User};
use crate::sql::{not_found, opt_ts_at, ts_at, uuid_at};

const USER_COLUMNS: &str =
    "id, federated_id, email, first_name, last_name, avatar_url, created_at, last_login_at";

impl Database {
    /// Insert or update the user behind a federated identity.
    ///
    /// A single `INSERT .. ON CONFLICT .. RETURNING` statement, so two
    /// concurrent logins for the same identity can never create two rows. On
    /// conflict only the login timestamp, avatar and names change; `id`,
    /// `email` and `created_at` are preserved.
    pub fn upsert_by_federated_id(
        &self,
        identity: &VerifiedIdentity,
        now: DateTime<Utc>,
    ) -> Result<User> {
        let user = self.conn().query_row(
            &format!(
                "INSERT INTO users (id, federated_id, email, first_name, last_name, avatar_url, created_at, last_login_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                 ON CONFLICT(federated_id) DO UPDATE SET
                     last_login_at = excluded.last_login_at,
                     avatar_url    = excluded.avatar_url,
                     first_name    = excluded.first_name,
                     last_name     = excluded.last_name
                 RETURNING {USER_COLUMNS}"
            ),
            params![
                Uuid::new_v4().to_string(),
                identity.federated_id,
                identity.email,
                identity.first_name,
                identity.last_name,
                identity.avatar_url,
                now.to_rfc3339(),
            ],
            row_to_user,
        )?;

        tracing::debug!(user_id = %user.id, "user upserted from federated login");
        Ok(user)
    }

    /// Explicitly create a user without a federated identity.
    pub fn create_user(&self, new_user: &NewUser) -> Result<User> {
        let user = User {
            id: Uuid::new_v4(),
            federated_id: None,
            email: new_user.email.trim().to_string(),
            first_name: new_user.first_name.clone(),
            last_name: new_user.last_name.clone(),
            avatar_url: new_user.avatar_url.clone(),
            created_at: Utc::now(),
            last_login_at: None,
        };

        self.conn().execute(
            "INSERT INTO users (id, federated_id, email, first_name, last_name, avatar_url, created_at, last_login_at)
             VALUES (?1, NULL, ?2, ?3, ?4, ?5, ?6, NULL)",
            params![
                user.id.to_string(),
                user.email,
                user.first_name,
                user.last_name,
                user.avatar_url,
                user.created_at.to_rfc3339(),
            ],
        )?;
        Ok(user)
    }

    pub fn get_user(&self, id: Uuid) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
                row_to_user,
            )
            .map_err(not_found)
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![email.trim()],
                row_to_user,
            )
            .map_err(not_found)
    }

    /// List all users, ordered by email.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY email ASC"))?;
        let rows = stmt.query_map([], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_at(row, 0)?,
        federated_id: row.get(1)?,
        email: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        avatar_url: row.get(5)?,
        created_at: ts_at(row, 6)?,
        last_login_at: opt_ts_at(row, 7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreError;
    use chrono::Duration;

    fn identity(fid: &str, email: &str) -> VerifiedIdentity {
        VerifiedIdentity {
            federated_id: fid.to_string(),
            email: email.to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            avatar_url: "https://example.com/a.png".to_string(),
        }
    }

    #[test]
    fn upsert_creates_then_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let id = identity("g-1", "ada@example.com");
        let now = Utc::now();

        let first = db.upsert_by_federated_id(&id, now).unwrap();
        let second = db.upsert_by_federated_id(&id, now).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(db.list_users().unwrap().len(), 1);
    }

    #[test]
    fn upsert_updates_profile_fields_only() {
        let db = Database::open_in_memory().unwrap();
        let t0 = Utc::now() - Duration::days(1);
        let original = db
            .upsert_by_federated_id(&identity("g-1", "ada@example.com"), t0)
            .unwrap();

        let mut changed = identity("g-1", "ada@example.com");
        changed.first_name = "Augusta".to_string();
        changed.avatar_url = "https://example.com/b.png".to_string();
        let t1 = Utc::now();
        let updated = db.upsert_by_federated_id(&changed, t1).unwrap();

        assert_eq!(updated.id, original.id);
        assert_eq!(updated.created_at, original.created_at);
        assert_eq!(updated.first_name, "Augusta");
        assert_eq!(updated.avatar_url, "https://example.com/b.png");
        assert_eq!(
            updated.last_login_at.map(|t| t.timestamp()),
            Some(t1.timestamp())
        );
        assert_eq!(updated.federated_id.as_deref(), Some("g-1"));
    }

    #[test]
    fn email_collision_is_a_constraint_error() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_by_federated_id(&identity("g-1", "ada@example.com"), Utc::now())
            .unwrap();
        let err = db
            .upsert_by_federated_id(&identity("g-2", "ada@example.com"), Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::Sqlite(_)));
    }

    #[test]
    fn explicit_create_and_lookup() {
        let db = Database::open_in_memory().unwrap();
        let user = db
            .create_user(&NewUser {
                email: " bob@example.com ".to_string(),
                first_name: "Bob".to_string(),
                last_name: String::new(),
                avatar_url: String::new(),
            })
            .unwrap();

        assert_eq!(user.email, "bob@example.com");
        assert_eq!(db.get_user(user.id).unwrap(), user);
        assert_eq!(db.get_user_by_email("bob@example.com").unwrap().id, user.id);
        assert!(matches!(db.get_user(Uuid::new_v4()), Err(StoreError::NotFound)));
    }
}
