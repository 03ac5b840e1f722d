//! User profile projection.
//!
//! Accounts live in the external account service; this table only keeps the
//! fields needed to enrich payloads (name, avatar, badges) and to anchor
//! foreign keys.

use std::collections::HashMap;

use rusqlite::{params, OptionalExtension};
use swarg_shared::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::User;
use crate::sql;

const USER_COLUMNS: &str = "id, name, avatar, verified, is_owner, created_at";

impl Database {
    /// Insert or refresh a profile. Badges are left untouched on update.
    pub fn upsert_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, name, avatar, verified, is_owner, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, avatar = excluded.avatar",
            params![
                user.id.to_string(),
                user.name,
                user.avatar,
                user.verified,
                user.is_owner,
                sql::ts(&user.created_at),
            ],
        )?;
        Ok(())
    }

    /// Create the profile on first sight; never overwrites an existing row.
    /// A profile removed through [`Database::delete_user`] stays removed.
    pub fn ensure_user(&self, id: UserId, name: &str) -> Result<()> {
        if self.is_deleted_user(id)? {
            return Err(StoreError::Forbidden("this account has been deleted".into()));
        }
        self.conn().execute(
            "INSERT OR IGNORE INTO users (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![id.to_string(), name, sql::now()],
        )?;
        Ok(())
    }

    /// Partial profile update. `avatar: Some(None)` clears the avatar.
    pub fn update_profile(
        &self,
        id: UserId,
        name: Option<&str>,
        avatar: Option<Option<&str>>,
    ) -> Result<User> {
        if let Some(name) = name {
            let name = name.trim();
            if name.is_empty() {
                return Err(StoreError::Invalid("name must not be empty".into()));
            }
            self.conn().execute(
                "UPDATE users SET name = ?1 WHERE id = ?2",
                params![name, id.to_string()],
            )?;
        }
        if let Some(avatar) = avatar {
            self.conn().execute(
                "UPDATE users SET avatar = ?1 WHERE id = ?2",
                params![avatar, id.to_string()],
            )?;
        }
        self.get_user(id)
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
                row_to_user,
            )
            .map_err(StoreError::not_found("User"))
    }

    pub fn find_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
                row_to_user,
            )
            .optional()?)
    }

    pub fn user_exists(&self, id: UserId) -> Result<bool> {
        Ok(self.find_user(id)?.is_some())
    }

    /// Batch lookup; unknown ids are simply absent from the map.
    pub fn get_users(&self, ids: &[UserId]) -> Result<HashMap<UserId, User>> {
        let mut map = HashMap::with_capacity(ids.len());
        for id in ids {
            if map.contains_key(id) {
                continue;
            }
            if let Some(user) = self.find_user(*id)? {
                map.insert(*id, user);
            }
        }
        Ok(map)
    }

    pub fn set_verified(&self, id: UserId, verified: bool) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE users SET verified = ?1 WHERE id = ?2",
            params![verified, id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound("User"));
        }
        Ok(())
    }

    pub fn set_owner_badge(&self, id: UserId, is_owner: bool) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE users SET is_owner = ?1 WHERE id = ?2",
            params![is_owner, id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound("User"));
        }
        Ok(())
    }

    // ON DELETE CASCADE: conversations, messages, notifications, posts,
    // stories, follows, memberships and owned groups go with it.
    pub fn delete_user(&self, id: UserId) -> Result<bool> {
        let tx = self.conn().unchecked_transaction()?;
        let affected = tx.execute("DELETE FROM users WHERE id = ?1", params![id.to_string()])?;
        tx.execute(
            "INSERT OR IGNORE INTO deleted_users (id, deleted_at) VALUES (?1, ?2)",
            params![id.to_string(), sql::now()],
        )?;
        tx.commit()?;
        Ok(affected > 0)
    }

    pub fn is_deleted_user(&self, id: UserId) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM deleted_users WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId(sql::uuid_at(row, 0)?),
        name: row.get(1)?,
        avatar: row.get(2)?,
        verified: row.get(3)?,
        is_owner: row.get(4)?,
        created_at: sql::ts_at(row, 5)?,
    })
}
