//! Group invite codes.
//!
//! A code is `INVITE_CODE_BYTES` random bytes, hex-encoded. Anyone holding an
//! unexpired code can join the group.

use chrono::Duration;
use rand::RngCore;
use rusqlite::{params, OptionalExtension};
use swarg_shared::constants::INVITE_CODE_BYTES;
use swarg_shared::{GroupId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Group, Invite};
use crate::sql;

fn generate_code() -> String {
    let mut bytes = [0u8; INVITE_CODE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl Database {
    /// Admins only.
    pub fn create_invite(&self, group: GroupId, actor: UserId, ttl: Duration) -> Result<Invite> {
        if ttl <= Duration::zero() {
            return Err(StoreError::Invalid("invite lifetime must be positive".into()));
        }
        if !self.group_exists(group)? {
            return Err(StoreError::NotFound("Group"));
        }
        if !self.is_group_admin(group, actor)? {
            return Err(StoreError::Forbidden("only group admins can create invites".into()));
        }

        let code = generate_code();
        let created = sql::now();
        let created_at = sql::parse_ts(&created)?;
        let expires_at = created_at
            .checked_add_signed(ttl)
            .ok_or_else(|| StoreError::Invalid("invite lifetime is too long".into()))?;
        self.conn().execute(
            "INSERT INTO group_invites (code, group_id, created_by, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![code, group.to_string(), actor.to_string(), created, sql::ts(&expires_at)],
        )?;

        Ok(Invite {
            code,
            group_id: group,
            created_by: actor,
            created_at,
            expires_at,
        })
    }

    /// Join the invite's group. Returns the group and whether `user` was
    /// newly added. Missing or expired codes are `NotFound`.
    pub fn redeem_invite(&self, code: &str, user: UserId) -> Result<(Group, bool)> {
        let group: Option<String> = self
            .conn()
            .query_row(
                "SELECT group_id FROM group_invites WHERE code = ?1 AND expires_at > ?2",
                params![code.trim().to_ascii_lowercase(), sql::now()],
                |row| row.get(0),
            )
            .optional()?;
        let group = GroupId(group.ok_or(StoreError::NotFound("Invite"))?.parse()?);

        let joined = self.insert_member(group, user)?;
        Ok((self.get_group(group)?, joined))
    }

    /// Admins only.
    pub fn revoke_invite(&self, code: &str, actor: UserId) -> Result<()> {
        let group: Option<String> = self
            .conn()
            .query_row(
                "SELECT group_id FROM group_invites WHERE code = ?1",
                params![code],
                |row| row.get(0),
            )
            .optional()?;
        let group = GroupId(group.ok_or(StoreError::NotFound("Invite"))?.parse()?);
        if !self.is_group_admin(group, actor)? {
            return Err(StoreError::Forbidden("only group admins can revoke invites".into()));
        }
        self.conn()
            .execute("DELETE FROM group_invites WHERE code = ?1", params![code])?;
        Ok(())
    }

    pub fn purge_expired_invites(&self) -> Result<usize> {
        Ok(self.conn().execute(
            "DELETE FROM group_invites WHERE expires_at <= ?1",
            params![sql::now()],
        )?)
    }
}
