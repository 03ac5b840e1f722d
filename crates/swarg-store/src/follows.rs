//! Follow graph and the follower-count verification badge.

use rusqlite::params;
use swarg_shared::constants::VERIFIED_FOLLOWER_THRESHOLD;
use swarg_shared::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{FollowOutcome, User};
use crate::sql;
use crate::users::row_to_user;

impl Database {
    /// `follower` follows `followee`. Idempotent.
    ///
    /// When this follow brings the followee to exactly
    /// [`VERIFIED_FOLLOWER_THRESHOLD`] followers and they are not verified
    /// yet, they become verified and `became_verified` is set.
    pub fn follow(&self, follower: UserId, followee: UserId) -> Result<FollowOutcome> {
        if follower == followee {
            return Err(StoreError::Invalid("you cannot follow yourself".into()));
        }
        let target = self.get_user(followee)?;

        let tx = self.conn().unchecked_transaction()?;
        let created = tx.execute(
            "INSERT OR IGNORE INTO follows (follower_id, followee_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![follower.to_string(), followee.to_string(), sql::now()],
        )? > 0;
        let follower_count = self.follower_count(followee)?;

        let became_verified =
            created && follower_count == VERIFIED_FOLLOWER_THRESHOLD && !target.verified;
        if became_verified {
            self.set_verified(followee, true)?;
        }
        tx.commit()?;

        if became_verified {
            tracing::info!(user = %followee, "user reached follower threshold, verified");
        }

        Ok(FollowOutcome {
            created,
            follower_count,
            became_verified,
        })
    }

    /// Returns whether a follow was removed. Verification is never revoked.
    pub fn unfollow(&self, follower: UserId, followee: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
            params![follower.to_string(), followee.to_string()],
        )?;
        Ok(affected > 0)
    }

    pub fn is_following(&self, follower: UserId, followee: UserId) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
            params![follower.to_string(), followee.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn follower_count(&self, user: UserId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM follows WHERE followee_id = ?1",
            params![user.to_string()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    pub fn follower_ids(&self, user: UserId) -> Result<Vec<UserId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT follower_id FROM follows WHERE followee_id = ?1 ORDER BY created_at")?;
        let rows =
            stmt.query_map(params![user.to_string()], |row| sql::uuid_at(row, 0).map(UserId))?;
        sql::collect(rows)
    }

    pub fn followers(&self, user: UserId) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(
            "SELECT u.id, u.name, u.avatar, u.verified, u.is_owner, u.created_at
             FROM follows f JOIN users u ON u.id = f.follower_id
             WHERE f.followee_id = ?1 ORDER BY f.created_at",
        )?;
        let rows = stmt.query_map(params![user.to_string()], row_to_user)?;
        sql::collect(rows)
    }

    pub fn following(&self, user: UserId) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(
            "SELECT u.id, u.name, u.avatar, u.verified, u.is_owner, u.created_at
             FROM follows f JOIN users u ON u.id = f.followee_id
             WHERE f.follower_id = ?1 ORDER BY f.created_at",
        )?;
        let rows = stmt.query_map(params![user.to_string()], row_to_user)?;
        sql::collect(rows)
    }
}
