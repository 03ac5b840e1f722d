//! Persisted notifications and their read flags.

use chrono::{Duration, Utc};
use rusqlite::params;
use swarg_shared::{GroupId, NotificationId, NotificationKind, PostId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{NewNotification, Notification};
use crate::sql;

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, kind, from_id, post_id, group_id, message, read, created_at";

impl Database {
    pub fn insert_notification(&self, new: &NewNotification) -> Result<Notification> {
        let id = NotificationId::new();
        let at = sql::now();
        self.conn().execute(
            "INSERT INTO notifications
                 (id, user_id, kind, from_id, post_id, group_id, message, read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)",
            params![
                id.to_string(),
                new.user.to_string(),
                new.kind.as_str(),
                new.from.map(|u| u.to_string()),
                new.post.map(|p| p.to_string()),
                new.group.map(|g| g.to_string()),
                new.message,
                at,
            ],
        )?;

        Ok(Notification {
            id,
            user: new.user,
            kind: new.kind,
            from: new.from,
            post: new.post,
            group: new.group,
            message: new.message.clone(),
            read: false,
            created_at: sql::parse_ts(&at)?,
        })
    }

    /// Insert a batch in one transaction.
    pub fn insert_notifications(&self, batch: &[NewNotification]) -> Result<Vec<Notification>> {
        let tx = self.conn().unchecked_transaction()?;
        let mut out = Vec::with_capacity(batch.len());
        for new in batch {
            out.push(self.insert_notification(new)?);
        }
        tx.commit()?;
        Ok(out)
    }

    /// Newest first.
    pub fn list_notifications(&self, user: UserId, limit: u32) -> Result<Vec<Notification>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE user_id = ?1 ORDER BY seq DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![user.to_string(), limit], row_to_notification)?;
        sql::collect(rows)
    }

    pub fn unread_notification_count(&self, user: UserId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND read = 0",
            params![user.to_string()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// `NotFound` unless the notification exists and belongs to `user`.
    pub fn mark_notification_read(&self, id: NotificationId, user: UserId) -> Result<Notification> {
        let affected = self.conn().execute(
            "UPDATE notifications SET read = 1 WHERE id = ?1 AND user_id = ?2",
            params![id.to_string(), user.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound("Notification"));
        }
        self.conn()
            .query_row(
                &format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1"),
                params![id.to_string()],
                row_to_notification,
            )
            .map_err(StoreError::not_found("Notification"))
    }

    /// Returns how many flipped from unread to read.
    pub fn mark_all_notifications_read(&self, user: UserId) -> Result<u64> {
        let affected = self.conn().execute(
            "UPDATE notifications SET read = 1 WHERE user_id = ?1 AND read = 0",
            params![user.to_string()],
        )?;
        Ok(affected as u64)
    }

    pub fn delete_notification(&self, id: NotificationId, user: UserId) -> Result<()> {
        let affected = self.conn().execute(
            "DELETE FROM notifications WHERE id = ?1 AND user_id = ?2",
            params![id.to_string(), user.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound("Notification"));
        }
        Ok(())
    }

    /// Drop read notifications older than `retention`, then everything past
    /// the newest `max_per_user` of each user. Returns rows removed.
    pub fn prune_notifications(&self, retention: Duration, max_per_user: u32) -> Result<usize> {
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .ok_or_else(|| StoreError::Invalid("retention period is too long".into()))?;
        let cutoff = sql::ts(&cutoff);
        let tx = self.conn().unchecked_transaction()?;
        let aged = tx.execute(
            "DELETE FROM notifications WHERE read = 1 AND created_at < ?1",
            params![cutoff],
        )?;
        let overflow = tx.execute(
            "DELETE FROM notifications WHERE seq IN (
                 SELECT seq FROM (
                     SELECT seq, ROW_NUMBER() OVER (PARTITION BY user_id ORDER BY seq DESC) AS rank
                     FROM notifications)
                 WHERE rank > ?1)",
            params![max_per_user],
        )?;
        tx.commit()?;
        Ok(aged + overflow)
    }
}

fn row_to_notification(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    let kind: String = row.get(2)?;
    let kind = kind.parse::<NotificationKind>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
    })?;

    Ok(Notification {
        id: NotificationId(sql::uuid_at(row, 0)?),
        user: UserId(sql::uuid_at(row, 1)?),
        kind,
        from: sql::opt_uuid_at(row, 3)?.map(UserId),
        post: sql::opt_uuid_at(row, 4)?.map(PostId),
        group: sql::opt_uuid_at(row, 5)?.map(GroupId),
        message: row.get(6)?,
        read: row.get(7)?,
        created_at: sql::ts_at(row, 8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::tests::{add_user, test_db};

    #[test]
    fn insert_and_list_newest_first() {
        let (_dir, db) = test_db();
        let me = add_user(&db, "Me");
        let fan = add_user(&db, "Fan");

        let first = db
            .insert_notification(
                &NewNotification::new(me, NotificationKind::Follow, "Fan started following you")
                    .from_user(fan),
            )
            .unwrap();
        let second = db
            .insert_notification(&NewNotification::new(
                me,
                NotificationKind::Like,
                "Fan liked your post",
            ))
            .unwrap();

        let list = db.list_notifications(me, 50).unwrap();
        assert_eq!(list, vec![second, first.clone()]);
        assert_eq!(list[1].from, Some(fan));
        assert_eq!(db.unread_notification_count(me).unwrap(), 2);
        assert!(db.list_notifications(fan, 50).unwrap().is_empty());
    }

    #[test]
    fn mark_read_checks_owner() {
        let (_dir, db) = test_db();
        let me = add_user(&db, "Me");
        let other = add_user(&db, "Other");
        let n = db
            .insert_notification(&NewNotification::new(me, NotificationKind::Post, "new post"))
            .unwrap();

        assert!(matches!(
            db.mark_notification_read(n.id, other),
            Err(StoreError::NotFound("Notification"))
        ));
        assert!(db.mark_notification_read(n.id, me).unwrap().read);
        assert_eq!(db.unread_notification_count(me).unwrap(), 0);
    }

    #[test]
    fn mark_all_read_counts_changes() {
        let (_dir, db) = test_db();
        let me = add_user(&db, "Me");
        let batch: Vec<_> = (0..3)
            .map(|i| NewNotification::new(me, NotificationKind::Comment, format!("c{i}")))
            .collect();
        db.insert_notifications(&batch).unwrap();

        assert_eq!(db.mark_all_notifications_read(me).unwrap(), 3);
        assert_eq!(db.mark_all_notifications_read(me).unwrap(), 0);
    }

    #[test]
    fn delete_checks_owner() {
        let (_dir, db) = test_db();
        let me = add_user(&db, "Me");
        let other = add_user(&db, "Other");
        let keep = db
            .insert_notification(&NewNotification::new(me, NotificationKind::Follow, "kept"))
            .unwrap();
        let gone = db
            .insert_notification(&NewNotification::new(me, NotificationKind::Like, "gone"))
            .unwrap();

        assert!(matches!(
            db.delete_notification(gone.id, other),
            Err(StoreError::NotFound("Notification"))
        ));
        db.delete_notification(gone.id, me).unwrap();
        assert!(matches!(
            db.delete_notification(gone.id, me),
            Err(StoreError::NotFound("Notification"))
        ));
        assert_eq!(db.list_notifications(me, 50).unwrap(), vec![keep]);
        assert_eq!(db.unread_notification_count(me).unwrap(), 1);
    }

    #[test]
    fn prune_rejects_retention_past_calendar_range() {
        let (_dir, db) = test_db();
        let me = add_user(&db, "Me");
        db.insert_notification(&NewNotification::new(me, NotificationKind::Like, "x"))
            .unwrap();

        assert!(matches!(
            db.prune_notifications(Duration::days(100_000_000), 500),
            Err(StoreError::Invalid(_))
        ));
        assert_eq!(db.list_notifications(me, 50).unwrap().len(), 1);
    }

    #[test]
    fn prune_caps_per_user_and_drops_old_read() {
        let (_dir, db) = test_db();
        let me = add_user(&db, "Me");
        let other = add_user(&db, "Other");
        for i in 0..5 {
            let note = NewNotification::new(me, NotificationKind::Like, format!("{i}"));
            db.insert_notification(&note).unwrap();
        }
        db.insert_notification(&NewNotification::new(other, NotificationKind::Like, "x"))
            .unwrap();

        let removed = db.prune_notifications(Duration::days(90), 3).unwrap();
        assert_eq!(removed, 2);
        let kept: Vec<String> = db
            .list_notifications(me, 50)
            .unwrap()
            .into_iter()
            .map(|n| n.message)
            .collect();
        assert_eq!(kept, vec!["4", "3", "2"]);

        // Zero retention removes everything already read.
        db.mark_all_notifications_read(me).unwrap();
        let removed = db.prune_notifications(Duration::zero(), 500).unwrap();
        assert_eq!(removed, 3);
        assert_eq!(db.list_notifications(other, 50).unwrap().len(), 1);
    }
}
