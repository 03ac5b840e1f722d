//! Message store: append, read receipts, ordered retrieval, deletion.
//!
//! Every message belongs to exactly one conversation or group. `read_by`
//! starts as `{sender}` and only grows; deletion is a hard delete.

use rusqlite::{params, OptionalExtension};
use swarg_shared::constants::{MAX_CONTENT_CHARS, MAX_MEDIA_PER_MESSAGE};
use swarg_shared::{ConversationId, GroupId, MediaRef, MessageId, MessageTarget, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Message, ReadSelection};
use crate::sql;

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, group_id, sender_id, content, media, created_at";

/// Trim `content` and check the content-or-media rule and size limits.
/// Returns the normalized content.
pub fn validate_message_body(content: Option<&str>, media: &[MediaRef]) -> Result<Option<String>> {
    let content = content.map(str::trim).filter(|c| !c.is_empty());

    if content.is_none() && media.is_empty() {
        return Err(StoreError::Invalid(
            "message must have text or media".into(),
        ));
    }
    if let Some(text) = content {
        if text.chars().count() > MAX_CONTENT_CHARS {
            return Err(StoreError::Invalid(format!(
                "message is longer than {MAX_CONTENT_CHARS} characters"
            )));
        }
    }
    if media.len() > MAX_MEDIA_PER_MESSAGE {
        return Err(StoreError::Invalid(format!(
            "at most {MAX_MEDIA_PER_MESSAGE} attachments per message"
        )));
    }
    if media.iter().any(|m| m.url.trim().is_empty()) {
        return Err(StoreError::Invalid("attachment url must not be empty".into()));
    }

    Ok(content.map(str::to_string))
}

impl Database {
    // ------------------------------------------------------------------
    // Access checks
    // ------------------------------------------------------------------

    /// `NotFound` if the target does not exist, `Forbidden` if `user` is not
    /// a participant (conversation) or member (group).
    pub fn check_target_access(&self, target: MessageTarget, user: UserId) -> Result<()> {
        match target {
            MessageTarget::Conversation(id) => {
                if !self.get_conversation(id)?.involves(user) {
                    return Err(StoreError::Forbidden(
                        "not a participant of this conversation".into(),
                    ));
                }
            }
            MessageTarget::Group(id) => {
                if !self.group_exists(id)? {
                    return Err(StoreError::NotFound("Group"));
                }
                if !self.is_group_member(id, user)? {
                    return Err(StoreError::Forbidden("not a member of this group".into()));
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Persist a message and move the target's last-message pointer.
    ///
    /// The timestamp is the server clock. The sender is recorded as the
    /// first reader.
    pub fn append_message(
        &self,
        target: MessageTarget,
        sender: UserId,
        content: Option<&str>,
        media: &[MediaRef],
    ) -> Result<Message> {
        let content = validate_message_body(content, media)?;
        self.check_target_access(target, sender)?;

        let id = MessageId::new();
        let at = sql::now();
        let created_at = sql::parse_ts(&at)?;

        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "INSERT INTO messages
                 (id, conversation_id, group_id, sender_id, content, media, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id.to_string(),
                target.conversation_id().map(|c| c.to_string()),
                target.group_id().map(|g| g.to_string()),
                sender.to_string(),
                content,
                serde_json::to_string(media)?,
                at,
            ],
        )?;
        tx.execute(
            "INSERT INTO message_reads (message_id, user_id, read_at) VALUES (?1, ?2, ?3)",
            params![id.to_string(), sender.to_string(), at],
        )?;
        match target {
            MessageTarget::Conversation(c) => self.set_conversation_last_message(c, Some(id), &at)?,
            MessageTarget::Group(g) => self.set_group_last_message(g, Some(id), &at)?,
        }
        tx.commit()?;

        Ok(Message {
            id,
            target,
            sender,
            content,
            media: media.to_vec(),
            read_by: vec![sender],
            created_at,
        })
    }

    // ------------------------------------------------------------------
    // Read receipts
    // ------------------------------------------------------------------

    /// Add `reader` to `read_by` of every selected message in `target` that
    /// does not already contain it. Returns the messages that changed, in
    /// commit order. Unknown or deleted ids are ignored.
    pub fn mark_read(
        &self,
        target: MessageTarget,
        selection: &ReadSelection,
        reader: UserId,
    ) -> Result<Vec<MessageId>> {
        let (column, target_id) = target_column(target);
        let candidates: Vec<MessageId> = {
            let mut stmt = self.conn().prepare(&format!(
                "SELECT m.id FROM messages m
                 WHERE m.{column} = ?1
                   AND NOT EXISTS (
                       SELECT 1 FROM message_reads r
                       WHERE r.message_id = m.id AND r.user_id = ?2)
                 ORDER BY m.seq ASC"
            ))?;
            let rows = stmt.query_map(params![target_id, reader.to_string()], |row| {
                sql::uuid_at(row, 0).map(MessageId)
            })?;
            sql::collect(rows)?
        };

        let selected: Vec<MessageId> = match selection {
            ReadSelection::AllUnread => candidates,
            ReadSelection::Ids(ids) => candidates.into_iter().filter(|c| ids.contains(c)).collect(),
        };

        if selected.is_empty() {
            return Ok(selected);
        }

        let at = sql::now();
        let tx = self.conn().unchecked_transaction()?;
        let mut changed = Vec::with_capacity(selected.len());
        for id in selected {
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at)
                 VALUES (?1, ?2, ?3)",
                params![id.to_string(), reader.to_string(), at],
            )?;
            if inserted > 0 {
                changed.push(id);
            }
        }
        tx.commit()?;

        Ok(changed)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// All messages of `target`, oldest first. Opening a conversation counts
    /// as reading it: every unread message is marked read by `reader` first,
    /// and the ids that changed are returned alongside.
    pub fn list_messages(
        &self,
        target: MessageTarget,
        reader: UserId,
    ) -> Result<(Vec<Message>, Vec<MessageId>)> {
        self.check_target_access(target, reader)?;
        let newly_read = self.mark_read(target, &ReadSelection::AllUnread, reader)?;

        let (column, target_id) = target_column(target);
        let mut messages = {
            let mut stmt = self.conn().prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE {column} = ?1 ORDER BY seq ASC"
            ))?;
            let rows = stmt.query_map(params![target_id], row_to_message)?;
            sql::collect(rows)?
        };
        for message in &mut messages {
            message.read_by = self.read_by(message.id)?;
        }

        Ok((messages, newly_read))
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.find_message(id)?.ok_or(StoreError::NotFound("Message"))
    }

    pub fn find_message(&self, id: MessageId) -> Result<Option<Message>> {
        let message = self
            .conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .optional()?;

        match message {
            Some(mut m) => {
                m.read_by = self.read_by(m.id)?;
                Ok(Some(m))
            }
            None => Ok(None),
        }
    }

    fn read_by(&self, id: MessageId) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id FROM message_reads WHERE message_id = ?1
             ORDER BY read_at ASC, user_id ASC",
        )?;
        let rows = stmt.query_map(params![id.to_string()], |row| sql::uuid_at(row, 0).map(UserId))?;
        sql::collect(rows)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Hard-delete a message on behalf of `requester`.
    ///
    /// Allowed for the sender, and for group admins (owner included) on group
    /// messages. Returns the deleted message so callers know where it was
    /// delivered.
    pub fn delete_message_as(&self, id: MessageId, requester: UserId) -> Result<Message> {
        let message = self.get_message(id)?;

        let allowed = message.sender == requester
            || match message.target {
                MessageTarget::Group(g) => self.is_group_admin(g, requester)?,
                MessageTarget::Conversation(_) => false,
            };
        if !allowed {
            return Err(StoreError::Forbidden(
                "only the sender or a group admin can delete this message".into(),
            ));
        }

        let tx = self.conn().unchecked_transaction()?;
        tx.execute("DELETE FROM messages WHERE id = ?1", params![id.to_string()])?;
        self.repoint_last_message(message.target, id)?;
        tx.commit()?;

        Ok(message)
    }

    /// After deleting `removed`, point the target at its newest remaining
    /// message if `removed` was the last one. Activity timestamps stay.
    fn repoint_last_message(&self, target: MessageTarget, removed: MessageId) -> Result<()> {
        let (column, target_id) = target_column(target);
        let newest: Option<String> = self
            .conn()
            .query_row(
                &format!("SELECT id FROM messages WHERE {column} = ?1 ORDER BY seq DESC LIMIT 1"),
                params![target_id],
                |row| row.get(0),
            )
            .optional()?;

        let table = match target {
            MessageTarget::Conversation(_) => "conversations",
            MessageTarget::Group(_) => "chat_groups",
        };
        self.conn().execute(
            &format!(
                "UPDATE {table} SET last_message_id = ?1 WHERE id = ?2 AND last_message_id = ?3"
            ),
            params![newest, target_id, removed.to_string()],
        )?;
        Ok(())
    }
}

fn target_column(target: MessageTarget) -> (&'static str, String) {
    match target {
        MessageTarget::Conversation(c) => ("conversation_id", c.to_string()),
        MessageTarget::Group(g) => ("group_id", g.to_string()),
    }
}

/// `read_by` is filled in separately.
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let conversation = sql::opt_uuid_at(row, 1)?;
    let group = sql::opt_uuid_at(row, 2)?;
    let target = match (conversation, group) {
        (Some(c), None) => MessageTarget::Conversation(ConversationId(c)),
        (None, Some(g)) => MessageTarget::Group(GroupId(g)),
        _ => {
            return Err(rusqlite::Error::InvalidColumnType(
                1,
                "conversation_id/group_id".into(),
                rusqlite::types::Type::Null,
            ))
        }
    };

    Ok(Message {
        id: MessageId(sql::uuid_at(row, 0)?),
        target,
        sender: UserId(sql::uuid_at(row, 3)?),
        content: row.get(4)?,
        media: sql::json_at(row, 5)?,
        read_by: Vec::new(),
        created_at: sql::ts_at(row, 6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::tests::{add_user, test_db};
    use swarg_shared::MediaKind;

    fn image() -> MediaRef {
        MediaRef {
            url: "https://cdn.example/cat.png".into(),
            public_id: Some("cat".into()),
            kind: MediaKind::Image,
        }
    }

    #[test]
    fn append_records_sender_as_reader() {
        let (_dir, db) = test_db();
        let a = add_user(&db, "A");
        let b = add_user(&db, "B");
        let conv = db.find_or_create_conversation(a, b).unwrap();

        let msg = db.append_message(conv.id.into(), a, Some("  hi  "), &[]).unwrap();
        assert_eq!(msg.content.as_deref(), Some("hi"));
        assert_eq!(msg.read_by, vec![a]);

        let stored = db.get_message(msg.id).unwrap();
        assert_eq!(stored, msg);
        assert_eq!(db.get_conversation(conv.id).unwrap().last_message_id, Some(msg.id));
    }

    #[test]
    fn empty_message_is_rejected_and_not_stored() {
        let (_dir, db) = test_db();
        let a = add_user(&db, "A");
        let b = add_user(&db, "B");
        let conv = db.find_or_create_conversation(a, b).unwrap();

        for content in [None, Some(""), Some("   \n\t")] {
            assert!(matches!(
                db.append_message(conv.id.into(), a, content, &[]),
                Err(StoreError::Invalid(_))
            ));
        }

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert!(db.get_conversation(conv.id).unwrap().last_message_id.is_none());
    }

    #[test]
    fn media_only_message_is_accepted() {
        let (_dir, db) = test_db();
        let a = add_user(&db, "A");
        let b = add_user(&db, "B");
        let conv = db.find_or_create_conversation(a, b).unwrap();

        let msg = db.append_message(conv.id.into(), a, None, &[image()]).unwrap();
        assert!(msg.content.is_none());
        assert_eq!(db.get_message(msg.id).unwrap().media, vec![image()]);
    }

    #[test]
    fn outsider_cannot_append_or_list() {
        let (_dir, db) = test_db();
        let a = add_user(&db, "A");
        let b = add_user(&db, "B");
        let c = add_user(&db, "C");
        let conv = db.find_or_create_conversation(a, b).unwrap();
        db.append_message(conv.id.into(), a, Some("private"), &[]).unwrap();

        assert!(matches!(
            db.append_message(conv.id.into(), c, Some("hi"), &[]),
            Err(StoreError::Forbidden(_))
        ));
        assert!(matches!(
            db.list_messages(conv.id.into(), c),
            Err(StoreError::Forbidden(_))
        ));
        assert!(matches!(
            db.list_messages(ConversationId::new().into(), a),
            Err(StoreError::NotFound("Conversation"))
        ));
    }

    #[test]
    fn list_is_oldest_first_and_marks_read() {
        let (_dir, db) = test_db();
        let a = add_user(&db, "A");
        let b = add_user(&db, "B");
        let conv = db.find_or_create_conversation(a, b).unwrap();

        let first = db.append_message(conv.id.into(), a, Some("1"), &[]).unwrap();
        let second = db.append_message(conv.id.into(), a, Some("2"), &[]).unwrap();

        let (messages, newly_read) = db.list_messages(conv.id.into(), b).unwrap();
        assert_eq!(
            messages.iter().map(|m| m.id).collect::<Vec<_>>(),
            vec![first.id, second.id]
        );
        assert_eq!(newly_read, vec![first.id, second.id]);
        assert!(messages.iter().all(|m| m.read_by.contains(&a) && m.read_by.contains(&b)));

        // Second open changes nothing.
        let (_, newly_read) = db.list_messages(conv.id.into(), b).unwrap();
        assert!(newly_read.is_empty());
    }

    #[test]
    fn mark_read_is_idempotent_and_selective() {
        let (_dir, db) = test_db();
        let a = add_user(&db, "A");
        let b = add_user(&db, "B");
        let conv = db.find_or_create_conversation(a, b).unwrap();
        let target: MessageTarget = conv.id.into();

        let m1 = db.append_message(target, a, Some("1"), &[]).unwrap();
        let m2 = db.append_message(target, a, Some("2"), &[]).unwrap();

        let changed = db.mark_read(target, &ReadSelection::Ids(vec![m2.id]), b).unwrap();
        assert_eq!(changed, vec![m2.id]);
        let changed = db.mark_read(target, &ReadSelection::Ids(vec![m2.id]), b).unwrap();
        assert!(changed.is_empty());

        assert_eq!(db.get_message(m1.id).unwrap().read_by, vec![a]);
        assert_eq!(db.get_message(m2.id).unwrap().read_by.len(), 2);

        // The sender re-reading their own message is a no-op.
        assert!(db.mark_read(target, &ReadSelection::AllUnread, a).unwrap().is_empty());
    }

    #[test]
    fn delete_requires_sender_or_group_admin() {
        let (_dir, db) = test_db();
        let owner = add_user(&db, "Owner");
        let member = add_user(&db, "Member");
        let other = add_user(&db, "Other");

        let group = db.create_group(owner, "Crew", None).unwrap();
        db.add_group_member(group.id, owner, member).unwrap();
        db.add_group_member(group.id, owner, other).unwrap();

        let msg = db.append_message(group.id.into(), member, Some("oops"), &[]).unwrap();

        assert!(matches!(
            db.delete_message_as(msg.id, other),
            Err(StoreError::Forbidden(_))
        ));
        assert!(db.find_message(msg.id).unwrap().is_some());

        let deleted = db.delete_message_as(msg.id, owner).unwrap();
        assert_eq!(deleted.id, msg.id);
        assert!(db.find_message(msg.id).unwrap().is_none());
        assert!(matches!(
            db.delete_message_as(msg.id, owner),
            Err(StoreError::NotFound("Message"))
        ));
    }

    #[test]
    fn private_delete_is_sender_only_and_repoints_last() {
        let (_dir, db) = test_db();
        let a = add_user(&db, "A");
        let b = add_user(&db, "B");
        let conv = db.find_or_create_conversation(a, b).unwrap();

        let first = db.append_message(conv.id.into(), a, Some("1"), &[]).unwrap();
        let second = db.append_message(conv.id.into(), b, Some("2"), &[]).unwrap();

        assert!(matches!(
            db.delete_message_as(second.id, a),
            Err(StoreError::Forbidden(_))
        ));
        db.delete_message_as(second.id, b).unwrap();
        assert_eq!(
            db.get_conversation(conv.id).unwrap().last_message_id,
            Some(first.id)
        );

        // Read receipts on a deleted message are a silent no-op.
        let changed = db
            .mark_read(conv.id.into(), &ReadSelection::Ids(vec![second.id]), a)
            .unwrap();
        assert!(changed.is_empty());
    }

    #[test]
    fn oversized_bodies_are_rejected() {
        let long = "x".repeat(MAX_CONTENT_CHARS + 1);
        assert!(validate_message_body(Some(&long), &[]).is_err());

        let media = vec![image(); MAX_MEDIA_PER_MESSAGE + 1];
        assert!(validate_message_body(Some("hi"), &media).is_err());

        let exact = "x".repeat(MAX_CONTENT_CHARS);
        assert!(validate_message_body(Some(&exact), &[]).is_ok());
    }
}
