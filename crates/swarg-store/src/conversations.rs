//! Conversation directory: the unique 1:1 record per user pair and its
//! last-activity pointer.

use rusqlite::{params, OptionalExtension};
use swarg_shared::{ConversationId, MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Conversation, ConversationSummary};
use crate::sql;

const CONVERSATION_COLUMNS: &str =
    "id, participant_a, participant_b, last_message_id, created_at, updated_at";

/// Participants are stored in lexical order so the pair index is unordered.
fn ordered_pair(a: UserId, b: UserId) -> (String, String) {
    let (a, b) = (a.to_string(), b.to_string());
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

impl Database {
    /// Return the conversation between `a` and `b`, creating it if absent.
    ///
    /// Uniqueness is enforced by the `(participant_a, participant_b)` index:
    /// a losing concurrent insert becomes a no-op and falls through to the
    /// read.
    pub fn find_or_create_conversation(&self, a: UserId, b: UserId) -> Result<Conversation> {
        if a == b {
            return Err(StoreError::Invalid(
                "a conversation needs two distinct users".into(),
            ));
        }

        let (pa, pb) = ordered_pair(a, b);
        let now = sql::now();
        let inserted = self.conn().execute(
            "INSERT INTO conversations (id, participant_a, participant_b, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(participant_a, participant_b) DO NOTHING",
            params![ConversationId::new().to_string(), pa, pb, now],
        )?;

        if inserted > 0 {
            tracing::debug!(a = %a, b = %b, "created conversation");
        }

        self.conn()
            .query_row(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations
                     WHERE participant_a = ?1 AND participant_b = ?2"
                ),
                params![pa, pb],
                row_to_conversation,
            )
            .map_err(StoreError::not_found("Conversation"))
    }

    pub fn find_conversation_between(&self, a: UserId, b: UserId) -> Result<Option<Conversation>> {
        let (pa, pb) = ordered_pair(a, b);
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations
                     WHERE participant_a = ?1 AND participant_b = ?2"
                ),
                params![pa, pb],
                row_to_conversation,
            )
            .optional()?)
    }

    pub fn get_conversation(&self, id: ConversationId) -> Result<Conversation> {
        self.conn()
            .query_row(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
                params![id.to_string()],
                row_to_conversation,
            )
            .map_err(StoreError::not_found("Conversation"))
    }

    /// Every conversation involving `user`, most recent activity first, with
    /// the other participant, the last message and the unread count.
    pub fn list_conversations_for(&self, user: UserId) -> Result<Vec<ConversationSummary>> {
        let conversations = {
            let mut stmt = self.conn().prepare(&format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations
                 WHERE participant_a = ?1 OR participant_b = ?1
                 ORDER BY updated_at DESC,
                     COALESCE(
                         (SELECT seq FROM messages WHERE messages.id = last_message_id), 0
                     ) DESC"
            ))?;
            let rows = stmt.query_map(params![user.to_string()], row_to_conversation)?;
            sql::collect(rows)?
        };

        let mut summaries = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let other = self.get_user(conversation.other(user))?;
            let last_message = match conversation.last_message_id {
                Some(id) => self.find_message(id)?,
                None => None,
            };
            let unread: i64 = self.conn().query_row(
                "SELECT COUNT(*) FROM messages m
                 WHERE m.conversation_id = ?1
                   AND NOT EXISTS (
                       SELECT 1 FROM message_reads r
                       WHERE r.message_id = m.id AND r.user_id = ?2)",
                params![conversation.id.to_string(), user.to_string()],
                |row| row.get(0),
            )?;

            summaries.push(ConversationSummary {
                conversation,
                other,
                last_message,
                unread: unread.max(0) as u64,
            });
        }
        Ok(summaries)
    }

    /// Move the last-message pointer and bump `updated_at`.
    pub(crate) fn set_conversation_last_message(
        &self,
        id: ConversationId,
        message: Option<MessageId>,
        at: &str,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE conversations SET last_message_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![message.map(|m| m.to_string()), at, id.to_string()],
        )?;
        Ok(())
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: ConversationId(sql::uuid_at(row, 0)?),
        participants: [UserId(sql::uuid_at(row, 1)?), UserId(sql::uuid_at(row, 2)?)],
        last_message_id: sql::opt_uuid_at(row, 3)?.map(MessageId),
        created_at: sql::ts_at(row, 4)?,
        updated_at: sql::ts_at(row, 5)?,
    })
}
