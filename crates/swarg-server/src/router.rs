//! Delivery router: validate, persist, then fan out.
//!
//! Emits only ever follow a successful commit. Live events are a latency
//! optimization; `list_messages` and the conversation list are the source of
//! truth a client reconciles against after reconnecting.

use swarg_shared::{GroupId, MediaRef, MessageId, MessageTarget, NotificationKind, Room, UserId};
use swarg_store::messages::validate_message_body;
use swarg_store::{Message, NewNotification};
use tracing::debug;

use crate::error::ServerError;
use crate::notifier::Notifier;
use crate::protocol::{EnrichedMessage, ServerEvent};
use crate::registry::{ConnectionId, SessionRegistry};
use crate::state::{with_db, DbHandle};

#[derive(Clone)]
pub struct DeliveryRouter {
    db: DbHandle,
    registry: SessionRegistry,
    notifier: Notifier,
}

impl DeliveryRouter {
    pub fn new(db: DbHandle, registry: SessionRegistry, notifier: Notifier) -> Self {
        Self {
            db,
            registry,
            notifier,
        }
    }

    /// Send a 1:1 message. The recipient's devices get a `private-message`;
    /// the sender gets no echo.
    pub async fn send_private_message(
        &self,
        sender: UserId,
        recipient: UserId,
        content: Option<String>,
        media: Vec<MediaRef>,
    ) -> Result<EnrichedMessage, ServerError> {
        validate_message_body(content.as_deref(), &media)?;
        if sender == recipient {
            return Err(ServerError::Validation(
                "cannot send a private message to yourself".into(),
            ));
        }

        let (message, sender_profile) = with_db(&self.db, move |db| {
            db.get_user(recipient)?;
            let conversation = db.find_or_create_conversation(sender, recipient)?;
            let message =
                db.append_message(conversation.id.into(), sender, content.as_deref(), &media)?;
            Ok((message, db.get_user(sender)?))
        })
        .await?;

        let enriched = EnrichedMessage::new(&message, &sender_profile);
        self.registry
            .emit(Room::User(recipient), &ServerEvent::delivered(enriched.clone()))
            .await;
        debug!(message = %message.id, from = %sender, to = %recipient, "private message delivered");

        self.notifier
            .notify(
                NewNotification::new(
                    recipient,
                    NotificationKind::Message,
                    format!("{} sent you a message", sender_profile.name),
                )
                .from_user(sender),
            )
            .await;

        Ok(enriched)
    }

    /// Send to a group. Non-members get `Authorization`. Every connection in
    /// the group room receives it except `origin`, the connection the send
    /// came from.
    pub async fn send_group_message(
        &self,
        sender: UserId,
        group: GroupId,
        content: Option<String>,
        media: Vec<MediaRef>,
        origin: Option<ConnectionId>,
    ) -> Result<EnrichedMessage, ServerError> {
        validate_message_body(content.as_deref(), &media)?;

        let (message, sender_profile, group) = with_db(&self.db, move |db| {
            let message = db.append_message(group.into(), sender, content.as_deref(), &media)?;
            Ok((message, db.get_user(sender)?, db.get_group(group)?))
        })
        .await?;

        let enriched = EnrichedMessage::new(&message, &sender_profile);
        let event = ServerEvent::delivered(enriched.clone());
        match origin {
            Some(origin) => {
                self.registry
                    .emit_except(Room::Group(group.id), &event, origin)
                    .await
            }
            None => self.registry.emit(Room::Group(group.id), &event).await,
        }
        debug!(message = %message.id, from = %sender, group = %group.id, "group message delivered");

        let text = format!("{} sent a message in {}", sender_profile.name, group.name);
        let group_id = group.id;
        self.notifier
            .notify_many(group.members, sender, |member| {
                NewNotification::new(member, NotificationKind::GroupMessage, text.clone())
                    .with_group(group_id)
            })
            .await;

        Ok(enriched)
    }

    /// Delete as sender or group admin, then tell the room the message was
    /// delivered to. Private deletions go to both participants so the
    /// sender's other devices drop it too.
    pub async fn delete_message(
        &self,
        message: MessageId,
        requester: UserId,
    ) -> Result<Message, ServerError> {
        let (deleted, rooms) = with_db(&self.db, move |db| {
            let deleted = db.delete_message_as(message, requester)?;
            let rooms = match deleted.target {
                MessageTarget::Group(g) => vec![Room::Group(g)],
                MessageTarget::Conversation(c) => {
                    let conversation = db.get_conversation(c)?;
                    conversation.participants.iter().map(|u| Room::User(*u)).collect()
                }
            };
            Ok((deleted, rooms))
        })
        .await?;

        let event = ServerEvent::MessageDeleted {
            message_id: deleted.id,
        };
        for room in rooms {
            self.registry.emit(room, &event).await;
        }
        Ok(deleted)
    }

    /// Oldest-first history. Opening it marks everything read by `reader`;
    /// each newly read message is announced with `message-read` to the other
    /// participant (conversation) or the group room.
    pub async fn list_messages(
        &self,
        target: MessageTarget,
        reader: UserId,
    ) -> Result<Vec<Message>, ServerError> {
        let (messages, newly_read, notify_room) = with_db(&self.db, move |db| {
            let (messages, newly_read) = db.list_messages(target, reader)?;
            let room = match target {
                MessageTarget::Group(g) => Room::Group(g),
                MessageTarget::Conversation(c) => {
                    Room::User(db.get_conversation(c)?.other(reader))
                }
            };
            Ok((messages, newly_read, room))
        })
        .await?;

        for message_id in newly_read {
            self.registry
                .emit(notify_room, &ServerEvent::MessageRead { message_id, reader })
                .await;
        }
        Ok(messages)
    }

    /// History with `other`, by participant. Empty when the two have never
    /// talked.
    pub async fn list_messages_with(
        &self,
        reader: UserId,
        other: UserId,
    ) -> Result<Vec<Message>, ServerError> {
        let conversation = with_db(&self.db, move |db| {
            db.get_user(other)?;
            db.find_conversation_between(reader, other)
        })
        .await?;

        match conversation {
            Some(c) => self.list_messages(c.id.into(), reader).await,
            None => Ok(Vec::new()),
        }
    }
}
