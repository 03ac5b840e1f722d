//! WebSocket wire format.
//!
//! Every frame is a JSON text frame `{ "event": <kebab-name>, "data": {...} }`
//! with camelCase fields in `data`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use swarg_shared::{ConversationId, GroupId, MediaRef, MessageId, MessageTarget, UserId};
use swarg_store::{Message, Notification, User};

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    PrivateMessage(OutgoingPrivate),
    GroupMessage(OutgoingGroup),
    #[serde(rename_all = "camelCase")]
    JoinGroup { group_id: GroupId },
    #[serde(rename_all = "camelCase")]
    LeaveGroup { group_id: GroupId },
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingPrivate {
    pub to: UserId,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub media: Vec<MediaRef>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingGroup {
    pub group_id: GroupId,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub media: Vec<MediaRef>,
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    PrivateMessage(EnrichedMessage),
    GroupMessage(EnrichedMessage),
    #[serde(rename_all = "camelCase")]
    MessageDeleted { message_id: MessageId },
    #[serde(rename_all = "camelCase")]
    MessageRead { message_id: MessageId, reader: UserId },
    NewNotification { notification: Notification },
    SystemNotification { message: String, from: String },
    Error { message: String },
}

impl ServerEvent {
    /// The event for a freshly persisted message, by target kind.
    pub fn delivered(message: EnrichedMessage) -> Self {
        if message.group_id.is_some() {
            ServerEvent::GroupMessage(message)
        } else {
            ServerEvent::PrivateMessage(message)
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// The one projection of a message pushed to clients, built at the router
/// boundary from the persisted message and the sender's profile.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedMessage {
    pub id: MessageId,
    pub from: UserId,
    pub from_name: String,
    pub from_avatar: Option<String>,
    pub from_verified: bool,
    pub content: Option<String>,
    pub media: Vec<MediaRef>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
}

impl EnrichedMessage {
    pub fn new(message: &Message, sender: &User) -> Self {
        Self {
            id: message.id,
            from: message.sender,
            from_name: sender.name.clone(),
            from_avatar: sender.avatar.clone(),
            from_verified: sender.verified,
            content: message.content.clone(),
            media: message.media.clone(),
            created_at: message.created_at,
            conversation_id: message.target.conversation_id(),
            group_id: match message.target {
                MessageTarget::Group(g) => Some(g),
                MessageTarget::Conversation(_) => None,
            },
        }
    }
}
