//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the HTTP and WebSocket layers. Field names are camelCase on
//! the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use swarg_shared::{
    CommentId, ConversationId, GroupId, MediaRef, MessageId, MessageTarget, NotificationId,
    NotificationKind, PostId, StoryId, UserId,
};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// Profile projection of a user owned by the external account service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    /// Object-store URL of the avatar image.
    pub avatar: Option<String>,
    /// Set automatically once the follower threshold is reached.
    pub verified: bool,
    /// Site owner badge, granted by the operator.
    pub is_owner: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            avatar: None,
            verified: false,
            is_owner: false,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A private conversation. At most one exists per unordered user pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    /// Sorted pair, smaller id first.
    pub participants: [UserId; 2],
    pub last_message_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn involves(&self, user: UserId) -> bool {
        self.participants.contains(&user)
    }

    /// The participant that is not `user`.
    pub fn other(&self, user: UserId) -> UserId {
        if self.participants[0] == user {
            self.participants[1]
        } else {
            self.participants[0]
        }
    }
}

/// One row of a user's conversation list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub other: User,
    pub last_message: Option<Message>,
    pub unread: u64,
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub avatar: Option<String>,
    pub owner: UserId,
    /// Always contains the owner.
    pub admins: Vec<UserId>,
    /// Superset of `admins`.
    pub members: Vec<UserId>,
    pub last_message_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Group {
    pub fn is_member(&self, user: UserId) -> bool {
        self.members.contains(&user)
    }

    pub fn is_admin(&self, user: UserId) -> bool {
        self.owner == user || self.admins.contains(&user)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub target: MessageTarget,
    pub sender: UserId,
    pub content: Option<String>,
    pub media: Vec<MediaRef>,
    /// Always contains `sender`; only ever grows.
    pub read_by: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}

/// Which messages a read receipt applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadSelection {
    AllUnread,
    Ids(Vec<MessageId>),
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    pub user: UserId,
    pub kind: NotificationKind,
    pub from: Option<UserId>,
    pub post: Option<PostId>,
    pub group: Option<GroupId>,
    pub message: String,
}

impl NewNotification {
    pub fn new(user: UserId, kind: NotificationKind, message: impl Into<String>) -> Self {
        Self {
            user,
            kind,
            from: None,
            post: None,
            group: None,
            message: message.into(),
        }
    }

    pub fn from_user(mut self, from: UserId) -> Self {
        self.from = Some(from);
        self
    }

    pub fn with_post(mut self, post: PostId) -> Self {
        self.post = Some(post);
        self
    }

    pub fn with_group(mut self, group: GroupId) -> Self {
        self.group = Some(group);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub user: UserId,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub from: Option<UserId>,
    pub post: Option<PostId>,
    pub group: Option<GroupId>,
    pub message: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Social
// ---------------------------------------------------------------------------

/// Result of a follow request.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FollowOutcome {
    /// `false` when the follow already existed.
    pub created: bool,
    pub follower_count: u64,
    /// This follow crossed the verification threshold.
    pub became_verified: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,
    pub author: UserId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: PostId,
    pub author: UserId,
    pub content: Option<String>,
    pub media: Vec<MediaRef>,
    pub likes: Vec<UserId>,
    pub comments: Vec<Comment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of a like/unlike toggle on a post or story.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LikeToggle {
    /// State after the toggle.
    pub liked: bool,
    pub likes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: StoryId,
    pub author: UserId,
    pub media: MediaRef,
    pub likes: Vec<UserId>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Invite {
    pub code: String,
    pub group_id: GroupId,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
