use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }
    };
}

id_type!(
    /// Opaque user identity issued by the external account service.
    UserId
);
id_type!(ConversationId);
id_type!(GroupId);
id_type!(MessageId);
id_type!(NotificationId);
id_type!(PostId);
id_type!(CommentId);
id_type!(StoryId);

/// A real-time delivery scope. Every connection of a user joins
/// `user:{id}`; connections of group members join `group:{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    User(UserId),
    Group(GroupId),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::User(id) => write!(f, "user:{id}"),
            Room::Group(id) => write!(f, "group:{id}"),
        }
    }
}

/// Where a message lives: exactly one of a private conversation or a group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum MessageTarget {
    Conversation(ConversationId),
    Group(GroupId),
}

impl MessageTarget {
    pub fn group_id(&self) -> Option<GroupId> {
        match self {
            MessageTarget::Group(id) => Some(*id),
            MessageTarget::Conversation(_) => None,
        }
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        match self {
            MessageTarget::Conversation(id) => Some(*id),
            MessageTarget::Group(_) => None,
        }
    }
}

impl From<ConversationId> for MessageTarget {
    fn from(id: ConversationId) -> Self {
        MessageTarget::Conversation(id)
    }
}

impl From<GroupId> for MessageTarget {
    fn from(id: GroupId) -> Self {
        MessageTarget::Group(id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
}

/// Reference to a file held by the external object store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_id: Option<String>,
    pub kind: MediaKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Follow,
    Like,
    Comment,
    Message,
    GroupMessage,
    GroupAdd,
    GroupAdmin,
    Post,
    Story,
    StoryLike,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 10] = [
        NotificationKind::Follow,
        NotificationKind::Like,
        NotificationKind::Comment,
        NotificationKind::Message,
        NotificationKind::GroupMessage,
        NotificationKind::GroupAdd,
        NotificationKind::GroupAdmin,
        NotificationKind::Post,
        NotificationKind::Story,
        NotificationKind::StoryLike,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Follow => "follow",
            NotificationKind::Like => "like",
            NotificationKind::Comment => "comment",
            NotificationKind::Message => "message",
            NotificationKind::GroupMessage => "group_message",
            NotificationKind::GroupAdd => "group_add",
            NotificationKind::GroupAdmin => "group_admin",
            NotificationKind::Post => "post",
            NotificationKind::Story => "story",
            NotificationKind::StoryLike => "story_like",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown notification kind: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_names() {
        let user = UserId::new();
        let group = GroupId::new();
        assert_eq!(Room::User(user).to_string(), format!("user:{user}"));
        assert_eq!(Room::Group(group).to_string(), format!("group:{group}"));
    }

    #[test]
    fn test_notification_kind_parse() {
        for kind in NotificationKind::ALL {
            assert_eq!(kind.as_str().parse::<NotificationKind>().unwrap(), kind);
        }
        assert!("poke".parse::<NotificationKind>().is_err());
    }

    #[test]
    fn test_message_target_json() {
        let id = GroupId::new();
        let json = serde_json::to_value(MessageTarget::Group(id)).unwrap();
        assert_eq!(json["kind"], "group");
        assert_eq!(json["id"], id.to_string());
    }

    #[test]
    fn test_id_from_str_trims() {
        let id = UserId::new();
        let parsed: UserId = format!(" {id} ").parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<UserId>().is_err());
    }
}
