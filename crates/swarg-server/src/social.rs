//! Social actions that produce notifications or move connections between
//! rooms: follows, posts, stories, group membership and invites.
//!
//! Each method runs the store operation first and only then notifies, so a
//! failed action never produces a notification.

use std::sync::Arc;

use swarg_shared::{
    CommentId, GroupId, MediaRef, NotificationKind, PostId, Room, StoryId, UserId,
};
use swarg_store::{
    Comment, FollowOutcome, Group, Invite, LikeToggle, NewNotification, Post, Story,
};
use tracing::info;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::notifier::Notifier;
use crate::protocol::ServerEvent;
use crate::registry::SessionRegistry;
use crate::state::{with_db, DbHandle};

#[derive(Clone)]
pub struct SocialService {
    db: DbHandle,
    registry: SessionRegistry,
    notifier: Notifier,
    config: Arc<ServerConfig>,
}

impl SocialService {
    pub fn new(
        db: DbHandle,
        registry: SessionRegistry,
        notifier: Notifier,
        config: Arc<ServerConfig>,
    ) -> Self {
        Self {
            db,
            registry,
            notifier,
            config,
        }
    }

    // ------------------------------------------------------------------
    // Follows
    // ------------------------------------------------------------------

    pub async fn follow(
        &self,
        follower: UserId,
        followee: UserId,
    ) -> Result<FollowOutcome, ServerError> {
        let (outcome, name) = with_db(&self.db, move |db| {
            let name = db.get_user(follower)?.name;
            Ok((db.follow(follower, followee)?, name))
        })
        .await?;

        if outcome.created {
            self.notifier
                .notify(
                    NewNotification::new(
                        followee,
                        NotificationKind::Follow,
                        format!("{name} started following you"),
                    )
                    .from_user(follower),
                )
                .await;
        }
        Ok(outcome)
    }

    pub async fn unfollow(&self, follower: UserId, followee: UserId) -> Result<bool, ServerError> {
        with_db(&self.db, move |db| db.unfollow(follower, followee)).await
    }

    // ------------------------------------------------------------------
    // Posts
    // ------------------------------------------------------------------

    pub async fn create_post(
        &self,
        author: UserId,
        content: Option<String>,
        media: Vec<MediaRef>,
    ) -> Result<Post, ServerError> {
        let (post, name, followers) = with_db(&self.db, move |db| {
            let post = db.create_post(author, content.as_deref(), &media)?;
            Ok((post, db.get_user(author)?.name, db.follower_ids(author)?))
        })
        .await?;

        let text = format!("{name} shared a new post");
        let post_id = post.id;
        self.notifier
            .notify_many(followers, author, |follower| {
                NewNotification::new(follower, NotificationKind::Post, text.clone())
                    .with_post(post_id)
            })
            .await;
        Ok(post)
    }

    /// Notifies the owner on the like transition only.
    pub async fn toggle_post_like(
        &self,
        post: PostId,
        user: UserId,
    ) -> Result<LikeToggle, ServerError> {
        let (toggle, owner, name) = with_db(&self.db, move |db| {
            let name = db.get_user(user)?.name;
            let toggle = db.toggle_post_like(post, user)?;
            Ok((toggle, db.get_post(post)?.author, name))
        })
        .await?;

        if toggle.liked && owner != user {
            self.notifier
                .notify(
                    NewNotification::new(
                        owner,
                        NotificationKind::Like,
                        format!("{name} liked your post"),
                    )
                    .from_user(user)
                    .with_post(post),
                )
                .await;
        }
        Ok(toggle)
    }

    pub async fn add_comment(
        &self,
        post: PostId,
        author: UserId,
        text: String,
    ) -> Result<Comment, ServerError> {
        let (comment, owner, name) = with_db(&self.db, move |db| {
            let comment = db.add_comment(post, author, &text)?;
            Ok((comment, db.get_post(post)?.author, db.get_user(author)?.name))
        })
        .await?;

        self.notifier
            .notify(
                NewNotification::new(
                    owner,
                    NotificationKind::Comment,
                    format!("{name} commented on your post"),
                )
                .from_user(author)
                .with_post(post),
            )
            .await;
        Ok(comment)
    }

    pub async fn delete_comment(
        &self,
        post: PostId,
        comment: CommentId,
        user: UserId,
    ) -> Result<(), ServerError> {
        with_db(&self.db, move |db| db.delete_comment_as(post, comment, user)).await
    }

    // ------------------------------------------------------------------
    // Stories
    // ------------------------------------------------------------------

    pub async fn create_story(
        &self,
        author: UserId,
        media: MediaRef,
    ) -> Result<Story, ServerError> {
        let ttl = self.config.story_ttl()?;
        let (story, name, followers) = with_db(&self.db, move |db| {
            let story = db.create_story(author, &media, ttl)?;
            Ok((story, db.get_user(author)?.name, db.follower_ids(author)?))
        })
        .await?;

        let text = format!("{name} added a story");
        self.notifier
            .notify_many(followers, author, |follower| {
                NewNotification::new(follower, NotificationKind::Story, text.clone())
            })
            .await;
        Ok(story)
    }

    /// `story_like` goes out on the like transition only, never on unlike.
    pub async fn toggle_story_like(
        &self,
        story: StoryId,
        user: UserId,
    ) -> Result<LikeToggle, ServerError> {
        let (toggle, owner, name) = with_db(&self.db, move |db| {
            let owner = db.get_story(story)?.author;
            let name = db.get_user(user)?.name;
            Ok((db.toggle_story_like(story, user)?, owner, name))
        })
        .await?;

        if toggle.liked {
            self.notifier
                .notify(
                    NewNotification::new(
                        owner,
                        NotificationKind::StoryLike,
                        format!("{name} liked your story"),
                    )
                    .from_user(user),
                )
                .await;
        }
        Ok(toggle)
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    /// Create a group owned by `owner` with `members` in it. Nothing is
    /// stored if any member is unknown; rooms and `group_add` notifications
    /// follow the commit.
    pub async fn create_group(
        &self,
        owner: UserId,
        name: String,
        avatar: Option<String>,
        members: Vec<UserId>,
    ) -> Result<Group, ServerError> {
        let (group, owner_name) = with_db(&self.db, move |db| {
            let owner_name = db.get_user(owner)?.name;
            let group = db.create_group_with_members(owner, &name, avatar.as_deref(), &members)?;
            Ok((group, owner_name))
        })
        .await?;

        for member in &group.members {
            self.registry.subscribe_user(*member, group.id).await;
        }

        let text = format!("{owner_name} added you to {}", group.name);
        let group_id = group.id;
        self.notifier
            .notify_many(group.members.clone(), owner, |member| {
                NewNotification::new(member, NotificationKind::GroupAdd, text.clone())
                    .with_group(group_id)
            })
            .await;
        info!(group = %group.id, members = group.members.len(), "group created");
        Ok(group)
    }

    /// Members only.
    pub async fn get_group(&self, group: GroupId, viewer: UserId) -> Result<Group, ServerError> {
        let group = with_db(&self.db, move |db| db.get_group(group)).await?;
        if !group.is_member(viewer) {
            return Err(ServerError::Authorization("not a member of this group".into()));
        }
        Ok(group)
    }

    pub async fn add_member(
        &self,
        group: GroupId,
        actor: UserId,
        user: UserId,
    ) -> Result<Group, ServerError> {
        let (added, updated, actor_name) = with_db(&self.db, move |db| {
            let added = db.add_group_member(group, actor, user)?;
            Ok((added, db.get_group(group)?, db.get_user(actor)?.name))
        })
        .await?;

        if added {
            self.registry.subscribe_user(user, group).await;
            self.notifier
                .notify(
                    NewNotification::new(
                        user,
                        NotificationKind::GroupAdd,
                        format!("{actor_name} added you to {}", updated.name),
                    )
                    .from_user(actor)
                    .with_group(group),
                )
                .await;
            info!(group = %group, user = %user, by = %actor, "member added");
        }
        Ok(updated)
    }

    /// Remove a member. The removed user's devices leave the room and get a
    /// `system-notification` naming the group and, if given, the reason.
    pub async fn remove_member(
        &self,
        group: GroupId,
        actor: UserId,
        user: UserId,
        reason: Option<String>,
    ) -> Result<Group, ServerError> {
        let updated = with_db(&self.db, move |db| {
            db.remove_group_member(group, actor, user)?;
            db.get_group(group)
        })
        .await?;

        self.registry.unsubscribe_user(user, group).await;

        let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        let message = match &reason {
            Some(reason) => format!("You were removed from {}. Reason: {reason}", updated.name),
            None => format!("You were removed from {}", updated.name),
        };
        self.registry
            .emit(
                Room::User(user),
                &ServerEvent::SystemNotification {
                    message,
                    from: updated.name.clone(),
                },
            )
            .await;

        info!(group = %group, user = %user, by = %actor, reason = ?reason, "member removed");
        Ok(updated)
    }

    pub async fn set_admin(
        &self,
        group: GroupId,
        actor: UserId,
        user: UserId,
        admin: bool,
    ) -> Result<Group, ServerError> {
        let updated =
            with_db(&self.db, move |db| db.set_group_admin(group, actor, user, admin)).await?;

        let text = if admin {
            format!("You are now an admin of {}", updated.name)
        } else {
            format!("You are no longer an admin of {}", updated.name)
        };
        self.notifier
            .notify(
                NewNotification::new(user, NotificationKind::GroupAdmin, text)
                    .from_user(actor)
                    .with_group(group),
            )
            .await;
        Ok(updated)
    }

    pub async fn leave_group(&self, group: GroupId, user: UserId) -> Result<(), ServerError> {
        with_db(&self.db, move |db| db.leave_group(group, user)).await?;
        self.registry.unsubscribe_user(user, group).await;
        Ok(())
    }

    /// Owner only. Remaining members get a `system-notification`.
    pub async fn delete_group(&self, group: GroupId, actor: UserId) -> Result<(), ServerError> {
        let deleted = with_db(&self.db, move |db| db.delete_group(group, actor)).await?;

        let event = ServerEvent::SystemNotification {
            message: format!("{} was deleted by its owner", deleted.name),
            from: deleted.name.clone(),
        };
        for member in deleted.members {
            self.registry.unsubscribe_user(member, group).await;
            if member != actor {
                self.registry.emit(Room::User(member), &event).await;
            }
        }
        info!(group = %group, "group deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Invites
    // ------------------------------------------------------------------

    pub async fn create_invite(
        &self,
        group: GroupId,
        actor: UserId,
    ) -> Result<Invite, ServerError> {
        let ttl = self.config.invite_ttl()?;
        with_db(&self.db, move |db| db.create_invite(group, actor, ttl)).await
    }

    pub async fn redeem_invite(&self, code: String, user: UserId) -> Result<Group, ServerError> {
        let (group, joined) =
            with_db(&self.db, move |db| db.redeem_invite(&code, user)).await?;
        if joined {
            self.registry.subscribe_user(user, group.id).await;
            info!(group = %group.id, user = %user, "joined via invite");
        }
        Ok(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::next_event;
    use crate::state::tests::TestApp;
    use swarg_shared::constants::VERIFIED_FOLLOWER_THRESHOLD;

    fn kinds(app: &TestApp, user: UserId) -> Vec<NotificationKind> {
        app.db()
            .list_notifications(user, 100)
            .unwrap()
            .into_iter()
            .map(|n| n.kind)
            .collect()
    }

    #[tokio::test]
    async fn post_like_notifies_owner_once_and_never_self() {
        let app = TestApp::new();
        let owner = app.user("Owner");
        let fan = app.user("Fan");
        let social = &app.state.social;

        let post = social.create_post(owner, Some("hello".into()), vec![]).await.unwrap();

        assert!(social.toggle_post_like(post.id, owner).await.unwrap().liked);
        assert!(kinds(&app, owner).is_empty());

        assert!(social.toggle_post_like(post.id, fan).await.unwrap().liked);
        assert!(!social.toggle_post_like(post.id, fan).await.unwrap().liked);
        assert_eq!(kinds(&app, owner), vec![NotificationKind::Like]);
    }

    #[tokio::test]
    async fn story_unlike_never_notifies() {
        let app = TestApp::new();
        let owner = app.user("Owner");
        let fan = app.user("Fan");
        let social = &app.state.social;

        let story = social
            .create_story(
                owner,
                MediaRef {
                    url: "https://cdn.example/s.jpg".into(),
                    public_id: None,
                    kind: swarg_shared::MediaKind::Image,
                },
            )
            .await
            .unwrap();

        assert!(social.toggle_story_like(story.id, fan).await.unwrap().liked);
        assert_eq!(kinds(&app, owner), vec![NotificationKind::StoryLike]);

        assert!(!social.toggle_story_like(story.id, fan).await.unwrap().liked);
        assert_eq!(kinds(&app, owner), vec![NotificationKind::StoryLike]);

        social.toggle_story_like(story.id, owner).await.unwrap();
        assert_eq!(kinds(&app, owner).len(), 1);
    }

    #[tokio::test]
    async fn comments_and_posts_notify() {
        let app = TestApp::new();
        let author = app.user("Author");
        let follower = app.user("Follower");
        let social = &app.state.social;
        social.follow(follower, author).await.unwrap();

        let post = social.create_post(author, Some("news".into()), vec![]).await.unwrap();
        assert_eq!(kinds(&app, follower), vec![NotificationKind::Post]);

        social.add_comment(post.id, author, "my own".into()).await.unwrap();
        social.add_comment(post.id, follower, "nice".into()).await.unwrap();
        assert_eq!(
            kinds(&app, author),
            vec![NotificationKind::Comment, NotificationKind::Follow]
        );
    }

    #[tokio::test]
    async fn follow_verifies_at_threshold() {
        let app = TestApp::new();
        let star = app.user("Star");
        let social = &app.state.social;

        for i in 1..VERIFIED_FOLLOWER_THRESHOLD {
            let fan = app.user(&format!("fan{i}"));
            assert!(!social.follow(fan, star).await.unwrap().became_verified);
        }
        assert!(!app.db().get_user(star).unwrap().verified);

        let last = app.user("fan100");
        let outcome = social.follow(last, star).await.unwrap();
        assert!(outcome.became_verified);
        assert!(app.db().get_user(star).unwrap().verified);

        // A repeated follow does not notify twice.
        social.follow(last, star).await.unwrap();
        assert_eq!(kinds(&app, star).len(), VERIFIED_FOLLOWER_THRESHOLD as usize);
    }

    #[tokio::test]
    async fn remove_with_reason_scenario() {
        let app = TestApp::new();
        let a = app.user("A");
        let b = app.user("B");
        let c = app.user("C");
        let social = &app.state.social;

        let (tx, mut rx_c) = app.state.registry.outbox();
        let session = app.state.registry.bind(&app.token(c, "C"), tx).await.unwrap();

        let group = social
            .create_group(a, "Crew".into(), None, vec![b, c])
            .await
            .unwrap();
        assert_eq!(group.members.len(), 3);
        assert!(app
            .state
            .registry
            .rooms_of(session.connection)
            .await
            .contains(&Room::Group(group.id)));
        while next_event(&mut rx_c).is_some() {}

        let updated = social
            .remove_member(group.id, a, c, Some("spam".into()))
            .await
            .unwrap();
        assert!(!updated.is_member(c));
        assert!(!updated.admins.contains(&c));
        assert_eq!(updated.owner, a);
        assert!(updated.is_admin(a) && updated.is_member(a));

        let event = next_event(&mut rx_c).unwrap();
        assert_eq!(event["event"], "system-notification");
        assert!(event["data"]["message"].as_str().unwrap().contains("spam"));
        assert!(!app
            .state
            .registry
            .rooms_of(session.connection)
            .await
            .contains(&Room::Group(group.id)));
    }

    #[tokio::test]
    async fn group_roles_notify_affected_user() {
        let app = TestApp::new();
        let owner = app.user("Owner");
        let member = app.user("Member");
        let social = &app.state.social;

        let group = social.create_group(owner, "Crew".into(), None, vec![member]).await.unwrap();
        social.set_admin(group.id, owner, member, true).await.unwrap();
        social.set_admin(group.id, owner, member, false).await.unwrap();

        assert_eq!(
            kinds(&app, member),
            vec![
                NotificationKind::GroupAdmin,
                NotificationKind::GroupAdmin,
                NotificationKind::GroupAdd
            ]
        );

        let err = social.set_admin(group.id, member, owner, false).await.unwrap_err();
        assert!(matches!(err, ServerError::Authorization(_)));
    }

    #[tokio::test]
    async fn invites_join_and_subscribe() {
        let app = TestApp::new();
        let owner = app.user("Owner");
        let guest = app.user("Guest");
        let social = &app.state.social;

        let (tx, _rx) = app.state.registry.outbox();
        let session = app.state.registry.bind(&app.token(guest, "Guest"), tx).await.unwrap();

        let group = social.create_group(owner, "Crew".into(), None, vec![]).await.unwrap();
        let invite = social.create_invite(group.id, owner).await.unwrap();
        let joined = social.redeem_invite(invite.code.clone(), guest).await.unwrap();
        assert!(joined.is_member(guest));
        assert!(app
            .state
            .registry
            .rooms_of(session.connection)
            .await
            .contains(&Room::Group(group.id)));

        let err = social.redeem_invite("deadbeef".into(), guest).await.unwrap_err();
        assert!(matches!(err, ServerError::NotFound("Invite")));
    }

    #[tokio::test]
    async fn delete_group_tells_members() {
        let app = TestApp::new();
        let owner = app.user("Owner");
        let member = app.user("Member");
        let social = &app.state.social;

        let (tx, mut rx) = app.state.registry.outbox();
        app.state.registry.bind(&app.token(member, "Member"), tx).await.unwrap();

        let group = social.create_group(owner, "Crew".into(), None, vec![member]).await.unwrap();
        while next_event(&mut rx).is_some() {}

        assert!(matches!(
            social.delete_group(group.id, member).await.unwrap_err(),
            ServerError::Authorization(_)
        ));
        social.delete_group(group.id, owner).await.unwrap();

        let event = next_event(&mut rx).unwrap();
        assert_eq!(event["event"], "system-notification");
        assert_eq!(app.state.registry.room_size(Room::Group(group.id)).await, 0);
    }

    fn image() -> MediaRef {
        MediaRef {
            url: "https://cdn.example/s.jpg".into(),
            public_id: None,
            kind: swarg_shared::MediaKind::Image,
        }
    }

    #[tokio::test]
    async fn oversized_story_lifetime_fails_cleanly() {
        for hours in [10_000_000_000, 2_500_000_000] {
            let app = TestApp::with_config(ServerConfig {
                story_ttl_hours: hours,
                ..ServerConfig::default()
            });
            let author = app.user("Author");
            let social = &app.state.social;

            let err = social.create_story(author, image()).await.unwrap_err();
            assert!(matches!(
                err,
                ServerError::Internal(_) | ServerError::Validation(_)
            ));

            // The shared connection is still usable afterwards.
            let user = with_db(&app.state.db, move |db| db.get_user(author)).await.unwrap();
            assert_eq!(user.name, "Author");
            assert!(social.create_post(author, Some("still here".into()), vec![]).await.is_ok());
        }
    }

    #[tokio::test]
    async fn unknown_member_leaves_no_group_behind() {
        let app = TestApp::new();
        let owner = app.user("Owner");
        let member = app.user("Member");
        let social = &app.state.social;

        let (tx, mut rx) = app.state.registry.outbox();
        let session = app.state.registry.bind(&app.token(member, "Member"), tx).await.unwrap();

        let err = social
            .create_group(owner, "Crew".into(), None, vec![member, UserId::new()])
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::NotFound("User")));
        assert!(app.db().list_groups_for(owner).unwrap().is_empty());
        assert!(app.db().list_groups_for(member).unwrap().is_empty());
        assert!(kinds(&app, member).is_empty());
        assert!(next_event(&mut rx).is_none());
        assert_eq!(app.state.registry.rooms_of(session.connection).await.len(), 1);
    }

    #[tokio::test]
    async fn create_group_notifies_each_member_once() {
        let app = TestApp::new();
        let owner = app.user("Owner");
        let member = app.user("Member");
        let social = &app.state.social;

        let group = social
            .create_group(owner, "Crew".into(), None, vec![member, member, owner])
            .await
            .unwrap();
        assert_eq!(group.members.len(), 2);
        assert_eq!(kinds(&app, member), vec![NotificationKind::GroupAdd]);
        assert!(kinds(&app, owner).is_empty());
    }

    #[tokio::test]
    async fn unknown_actor_changes_nothing() {
        let app = TestApp::new();
        let author = app.user("Author");
        let ghost = UserId::new();
        let social = &app.state.social;
        let post = social.create_post(author, Some("hello".into()), vec![]).await.unwrap();
        let story = social.create_story(author, image()).await.unwrap();

        assert!(matches!(
            social.follow(ghost, author).await.unwrap_err(),
            ServerError::NotFound("User")
        ));
        assert!(!app.db().is_following(ghost, author).unwrap());

        assert!(matches!(
            social.toggle_post_like(post.id, ghost).await.unwrap_err(),
            ServerError::NotFound("User")
        ));
        assert!(app.db().get_post(post.id).unwrap().likes.is_empty());

        assert!(matches!(
            social.toggle_story_like(story.id, ghost).await.unwrap_err(),
            ServerError::NotFound("User")
        ));
        assert!(app.db().get_story(story.id).unwrap().likes.is_empty());
        assert!(kinds(&app, author).is_empty());
    }

    #[tokio::test]
    async fn follow_survives_a_broken_inbox() {
        let app = TestApp::new();
        let fan = app.user("Fan");
        let star = app.user("Star");
        app.db().conn().execute("DROP TABLE notifications", []).unwrap();

        let outcome = app.state.social.follow(fan, star).await.unwrap();
        assert!(outcome.created);
        assert!(app.db().is_following(fan, star).unwrap());
    }

    #[tokio::test]
    async fn leave_group_moves_only_the_leaver() {
        let app = TestApp::new();
        let owner = app.user("Owner");
        let member = app.user("Member");
        let outsider = app.user("Outsider");
        let social = &app.state.social;

        let (tx, _rx) = app.state.registry.outbox();
        let session = app.state.registry.bind(&app.token(member, "Member"), tx).await.unwrap();
        let (tx, _rx_owner) = app.state.registry.outbox();
        app.state.registry.bind(&app.token(owner, "Owner"), tx).await.unwrap();

        let group = social.create_group(owner, "Crew".into(), None, vec![member]).await.unwrap();
        assert_eq!(app.state.registry.room_size(Room::Group(group.id)).await, 2);

        social.leave_group(group.id, member).await.unwrap();
        assert!(!app.db().is_group_member(group.id, member).unwrap());
        assert!(!app
            .state
            .registry
            .rooms_of(session.connection)
            .await
            .contains(&Room::Group(group.id)));
        assert_eq!(app.state.registry.room_size(Room::Group(group.id)).await, 1);

        assert!(matches!(
            social.leave_group(group.id, owner).await.unwrap_err(),
            ServerError::Authorization(_)
        ));
        assert!(matches!(
            social.leave_group(group.id, outsider).await.unwrap_err(),
            ServerError::NotFound(_)
        ));
        assert!(matches!(
            social.leave_group(GroupId::new(), member).await.unwrap_err(),
            ServerError::NotFound("Group")
        ));
    }
}
