//! Notification fan-out: persist, then push to the target's personal room.
//!
//! Best-effort. Nothing here returns an error; a failed insert is logged and
//! the primary action carries on.

use swarg_shared::{Room, UserId};
use swarg_store::{NewNotification, Notification};
use tracing::{debug, warn};

use crate::protocol::ServerEvent;
use crate::registry::SessionRegistry;
use crate::state::{with_db, DbHandle};

#[derive(Clone)]
pub struct Notifier {
    db: DbHandle,
    registry: SessionRegistry,
}

impl Notifier {
    pub fn new(db: DbHandle, registry: SessionRegistry) -> Self {
        Self { db, registry }
    }

    /// Notify one user. Acting on your own content notifies nobody.
    pub async fn notify(&self, new: NewNotification) -> Option<Notification> {
        if new.from == Some(new.user) {
            debug!(user = %new.user, kind = %new.kind, "suppressed self-notification");
            return None;
        }

        let kind = new.kind;
        let stored = match with_db(&self.db, move |db| db.insert_notification(&new)).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, %kind, "dropping notification");
                return None;
            }
        };

        self.push(&stored).await;
        Some(stored)
    }

    /// One notification per target, skipping `source`. Returns how many were
    /// delivered.
    pub async fn notify_many<F>(
        &self,
        targets: impl IntoIterator<Item = UserId>,
        source: UserId,
        build: F,
    ) -> usize
    where
        F: Fn(UserId) -> NewNotification,
    {
        let batch: Vec<NewNotification> = targets
            .into_iter()
            .filter(|target| *target != source)
            .map(|target| build(target).from_user(source))
            .collect();
        if batch.is_empty() {
            return 0;
        }

        let stored = match with_db(&self.db, move |db| db.insert_notifications(&batch)).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, source = %source, "dropping notification batch");
                return 0;
            }
        };

        for notification in &stored {
            self.push(notification).await;
        }
        stored.len()
    }

    async fn push(&self, notification: &Notification) {
        self.registry
            .emit(
                Room::User(notification.user),
                &ServerEvent::NewNotification {
                    notification: notification.clone(),
                },
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::next_event;
    use crate::state::tests::TestApp;
    use swarg_shared::NotificationKind;

    #[tokio::test]
    async fn notify_persists_and_pushes() {
        let app = TestApp::new();
        let target = app.user("Target");
        let actor = app.user("Actor");

        let (tx, mut rx) = app.state.registry.outbox();
        app.state
            .registry
            .bind(&app.token(target, "Target"), tx)
            .await
            .unwrap();

        let n = app
            .state
            .notifier
            .notify(
                NewNotification::new(target, NotificationKind::Follow, "Actor followed you")
                    .from_user(actor),
            )
            .await
            .unwrap();

        let event = next_event(&mut rx).unwrap();
        assert_eq!(event["event"], "new-notification");
        assert_eq!(event["data"]["notification"]["type"], "follow");
        assert_eq!(app.db().list_notifications(target, 10).unwrap(), vec![n]);
    }

    #[tokio::test]
    async fn self_notifications_are_suppressed() {
        let app = TestApp::new();
        let me = app.user("Me");

        let none = app
            .state
            .notifier
            .notify(NewNotification::new(me, NotificationKind::Like, "liked").from_user(me))
            .await;
        assert!(none.is_none());

        let count = app
            .state
            .notifier
            .notify_many([me], me, |u| NewNotification::new(u, NotificationKind::Post, "posted"))
            .await;
        assert_eq!(count, 0);
        assert!(app.db().list_notifications(me, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn storage_failure_is_swallowed() {
        let app = TestApp::new();
        let actor = app.user("Actor");
        // Unknown target violates the foreign key; the call still returns.
        let ghost = UserId::new();
        let result = app
            .state
            .notifier
            .notify(NewNotification::new(ghost, NotificationKind::Follow, "x").from_user(actor))
            .await;
        assert!(result.is_none());
    }
}
