//! Ephemeral stories: one media item, visible until `expires_at`.

use chrono::Duration;
use rusqlite::params;
use swarg_shared::{MediaRef, StoryId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{LikeToggle, Story};
use crate::sql;

const STORY_COLUMNS: &str = "s.id, s.author_id, s.media, s.created_at, s.expires_at";

impl Database {
    pub fn create_story(&self, author: UserId, media: &MediaRef, ttl: Duration) -> Result<Story> {
        if media.url.trim().is_empty() {
            return Err(StoreError::Invalid("story needs a media url".into()));
        }
        if ttl <= Duration::zero() {
            return Err(StoreError::Invalid("story lifetime must be positive".into()));
        }

        let id = StoryId::new();
        let created = sql::now();
        let created_at = sql::parse_ts(&created)?;
        let expires_at = created_at
            .checked_add_signed(ttl)
            .ok_or_else(|| StoreError::Invalid("story lifetime is too long".into()))?;
        self.conn().execute(
            "INSERT INTO stories (id, author_id, media, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.to_string(),
                author.to_string(),
                serde_json::to_string(media)?,
                created,
                sql::ts(&expires_at),
            ],
        )?;

        Ok(Story {
            id,
            author,
            media: media.clone(),
            likes: Vec::new(),
            created_at,
            expires_at,
        })
    }

    /// Expired stories read as missing.
    pub fn get_story(&self, id: StoryId) -> Result<Story> {
        let mut story = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {STORY_COLUMNS} FROM stories s WHERE s.id = ?1 AND s.expires_at > ?2"
                ),
                params![id.to_string(), sql::now()],
                row_to_story,
            )
            .map_err(StoreError::not_found("Story"))?;
        story.likes = self.story_likes(id)?;
        Ok(story)
    }

    /// Unexpired stories by `viewer` and everyone they follow, newest first.
    pub fn story_feed(&self, viewer: UserId) -> Result<Vec<Story>> {
        let mut stories = {
            let mut stmt = self.conn().prepare(&format!(
                "SELECT {STORY_COLUMNS} FROM stories s
                 WHERE s.expires_at > ?2
                   AND (s.author_id = ?1
                        OR s.author_id IN (SELECT followee_id FROM follows WHERE follower_id = ?1))
                 ORDER BY s.seq DESC"
            ))?;
            let rows = stmt.query_map(params![viewer.to_string(), sql::now()], row_to_story)?;
            sql::collect(rows)?
        };
        for story in &mut stories {
            story.likes = self.story_likes(story.id)?;
        }
        Ok(stories)
    }

    fn story_likes(&self, id: StoryId) -> Result<Vec<UserId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT user_id FROM story_likes WHERE story_id = ?1 ORDER BY created_at")?;
        let rows = stmt.query_map(params![id.to_string()], |row| sql::uuid_at(row, 0).map(UserId))?;
        sql::collect(rows)
    }

    pub fn toggle_story_like(&self, id: StoryId, user: UserId) -> Result<LikeToggle> {
        let story = self.get_story(id)?;
        let liked = if story.likes.contains(&user) {
            self.conn().execute(
                "DELETE FROM story_likes WHERE story_id = ?1 AND user_id = ?2",
                params![id.to_string(), user.to_string()],
            )?;
            false
        } else {
            self.conn().execute(
                "INSERT OR IGNORE INTO story_likes (story_id, user_id, created_at)
                 VALUES (?1, ?2, ?3)",
                params![id.to_string(), user.to_string(), sql::now()],
            )?;
            true
        };
        Ok(LikeToggle {
            liked,
            likes: self.story_likes(id)?.len() as u64,
        })
    }

    pub fn delete_story_as(&self, id: StoryId, user: UserId) -> Result<Story> {
        let story = self.get_story(id)?;
        if story.author != user {
            return Err(StoreError::Forbidden("only the author can delete a story".into()));
        }
        self.conn()
            .execute("DELETE FROM stories WHERE id = ?1", params![id.to_string()])?;
        Ok(story)
    }

    /// Returns the number of stories removed.
    pub fn purge_expired_stories(&self) -> Result<usize> {
        Ok(self
            .conn()
            .execute("DELETE FROM stories WHERE expires_at <= ?1", params![sql::now()])?)
    }
}

fn row_to_story(row: &rusqlite::Row<'_>) -> rusqlite::Result<Story> {
    Ok(Story {
        id: StoryId(sql::uuid_at(row, 0)?),
        author: UserId(sql::uuid_at(row, 1)?),
        media: sql::json_at(row, 2)?,
        likes: Vec::new(),
        created_at: sql::ts_at(row, 3)?,
        expires_at: sql::ts_at(row, 4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::tests::{add_user, test_db};
    use swarg_shared::MediaKind;

    fn clip() -> MediaRef {
        MediaRef {
            url: "https://cdn.example/clip.mp4".into(),
            public_id: None,
            kind: MediaKind::Video,
        }
    }

    #[test]
    fn feed_shows_own_and_followed() {
        let (_dir, db) = test_db();
        let me = add_user(&db, "Me");
        let friend = add_user(&db, "Friend");
        let stranger = add_user(&db, "Stranger");
        db.follow(me, friend).unwrap();

        let mine = db.create_story(me, &clip(), Duration::hours(24)).unwrap();
        let theirs = db.create_story(friend, &clip(), Duration::hours(24)).unwrap();
        db.create_story(stranger, &clip(), Duration::hours(24)).unwrap();

        let feed: Vec<StoryId> = db.story_feed(me).unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(feed, vec![theirs.id, mine.id]);
    }

    #[test]
    fn expired_stories_disappear() {
        let (_dir, db) = test_db();
        let me = add_user(&db, "Me");
        let story = db.create_story(me, &clip(), Duration::milliseconds(1)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));

        assert!(db.story_feed(me).unwrap().is_empty());
        assert!(matches!(db.get_story(story.id), Err(StoreError::NotFound("Story"))));
        assert_eq!(db.purge_expired_stories().unwrap(), 1);
    }

    #[test]
    fn lifetime_past_calendar_range_is_rejected() {
        let (_dir, db) = test_db();
        let me = add_user(&db, "Me");

        assert!(matches!(
            db.create_story(me, &clip(), Duration::days(100_000_000)),
            Err(StoreError::Invalid(_))
        ));
        assert!(matches!(
            db.create_story(me, &clip(), Duration::zero()),
            Err(StoreError::Invalid(_))
        ));
        assert_eq!(db.purge_expired_stories().unwrap(), 0);
    }

    #[test]
    fn like_and_delete() {
        let (_dir, db) = test_db();
        let me = add_user(&db, "Me");
        let fan = add_user(&db, "Fan");
        let story = db.create_story(me, &clip(), Duration::hours(1)).unwrap();

        assert!(db.toggle_story_like(story.id, fan).unwrap().liked);
        assert!(!db.toggle_story_like(story.id, fan).unwrap().liked);

        assert!(matches!(
            db.delete_story_as(story.id, fan),
            Err(StoreError::Forbidden(_))
        ));
        db.delete_story_as(story.id, me).unwrap();
        assert!(db.story_feed(me).unwrap().is_empty());
    }

    #[test]
    fn rejects_bad_input() {
        let (_dir, db) = test_db();
        let me = add_user(&db, "Me");
        assert!(db.create_story(me, &clip(), Duration::zero()).is_err());
        let mut media = clip();
        media.url = " ".into();
        assert!(db.create_story(me, &media, Duration::hours(1)).is_err());
    }
}
