//! Posts, post likes and comments.

use rusqlite::params;
use swarg_shared::constants::FEED_PAGE_SIZE;
use swarg_shared::{CommentId, MediaRef, PostId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::messages::validate_message_body;
use crate::models::{Comment, LikeToggle, Post};
use crate::sql;

const POST_COLUMNS: &str = "id, author_id, content, media, created_at, updated_at";

impl Database {
    /// Same body rules as messages: text or media required.
    pub fn create_post(
        &self,
        author: UserId,
        content: Option<&str>,
        media: &[MediaRef],
    ) -> Result<Post> {
        let content = validate_message_body(content, media)?;
        let id = PostId::new();
        let now = sql::now();
        self.conn().execute(
            "INSERT INTO posts (id, author_id, content, media, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                id.to_string(),
                author.to_string(),
                content,
                serde_json::to_string(media)?,
                now
            ],
        )?;
        self.get_post(id)
    }

    pub fn get_post(&self, id: PostId) -> Result<Post> {
        let mut post = self
            .conn()
            .query_row(
                &format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?1"),
                params![id.to_string()],
                row_to_post,
            )
            .map_err(StoreError::not_found("Post"))?;
        self.load_post_details(&mut post)?;
        Ok(post)
    }

    /// Global feed, newest first. `page` starts at 1.
    pub fn feed(&self, page: u32) -> Result<Vec<Post>> {
        let offset = page.saturating_sub(1).saturating_mul(FEED_PAGE_SIZE);
        let mut posts = {
            let mut stmt = self.conn().prepare(&format!(
                "SELECT {POST_COLUMNS} FROM posts ORDER BY seq DESC LIMIT ?1 OFFSET ?2"
            ))?;
            let rows = stmt.query_map(params![FEED_PAGE_SIZE, offset], row_to_post)?;
            sql::collect(rows)?
        };
        for post in &mut posts {
            self.load_post_details(post)?;
        }
        Ok(posts)
    }

    pub fn user_posts(&self, author: UserId) -> Result<Vec<Post>> {
        let mut posts = {
            let mut stmt = self.conn().prepare(&format!(
                "SELECT {POST_COLUMNS} FROM posts WHERE author_id = ?1 ORDER BY seq DESC"
            ))?;
            let rows = stmt.query_map(params![author.to_string()], row_to_post)?;
            sql::collect(rows)?
        };
        for post in &mut posts {
            self.load_post_details(post)?;
        }
        Ok(posts)
    }

    fn load_post_details(&self, post: &mut Post) -> Result<()> {
        let mut stmt = self
            .conn()
            .prepare("SELECT user_id FROM post_likes WHERE post_id = ?1 ORDER BY created_at")?;
        let rows = stmt.query_map(params![post.id.to_string()], |row| {
            sql::uuid_at(row, 0).map(UserId)
        })?;
        post.likes = sql::collect(rows)?;

        let mut stmt = self.conn().prepare(
            "SELECT id, post_id, author_id, text, created_at FROM post_comments
             WHERE post_id = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![post.id.to_string()], row_to_comment)?;
        post.comments = sql::collect(rows)?;
        Ok(())
    }

    /// Like if not liked, unlike otherwise.
    pub fn toggle_post_like(&self, post: PostId, user: UserId) -> Result<LikeToggle> {
        let post = self.get_post(post)?;
        let liked = if post.likes.contains(&user) {
            self.conn().execute(
                "DELETE FROM post_likes WHERE post_id = ?1 AND user_id = ?2",
                params![post.id.to_string(), user.to_string()],
            )?;
            false
        } else {
            self.conn().execute(
                "INSERT OR IGNORE INTO post_likes (post_id, user_id, created_at)
                 VALUES (?1, ?2, ?3)",
                params![post.id.to_string(), user.to_string(), sql::now()],
            )?;
            true
        };

        let likes: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM post_likes WHERE post_id = ?1",
            params![post.id.to_string()],
            |row| row.get(0),
        )?;
        Ok(LikeToggle {
            liked,
            likes: likes.max(0) as u64,
        })
    }

    pub fn add_comment(&self, post: PostId, author: UserId, text: &str) -> Result<Comment> {
        let text = text.trim();
        if text.is_empty() {
            return Err(StoreError::Invalid("comment must not be empty".into()));
        }
        // Existence check; surfaces NotFound("Post").
        self.get_post(post)?;

        let id = CommentId::new();
        let at = sql::now();
        self.conn().execute(
            "INSERT INTO post_comments (id, post_id, author_id, text, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id.to_string(), post.to_string(), author.to_string(), text, at],
        )?;
        Ok(Comment {
            id,
            post_id: post,
            author,
            text: text.to_string(),
            created_at: sql::parse_ts(&at)?,
        })
    }

    /// Allowed for the comment's author and the post's author.
    pub fn delete_comment_as(&self, post: PostId, comment: CommentId, user: UserId) -> Result<()> {
        let post = self.get_post(post)?;
        let found = post
            .comments
            .iter()
            .find(|c| c.id == comment)
            .ok_or(StoreError::NotFound("Comment"))?;
        if found.author != user && post.author != user {
            return Err(StoreError::Forbidden(
                "only the comment or post author can delete this comment".into(),
            ));
        }
        self.conn().execute(
            "DELETE FROM post_comments WHERE id = ?1",
            params![comment.to_string()],
        )?;
        Ok(())
    }

    /// Author only. Returns the removed post.
    pub fn delete_post_as(&self, id: PostId, user: UserId) -> Result<Post> {
        let post = self.get_post(id)?;
        if post.author != user {
            return Err(StoreError::Forbidden("only the author can delete a post".into()));
        }
        self.conn()
            .execute("DELETE FROM posts WHERE id = ?1", params![id.to_string()])?;
        Ok(post)
    }
}

fn row_to_post(row: &rusqlite::Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: PostId(sql::uuid_at(row, 0)?),
        author: UserId(sql::uuid_at(row, 1)?),
        content: row.get(2)?,
        media: sql::json_at(row, 3)?,
        likes: Vec::new(),
        comments: Vec::new(),
        created_at: sql::ts_at(row, 4)?,
        updated_at: sql::ts_at(row, 5)?,
    })
}

fn row_to_comment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: CommentId(sql::uuid_at(row, 0)?),
        post_id: PostId(sql::uuid_at(row, 1)?),
        author: UserId(sql::uuid_at(row, 2)?),
        text: row.get(3)?,
        created_at: sql::ts_at(row, 4)?,
    })
}
