//! # swarg-store
//!
//! Persistence for Swarg Social, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for every domain model:
//! conversations, groups, messages with read receipts, notifications, and
//! the social collaborators (follows, posts, stories, invites) that produce
//! notifications. Callers in async code run these helpers on a blocking
//! thread.

pub mod conversations;
pub mod database;
pub mod follows;
pub mod groups;
pub mod invites;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod notifications;
pub mod posts;
pub mod stories;
pub mod users;

mod error;
mod sql;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
