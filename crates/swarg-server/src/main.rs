//! # swarg-server
//!
//! Real-time messaging and notification server for Swarg Social.
//!
//! This binary provides:
//! - **WebSocket channel** (`/ws`) for private and group messages, read
//!   receipts and live notifications
//! - **REST API** (axum) for profiles, follows, posts, stories, groups,
//!   message history and the notification inbox
//! - **Background maintenance** that prunes old notifications and expired
//!   stories and invites

mod api;
mod auth;
mod config;
mod error;
mod extract;
mod notifier;
mod protocol;
mod registry;
mod router;
mod social;
mod state;
mod ws;

use std::time::Duration;

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use swarg_shared::SessionVerifier;
use swarg_store::Database;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;
use crate::state::{with_db, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,swarg_server=debug,swarg_store=info")),
        )
        .init();

    info!("Starting Swarg server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        instance = %config.instance_name,
        addr = %config.http_addr,
        admin_enabled = config.admin_token.is_some(),
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Open storage and the token verifier
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };

    let verifier = match SessionVerifier::new(&config.session_pubkey) {
        Ok(v) => v,
        Err(e) => {
            // A throwaway key nobody holds: every token fails verification.
            warn!(error = %e, "SESSION_PUBKEY unusable, all sessions will be rejected");
            SessionVerifier::from_verifying_key(SigningKey::generate(&mut OsRng).verifying_key())
        }
    };

    let http_addr = config.http_addr;
    let app_state = AppState::new(db, verifier, config);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------
    spawn_maintenance(&app_state);

    // -----------------------------------------------------------------------
    // 5. Run the HTTP/WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

fn spawn_maintenance(state: &AppState) {
    match state.config.notification_retention() {
        Ok(retention) => spawn_notification_pruning(state, retention),
        Err(e) => warn!(error = %e, "notification pruning disabled"),
    }
    spawn_expiry_purge(state);
}

/// Notification retention (every 10 minutes)
fn spawn_notification_pruning(state: &AppState, retention: chrono::Duration) {
    let db = state.db.clone();
    let max_per_user = state.config.notification_max_per_user;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(600));
        loop {
            interval.tick().await;
            match with_db(&db, move |db| db.prune_notifications(retention, max_per_user)).await {
                Ok(0) => {}
                Ok(n) => info!(pruned = n, "pruned notifications"),
                Err(e) => warn!(error = %e, "notification pruning failed"),
            }
        }
    });
}

/// Expired stories and invites (every 5 minutes)
fn spawn_expiry_purge(state: &AppState) {
    let db = state.db.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            let purged = with_db(&db, |db| {
                Ok((db.purge_expired_stories()?, db.purge_expired_invites()?))
            })
            .await;
            match purged {
                Ok((0, 0)) => {}
                Ok((stories, invites)) => info!(stories, invites, "purged expired content"),
                Err(e) => warn!(error = %e, "expiry purge failed"),
            }
        }
    });
}
