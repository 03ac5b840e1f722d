use std::sync::{Arc, Mutex};

use swarg_shared::SessionVerifier;
use swarg_store::Database;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::notifier::Notifier;
use crate::registry::SessionRegistry;
use crate::router::DeliveryRouter;
use crate::social::SocialService;

/// The single SQLite connection, shared by every handler.
pub type DbHandle = Arc<Mutex<Database>>;

/// Shared application state passed to all handlers via axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub db: DbHandle,
    pub verifier: Arc<SessionVerifier>,
    pub registry: SessionRegistry,
    pub notifier: Notifier,
    pub router: DeliveryRouter,
    pub social: SocialService,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(db: Database, verifier: SessionVerifier, config: ServerConfig) -> Self {
        let db: DbHandle = Arc::new(Mutex::new(db));
        let verifier = Arc::new(verifier);
        let config = Arc::new(config);

        let registry = SessionRegistry::new(verifier.clone(), config.outbox_capacity);
        let notifier = Notifier::new(db.clone(), registry.clone());
        let router = DeliveryRouter::new(db.clone(), registry.clone(), notifier.clone());
        let social = SocialService::new(
            db.clone(),
            registry.clone(),
            notifier.clone(),
            config.clone(),
        );

        Self {
            db,
            verifier,
            registry,
            notifier,
            router,
            social,
            config,
        }
    }
}

/// Run a store call on the blocking pool.
///
/// Store errors keep their meaning (`Invalid` -> validation, `Forbidden` ->
/// authorization, `NotFound`); a panicked task becomes a storage failure.
/// A lock poisoned by such a panic is taken over: SQLite rolls back whatever
/// the panicking call left open, so the connection stays usable.
pub async fn with_db<T, F>(db: &DbHandle, f: F) -> Result<T, ServerError>
where
    F: FnOnce(&Database) -> swarg_store::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let guard = db.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("database lock was poisoned by a panicked call, recovering");
            poisoned.into_inner()
        });
        f(&guard).map_err(ServerError::from)
    })
    .await
    .map_err(|e| ServerError::Storage(format!("database task failed: {e}")))?
}
