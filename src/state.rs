//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the three repositories as trait objects, the attachment storage,
//! the in-process broadcast hub, and the parsed config. In production all
//! three repositories are the same `PgStore`; tests swap in `MemoryStore`.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::AppConfig;
use crate::services::attachment::{FileStorage, LocalDiskStorage};
use crate::services::broadcast::BroadcastHub;
use crate::store::postgres::PgStore;
use crate::store::{AccountStore, ChatroomStore, MessageStore};

/// Clone is required by Axum — all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub accounts: Arc<dyn AccountStore>,
    pub chatrooms: Arc<dyn ChatroomStore>,
    pub messages: Arc<dyn MessageStore>,
    pub files: Arc<dyn FileStorage>,
    pub hub: BroadcastHub,
    pub config: Arc<AppConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(pool: PgPool, config: AppConfig) -> Self {
        let store = Arc::new(PgStore::new(pool));
        let files = Arc::new(LocalDiskStorage::new(config.storage_dir.clone(), config.max_attachment_bytes));
        Self {
            accounts: store.clone(),
            chatrooms: store.clone(),
            messages: store,
            files,
            hub: BroadcastHub::new(),
            config: Arc::new(config),
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
