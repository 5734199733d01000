use std::sync::Arc;

use crate::config::Config;
use crate::ws::{ConnectionIndex, EventRouter, SessionStore};

/// Everything a request handler or socket task needs. Built once at startup
/// and dropped on shutdown; tests build as many isolated instances as they like.
pub struct AppState {
    pub config: Config,
    pub store: Arc<SessionStore>,
    pub index: Arc<ConnectionIndex>,
    pub router: EventRouter,
}

impl AppState {
    pub fn new(config: Config) -> Arc<Self> {
        let store = Arc::new(SessionStore::new(config.document_defaults()));
        let index = Arc::new(ConnectionIndex::new());
        let router = EventRouter::new(store.clone(), index.clone());
        Arc::new(Self {
            config,
            store,
            index,
            router,
        })
    }
}
