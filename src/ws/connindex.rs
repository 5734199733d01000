use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Where a joined connection belongs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Binding {
    pub session_id: String,
    pub user_id: String,
}

/// Connection id -> (session, user) lookup for joined connections.
///
/// Holds only ids; document content stays in the session store.
#[derive(Default)]
pub struct ConnectionIndex {
    bindings: RwLock<HashMap<String, Binding>>,
}

impl ConnectionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the binding for a connection, returning any binding it replaced.
    pub async fn bind(&self, connection_id: &str, session_id: &str, user_id: &str) -> Option<Binding> {
        debug!("Binding connection {} to session {}", connection_id, session_id);
        self.bindings.write().await.insert(
            connection_id.to_string(),
            Binding {
                session_id: session_id.to_string(),
                user_id: user_id.to_string(),
            },
        )
    }

    pub async fn lookup(&self, connection_id: &str) -> Option<Binding> {
        self.bindings.read().await.get(connection_id).cloned()
    }

    /// Drop the binding for a connection and hand it back to the caller.
    pub async fn unbind(&self, connection_id: &str) -> Option<Binding> {
        self.bindings.write().await.remove(connection_id)
    }

    /// Number of joined connections.
    pub async fn len(&self) -> usize {
        self.bindings.read().await.len()
    }
}
