use std::collections::HashMap;
use std::sync::Arc;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{Session, User};
use super::error::SyncError;

type SessionMap = HashMap<String, Arc<Mutex<SessionSlot>>>;

#[derive(Debug)]
struct SessionSlot {
    session: Session,
    // Set under the session lock right before the slot leaves the map, so a
    // caller that looked the slot up earlier can never revive it.
    retired: bool,
}

/// Initial content of every new session.
#[derive(Debug, Clone)]
pub struct DocumentDefaults {
    pub code: String,
    pub language: String,
}

impl Default for DocumentDefaults {
    fn default() -> Self {
        Self {
            code: "// Welcome to the coding interview\n// Start coding here...".to_string(),
            language: "javascript".to_string(),
        }
    }
}

/// Outcome of removing a user from a session.
#[derive(Debug, Clone, PartialEq)]
pub enum MemberRemoval {
    /// The user was not a member; nothing changed.
    NotMember,
    /// The user left; these members remain.
    Removed { remaining: Vec<User> },
    /// The user was the last member and the session is gone.
    SessionClosed,
}

/// In-memory registry of all live sessions.
///
/// Each session sits behind its own lock, so work on one session never
/// waits on another. The map lock is only held to find, insert or drop
/// an entry.
pub struct SessionStore {
    sessions: Arc<RwLock<SessionMap>>,
    defaults: DocumentDefaults,
}

impl SessionStore {
    pub fn new(defaults: DocumentDefaults) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            defaults,
        }
    }

    /// Create a session with a fresh id and return it already locked.
    pub async fn open_session(&self) -> SessionGuard {
        let mut sessions = self.sessions.write().await;

        let id = loop {
            let candidate = Uuid::new_v4().to_string();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let slot = Arc::new(Mutex::new(SessionSlot {
            session: Session {
                id: id.clone(),
                code: self.defaults.code.clone(),
                language: self.defaults.language.clone(),
                users: Vec::new(),
                created_at: Utc::now(),
            },
            retired: false,
        }));

        // Nobody else can reach the slot yet, so this resolves immediately.
        let guard = slot.clone().lock_owned().await;
        sessions.insert(id.clone(), slot);
        info!("Session created: {}", id);

        SessionGuard {
            slot: guard,
            sessions: self.sessions.clone(),
        }
    }

    /// Create an empty session and return its id.
    ///
    /// Nothing removes a session that never gains a member, so this is only
    /// for callers that add one straight away. A session stays non-empty only
    /// when the creator is added under the same lock, as `open_session`
    /// followed by `SessionGuard::add_member` does.
    pub async fn create_session(&self) -> String {
        self.open_session().await.id().to_string()
    }

    /// Take exclusive access to a session.
    pub async fn lock(&self, session_id: &str) -> Result<SessionGuard, SyncError> {
        let slot = self
            .sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or(SyncError::SessionNotFound)?;

        let guard = slot.lock_owned().await;
        if guard.retired {
            return Err(SyncError::SessionNotFound);
        }

        Ok(SessionGuard {
            slot: guard,
            sessions: self.sessions.clone(),
        })
    }

    /// Snapshot of a session.
    pub async fn get_session(&self, session_id: &str) -> Result<Session, SyncError> {
        Ok(self.lock(session_id).await?.snapshot())
    }

    pub async fn add_member(&self, session_id: &str, user: User) -> Result<Session, SyncError> {
        let mut guard = self.lock(session_id).await?;
        guard.add_member(user);
        Ok(guard.snapshot())
    }

    pub async fn remove_member(&self, session_id: &str, user_id: &str) -> MemberRemoval {
        match self.lock(session_id).await {
            Ok(mut guard) => guard.remove_member(user_id).await,
            Err(_) => MemberRemoval::NotMember,
        }
    }

    pub async fn update_document(
        &self,
        session_id: &str,
        code: String,
        language: String,
    ) -> Result<(), SyncError> {
        self.lock(session_id).await?.update_document(code, language);
        Ok(())
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// Exclusive handle on one session. Mutations through the same guard are
/// applied in order and nothing else touches the session until it drops.
pub struct SessionGuard {
    slot: OwnedMutexGuard<SessionSlot>,
    sessions: Arc<RwLock<SessionMap>>,
}

impl SessionGuard {
    pub fn id(&self) -> &str {
        &self.slot.session.id
    }

    pub fn session(&self) -> &Session {
        &self.slot.session
    }

    pub fn snapshot(&self) -> Session {
        self.slot.session.clone()
    }

    /// Add a user; a user already present is replaced rather than duplicated.
    pub fn add_member(&mut self, user: User) {
        debug!("Adding user {} to session {}", user.id, self.slot.session.id);
        let users = &mut self.slot.session.users;
        users.retain(|u| u.id != user.id);
        users.push(user);
    }

    /// Overwrite code and language. Last write wins.
    pub fn update_document(&mut self, code: String, language: String) {
        let session = &mut self.slot.session;
        session.code = code;
        session.language = language;
    }

    /// Remove a user, deleting the session when it becomes empty.
    pub async fn remove_member(&mut self, user_id: &str) -> MemberRemoval {
        let before = self.slot.session.users.len();
        self.slot.session.users.retain(|u| u.id != user_id);
        if self.slot.session.users.len() == before {
            return MemberRemoval::NotMember;
        }

        if !self.slot.session.users.is_empty() {
            return MemberRemoval::Removed {
                remaining: self.slot.session.users.clone(),
            };
        }

        self.slot.retired = true;
        self.sessions.write().await.remove(&self.slot.session.id);
        info!("Empty session removed: {}", self.slot.session.id);
        MemberRemoval::SessionClosed
    }
}
