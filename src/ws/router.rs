use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::models::{
    ClientEvent, CodeMessage, CursorMessage, CursorMovedMessage, ServerEvent,
    SessionCreatedMessage, SessionStateMessage, User, UserJoinedMessage, UserLeftMessage,
};
use super::connindex::ConnectionIndex;
use super::error::SyncError;
use super::outbox::{Delivery, Outbox};
use super::sessionstore::{MemberRemoval, SessionStore};

/// Applies inbound events to the session store and fans the results out.
///
/// Every mutation of a session happens while its lock is held, together with
/// the connection index update and the outbound pushes it causes. Members of
/// a session therefore see events in the same order the store applied them.
///
/// A connection evicted for a full outbox is only queued during fan-out; it
/// leaves its session once the triggering operation has released the lock.
pub struct EventRouter {
    store: Arc<SessionStore>,
    index: Arc<ConnectionIndex>,
    peers: RwLock<HashMap<String, Outbox>>,
    evicted: Mutex<Vec<String>>,
}

impl EventRouter {
    pub fn new(store: Arc<SessionStore>, index: Arc<ConnectionIndex>) -> Self {
        Self {
            store,
            index,
            peers: RwLock::new(HashMap::new()),
            evicted: Mutex::new(Vec::new()),
        }
    }

    /// Register a freshly opened connection. It starts out unjoined.
    pub async fn connect(&self, connection_id: &str, outbox: Outbox) {
        info!("User connected: {}", connection_id);
        self.peers.write().await.insert(connection_id.to_string(), outbox);
    }

    /// Number of open connections, joined or not.
    pub async fn connection_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Decode one text frame and apply it.
    pub async fn handle_frame(&self, connection_id: &str, frame: &str) {
        match serde_json::from_str::<ClientEvent>(frame) {
            Ok(event) => self.handle_event(connection_id, event).await,
            Err(e) => {
                warn!("Malformed frame from {}: {}", connection_id, e);
                self.reject(connection_id, SyncError::MalformedRequest(e.to_string()))
                    .await;
                self.drain_evictions().await;
            }
        }
    }

    pub async fn handle_event(&self, connection_id: &str, event: ClientEvent) {
        let result = match event {
            ClientEvent::SessionCreate => self.create_session(connection_id).await,
            ClientEvent::SessionJoin(join) => self.join_session(connection_id, &join.session_id).await,
            ClientEvent::CodeChange(change) => self.change_code(connection_id, change).await,
            ClientEvent::CursorPosition(cursor) => self.move_cursor(connection_id, cursor).await,
        };

        if let Err(e) = result {
            self.reject(connection_id, e).await;
        }
        self.drain_evictions().await;
    }

    /// Tear down everything the connection owns. Safe to call for a
    /// connection that never joined, or twice.
    pub async fn disconnect(&self, connection_id: &str) {
        info!("User disconnected: {}", connection_id);
        self.leave(connection_id).await;
        self.drain_evictions().await;
    }

    /// Run the leave path for every connection evicted so far. Must not be
    /// called while a session lock is held.
    async fn drain_evictions(&self) {
        loop {
            let next = self.evicted.lock().await.pop();
            match next {
                Some(connection_id) => self.leave(&connection_id).await,
                None => break,
            }
        }
    }

    async fn leave(&self, connection_id: &str) {
        self.peers.write().await.remove(connection_id);

        let Some(binding) = self.index.lookup(connection_id).await else {
            return;
        };

        let mut guard = match self.store.lock(&binding.session_id).await {
            Ok(guard) => guard,
            Err(_) => {
                self.index.unbind(connection_id).await;
                return;
            }
        };

        let removal = guard.remove_member(&binding.user_id).await;
        self.index.unbind(connection_id).await;

        if let MemberRemoval::Removed { remaining } = removal {
            let left = ServerEvent::UserLeft(UserLeftMessage {
                user_id: binding.user_id.clone(),
            });
            self.broadcast(&remaining, connection_id, left).await;
        }
    }

    async fn create_session(&self, connection_id: &str) -> Result<(), SyncError> {
        self.ensure_unjoined(connection_id).await?;

        let mut guard = self.store.open_session().await;
        let user = User::new(connection_id);
        guard.add_member(user.clone());
        self.index.bind(connection_id, guard.id(), &user.id).await;

        let created = ServerEvent::SessionCreated(SessionCreatedMessage {
            session_id: guard.id().to_string(),
        });
        self.deliver([connection_id], created).await;
        Ok(())
    }

    async fn join_session(&self, connection_id: &str, session_id: &str) -> Result<(), SyncError> {
        self.ensure_unjoined(connection_id).await?;

        let mut guard = self.store.lock(session_id).await?;
        let user = User::new(connection_id);
        guard.add_member(user.clone());
        self.index.bind(connection_id, session_id, &user.id).await;
        info!("User {} joined session {}", connection_id, session_id);

        let session = guard.session();
        let state = ServerEvent::SessionState(SessionStateMessage {
            code: session.code.clone(),
            language: session.language.clone(),
            users: session.users.clone(),
        });
        self.deliver([connection_id], state).await;

        let joined = ServerEvent::UserJoined(UserJoinedMessage { user });
        self.broadcast(&session.users, connection_id, joined).await;
        Ok(())
    }

    async fn change_code(&self, connection_id: &str, change: CodeMessage) -> Result<(), SyncError> {
        let binding = self.index.lookup(connection_id).await.ok_or(SyncError::NotJoined)?;
        let mut guard = self
            .store
            .lock(&binding.session_id)
            .await
            .map_err(|_| SyncError::NotJoined)?;

        guard.update_document(change.code.clone(), change.language.clone());
        self.broadcast(&guard.session().users, connection_id, ServerEvent::CodeChanged(change))
            .await;
        Ok(())
    }

    async fn move_cursor(&self, connection_id: &str, cursor: CursorMessage) -> Result<(), SyncError> {
        let binding = self.index.lookup(connection_id).await.ok_or(SyncError::NotJoined)?;
        let guard = self
            .store
            .lock(&binding.session_id)
            .await
            .map_err(|_| SyncError::NotJoined)?;

        let moved = ServerEvent::CursorMoved(CursorMovedMessage {
            user_id: binding.user_id,
            position: cursor.position,
        });
        self.broadcast(&guard.session().users, connection_id, moved).await;
        Ok(())
    }

    async fn ensure_unjoined(&self, connection_id: &str) -> Result<(), SyncError> {
        match self.index.lookup(connection_id).await {
            Some(_) => Err(SyncError::AlreadyJoined),
            None => Ok(()),
        }
    }

    async fn reject(&self, connection_id: &str, error: SyncError) {
        if !error.is_reported() {
            debug!("Ignoring event from {}: {}", connection_id, error);
            return;
        }
        debug!("Rejecting event from {}: {}", connection_id, error);
        self.deliver([connection_id], ServerEvent::error(error.to_string())).await;
    }

    /// Send to every member except `sender`.
    async fn broadcast(&self, members: &[User], sender: &str, event: ServerEvent) {
        let targets = members.iter().map(|u| u.id.as_str()).filter(|id| *id != sender);
        self.deliver(targets, event).await;
    }

    async fn deliver<'a>(&self, targets: impl IntoIterator<Item = &'a str>, event: ServerEvent) {
        let event = Arc::new(event);
        let mut overflowed = Vec::new();
        {
            let peers = self.peers.read().await;
            for target in targets {
                let Some(outbox) = peers.get(target) else {
                    continue;
                };
                match outbox.push(event.clone()) {
                    Delivery::Queued | Delivery::Closed => {}
                    Delivery::Dropped => debug!("Dropped ephemeral event for {}", target),
                    Delivery::Overflowed => overflowed.push(target.to_string()),
                }
            }
        }

        if overflowed.is_empty() {
            return;
        }

        // The caller may hold a session lock, so the leave itself is deferred
        // to drain_evictions(). Removing the outbox here stops further pushes.
        let mut peers = self.peers.write().await;
        let mut evicted = self.evicted.lock().await;
        for connection_id in overflowed {
            warn!("Outbox full, evicting connection {}", connection_id);
            if let Some(outbox) = peers.remove(&connection_id) {
                outbox.evict();
                evicted.push(connection_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::sessionstore::DocumentDefaults;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::{mpsc, Notify};

    type Inbox = mpsc::Receiver<Arc<ServerEvent>>;

    struct Harness {
        store: Arc<SessionStore>,
        index: Arc<ConnectionIndex>,
        router: EventRouter,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(SessionStore::new(DocumentDefaults::default()));
            let index = Arc::new(ConnectionIndex::new());
            let router = EventRouter::new(store.clone(), index.clone());
            Self { store, index, router }
        }

        async fn connect(&self, id: &str) -> Inbox {
            self.connect_with_capacity(id, 64).await
        }

        async fn connect_with_capacity(&self, id: &str, capacity: usize) -> Inbox {
            self.connect_watched(id, capacity).await.0
        }

        async fn connect_watched(&self, id: &str, capacity: usize) -> (Inbox, Arc<Notify>) {
            let (outbox, rx) = Outbox::channel(capacity);
            let evicted = outbox.eviction_signal();
            self.router.connect(id, outbox).await;
            (rx, evicted)
        }

        async fn create(&self, id: &str, inbox: &mut Inbox) -> String {
            self.router.handle_event(id, ClientEvent::SessionCreate).await;
            match next(inbox) {
                ServerEvent::SessionCreated(m) => m.session_id,
                other => panic!("expected session:created, got {:?}", other),
            }
        }

        async fn join(&self, id: &str, session_id: &str) {
            self.router
                .handle_frame(id, &json!({"type": "session:join", "sessionId": session_id}).to_string())
                .await;
        }

        async fn change(&self, id: &str, code: &str, language: &str) {
            self.router
                .handle_event(
                    id,
                    ClientEvent::CodeChange(CodeMessage {
                        code: code.to_string(),
                        language: language.to_string(),
                    }),
                )
                .await;
        }
    }

    fn next(inbox: &mut Inbox) -> ServerEvent {
        inbox.try_recv().expect("expected an event").as_ref().clone()
    }

    fn assert_silent(inbox: &mut Inbox) {
        if let Ok(event) = inbox.try_recv() {
            panic!("unexpected event {:?}", event);
        }
    }

    #[tokio::test]
    async fn create_binds_creator_as_member() {
        let h = Harness::new();
        let mut a = h.connect("a").await;

        let sid = h.create("a", &mut a).await;

        let session = h.store.get_session(&sid).await.unwrap();
        assert_eq!(session.member_count(), 1);
        assert!(session.is_member("a"));
        assert_eq!(h.index.lookup("a").await.unwrap().session_id, sid);
    }

    #[tokio::test]
    async fn join_sends_snapshot_to_joiner_and_notifies_room() {
        let h = Harness::new();
        let mut a = h.connect("a").await;
        let mut b = h.connect("b").await;
        let sid = h.create("a", &mut a).await;

        h.join("b", &sid).await;

        match next(&mut b) {
            ServerEvent::SessionState(state) => {
                assert_eq!(state.language, "javascript");
                let ids: Vec<_> = state.users.iter().map(|u| u.id.as_str()).collect();
                assert_eq!(ids, vec!["a", "b"]);
            }
            other => panic!("expected session:state, got {:?}", other),
        }
        assert_silent(&mut b);

        match next(&mut a) {
            ServerEvent::UserJoined(m) => assert_eq!(m.user.id, "b"),
            other => panic!("expected user:joined, got {:?}", other),
        }
        assert_silent(&mut a);
    }

    #[tokio::test]
    async fn join_unknown_session_yields_single_error() {
        let h = Harness::new();
        let mut a = h.connect("a").await;
        let mut b = h.connect("b").await;
        let sid = h.create("a", &mut a).await;

        h.join("b", "00000000-0000-0000-0000-000000000000").await;

        assert_eq!(next(&mut b), ServerEvent::error("Session not found"));
        assert_silent(&mut b);
        assert_silent(&mut a);
        assert!(h.index.lookup("b").await.is_none());
        assert_eq!(h.store.get_session(&sid).await.unwrap().member_count(), 1);
        assert_eq!(h.store.session_count().await, 1);

        // Still unjoined: a later valid join works.
        h.join("b", &sid).await;
        assert!(matches!(next(&mut b), ServerEvent::SessionState(_)));
    }

    #[tokio::test]
    async fn code_change_reaches_room_but_not_sender_or_outsiders() {
        let h = Harness::new();
        let mut a = h.connect("a").await;
        let mut b = h.connect("b").await;
        let mut c = h.connect("c").await;
        let mut d = h.connect("d").await;
        let s1 = h.create("a", &mut a).await;
        let _s2 = h.create("d", &mut d).await;
        h.join("b", &s1).await;
        h.join("c", &s1).await;
        while a.try_recv().is_ok() {}
        while b.try_recv().is_ok() {}
        while c.try_recv().is_ok() {}

        h.change("a", "let x = 1;", "javascript").await;

        let expected = ServerEvent::CodeChanged(CodeMessage {
            code: "let x = 1;".into(),
            language: "javascript".into(),
        });
        assert_eq!(next(&mut b), expected);
        assert_eq!(next(&mut c), expected);
        assert_silent(&mut a);
        assert_silent(&mut d);
    }

    #[tokio::test]
    async fn late_joiner_sees_latest_document() {
        let h = Harness::new();
        let mut a = h.connect("a").await;
        let mut b = h.connect("b").await;
        let sid = h.create("a", &mut a).await;

        h.change("a", "x=1", "python").await;
        h.join("b", &sid).await;

        match next(&mut b) {
            ServerEvent::SessionState(state) => {
                assert_eq!(state.code, "x=1");
                assert_eq!(state.language, "python");
                assert_eq!(state.users.len(), 2);
            }
            other => panic!("expected session:state, got {:?}", other),
        }
        assert!(matches!(next(&mut a), ServerEvent::UserJoined(_)));

        h.change("a", "x=2", "python").await;
        assert_eq!(
            next(&mut b),
            ServerEvent::CodeChanged(CodeMessage { code: "x=2".into(), language: "python".into() })
        );
        assert_eq!(h.store.get_session(&sid).await.unwrap().code, "x=2");
    }

    #[tokio::test]
    async fn cursor_is_relayed_with_sender_id_and_not_stored() {
        let h = Harness::new();
        let mut a = h.connect("a").await;
        let mut b = h.connect("b").await;
        let sid = h.create("a", &mut a).await;
        h.join("b", &sid).await;
        while a.try_recv().is_ok() {}
        while b.try_recv().is_ok() {}
        let before = h.store.get_session(&sid).await.unwrap();

        let position = json!({"lineNumber": 5, "column": 10});
        h.router
            .handle_event("a", ClientEvent::CursorPosition(CursorMessage { position: position.clone() }))
            .await;

        assert_eq!(
            next(&mut b),
            ServerEvent::CursorMoved(CursorMovedMessage { user_id: "a".into(), position })
        );
        assert_silent(&mut a);
        let after = h.store.get_session(&sid).await.unwrap();
        assert_eq!(before.code, after.code);
    }

    #[tokio::test]
    async fn session_events_before_join_are_ignored() {
        let h = Harness::new();
        let mut a = h.connect("a").await;

        h.change("a", "x", "go").await;
        h.router
            .handle_event("a", ClientEvent::CursorPosition(CursorMessage { position: json!(1) }))
            .await;

        assert_silent(&mut a);
        assert_eq!(h.store.session_count().await, 0);
        assert_eq!(h.index.len().await, 0);
    }

    #[tokio::test]
    async fn malformed_frame_is_reported_without_mutation() {
        let h = Harness::new();
        let mut a = h.connect("a").await;
        let sid = h.create("a", &mut a).await;

        h.router.handle_frame("a", r#"{"type":"code:change","code":"lost"}"#).await;
        h.router.handle_frame("a", "not json").await;

        for _ in 0..2 {
            match next(&mut a) {
                ServerEvent::Error(e) => assert!(e.message.starts_with("Malformed request")),
                other => panic!("expected error, got {:?}", other),
            }
        }
        let session = h.store.get_session(&sid).await.unwrap();
        assert_ne!(session.code, "lost");
    }

    #[tokio::test]
    async fn second_create_or_join_is_rejected() {
        let h = Harness::new();
        let mut a = h.connect("a").await;
        let mut b = h.connect("b").await;
        let s1 = h.create("a", &mut a).await;
        let s2 = h.create("b", &mut b).await;

        h.router.handle_event("a", ClientEvent::SessionCreate).await;
        h.join("a", &s2).await;

        assert_eq!(next(&mut a), ServerEvent::error("Already joined a session"));
        assert_eq!(next(&mut a), ServerEvent::error("Already joined a session"));
        assert_silent(&mut b);
        assert_eq!(h.store.session_count().await, 2);
        assert_eq!(h.index.lookup("a").await.unwrap().session_id, s1);
        assert_eq!(h.store.get_session(&s2).await.unwrap().member_count(), 1);
    }

    #[tokio::test]
    async fn leaving_notifies_room_and_last_leave_deletes_session() {
        let h = Harness::new();
        let mut a = h.connect("a").await;
        let mut b = h.connect("b").await;
        let sid = h.create("a", &mut a).await;
        h.join("b", &sid).await;
        while b.try_recv().is_ok() {}

        h.router.disconnect("a").await;

        assert_eq!(next(&mut b), ServerEvent::UserLeft(UserLeftMessage { user_id: "a".into() }));
        let session = h.store.get_session(&sid).await.unwrap();
        assert_eq!(session.member_count(), 1);
        assert!(h.index.lookup("a").await.is_none());

        h.router.disconnect("b").await;
        assert!(h.store.get_session(&sid).await.is_err());
        assert_eq!(h.store.session_count().await, 0);
        assert_eq!(h.index.len().await, 0);
        assert_eq!(h.router.connection_count().await, 0);

        // Joining the deleted id fails like any unknown id.
        let mut c = h.connect("c").await;
        h.join("c", &sid).await;
        assert_eq!(next(&mut c), ServerEvent::error("Session not found"));
    }

    #[tokio::test]
    async fn disconnect_of_unjoined_connection_is_noop() {
        let h = Harness::new();
        let mut a = h.connect("a").await;
        let _b = h.connect("b").await;
        let sid = h.create("a", &mut a).await;

        h.router.disconnect("b").await;
        h.router.disconnect("b").await;

        assert_silent(&mut a);
        assert_eq!(h.store.get_session(&sid).await.unwrap().member_count(), 1);
    }

    #[tokio::test]
    async fn slow_member_is_evicted_and_leaves_the_room() {
        let h = Harness::new();
        let mut a = h.connect("a").await;
        let (mut slow, evicted) = h.connect_watched("slow", 1).await;
        let mut c = h.connect("c").await;
        let sid = h.create("a", &mut a).await;
        h.join("c", &sid).await;
        h.join("slow", &sid).await;
        while a.try_recv().is_ok() {}
        while c.try_recv().is_ok() {}

        // "slow" holds session:state and never reads; its queue is full.
        h.router
            .handle_event("a", ClientEvent::CursorPosition(CursorMessage { position: json!(1) }))
            .await;
        assert_eq!(h.router.connection_count().await, 3);

        h.change("a", "x=1", "python").await;

        // The leave ran as part of the change, with no help from the transport.
        assert_eq!(h.router.connection_count().await, 2);
        assert!(matches!(next(&mut c), ServerEvent::CursorMoved(_)));
        assert!(matches!(next(&mut c), ServerEvent::CodeChanged(_)));
        let left = ServerEvent::UserLeft(UserLeftMessage { user_id: "slow".into() });
        assert_eq!(next(&mut c), left);
        assert_eq!(next(&mut a), left);
        assert_silent(&mut a);

        let session = h.store.get_session(&sid).await.unwrap();
        assert_eq!(session.member_count(), 2);
        assert!(!session.is_member("slow"));
        assert!(h.index.lookup("slow").await.is_none());
        assert_eq!(h.index.len().await, 2);

        // The socket task is told to stop even if its writer is stuck.
        tokio::time::timeout(Duration::from_secs(1), evicted.notified())
            .await
            .expect("evicted connection was not signalled");
        assert!(matches!(next(&mut slow), ServerEvent::SessionState(_)));
        assert!(slow.recv().await.is_none());

        // Later traffic from the evicted connection is ignored.
        h.change("slow", "hijack", "python").await;
        assert_eq!(h.store.get_session(&sid).await.unwrap().code, "x=1");
        assert_silent(&mut c);

        // The transport's own teardown afterwards is a no-op.
        h.router.disconnect("slow").await;
        assert_silent(&mut a);
        assert_silent(&mut c);
    }

    #[tokio::test]
    async fn evicting_the_last_other_member_still_deletes_on_final_leave() {
        let h = Harness::new();
        let mut a = h.connect("a").await;
        let _slow = h.connect_with_capacity("slow", 1).await;
        let sid = h.create("a", &mut a).await;
        h.join("slow", &sid).await;

        h.change("a", "x=1", "go").await;
        assert_eq!(h.store.get_session(&sid).await.unwrap().member_count(), 1);

        h.router.disconnect("a").await;
        assert!(h.store.get_session(&sid).await.is_err());
        assert_eq!(h.index.len().await, 0);
    }

    /// Last document a member ends up with: its own final write if that was
    /// the last one the store applied, otherwise the last change it received.
    fn last_received_code(inbox: &mut Inbox) -> Option<CodeMessage> {
        let mut last = None;
        while let Ok(event) = inbox.try_recv() {
            if let ServerEvent::CodeChanged(change) = event.as_ref() {
                last = Some(change.clone());
            }
        }
        last
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_converge_on_store_document() {
        const ROUNDS: usize = 50;
        let h = Arc::new(Harness::new());

        // Two independent rooms, each with three writers and one silent observer.
        let rooms = [["a1", "a2", "a3", "a_obs"], ["b1", "b2", "b3", "b_obs"]];
        let mut inboxes = HashMap::new();
        let mut session_ids = Vec::new();
        for room in &rooms {
            for id in room {
                inboxes.insert(id.to_string(), h.connect_with_capacity(id, 1024).await);
            }
            let creator = inboxes.get_mut(room[0]).unwrap();
            let sid = h.create(room[0], creator).await;
            for id in &room[1..] {
                h.join(id, &sid).await;
            }
            session_ids.push(sid);
        }
        for inbox in inboxes.values_mut() {
            while inbox.try_recv().is_ok() {}
        }

        let mut writers = Vec::new();
        for room in &rooms {
            for id in &room[..3] {
                let h = h.clone();
                let id = id.to_string();
                writers.push(tokio::spawn(async move {
                    for round in 0..ROUNDS {
                        let language = if round % 2 == 0 { "python" } else { "rust" };
                        h.change(&id, &format!("{}-{}", id, round), language).await;
                        tokio::task::yield_now().await;
                    }
                }));
            }
        }
        for writer in writers {
            writer.await.unwrap();
        }

        for (room, sid) in rooms.iter().zip(&session_ids) {
            let session = h.store.get_session(sid).await.unwrap();
            let expected_language = if (ROUNDS - 1) % 2 == 0 { "python" } else { "rust" };
            assert_eq!(session.language, expected_language);

            let observer = last_received_code(inboxes.get_mut(room[3]).unwrap()).unwrap();
            assert_eq!(observer.code, session.code);
            assert_eq!(observer.language, session.language);

            for id in &room[..3] {
                let received = last_received_code(inboxes.get_mut(*id).unwrap());
                if session.code.starts_with(&format!("{}-", id)) {
                    // This member wrote the final value, so its own last write is it.
                    assert_eq!(session.code, format!("{}-{}", id, ROUNDS - 1));
                } else {
                    let received = received.expect("writer received no changes");
                    assert_eq!(received.code, session.code);
                    assert_eq!(received.language, session.language);
                }
            }
        }
    }
}
