/// Reasons an inbound event is not applied.
///
/// None of these leave shared state modified: every check happens before
/// the first store write.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("Session not found")]
    SessionNotFound,
    #[error("Not joined to a session")]
    NotJoined,
    #[error("Already joined a session")]
    AlreadyJoined,
    #[error("Malformed request: {0}")]
    MalformedRequest(String),
}

impl SyncError {
    /// Whether the sender should hear about this rejection.
    pub fn is_reported(&self) -> bool {
        !matches!(self, SyncError::NotJoined)
    }
}
