use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::models::User;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinMessage {
    pub session_id: String,
}

/// Document payload, used both for `code:change` and `code:changed`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CodeMessage {
    pub code: String,
    pub language: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CursorMessage {
    pub position: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreatedMessage {
    pub session_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStateMessage {
    pub code: String,
    pub language: String,
    pub users: Vec<User>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserJoinedMessage {
    pub user: User,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CursorMovedMessage {
    pub user_id: String,
    pub position: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserLeftMessage {
    pub user_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorMessage {
    pub message: String,
}

/// Events a client sends over its websocket.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session:create")]
    SessionCreate,
    #[serde(rename = "session:join")]
    SessionJoin(JoinMessage),
    #[serde(rename = "code:change")]
    CodeChange(CodeMessage),
    #[serde(rename = "cursor:position")]
    CursorPosition(CursorMessage),
}

/// Events the server pushes to a client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session:created")]
    SessionCreated(SessionCreatedMessage),
    #[serde(rename = "session:state")]
    SessionState(SessionStateMessage),
    #[serde(rename = "user:joined")]
    UserJoined(UserJoinedMessage),
    #[serde(rename = "code:changed")]
    CodeChanged(CodeMessage),
    #[serde(rename = "cursor:moved")]
    CursorMoved(CursorMovedMessage),
    #[serde(rename = "user:left")]
    UserLeft(UserLeftMessage),
    #[serde(rename = "error")]
    Error(ErrorMessage),
}

impl ServerEvent {
    /// Ephemeral events may be dropped for a slow consumer without
    /// leaving its view of the document stale.
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, ServerEvent::CursorMoved(_))
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorMessage { message: message.into() })
    }
}
