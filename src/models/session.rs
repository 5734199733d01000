use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A connection's participation record within a session.
/// The user id is the id of the owning connection.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub joined_at: DateTime<Utc>,
}

impl User {
    pub fn new(connection_id: &str) -> Self {
        Self {
            id: connection_id.to_string(),
            joined_at: Utc::now(),
        }
    }
}

/// A shared document together with the users currently editing it.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub code: String,
    pub language: String,
    pub users: Vec<User>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn member_count(&self) -> usize {
        self.users.len()
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.users.iter().any(|u| u.id == user_id)
    }
}
