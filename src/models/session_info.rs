use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::Session;

/// Public view of a live session
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfoResponse {
    pub id: String,
    pub member_count: usize,
    pub language: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Session> for SessionInfoResponse {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            member_count: session.member_count(),
            language: session.language.clone(),
            created_at: session.created_at,
        }
    }
}
