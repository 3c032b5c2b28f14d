//! Saved query models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A query saved in the user's library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedQuery {
    /// Stable identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// The SQL text
    pub sql: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last time the query was run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_executed: Option<DateTime<Utc>>,
    /// Pinned by the user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_favorite: Option<bool>,
}

impl SavedQuery {
    /// Create a new saved query.
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            sql: sql.into(),
            created_at: Utc::now(),
            last_executed: None,
            is_favorite: None,
        }
    }

    /// Check if the query is marked as a favorite.
    pub fn is_favorite(&self) -> bool {
        self.is_favorite.unwrap_or(false)
    }
}
