use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cursor::{Cursor, DEFAULT_PAGE_SIZE, SortDirection};
use crate::id::{new_id, now};

/// Serialized fields that free-text activity search looks at.
pub const TEXT_FIELDS: [&str; 2] = ["type", "details"];

/// One audit-log entry. Never updated or deleted once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub details: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ActivityRecord {
    pub fn cursor(&self) -> Cursor {
        Cursor::after(&self.id, self.created_at)
    }

    /// Case-insensitive substring match over [`TEXT_FIELDS`].
    pub fn matches_text(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.kind.to_lowercase().contains(&query) || self.details.to_lowercase().contains(&query)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewActivity {
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub details: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl NewActivity {
    pub fn new(
        user_id: impl Into<String>,
        kind: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            kind: kind.into(),
            details: details.into(),
            metadata: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Assigns an id and timestamps.
    pub fn into_record(self) -> ActivityRecord {
        let at = now();
        ActivityRecord {
            id: new_id(),
            user_id: self.user_id,
            kind: self.kind,
            details: self.details,
            metadata: self.metadata,
            created_at: at,
            updated_at: at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityQuery {
    pub user_id: Option<String>,
    pub kind: Option<String>,
    pub cursor: Option<Cursor>,
    pub direction: SortDirection,
    pub limit: usize,
}

impl Default for ActivityQuery {
    fn default() -> Self {
        Self {
            user_id: None,
            kind: None,
            cursor: None,
            direction: SortDirection::Desc,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ActivityQuery {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &ActivityRecord) -> bool {
        self.user_id.as_deref().is_none_or(|u| u == record.user_id)
            && self.kind.as_deref().is_none_or(|k| k == record.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivitySearch {
    pub query: String,
    pub user_id: Option<String>,
    pub from: usize,
    pub size: usize,
}

impl ActivitySearch {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            user_id: None,
            from: 0,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityHits {
    pub records: Vec<ActivityRecord>,
    pub total: u64,
}
