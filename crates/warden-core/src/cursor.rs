use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::is_valid_id;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CursorError {
    #[error("malformed cursor: {0}")]
    Malformed(String),
    #[error("cursor references an invalid id: {0}")]
    InvalidId(String),
}

/// Ordering of a paged listing over `(created_at, id)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

/// Position of the last row a client has seen.
///
/// Serialized as URL-safe base64 of `{"id": .., "ts": ..}` where `ts` is the
/// row's `created_at` in unix microseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub id: String,
    #[serde(rename = "ts")]
    pub created_at: i64,
}

impl Cursor {
    pub fn new(id: impl Into<String>, created_at: i64) -> Self {
        Self {
            id: id.into(),
            created_at,
        }
    }

    pub fn after(id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self::new(id, created_at.timestamp_micros())
    }

    pub fn encode(&self) -> String {
        let json = serde_json::json!({ "id": self.id, "ts": self.created_at });
        URL_SAFE_NO_PAD.encode(json.to_string())
    }

    pub fn decode(token: &str) -> Result<Self, CursorError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| CursorError::Malformed(e.to_string()))?;
        let cursor: Cursor =
            serde_json::from_slice(&bytes).map_err(|e| CursorError::Malformed(e.to_string()))?;
        if !is_valid_id(&cursor.id) {
            return Err(CursorError::InvalidId(cursor.id));
        }
        Ok(cursor)
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros(self.created_at)
    }

    /// Whether a row at `(created_at, id)` lies strictly past this cursor.
    ///
    /// `Desc`: `created_at < ts OR (created_at = ts AND id < cursor_id)`.
    /// `Asc` inverts both comparisons.
    pub fn admits(&self, created_at: DateTime<Utc>, id: &str, direction: SortDirection) -> bool {
        let ts = created_at.timestamp_micros();
        match direction {
            SortDirection::Desc => {
                ts < self.created_at || (ts == self.created_at && id < self.id.as_str())
            }
            SortDirection::Asc => {
                ts > self.created_at || (ts == self.created_at && id > self.id.as_str())
            }
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// Clamps a requested page size into `1..=MAX_PAGE_SIZE`.
pub fn page_size(requested: usize) -> usize {
    match requested {
        0 => DEFAULT_PAGE_SIZE,
        n => n.min(MAX_PAGE_SIZE),
    }
}

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
        }
    }

    /// Builds a page from up to `limit + 1` fetched rows; the extra row only
    /// signals that another page exists.
    pub fn from_overfetch<F>(mut rows: Vec<T>, limit: usize, position: F) -> Self
    where
        F: Fn(&T) -> Cursor,
    {
        let has_more = rows.len() > limit;
        rows.truncate(limit);
        let next_cursor = if has_more {
            rows.last().map(|row| position(row).encode())
        } else {
            None
        };
        Self {
            items: rows,
            next_cursor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trips() {
        let cursor = Cursor::new("abc123", 1000);

        let decoded = Cursor::decode(&cursor.encode()).unwrap();

        assert_eq!(decoded, cursor);
        assert_eq!(decoded.id, "abc123");
        assert_eq!(decoded.created_at, 1000);
    }

    #[test]
    fn token_is_url_safe() {
        let token = Cursor::new("a-b_c", i64::MAX).encode();
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn decode_rejects_non_primary_key_id() {
        let token = URL_SAFE_NO_PAD.encode(r#"{"id":"abc 123; --","ts":1000}"#);

        let err = Cursor::decode(&token).unwrap_err();

        assert!(matches!(err, CursorError::InvalidId(ref id) if id == "abc 123; --"));
    }

    #[test]
    fn decode_rejects_empty_id() {
        let token = URL_SAFE_NO_PAD.encode(r#"{"id":"","ts":1000}"#);
        assert!(matches!(
            Cursor::decode(&token),
            Err(CursorError::InvalidId(_))
        ));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            Cursor::decode("not base64 !!"),
            Err(CursorError::Malformed(_))
        ));
        let not_json = URL_SAFE_NO_PAD.encode("hello");
        assert!(matches!(
            Cursor::decode(&not_json),
            Err(CursorError::Malformed(_))
        ));
        let wrong_shape = URL_SAFE_NO_PAD.encode(r#"{"id":"abc"}"#);
        assert!(matches!(
            Cursor::decode(&wrong_shape),
            Err(CursorError::Malformed(_))
        ));
    }

    #[test]
    fn desc_admits_older_rows_and_lower_ids_on_ties() {
        let cursor = Cursor::new("m", 1000);
        let at = |micros| DateTime::from_timestamp_micros(micros).unwrap();

        assert!(cursor.admits(at(999), "z", SortDirection::Desc));
        assert!(cursor.admits(at(1000), "a", SortDirection::Desc));
        assert!(!cursor.admits(at(1000), "m", SortDirection::Desc));
        assert!(!cursor.admits(at(1000), "n", SortDirection::Desc));
        assert!(!cursor.admits(at(1001), "a", SortDirection::Desc));
    }

    #[test]
    fn asc_admits_newer_rows_and_higher_ids_on_ties() {
        let cursor = Cursor::new("m", 1000);
        let at = |micros| DateTime::from_timestamp_micros(micros).unwrap();

        assert!(cursor.admits(at(1001), "a", SortDirection::Asc));
        assert!(cursor.admits(at(1000), "n", SortDirection::Asc));
        assert!(!cursor.admits(at(1000), "m", SortDirection::Asc));
        assert!(!cursor.admits(at(999), "z", SortDirection::Asc));
    }

    #[test]
    fn page_from_overfetch_sets_next_cursor_only_when_more_rows_exist() {
        let rows = vec![("a", 3), ("b", 2), ("c", 1)];

        let page = Page::from_overfetch(rows.clone(), 2, |(id, ts)| Cursor::new(*id, *ts));
        assert_eq!(page.items.len(), 2);
        let next = Cursor::decode(page.next_cursor.as_deref().unwrap()).unwrap();
        assert_eq!(next, Cursor::new("b", 2));

        let page = Page::from_overfetch(rows, 3, |(id, ts)| Cursor::new(*id, *ts));
        assert_eq!(page.items.len(), 3);
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn page_size_is_clamped() {
        assert_eq!(page_size(0), DEFAULT_PAGE_SIZE);
        assert_eq!(page_size(10), 10);
        assert_eq!(page_size(10_000), MAX_PAGE_SIZE);
    }
}
