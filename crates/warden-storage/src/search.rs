use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Map, Value};
use warden_core::cursor::{Cursor, DEFAULT_PAGE_SIZE, SortDirection};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SearchError {
    #[error("search index unavailable: {0}")]
    Unavailable(String),
    #[error("invalid document: {0}")]
    InvalidDocument(String),
}

/// A query against one index.
///
/// `query` is free text matched case-insensitively against the string
/// fields named in `query_fields`, or every string field when that list is
/// empty; `filter` holds exact-match field constraints. Hits are ordered by
/// `(created_at, id)` in `sort` direction; `search_after` continues from
/// a previous hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub index: String,
    pub query: Option<String>,
    pub query_fields: Vec<String>,
    pub filter: Map<String, Value>,
    pub from: usize,
    pub size: usize,
    pub sort: SortDirection,
    pub search_after: Option<Cursor>,
}

impl SearchRequest {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            query: None,
            query_fields: Vec::new(),
            filter: Map::new(),
            from: 0,
            size: DEFAULT_PAGE_SIZE,
            sort: SortDirection::Desc,
            search_after: None,
        }
    }

    pub fn query(mut self, text: impl Into<String>) -> Self {
        self.query = Some(text.into());
        self
    }

    /// Restricts free-text matching to these fields.
    pub fn in_fields<S: AsRef<str>>(mut self, fields: &[S]) -> Self {
        self.query_fields = fields.iter().map(|f| f.as_ref().to_string()).collect();
        self
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.insert(field.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResponse {
    pub hits: Vec<Value>,
    pub total: u64,
}

pub trait SearchIndex: Send + Sync {
    fn index(
        &self,
        index: &str,
        doc_id: &str,
        document: Value,
    ) -> impl Future<Output = Result<(), SearchError>> + Send;

    fn delete(&self, index: &str, doc_id: &str)
    -> impl Future<Output = Result<(), SearchError>> + Send;

    fn search(
        &self,
        request: &SearchRequest,
    ) -> impl Future<Output = Result<SearchResponse, SearchError>> + Send;
}

type Documents = HashMap<String, HashMap<String, Value>>;

/// Process-local index. Documents must be JSON objects carrying `id` and an
/// RFC 3339 `created_at`.
#[derive(Debug, Clone, Default)]
pub struct InMemorySearchIndex {
    documents: Arc<Mutex<Documents>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with `Unavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, Documents>, SearchError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SearchError::Unavailable("index offline".to_string()));
        }
        self.documents
            .lock()
            .map_err(|_| SearchError::Unavailable("index lock poisoned".to_string()))
    }
}

fn position(doc: &Value) -> (i64, &str) {
    let ts = doc
        .get("created_at")
        .and_then(Value::as_str)
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map_or(i64::MIN, |dt| dt.timestamp_micros());
    let id = doc.get("id").and_then(Value::as_str).unwrap_or_default();
    (ts, id)
}

fn matches_text(doc: &Value, query: &str, only: &[String]) -> bool {
    let query = query.to_lowercase();
    doc.as_object().is_some_and(|fields| {
        fields
            .iter()
            .filter(|(name, _)| only.is_empty() || only.contains(name))
            .filter_map(|(_, value)| value.as_str())
            .any(|s| s.to_lowercase().contains(&query))
    })
}

fn matches_filter(doc: &Value, filter: &Map<String, Value>) -> bool {
    filter
        .iter()
        .all(|(field, want)| doc.get(field) == Some(want))
}

fn past_cursor(doc: &Value, cursor: &Cursor, sort: SortDirection) -> bool {
    let (ts, id) = position(doc);
    let here = (ts, id);
    let after = (cursor.created_at, cursor.id.as_str());
    match sort {
        SortDirection::Desc => here < after,
        SortDirection::Asc => here > after,
    }
}

impl SearchIndex for InMemorySearchIndex {
    async fn index(&self, index: &str, doc_id: &str, document: Value) -> Result<(), SearchError> {
        if !document.is_object() {
            return Err(SearchError::InvalidDocument(format!(
                "{doc_id} is not a JSON object"
            )));
        }
        let mut documents = self.lock()?;
        documents
            .entry(index.to_string())
            .or_default()
            .insert(doc_id.to_string(), document);
        Ok(())
    }

    async fn delete(&self, index: &str, doc_id: &str) -> Result<(), SearchError> {
        let mut documents = self.lock()?;
        if let Some(docs) = documents.get_mut(index) {
            docs.remove(doc_id);
        }
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, SearchError> {
        let documents = self.lock()?;
        let Some(docs) = documents.get(&request.index) else {
            return Ok(SearchResponse {
                hits: Vec::new(),
                total: 0,
            });
        };

        let mut matching: Vec<&Value> = docs
            .values()
            .filter(|doc| matches_filter(doc, &request.filter))
            .filter(|doc| {
                request
                    .query
                    .as_deref()
                    .is_none_or(|q| matches_text(doc, q, &request.query_fields))
            })
            .collect();
        let total = matching.len() as u64;

        matching.sort_by(|a, b| {
            let ord = position(a).cmp(&position(b));
            match request.sort {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });

        let hits = matching
            .into_iter()
            .filter(|doc| {
                request
                    .search_after
                    .as_ref()
                    .is_none_or(|c| past_cursor(doc, c, request.sort))
            })
            .skip(request.from)
            .take(request.size)
            .cloned()
            .collect();

        Ok(SearchResponse { hits, total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, user: &str, details: &str, created_at: &str) -> Value {
        json!({
            "id": id,
            "user_id": user,
            "type": "role",
            "details": details,
            "created_at": created_at,
        })
    }

    async fn seeded() -> InMemorySearchIndex {
        let index = InMemorySearchIndex::new();
        let docs = [
            doc("a", "u1", "granted admin", "2024-01-01T00:00:01Z"),
            doc("b", "u1", "granted viewer", "2024-01-01T00:00:02Z"),
            doc("c", "u2", "revoked admin", "2024-01-01T00:00:03Z"),
        ];
        for d in docs {
            let id = d["id"].as_str().unwrap().to_string();
            index.index("activities", &id, d).await.unwrap();
        }
        index
    }

    fn ids(response: &SearchResponse) -> Vec<&str> {
        response
            .hits
            .iter()
            .map(|h| h["id"].as_str().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn search_sorts_newest_first_by_default() {
        let index = seeded().await;

        let response = index.search(&SearchRequest::new("activities")).await.unwrap();

        assert_eq!(ids(&response), vec!["c", "b", "a"]);
        assert_eq!(response.total, 3);
    }

    #[tokio::test]
    async fn filter_and_query_combine() {
        let index = seeded().await;

        let request = SearchRequest::new("activities")
            .filter("user_id", "u1")
            .query("ADMIN");
        let response = index.search(&request).await.unwrap();

        assert_eq!(ids(&response), vec!["a"]);
    }

    #[tokio::test]
    async fn query_fields_limit_text_matching() {
        let index = seeded().await;

        let everywhere = index
            .search(&SearchRequest::new("activities").query("u1"))
            .await
            .unwrap();
        let scoped = index
            .search(
                &SearchRequest::new("activities")
                    .query("u1")
                    .in_fields(&["type", "details"]),
            )
            .await
            .unwrap();
        let details = index
            .search(
                &SearchRequest::new("activities")
                    .query("admin")
                    .in_fields(&["details"]),
            )
            .await
            .unwrap();

        assert_eq!(everywhere.total, 2);
        assert_eq!(scoped.total, 0);
        assert_eq!(ids(&details), vec!["c", "a"]);
    }

    #[tokio::test]
    async fn search_after_continues_past_cursor() {
        let index = seeded().await;
        let micros = chrono::DateTime::parse_from_rfc3339("2024-01-01T00:00:02Z")
            .unwrap()
            .timestamp_micros();

        let mut request = SearchRequest::new("activities");
        request.search_after = Some(Cursor::new("b", micros));
        let response = index.search(&request).await.unwrap();

        assert_eq!(ids(&response), vec!["a"]);
    }

    #[tokio::test]
    async fn from_and_size_window_the_hits() {
        let index = seeded().await;

        let mut request = SearchRequest::new("activities");
        request.sort = SortDirection::Asc;
        request.from = 1;
        request.size = 1;
        let response = index.search(&request).await.unwrap();

        assert_eq!(ids(&response), vec!["b"]);
        assert_eq!(response.total, 3);
    }

    #[tokio::test]
    async fn unknown_index_is_empty() {
        let index = InMemorySearchIndex::new();
        let response = index.search(&SearchRequest::new("nope")).await.unwrap();
        assert!(response.hits.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_document() {
        let index = seeded().await;

        index.delete("activities", "a").await.unwrap();

        let response = index.search(&SearchRequest::new("activities")).await.unwrap();
        assert_eq!(ids(&response), vec!["c", "b"]);
    }

    #[tokio::test]
    async fn unavailable_index_fails_every_call() {
        let index = seeded().await;
        index.set_unavailable(true);

        let search = index.search(&SearchRequest::new("activities")).await;
        let write = index.index("activities", "d", json!({"id": "d"})).await;

        assert!(matches!(search, Err(SearchError::Unavailable(_))));
        assert!(matches!(write, Err(SearchError::Unavailable(_))));

        index.set_unavailable(false);
        assert!(index.search(&SearchRequest::new("activities")).await.is_ok());
    }

    #[tokio::test]
    async fn non_object_documents_are_rejected() {
        let index = InMemorySearchIndex::new();
        let result = index.index("activities", "x", json!("text")).await;
        assert!(matches!(result, Err(SearchError::InvalidDocument(_))));
    }
}
