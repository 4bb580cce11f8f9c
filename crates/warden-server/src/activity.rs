use std::sync::Arc;

use serde_json::Value;
use warden_core::Page;
use warden_core::activity::{
    ActivityHits, ActivityQuery, ActivityRecord, ActivitySearch, NewActivity, TEXT_FIELDS,
};
use warden_core::cursor::page_size;
use warden_storage::{ActivityLog, CacheClient, SearchError, SearchIndex, SearchRequest};

use crate::cached::CacheLayer;
use crate::config::AppConfig;
use crate::error::ServiceError;
use crate::keys;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivitySettings {
    pub index: String,
    pub recent_limit: usize,
}

impl ActivitySettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            index: config.search.index.clone(),
            recent_limit: config.cache.recent_activity_limit,
        }
    }
}

impl Default for ActivitySettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Activity log fronted by an optional search index.
///
/// Writes go to the index first and are backed up to the durable store in
/// the background. Reads prefer the index and fall back to the store on any
/// index error.
pub struct ActivityService<S, C, I> {
    store: Arc<S>,
    search: Option<Arc<I>>,
    cache: CacheLayer<C>,
    settings: ActivitySettings,
}

impl<S, C, I> ActivityService<S, C, I>
where
    S: ActivityLog + 'static,
    C: CacheClient + 'static,
    I: SearchIndex + 'static,
{
    pub fn new(
        store: Arc<S>,
        search: Option<Arc<I>>,
        cache: CacheLayer<C>,
        settings: ActivitySettings,
    ) -> Self {
        Self {
            store,
            search,
            cache,
            settings,
        }
    }

    pub fn settings(&self) -> &ActivitySettings {
        &self.settings
    }

    fn fallback(&self, operation: &'static str, error: &SearchError) {
        tracing::warn!(operation, %error, "search index failed, using durable store");
        self.cache.metrics().record_search_fallback();
    }

    async fn index_record(&self, index: &I, record: &ActivityRecord) -> Result<(), SearchError> {
        let document = serde_json::to_value(record)
            .map_err(|e| SearchError::InvalidDocument(e.to_string()))?;
        index.index(&self.settings.index, &record.id, document).await
    }

    async fn query_index(&self, request: SearchRequest) -> Option<(Vec<ActivityRecord>, u64)> {
        let index = self.search.as_ref()?;
        let response = match index.search(&request).await {
            Ok(response) => response,
            Err(error) => {
                self.fallback("search", &error);
                return None;
            }
        };

        match decode_hits(response.hits) {
            Ok(records) => Some((records, response.total)),
            Err(error) => {
                self.fallback("decode", &error);
                None
            }
        }
    }

    pub async fn create(&self, activity: NewActivity) -> Result<ActivityRecord, ServiceError> {
        let record = activity.into_record();

        let indexed = match &self.search {
            Some(index) => match self.index_record(index, &record).await {
                Ok(()) => true,
                Err(error) => {
                    self.fallback("index", &error);
                    false
                }
            },
            None => false,
        };

        let backed_up = indexed && {
            let store = Arc::clone(&self.store);
            let backup = record.clone();
            self.cache.tasks().submit("activity_backup", async move {
                store.insert_activity(&backup).await
            })
        };
        if !backed_up {
            self.store.insert_activity(&record).await?;
        }

        self.cache
            .invalidate_later(vec![keys::recent_activity(&record.user_id)]);
        Ok(record)
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<ActivityRecord>, ServiceError> {
        let key = keys::activity(id);
        if let Some(record) = self.cache.get_json::<ActivityRecord>(&key).await {
            return Ok(Some(record));
        }

        let mut request = SearchRequest::new(&self.settings.index).filter("id", id);
        request.size = 1;
        let record = match self.query_index(request).await {
            Some((records, _)) if !records.is_empty() => records.into_iter().next(),
            _ => self.store.get_activity(id).await?,
        };

        if let Some(ref found) = record {
            self.cache.store_json_later(key, found);
        }
        Ok(record)
    }

    pub async fn list(&self, query: &ActivityQuery) -> Result<Page<ActivityRecord>, ServiceError> {
        let limit = page_size(query.limit);
        let mut request = SearchRequest::new(&self.settings.index);
        if let Some(ref user_id) = query.user_id {
            request = request.filter("user_id", user_id.as_str());
        }
        if let Some(ref kind) = query.kind {
            request = request.filter("type", kind.as_str());
        }
        request.sort = query.direction;
        request.search_after = query.cursor.clone();
        request.size = limit + 1;

        if let Some((records, _)) = self.query_index(request).await {
            return Ok(Page::from_overfetch(records, limit, ActivityRecord::cursor));
        }
        Ok(self.store.list_activities(query).await?)
    }

    pub async fn search(&self, search: &ActivitySearch) -> Result<ActivityHits, ServiceError> {
        let mut request = SearchRequest::new(&self.settings.index)
            .query(search.query.as_str())
            .in_fields(&TEXT_FIELDS);
        if let Some(ref user_id) = search.user_id {
            request = request.filter("user_id", user_id.as_str());
        }
        request.from = search.from;
        request.size = page_size(search.size);

        if let Some((records, total)) = self.query_index(request).await {
            return Ok(ActivityHits { records, total });
        }
        Ok(self.store.search_activities(search).await?)
    }

    /// The user's newest activities. Requests up to the configured recent
    /// limit are served from a per-user cache entry.
    pub async fn recent_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ActivityRecord>, ServiceError> {
        let cacheable = limit <= self.settings.recent_limit;
        let key = keys::recent_activity(user_id);

        if cacheable
            && let Some(mut recent) = self.cache.get_json::<Vec<ActivityRecord>>(&key).await
        {
            recent.truncate(limit);
            return Ok(recent);
        }

        let query = ActivityQuery {
            limit: if cacheable {
                self.settings.recent_limit
            } else {
                limit
            },
            ..ActivityQuery::for_user(user_id)
        };
        let mut recent = self.list(&query).await?.items;

        if cacheable {
            self.cache.store_json_later(key, &recent);
        }
        recent.truncate(limit);
        Ok(recent)
    }
}

fn decode_hits(hits: Vec<Value>) -> Result<Vec<ActivityRecord>, SearchError> {
    hits.into_iter()
        .map(|hit| {
            serde_json::from_value(hit).map_err(|e| SearchError::InvalidDocument(e.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cached::testing::moka_layer;
    use warden_storage::{InMemorySearchIndex, InMemoryStore, MokaCacheClient};

    type Service = ActivityService<InMemoryStore, MokaCacheClient, InMemorySearchIndex>;

    fn service(with_index: bool) -> (Service, Arc<InMemoryStore>, Arc<InMemorySearchIndex>) {
        let store = Arc::new(InMemoryStore::new());
        let index = Arc::new(InMemorySearchIndex::new());
        let (layer, _client) = moka_layer(true);
        let search = with_index.then(|| Arc::clone(&index));
        let service = ActivityService::new(
            Arc::clone(&store),
            search,
            layer,
            ActivitySettings::default(),
        );
        (service, store, index)
    }

    fn activity(user: &str, details: &str) -> NewActivity {
        NewActivity::new(user, "role_change", details)
    }

    #[tokio::test]
    async fn create_indexes_then_backs_up() {
        let (service, store, _index) = service(true);

        let record = service.create(activity("u1", "granted admin")).await.unwrap();
        service.cache.tasks().flush().await;

        assert_eq!(store.get_activity(&record.id).await.unwrap(), Some(record.clone()));
        assert_eq!(service.get_by_id(&record.id).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn index_failure_writes_store_synchronously() {
        let (service, store, index) = service(true);
        index.set_unavailable(true);

        let record = service.create(activity("u1", "granted admin")).await.unwrap();

        // Present before any background work has run.
        assert_eq!(store.get_activity(&record.id).await.unwrap(), Some(record));
        assert_eq!(service.cache.metrics().search_fallbacks(), 1);
    }

    #[tokio::test]
    async fn without_index_every_call_uses_the_store() {
        let (service, store, _index) = service(false);

        let record = service.create(activity("u1", "granted admin")).await.unwrap();

        assert!(store.get_activity(&record.id).await.unwrap().is_some());
        let hits = service.search(&ActivitySearch::new("admin")).await.unwrap();
        assert_eq!(hits.total, 1);
        assert_eq!(service.cache.metrics().search_fallbacks(), 0);
    }

    #[tokio::test]
    async fn reads_fall_back_when_index_goes_down() {
        let (service, _store, index) = service(true);
        let first = service.create(activity("u1", "granted admin")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = service.create(activity("u1", "granted viewer")).await.unwrap();
        service.cache.tasks().flush().await;

        index.set_unavailable(true);

        let page = service.list(&ActivityQuery::for_user("u1")).await.unwrap();
        assert_eq!(page.items, vec![second, first.clone()]);

        let hits = service.search(&ActivitySearch::new("ADMIN")).await.unwrap();
        assert_eq!(hits.records, vec![first.clone()]);

        assert_eq!(service.get_by_id(&first.id).await.unwrap(), Some(first));
        assert!(service.cache.metrics().search_fallbacks() >= 3);
    }

    #[tokio::test]
    async fn index_and_store_search_agree() {
        let (service, _store, index) = service(true);
        service.create(activity("u1", "granted admin")).await.unwrap();
        service.create(activity("u2", "granted viewer")).await.unwrap();
        service.cache.tasks().flush().await;

        let queries = ["u1", "admin", "ROLE_CHANGE", "2"];
        let mut from_index = Vec::new();
        for q in queries {
            from_index.push(service.search(&ActivitySearch::new(q)).await.unwrap().total);
        }
        assert_eq!(service.cache.metrics().search_fallbacks(), 0);

        index.set_unavailable(true);
        let mut from_store = Vec::new();
        for q in queries {
            from_store.push(service.search(&ActivitySearch::new(q)).await.unwrap().total);
        }

        assert_eq!(from_index, vec![0, 1, 2, 0]);
        assert_eq!(from_store, from_index);
    }

    #[tokio::test]
    async fn list_pages_through_the_index() {
        let (service, _store, _index) = service(true);
        for n in 0..5 {
            service.create(activity("u1", &format!("event {n}"))).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let mut query = ActivityQuery::for_user("u1");
        query.limit = 2;
        let first = service.list(&query).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.items[0].details, "event 4");

        let cursor = first.next_cursor.clone().unwrap();
        query.cursor = Some(warden_core::Cursor::decode(&cursor).unwrap());
        let second = service.list(&query).await.unwrap();
        assert_eq!(second.items[0].details, "event 2");
        assert_eq!(service.cache.metrics().search_fallbacks(), 0);
    }

    #[tokio::test]
    async fn recent_for_user_is_invalidated_by_create() {
        let (service, _store, _index) = service(true);
        service.create(activity("u1", "first")).await.unwrap();
        service.cache.tasks().flush().await;

        assert_eq!(service.recent_for_user("u1", 5).await.unwrap().len(), 1);
        service.cache.tasks().flush().await;

        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        service.create(activity("u1", "second")).await.unwrap();
        service.cache.tasks().flush().await;

        let recent = service.recent_for_user("u1", 5).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].details, "second");
    }

    #[tokio::test]
    async fn recent_for_user_respects_limit() {
        let (service, _store, _index) = service(false);
        for n in 0..3 {
            service.create(activity("u1", &format!("event {n}"))).await.unwrap();
        }
        service.cache.tasks().flush().await;

        assert_eq!(service.recent_for_user("u1", 2).await.unwrap().len(), 2);
        service.cache.tasks().flush().await;
        assert_eq!(service.recent_for_user("u1", 1).await.unwrap().len(), 1);
        assert_eq!(service.recent_for_user("u1", 100).await.unwrap().len(), 3);
    }
}
