use std::collections::BTreeSet;
use std::sync::Arc;

use warden_core::Page;
use warden_core::rule::{NewRule, PolicyRule, RuleFilter, RuleQuery, RuleUpdate};
use warden_storage::{CacheClient, Replaced, RuleStore, StorageError};

use crate::cached::CacheLayer;
use crate::error::ServiceError;
use crate::keys;

/// Policy rules with a per-id cache and a per-ptype listing cache.
pub struct PolicyRuleRepository<S, C> {
    store: Arc<S>,
    cache: CacheLayer<C>,
}

impl<S, C> Clone for PolicyRuleRepository<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cache: self.cache.clone(),
        }
    }
}

impl<S, C> PolicyRuleRepository<S, C>
where
    S: RuleStore + 'static,
    C: CacheClient + 'static,
{
    pub fn new(store: Arc<S>, cache: CacheLayer<C>) -> Self {
        Self { store, cache }
    }

    pub fn cache(&self) -> &CacheLayer<C> {
        &self.cache
    }

    /// Drops the id key of every rule and the listing of every ptype.
    fn invalidate<'a>(&self, rules: impl IntoIterator<Item = &'a PolicyRule>) {
        let mut stale = BTreeSet::new();
        for rule in rules {
            stale.insert(keys::rule(&rule.id));
            stale.insert(keys::rules_by_ptype(&rule.ptype));
        }
        self.cache.invalidate_later(stale.into_iter().collect());
    }

    pub async fn create(&self, rule: NewRule) -> Result<PolicyRule, ServiceError> {
        let stored = self.store.create_rule(rule).await?;
        self.cache.store_json_later(keys::rule(&stored.id), &stored);
        self.cache
            .invalidate_later(vec![keys::rules_by_ptype(&stored.ptype)]);
        Ok(stored)
    }

    pub async fn create_many(&self, rules: Vec<NewRule>) -> Result<Vec<PolicyRule>, ServiceError> {
        let stored = self.store.create_rules(rules).await?;
        let ptypes: BTreeSet<&str> = stored.iter().map(|r| r.ptype.as_str()).collect();
        self.cache
            .invalidate_later(ptypes.into_iter().map(keys::rules_by_ptype).collect());
        Ok(stored)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<PolicyRule>, ServiceError> {
        let key = keys::rule(id);
        if let Some(rule) = self.cache.get_json::<PolicyRule>(&key).await {
            return Ok(Some(rule));
        }

        let rule = self.store.get_rule(id).await?;
        if let Some(ref found) = rule {
            self.cache.store_json_later(key, found);
        }
        Ok(rule)
    }

    pub async fn get_by_id(&self, id: &str) -> Result<PolicyRule, ServiceError> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| StorageError::not_found("policy rule", id).into())
    }

    pub async fn list(&self, query: &RuleQuery) -> Result<Page<PolicyRule>, ServiceError> {
        Ok(self.store.list_rules(query).await?)
    }

    /// Every rule of one ptype, oldest first.
    pub async fn list_by_ptype(&self, ptype: &str) -> Result<Vec<PolicyRule>, ServiceError> {
        let key = keys::rules_by_ptype(ptype);
        if let Some(rules) = self.cache.get_json::<Vec<PolicyRule>>(&key).await {
            return Ok(rules);
        }

        let rules = self.store.find_rules(&RuleFilter::for_ptype(ptype)).await?;
        self.cache.store_json_later(key, &rules);
        Ok(rules)
    }

    pub async fn find(&self, filter: &RuleFilter) -> Result<Vec<PolicyRule>, ServiceError> {
        Ok(self.store.find_rules(filter).await?)
    }

    pub async fn update(&self, id: &str, update: &RuleUpdate) -> Result<PolicyRule, ServiceError> {
        let before = self
            .store
            .get_rule(id)
            .await?
            .ok_or_else(|| StorageError::not_found("policy rule", id))?;
        let after = self.store.update_rule(id, update).await?;
        self.invalidate([&before, &after]);
        Ok(after)
    }

    pub async fn delete(&self, id: &str) -> Result<PolicyRule, ServiceError> {
        let removed = self.store.delete_rule(id).await?;
        self.invalidate([&removed]);
        Ok(removed)
    }

    /// Deletes every matching rule and returns how many went.
    pub async fn delete_filtered(&self, filter: &RuleFilter) -> Result<usize, ServiceError> {
        let removed = self.store.delete_rules(filter).await?;
        self.invalidate(&removed);
        Ok(removed.len())
    }

    pub async fn count(&self, filter: &RuleFilter) -> Result<u64, ServiceError> {
        Ok(self.store.count_rules(filter).await?)
    }

    /// Swaps the whole rule set in one store transaction.
    pub async fn replace_all(&self, rules: Vec<NewRule>) -> Result<Replaced, ServiceError> {
        let replaced = self.store.replace_rules(rules).await?;
        self.invalidate(replaced.removed.iter().chain(&replaced.inserted));
        Ok(replaced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cached::testing::moka_layer;
    use warden_storage::{InMemoryStore, MokaCacheClient};

    fn repo(
        enabled: bool,
    ) -> (
        PolicyRuleRepository<InMemoryStore, MokaCacheClient>,
        Arc<InMemoryStore>,
    ) {
        let store = Arc::new(InMemoryStore::new());
        let (layer, _client) = moka_layer(enabled);
        (PolicyRuleRepository::new(Arc::clone(&store), layer), store)
    }

    fn new_rule(ptype: &str, tokens: &[&str]) -> NewRule {
        NewRule::from_tokens(ptype, tokens).unwrap()
    }

    #[tokio::test]
    async fn get_by_id_reads_through_cache() {
        let (repo, store) = repo(true);
        let rule = repo.create(new_rule("p", &["alice", "data1", "read"])).await.unwrap();
        repo.cache().tasks().flush().await;

        store.delete_rule(&rule.id).await.unwrap();

        // Still served from the id cache written on create.
        assert_eq!(repo.get_by_id(&rule.id).await.unwrap(), rule);
    }

    #[tokio::test]
    async fn missing_rule_is_not_found() {
        let (repo, _store) = repo(true);
        let err = repo.get_by_id("nope").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(repo.find_by_id("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn create_invalidates_ptype_listing() {
        let (repo, _store) = repo(true);
        repo.create(new_rule("p", &["alice"])).await.unwrap();
        repo.cache().tasks().flush().await;
        assert_eq!(repo.list_by_ptype("p").await.unwrap().len(), 1);
        repo.cache().tasks().flush().await;

        repo.create(new_rule("p", &["bob"])).await.unwrap();
        repo.cache().tasks().flush().await;

        assert_eq!(repo.list_by_ptype("p").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn update_invalidates_old_and_new_ptype() {
        let (repo, _store) = repo(true);
        let rule = repo.create(new_rule("p", &["alice"])).await.unwrap();
        repo.cache().tasks().flush().await;
        repo.list_by_ptype("p").await.unwrap();
        repo.list_by_ptype("g").await.unwrap();
        repo.get_by_id(&rule.id).await.unwrap();
        repo.cache().tasks().flush().await;

        let updated = repo
            .update(&rule.id, &RuleUpdate::new().ptype("g").v1("admin").updated_by("ops"))
            .await
            .unwrap();
        repo.cache().tasks().flush().await;

        assert!(repo.list_by_ptype("p").await.unwrap().is_empty());
        assert_eq!(repo.list_by_ptype("g").await.unwrap(), vec![updated.clone()]);
        let fetched = repo.get_by_id(&rule.id).await.unwrap();
        assert_eq!(fetched.ptype, "g");
        assert_eq!(fetched.values[1], "admin");
        assert_eq!(fetched.updated_by.as_deref(), Some("ops"));
    }

    #[tokio::test]
    async fn delete_filtered_invalidates_each_removed_rule() {
        let (repo, _store) = repo(true);
        let a = repo.create(new_rule("p", &["alice", "data1"])).await.unwrap();
        let b = repo.create(new_rule("p", &["bob", "data1"])).await.unwrap();
        repo.cache().tasks().flush().await;
        repo.get_by_id(&a.id).await.unwrap();
        repo.list_by_ptype("p").await.unwrap();
        repo.cache().tasks().flush().await;

        let removed = repo
            .delete_filtered(&RuleFilter::for_ptype("p").with_value(0, "alice"))
            .await
            .unwrap();
        repo.cache().tasks().flush().await;

        assert_eq!(removed, 1);
        assert!(repo.find_by_id(&a.id).await.unwrap().is_none());
        assert_eq!(repo.list_by_ptype("p").await.unwrap(), vec![b]);
    }

    #[tokio::test]
    async fn replace_all_clears_stale_entries() {
        let (repo, _store) = repo(true);
        let old = repo.create(new_rule("p", &["old"])).await.unwrap();
        repo.cache().tasks().flush().await;
        repo.list_by_ptype("p").await.unwrap();
        repo.cache().tasks().flush().await;

        let replaced = repo.replace_all(vec![new_rule("p", &["new"])]).await.unwrap();
        repo.cache().tasks().flush().await;

        assert_eq!(replaced.removed.len(), 1);
        assert!(repo.find_by_id(&old.id).await.unwrap().is_none());
        let listed = repo.list_by_ptype("p").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].values[0], "new");
    }

    #[tokio::test]
    async fn count_and_find_go_to_the_store() {
        let (repo, _store) = repo(false);
        repo.create(new_rule("p", &["alice", "data1"])).await.unwrap();
        repo.create(new_rule("g", &["alice", "admin"])).await.unwrap();

        let filter = RuleFilter::default().with_value(0, "alice");
        assert_eq!(repo.count(&filter).await.unwrap(), 2);
        assert_eq!(repo.find(&RuleFilter::for_ptype("g")).await.unwrap().len(), 1);
    }
}
