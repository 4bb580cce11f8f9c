use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;

use warden_core::assignment::{
    JoinRow, PairFilter, RoleAssignment, TenantRoleFilter, UserRoleAssignment,
    UserTenantRoleAssignment,
};
use warden_storage::{AssignmentStore, CacheClient, TenantRoleStore};

use crate::audit::{audit_assignment_granted, audit_assignment_revoked};
use crate::cached::CacheLayer;
use crate::error::ServiceError;
use crate::keys;

/// Key builders for one join: the left→rights list, the right→lefts list
/// and the direct `(left, right)` existence key.
#[derive(Debug, Clone, Copy)]
struct JoinKeys {
    forward: fn(&str) -> String,
    reverse: fn(&str) -> String,
    direct: fn(&str, &str) -> String,
}

/// Read-through cache over one binary join table.
struct JoinCache<S, C, R> {
    store: Arc<S>,
    cache: CacheLayer<C>,
    keys: JoinKeys,
    _row: PhantomData<fn() -> R>,
}

impl<S, C, R> JoinCache<S, C, R>
where
    S: AssignmentStore + 'static,
    C: CacheClient + 'static,
    R: JoinRow,
{
    fn new(store: Arc<S>, cache: CacheLayer<C>, keys: JoinKeys) -> Self {
        Self {
            store,
            cache,
            keys,
            _row: PhantomData,
        }
    }

    async fn create(&self, left: &str, right: &str) -> Result<R, ServiceError> {
        let row = self.store.create_assignment::<R>(left, right).await?;
        audit_assignment_granted(R::TABLE, left, right);

        self.cache.mark_later((self.keys.direct)(left, right));
        self.cache
            .invalidate_later(vec![(self.keys.forward)(left), (self.keys.reverse)(right)]);
        Ok(row)
    }

    /// Right-side ids joined to `left`, in grant order.
    async fn rights_of(&self, left: &str) -> Result<Vec<String>, ServiceError> {
        let key = (self.keys.forward)(left);
        if let Some(ids) = self.cache.get_ids(&key).await {
            return Ok(ids);
        }

        let rows: Vec<R> = self.store.find_assignments(&PairFilter::left(left)).await?;
        let ids: Vec<String> = rows.iter().map(|r| r.right().to_string()).collect();
        self.cache.store_ids_later(key, ids.clone());
        Ok(ids)
    }

    /// Left-side ids joined to `right`, in grant order.
    async fn lefts_of(&self, right: &str) -> Result<Vec<String>, ServiceError> {
        let key = (self.keys.reverse)(right);
        if let Some(ids) = self.cache.get_ids(&key).await {
            return Ok(ids);
        }

        let rows: Vec<R> = self.store.find_assignments(&PairFilter::right(right)).await?;
        let ids: Vec<String> = rows.iter().map(|r| r.left().to_string()).collect();
        self.cache.store_ids_later(key, ids.clone());
        Ok(ids)
    }

    /// Deletes matching rows and invalidates every key each removed row
    /// could have contributed to.
    async fn delete(&self, filter: &PairFilter) -> Result<usize, ServiceError> {
        let removed: Vec<R> = self.store.delete_assignments(filter).await?;
        audit_assignment_revoked(R::TABLE, removed.len());

        let mut stale = BTreeSet::new();
        for row in &removed {
            stale.insert((self.keys.direct)(row.left(), row.right()));
            stale.insert((self.keys.forward)(row.left()));
            stale.insert((self.keys.reverse)(row.right()));
        }
        self.cache.invalidate_later(stale.into_iter().collect());
        Ok(removed.len())
    }

    /// Positive answers are cached; negative answers never are.
    async fn contains(&self, left: &str, right: &str) -> Result<bool, ServiceError> {
        let key = (self.keys.direct)(left, right);
        if self.cache.exists(&key).await {
            return Ok(true);
        }

        let count = self
            .store
            .count_assignments::<R>(&PairFilter::pair(left, right))
            .await?;
        if count > 0 {
            self.cache.mark_later(key);
        }
        Ok(count > 0)
    }
}

const ROLE_PERMISSION_KEYS: JoinKeys = JoinKeys {
    forward: keys::role_permissions,
    reverse: keys::permission_roles,
    direct: keys::role_permission,
};

const USER_ROLE_KEYS: JoinKeys = JoinKeys {
    forward: keys::user_roles,
    reverse: keys::role_users,
    direct: keys::user_role,
};

/// Cached role ↔ permission assignments.
pub struct RolePermissionCache<S, C> {
    inner: JoinCache<S, C, RoleAssignment>,
}

impl<S, C> RolePermissionCache<S, C>
where
    S: AssignmentStore + 'static,
    C: CacheClient + 'static,
{
    pub fn new(store: Arc<S>, cache: CacheLayer<C>) -> Self {
        Self {
            inner: JoinCache::new(store, cache, ROLE_PERMISSION_KEYS),
        }
    }

    pub async fn create(
        &self,
        role_id: &str,
        permission_id: &str,
    ) -> Result<RoleAssignment, ServiceError> {
        self.inner.create(role_id, permission_id).await
    }

    pub async fn get_permissions_by_role_id(
        &self,
        role_id: &str,
    ) -> Result<Vec<String>, ServiceError> {
        self.inner.rights_of(role_id).await
    }

    pub async fn get_roles_by_permission_id(
        &self,
        permission_id: &str,
    ) -> Result<Vec<String>, ServiceError> {
        self.inner.lefts_of(permission_id).await
    }

    pub async fn delete(&self, role_id: &str, permission_id: &str) -> Result<usize, ServiceError> {
        self.inner
            .delete(&PairFilter::pair(role_id, permission_id))
            .await
    }

    pub async fn delete_all_by_role_id(&self, role_id: &str) -> Result<usize, ServiceError> {
        self.inner.delete(&PairFilter::left(role_id)).await
    }

    pub async fn delete_all_by_permission_id(
        &self,
        permission_id: &str,
    ) -> Result<usize, ServiceError> {
        self.inner.delete(&PairFilter::right(permission_id)).await
    }

    pub async fn is_permission_in_role(
        &self,
        role_id: &str,
        permission_id: &str,
    ) -> Result<bool, ServiceError> {
        self.inner.contains(role_id, permission_id).await
    }

    pub async fn is_role_in_permission(
        &self,
        permission_id: &str,
        role_id: &str,
    ) -> Result<bool, ServiceError> {
        self.inner.contains(role_id, permission_id).await
    }
}

/// Cached user ↔ role assignments.
pub struct UserRoleCache<S, C> {
    inner: JoinCache<S, C, UserRoleAssignment>,
}

impl<S, C> UserRoleCache<S, C>
where
    S: AssignmentStore + 'static,
    C: CacheClient + 'static,
{
    pub fn new(store: Arc<S>, cache: CacheLayer<C>) -> Self {
        Self {
            inner: JoinCache::new(store, cache, USER_ROLE_KEYS),
        }
    }

    pub async fn create(
        &self,
        user_id: &str,
        role_id: &str,
    ) -> Result<UserRoleAssignment, ServiceError> {
        self.inner.create(user_id, role_id).await
    }

    pub async fn get_roles_by_user_id(&self, user_id: &str) -> Result<Vec<String>, ServiceError> {
        self.inner.rights_of(user_id).await
    }

    pub async fn get_users_by_role_id(&self, role_id: &str) -> Result<Vec<String>, ServiceError> {
        self.inner.lefts_of(role_id).await
    }

    pub async fn delete(&self, user_id: &str, role_id: &str) -> Result<usize, ServiceError> {
        self.inner.delete(&PairFilter::pair(user_id, role_id)).await
    }

    pub async fn delete_all_by_user_id(&self, user_id: &str) -> Result<usize, ServiceError> {
        self.inner.delete(&PairFilter::left(user_id)).await
    }

    pub async fn delete_all_by_role_id(&self, role_id: &str) -> Result<usize, ServiceError> {
        self.inner.delete(&PairFilter::right(role_id)).await
    }

    pub async fn is_role_in_user(
        &self,
        user_id: &str,
        role_id: &str,
    ) -> Result<bool, ServiceError> {
        self.inner.contains(user_id, role_id).await
    }

    pub async fn is_user_in_role(
        &self,
        role_id: &str,
        user_id: &str,
    ) -> Result<bool, ServiceError> {
        self.inner.contains(user_id, role_id).await
    }
}

const TENANT_ROLES: &str = "user_tenant_roles";

/// Cached user ↔ role assignments scoped to a tenant.
pub struct UserTenantRoleCache<S, C> {
    store: Arc<S>,
    cache: CacheLayer<C>,
}

impl<S, C> UserTenantRoleCache<S, C>
where
    S: TenantRoleStore + 'static,
    C: CacheClient + 'static,
{
    pub fn new(store: Arc<S>, cache: CacheLayer<C>) -> Self {
        Self { store, cache }
    }

    pub async fn create(
        &self,
        user_id: &str,
        tenant_id: &str,
        role_id: &str,
    ) -> Result<UserTenantRoleAssignment, ServiceError> {
        let row = self
            .store
            .create_tenant_role(user_id, tenant_id, role_id)
            .await?;
        audit_assignment_granted(TENANT_ROLES, user_id, role_id);

        self.cache
            .mark_later(keys::user_tenant_role(user_id, tenant_id, role_id));
        self.cache
            .invalidate_later(vec![keys::user_tenant_roles(user_id, tenant_id)]);
        Ok(row)
    }

    pub async fn get_roles_by_user_in_tenant(
        &self,
        user_id: &str,
        tenant_id: &str,
    ) -> Result<Vec<String>, ServiceError> {
        let key = keys::user_tenant_roles(user_id, tenant_id);
        if let Some(ids) = self.cache.get_ids(&key).await {
            return Ok(ids);
        }

        let rows = self
            .store
            .find_tenant_roles(&TenantRoleFilter::user_in_tenant(user_id, tenant_id))
            .await?;
        let ids: Vec<String> = rows.into_iter().map(|r| r.role_id).collect();
        self.cache.store_ids_later(key, ids.clone());
        Ok(ids)
    }

    pub async fn delete(
        &self,
        user_id: &str,
        tenant_id: &str,
        role_id: &str,
    ) -> Result<usize, ServiceError> {
        let filter = TenantRoleFilter {
            user_id: Some(user_id.to_string()),
            tenant_id: Some(tenant_id.to_string()),
            role_id: Some(role_id.to_string()),
        };
        self.delete_matching(&filter).await
    }

    pub async fn delete_all_by_user_id(&self, user_id: &str) -> Result<usize, ServiceError> {
        let filter = TenantRoleFilter {
            user_id: Some(user_id.to_string()),
            ..Default::default()
        };
        self.delete_matching(&filter).await
    }

    async fn delete_matching(&self, filter: &TenantRoleFilter) -> Result<usize, ServiceError> {
        let removed = self.store.delete_tenant_roles(filter).await?;
        audit_assignment_revoked(TENANT_ROLES, removed.len());

        let mut stale = BTreeSet::new();
        for row in &removed {
            stale.insert(keys::user_tenant_role(&row.user_id, &row.tenant_id, &row.role_id));
            stale.insert(keys::user_tenant_roles(&row.user_id, &row.tenant_id));
        }
        self.cache.invalidate_later(stale.into_iter().collect());
        Ok(removed.len())
    }

    pub async fn has_role_in_tenant(
        &self,
        user_id: &str,
        tenant_id: &str,
        role_id: &str,
    ) -> Result<bool, ServiceError> {
        let key = keys::user_tenant_role(user_id, tenant_id, role_id);
        if self.cache.exists(&key).await {
            return Ok(true);
        }

        let filter = TenantRoleFilter {
            user_id: Some(user_id.to_string()),
            tenant_id: Some(tenant_id.to_string()),
            role_id: Some(role_id.to_string()),
        };
        let count = self.store.count_tenant_roles(&filter).await?;
        if count > 0 {
            self.cache.mark_later(key);
        }
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cached::testing::{BrokenCache, layer_over, moka_layer};
    use warden_storage::{InMemoryStore, MokaCacheClient};

    fn role_permissions(
        enabled: bool,
    ) -> (
        RolePermissionCache<InMemoryStore, MokaCacheClient>,
        Arc<InMemoryStore>,
        CacheLayer<MokaCacheClient>,
    ) {
        let store = Arc::new(InMemoryStore::new());
        let (layer, _client) = moka_layer(enabled);
        let cache = RolePermissionCache::new(Arc::clone(&store), layer.clone());
        (cache, store, layer)
    }

    #[tokio::test]
    async fn grant_and_revoke_keep_lists_current() {
        let (cache, _store, layer) = role_permissions(true);

        cache.create("r1", "p1").await.unwrap();
        layer.tasks().flush().await;
        assert_eq!(cache.get_permissions_by_role_id("r1").await.unwrap(), vec!["p1"]);
        layer.tasks().flush().await;

        cache.create("r1", "p2").await.unwrap();
        layer.tasks().flush().await;
        assert_eq!(
            cache.get_permissions_by_role_id("r1").await.unwrap(),
            vec!["p1", "p2"]
        );
        layer.tasks().flush().await;

        cache.delete("r1", "p1").await.unwrap();
        layer.tasks().flush().await;
        assert_eq!(cache.get_permissions_by_role_id("r1").await.unwrap(), vec!["p2"]);
    }

    #[tokio::test]
    async fn second_read_is_served_from_cache() {
        let (cache, store, layer) = role_permissions(true);
        cache.create("r1", "p1").await.unwrap();
        layer.tasks().flush().await;

        cache.get_permissions_by_role_id("r1").await.unwrap();
        layer.tasks().flush().await;
        // Bypass the cache so only a stale hit could still show p1.
        store
            .delete_assignments::<RoleAssignment>(&PairFilter::left("r1"))
            .await
            .unwrap();

        assert_eq!(cache.get_permissions_by_role_id("r1").await.unwrap(), vec!["p1"]);
        assert!(layer.metrics().cache_hits() >= 1);
    }

    #[tokio::test]
    async fn delete_all_by_role_invalidates_reverse_lists() {
        let (cache, _store, layer) = role_permissions(true);
        for perm in ["p1", "p2", "p3"] {
            cache.create("r1", perm).await.unwrap();
        }
        cache.create("r2", "p1").await.unwrap();
        layer.tasks().flush().await;

        for perm in ["p1", "p2", "p3"] {
            cache.get_roles_by_permission_id(perm).await.unwrap();
            cache.is_permission_in_role("r1", perm).await.unwrap();
        }
        layer.tasks().flush().await;

        assert_eq!(cache.delete_all_by_role_id("r1").await.unwrap(), 3);
        layer.tasks().flush().await;

        assert_eq!(cache.get_roles_by_permission_id("p1").await.unwrap(), vec!["r2"]);
        assert!(cache.get_roles_by_permission_id("p2").await.unwrap().is_empty());
        assert!(cache.get_roles_by_permission_id("p3").await.unwrap().is_empty());
        for perm in ["p1", "p2", "p3"] {
            assert!(!cache.is_permission_in_role("r1", perm).await.unwrap());
        }
        assert!(cache.get_permissions_by_role_id("r1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn negative_existence_is_never_cached() {
        let (cache, _store, layer) = role_permissions(true);

        assert!(!cache.is_permission_in_role("r1", "p1").await.unwrap());
        layer.tasks().flush().await;

        cache.create("r1", "p1").await.unwrap();

        assert!(cache.is_permission_in_role("r1", "p1").await.unwrap());
        assert!(cache.is_role_in_permission("p1", "r1").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_grant_is_rejected() {
        let (cache, _store, _layer) = role_permissions(true);
        cache.create("r1", "p1").await.unwrap();

        let again = cache.create("r1", "p1").await;

        assert!(matches!(
            again,
            Err(ServiceError::Storage(warden_storage::StorageError::AlreadyExists(_)))
        ));
    }

    #[tokio::test]
    async fn broken_cache_falls_through_to_store() {
        let store = Arc::new(InMemoryStore::new());
        let layer = layer_over(Arc::new(BrokenCache), true);
        let cache = UserRoleCache::new(Arc::clone(&store), layer.clone());

        cache.create("u1", "admin").await.unwrap();

        assert_eq!(cache.get_roles_by_user_id("u1").await.unwrap(), vec!["admin"]);
        assert_eq!(cache.get_users_by_role_id("admin").await.unwrap(), vec!["u1"]);
        assert!(cache.is_role_in_user("u1", "admin").await.unwrap());
        assert!(cache.is_user_in_role("admin", "u1").await.unwrap());
        assert!(layer.metrics().cache_errors() >= 3);
    }

    #[tokio::test]
    async fn user_role_delete_all_by_user() {
        let store = Arc::new(InMemoryStore::new());
        let (layer, _client) = moka_layer(true);
        let cache = UserRoleCache::new(Arc::clone(&store), layer.clone());
        cache.create("u1", "admin").await.unwrap();
        cache.create("u1", "viewer").await.unwrap();
        layer.tasks().flush().await;
        cache.get_users_by_role_id("admin").await.unwrap();
        layer.tasks().flush().await;

        assert_eq!(cache.delete_all_by_user_id("u1").await.unwrap(), 2);
        layer.tasks().flush().await;

        assert!(cache.get_users_by_role_id("admin").await.unwrap().is_empty());
        assert!(cache.get_roles_by_user_id("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tenant_roles_are_cached_per_tenant() {
        let store = Arc::new(InMemoryStore::new());
        let (layer, _client) = moka_layer(true);
        let cache = UserTenantRoleCache::new(Arc::clone(&store), layer.clone());

        cache.create("u1", "t1", "admin").await.unwrap();
        cache.create("u1", "t2", "viewer").await.unwrap();
        layer.tasks().flush().await;

        assert_eq!(
            cache.get_roles_by_user_in_tenant("u1", "t1").await.unwrap(),
            vec!["admin"]
        );
        assert!(cache.has_role_in_tenant("u1", "t2", "viewer").await.unwrap());
        assert!(!cache.has_role_in_tenant("u1", "t1", "viewer").await.unwrap());
        layer.tasks().flush().await;

        cache.delete("u1", "t1", "admin").await.unwrap();
        layer.tasks().flush().await;

        assert!(cache.get_roles_by_user_in_tenant("u1", "t1").await.unwrap().is_empty());
        assert!(!cache.has_role_in_tenant("u1", "t1", "admin").await.unwrap());

        assert_eq!(cache.delete_all_by_user_id("u1").await.unwrap(), 1);
        layer.tasks().flush().await;
        assert!(!cache.has_role_in_tenant("u1", "t2", "viewer").await.unwrap());
    }

    #[tokio::test]
    async fn tenant_role_ids_with_colons_stay_distinct() {
        let store = Arc::new(InMemoryStore::new());
        let (layer, _client) = moka_layer(true);
        let cache = UserTenantRoleCache::new(Arc::clone(&store), layer.clone());

        cache.create("a:b", "c", "d").await.unwrap();
        assert!(cache.has_role_in_tenant("a:b", "c", "d").await.unwrap());
        assert_eq!(
            cache.get_roles_by_user_in_tenant("a:b", "c").await.unwrap(),
            vec!["d"]
        );
        layer.tasks().flush().await;

        assert!(!cache.has_role_in_tenant("a", "b:c", "d").await.unwrap());
        assert!(cache.get_roles_by_user_in_tenant("a", "b:c").await.unwrap().is_empty());
    }
}
