use std::sync::Arc;
use std::time::Duration;

use warden_server::keys;
use warden_server::{
    BackgroundTasks, CacheLayer, CacheSettings, Metrics, RolePermissionCache, UserRoleCache,
};
use warden_storage::{CacheClient, InMemoryStore, MokaCacheClient};

fn layer(client: Arc<MokaCacheClient>, enabled: bool) -> CacheLayer<MokaCacheClient> {
    let metrics = Arc::new(Metrics::new());
    let tasks = BackgroundTasks::spawn(256, Arc::clone(&metrics));
    let settings = CacheSettings {
        enabled,
        ttl: Duration::from_secs(60),
    };
    CacheLayer::new(client, settings, tasks, metrics)
}

struct Harness {
    roles: RolePermissionCache<InMemoryStore, MokaCacheClient>,
    users: UserRoleCache<InMemoryStore, MokaCacheClient>,
    cache: CacheLayer<MokaCacheClient>,
    client: Arc<MokaCacheClient>,
}

impl Harness {
    fn new(enabled: bool) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let client = Arc::new(MokaCacheClient::new(10_000));
        let cache = layer(Arc::clone(&client), enabled);
        Self {
            roles: RolePermissionCache::new(Arc::clone(&store), cache.clone()),
            users: UserRoleCache::new(store, cache.clone()),
            cache,
            client,
        }
    }

    async fn settle(&self) {
        self.cache.tasks().flush().await;
    }
}

/// Runs a fixed mix of writes and reads and records every read result.
async fn scenario(h: &Harness) -> Vec<String> {
    let mut observed = Vec::new();

    h.roles.create("r1", "p1").await.unwrap();
    h.settle().await;
    observed.push(format!("{:?}", h.roles.get_permissions_by_role_id("r1").await.unwrap()));
    observed.push(format!("{:?}", h.roles.is_permission_in_role("r1", "p2").await.unwrap()));
    h.settle().await;

    h.roles.create("r1", "p2").await.unwrap();
    h.roles.create("r2", "p2").await.unwrap();
    h.users.create("u1", "r1").await.unwrap();
    h.settle().await;
    observed.push(format!("{:?}", h.roles.get_permissions_by_role_id("r1").await.unwrap()));
    observed.push(format!("{:?}", h.roles.get_roles_by_permission_id("p2").await.unwrap()));
    observed.push(format!("{:?}", h.roles.is_permission_in_role("r1", "p2").await.unwrap()));
    observed.push(format!("{:?}", h.users.get_roles_by_user_id("u1").await.unwrap()));
    h.settle().await;

    h.roles.delete("r1", "p1").await.unwrap();
    h.users.delete_all_by_role_id("r1").await.unwrap();
    h.settle().await;
    observed.push(format!("{:?}", h.roles.get_permissions_by_role_id("r1").await.unwrap()));
    observed.push(format!("{:?}", h.roles.is_permission_in_role("r1", "p1").await.unwrap()));
    observed.push(format!("{:?}", h.users.get_users_by_role_id("r1").await.unwrap()));
    observed.push(format!("{:?}", h.users.is_role_in_user("u1", "r1").await.unwrap()));

    h.roles.delete_all_by_permission_id("p2").await.unwrap();
    h.settle().await;
    observed.push(format!("{:?}", h.roles.get_roles_by_permission_id("p2").await.unwrap()));
    observed.push(format!("{:?}", h.roles.get_permissions_by_role_id("r2").await.unwrap()));

    observed
}

#[tokio::test]
async fn reads_are_identical_with_and_without_cache() {
    let cached = Harness::new(true);
    let uncached = Harness::new(false);

    let with_cache = scenario(&cached).await;
    let without_cache = scenario(&uncached).await;

    assert_eq!(with_cache, without_cache);
    assert!(cached.cache.metrics().cache_hits() > 0);
    assert_eq!(uncached.cache.metrics().cache_hits(), 0);
}

#[tokio::test]
async fn grant_then_revoke_keeps_grant_order() {
    let h = Harness::new(true);

    h.roles.create("r1", "p1").await.unwrap();
    h.settle().await;
    assert_eq!(h.roles.get_permissions_by_role_id("r1").await.unwrap(), vec!["p1"]);
    h.settle().await;

    h.roles.create("r1", "p2").await.unwrap();
    h.settle().await;
    assert_eq!(
        h.roles.get_permissions_by_role_id("r1").await.unwrap(),
        vec!["p1", "p2"]
    );
    h.settle().await;

    h.roles.delete("r1", "p1").await.unwrap();
    h.settle().await;
    assert_eq!(h.roles.get_permissions_by_role_id("r1").await.unwrap(), vec!["p2"]);
}

#[tokio::test]
async fn delete_all_by_role_id_clears_every_related_key() {
    let h = Harness::new(true);
    for permission in ["p1", "p2", "p3"] {
        h.roles.create("r1", permission).await.unwrap();
    }
    h.roles.create("r2", "p1").await.unwrap();
    h.settle().await;

    // Warm every key the role touches.
    h.roles.get_permissions_by_role_id("r1").await.unwrap();
    for permission in ["p1", "p2", "p3"] {
        h.roles.get_roles_by_permission_id(permission).await.unwrap();
        assert!(h.roles.is_permission_in_role("r1", permission).await.unwrap());
    }
    h.settle().await;

    let removed = h.roles.delete_all_by_role_id("r1").await.unwrap();
    h.settle().await;

    assert_eq!(removed, 3);
    let forward = keys::role_permissions("r1");
    assert!(h.client.get_array(&forward).await.unwrap().is_none());
    for permission in ["p1", "p2", "p3"] {
        let reverse = keys::permission_roles(permission);
        let direct = keys::role_permission("r1", permission);
        assert!(h.client.get_array(&reverse).await.unwrap().is_none());
        assert!(h.client.get(&direct).await.unwrap().is_none());
    }

    assert!(h.roles.get_permissions_by_role_id("r1").await.unwrap().is_empty());
    assert_eq!(h.roles.get_roles_by_permission_id("p1").await.unwrap(), vec!["r2"]);
}

#[tokio::test]
async fn negative_membership_is_never_cached() {
    let h = Harness::new(true);

    assert!(!h.roles.is_permission_in_role("r1", "p1").await.unwrap());
    h.settle().await;

    h.roles.create("r1", "p1").await.unwrap();

    // No flush: a cached negative would be visible here.
    assert!(h.roles.is_permission_in_role("r1", "p1").await.unwrap());
    assert!(h.roles.is_role_in_permission("p1", "r1").await.unwrap());
}

#[tokio::test]
async fn ids_containing_colons_never_alias_a_grant() {
    let h = Harness::new(true);

    h.roles.create("a:b", "c").await.unwrap();
    h.users.create("u:1", "r").await.unwrap();
    assert!(h.roles.is_permission_in_role("a:b", "c").await.unwrap());
    assert!(h.users.is_role_in_user("u:1", "r").await.unwrap());
    h.settle().await;

    assert!(!h.roles.is_permission_in_role("a", "b:c").await.unwrap());
    assert!(!h.users.is_role_in_user("u", "1:r").await.unwrap());
}
