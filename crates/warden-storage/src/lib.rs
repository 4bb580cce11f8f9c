pub mod cache;
pub mod memory;
pub mod postgres;
pub mod search;
pub mod traits;

pub use cache::{CacheClient, CacheError, MokaCacheClient};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use search::{InMemorySearchIndex, SearchError, SearchIndex, SearchRequest, SearchResponse};
pub use traits::{ActivityLog, AssignmentStore, Replaced, RuleStore, StorageError, TenantRoleStore};
