pub mod activity;
pub mod adapter;
pub mod audit;
pub mod background;
pub mod cached;
pub mod cli;
pub mod config;
pub mod error;
pub mod keys;
pub mod metrics;
pub mod relationship;
pub mod repository;

pub use activity::{ActivityService, ActivitySettings};
pub use adapter::{MemoryPolicyModel, PolicyAdapter, PolicyModel, StorePolicyAdapter};
pub use background::BackgroundTasks;
pub use cached::{CacheLayer, CacheSettings};
pub use error::ServiceError;
pub use metrics::Metrics;
pub use relationship::{RolePermissionCache, UserRoleCache, UserTenantRoleCache};
pub use repository::PolicyRuleRepository;
