use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A two-column join row (`left`, `right`) stored in its own table.
///
/// Implementors name the table and columns so one store implementation can
/// serve every binary join.
pub trait JoinRow: Clone + fmt::Debug + Send + Sync + 'static {
    const TABLE: &'static str;
    const LEFT_COLUMN: &'static str;
    const RIGHT_COLUMN: &'static str;

    fn from_parts(left: String, right: String, created_at: DateTime<Utc>) -> Self;
    fn left(&self) -> &str;
    fn right(&self) -> &str;
    fn created_at(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub role_id: String,
    pub permission_id: String,
    pub created_at: DateTime<Utc>,
}

impl JoinRow for RoleAssignment {
    const TABLE: &'static str = "role_permissions";
    const LEFT_COLUMN: &'static str = "role_id";
    const RIGHT_COLUMN: &'static str = "permission_id";

    fn from_parts(left: String, right: String, created_at: DateTime<Utc>) -> Self {
        Self {
            role_id: left,
            permission_id: right,
            created_at,
        }
    }

    fn left(&self) -> &str {
        &self.role_id
    }

    fn right(&self) -> &str {
        &self.permission_id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRoleAssignment {
    pub user_id: String,
    pub role_id: String,
    pub created_at: DateTime<Utc>,
}

impl JoinRow for UserRoleAssignment {
    const TABLE: &'static str = "user_roles";
    const LEFT_COLUMN: &'static str = "user_id";
    const RIGHT_COLUMN: &'static str = "role_id";

    fn from_parts(left: String, right: String, created_at: DateTime<Utc>) -> Self {
        Self {
            user_id: left,
            role_id: right,
            created_at,
        }
    }

    fn left(&self) -> &str {
        &self.user_id
    }

    fn right(&self) -> &str {
        &self.role_id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTenantRoleAssignment {
    pub user_id: String,
    pub tenant_id: String,
    pub role_id: String,
    pub created_at: DateTime<Utc>,
}

/// Equality filter on either side of a join. Both `None` matches every row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairFilter {
    pub left: Option<String>,
    pub right: Option<String>,
}

impl PairFilter {
    pub fn left(id: impl Into<String>) -> Self {
        Self {
            left: Some(id.into()),
            right: None,
        }
    }

    pub fn right(id: impl Into<String>) -> Self {
        Self {
            left: None,
            right: Some(id.into()),
        }
    }

    pub fn pair(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self {
            left: Some(left.into()),
            right: Some(right.into()),
        }
    }

    pub fn matches(&self, left: &str, right: &str) -> bool {
        self.left.as_deref().is_none_or(|l| l == left)
            && self.right.as_deref().is_none_or(|r| r == right)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantRoleFilter {
    pub user_id: Option<String>,
    pub tenant_id: Option<String>,
    pub role_id: Option<String>,
}

impl TenantRoleFilter {
    pub fn user_in_tenant(user_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            tenant_id: Some(tenant_id.into()),
            role_id: None,
        }
    }

    pub fn matches(&self, row: &UserTenantRoleAssignment) -> bool {
        self.user_id.as_deref().is_none_or(|u| u == row.user_id)
            && self.tenant_id.as_deref().is_none_or(|t| t == row.tenant_id)
            && self.role_id.as_deref().is_none_or(|r| r == row.role_id)
    }
}
