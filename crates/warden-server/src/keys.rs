//! Cache key layout. Every key is derived from durable identifiers only.
//!
//! Keys naming more than one id length-prefix each id, so ids containing
//! `:` cannot make two different tuples share a key.

/// `len:id` pieces joined by `:`.
fn ids(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|id| format!("{}:{id}", id.len()))
        .collect::<Vec<_>>()
        .join(":")
}

pub fn rule(id: &str) -> String {
    format!("policy_rule:{id}")
}

pub fn rules_by_ptype(ptype: &str) -> String {
    format!("policy_rules:ptype:{ptype}")
}

pub fn role_permissions(role_id: &str) -> String {
    format!("role:{role_id}:permission_ids")
}

pub fn permission_roles(permission_id: &str) -> String {
    format!("permission:{permission_id}:role_ids")
}

pub fn role_permission(role_id: &str, permission_id: &str) -> String {
    format!("role_permission:{}", ids(&[role_id, permission_id]))
}

pub fn user_roles(user_id: &str) -> String {
    format!("user:{user_id}:role_ids")
}

pub fn role_users(role_id: &str) -> String {
    format!("role:{role_id}:user_ids")
}

pub fn user_role(user_id: &str, role_id: &str) -> String {
    format!("user_role:{}", ids(&[user_id, role_id]))
}

pub fn user_tenant_roles(user_id: &str, tenant_id: &str) -> String {
    format!("user_tenant:{}:role_ids", ids(&[user_id, tenant_id]))
}

pub fn user_tenant_role(user_id: &str, tenant_id: &str, role_id: &str) -> String {
    format!("user_tenant_role:{}", ids(&[user_id, tenant_id, role_id]))
}

pub fn activity(id: &str) -> String {
    format!("activity:{id}")
}

pub fn recent_activity(user_id: &str) -> String {
    format!("user:{user_id}:recent_activity")
}
