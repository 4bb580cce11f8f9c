use std::collections::BTreeMap;
use std::future::Future;

use warden_core::rule::{NewRule, RuleFilter, parse_policy_line, rule_values, trimmed_tokens};
use warden_storage::{CacheClient, RuleStore};

use crate::audit::{
    audit_policy_added, audit_policy_filtered_removed, audit_policy_removed, audit_policy_saved,
};
use crate::error::ServiceError;
use crate::repository::PolicyRuleRepository;

/// The evaluator's in-memory rule set, as seen by the adapter.
pub trait PolicyModel: Send + Sync {
    /// Adds one rule from a `ptype, v0, v1, ...` line.
    fn add_policy_line(&mut self, line: &str) -> Result<(), ServiceError>;

    /// Adds one rule from its values, taken verbatim.
    fn add_policy_tokens(&mut self, ptype: &str, tokens: Vec<String>) -> Result<(), ServiceError>;

    /// Rules of one ptype as token lists.
    fn policies(&self, ptype: &str) -> Vec<Vec<String>>;

    fn ptypes(&self) -> Vec<String>;

    fn clear(&mut self);
}

/// Plain rule set keyed by ptype.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryPolicyModel {
    rules: BTreeMap<String, Vec<Vec<String>>>,
}

impl MemoryPolicyModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, ptype: impl Into<String>, tokens: Vec<String>) {
        self.rules.entry(ptype.into()).or_default().push(tokens);
    }

    pub fn len(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds every policy line of a text document. Blank lines and `#`
    /// comments are skipped. Returns the number of rules added.
    pub fn add_policy_text(&mut self, text: &str) -> Result<usize, ServiceError> {
        let mut added = 0;
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            self.add_policy_line(line)?;
            added += 1;
        }
        Ok(added)
    }

    /// Every rule as a policy line, sorted.
    pub fn lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .rules
            .iter()
            .flat_map(|(ptype, rules)| {
                rules.iter().map(move |tokens| {
                    let mut parts = vec![ptype.clone()];
                    parts.extend(tokens.iter().cloned());
                    parts.join(", ")
                })
            })
            .collect();
        lines.sort();
        lines
    }
}

impl PolicyModel for MemoryPolicyModel {
    fn add_policy_line(&mut self, line: &str) -> Result<(), ServiceError> {
        let (ptype, values) = parse_policy_line(line)?;
        self.add(ptype, trimmed_tokens(&values));
        Ok(())
    }

    fn add_policy_tokens(&mut self, ptype: &str, tokens: Vec<String>) -> Result<(), ServiceError> {
        rule_values(&tokens)?;
        self.add(ptype, tokens);
        Ok(())
    }

    fn policies(&self, ptype: &str) -> Vec<Vec<String>> {
        self.rules.get(ptype).cloned().unwrap_or_default()
    }

    fn ptypes(&self) -> Vec<String> {
        self.rules.keys().cloned().collect()
    }

    fn clear(&mut self) {
        self.rules.clear();
    }
}

/// Persistence contract the policy evaluator calls back through.
///
/// `sec` is the model section (`p` or `g`); rules are stored by ptype only.
pub trait PolicyAdapter: Send + Sync {
    fn load_policy<M: PolicyModel>(
        &self,
        model: &mut M,
    ) -> impl Future<Output = Result<(), ServiceError>> + Send;

    fn load_filtered_policy<M: PolicyModel>(
        &self,
        model: &mut M,
        filter: &RuleFilter,
    ) -> impl Future<Output = Result<(), ServiceError>> + Send;

    /// Replaces every stored rule with the model's rules.
    fn save_policy<M: PolicyModel>(
        &self,
        model: &M,
    ) -> impl Future<Output = Result<(), ServiceError>> + Send;

    fn add_policy(
        &self,
        sec: &str,
        ptype: &str,
        rule: &[String],
    ) -> impl Future<Output = Result<(), ServiceError>> + Send;

    fn add_policies(
        &self,
        sec: &str,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> impl Future<Output = Result<(), ServiceError>> + Send;

    /// Deletes the first rule matching the exact tuple. Returns whether one
    /// was found.
    fn remove_policy(
        &self,
        sec: &str,
        ptype: &str,
        rule: &[String],
    ) -> impl Future<Output = Result<bool, ServiceError>> + Send;

    fn remove_policies(
        &self,
        sec: &str,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> impl Future<Output = Result<usize, ServiceError>> + Send;

    /// Deletes every rule whose slots from `field_index` on match `values`.
    fn remove_filtered_policy(
        &self,
        sec: &str,
        ptype: &str,
        field_index: usize,
        values: &[String],
    ) -> impl Future<Output = Result<usize, ServiceError>> + Send;
}

pub struct StorePolicyAdapter<S, C> {
    rules: PolicyRuleRepository<S, C>,
}

impl<S, C> StorePolicyAdapter<S, C>
where
    S: RuleStore + 'static,
    C: CacheClient + 'static,
{
    pub fn new(rules: PolicyRuleRepository<S, C>) -> Self {
        Self { rules }
    }

    pub fn repository(&self) -> &PolicyRuleRepository<S, C> {
        &self.rules
    }

    async fn load_matching<M: PolicyModel>(
        &self,
        model: &mut M,
        filter: &RuleFilter,
    ) -> Result<(), ServiceError> {
        let rules = self.rules.find(filter).await?;
        let mut loaded = 0usize;
        for rule in &rules {
            let tokens = rule.tokens();
            if tokens.is_empty() {
                tracing::warn!(
                    rule_id = %rule.id,
                    ptype = %rule.ptype,
                    "skipping rule without values"
                );
                continue;
            }
            model.add_policy_tokens(&rule.ptype, tokens)?;
            loaded += 1;
        }
        tracing::debug!(loaded, "policy loaded");
        Ok(())
    }
}

impl<S, C> PolicyAdapter for StorePolicyAdapter<S, C>
where
    S: RuleStore + 'static,
    C: CacheClient + 'static,
{
    async fn load_policy<M: PolicyModel>(&self, model: &mut M) -> Result<(), ServiceError> {
        self.load_matching(model, &RuleFilter::default()).await
    }

    async fn load_filtered_policy<M: PolicyModel>(
        &self,
        model: &mut M,
        filter: &RuleFilter,
    ) -> Result<(), ServiceError> {
        self.load_matching(model, filter).await
    }

    async fn save_policy<M: PolicyModel>(&self, model: &M) -> Result<(), ServiceError> {
        let mut rules = Vec::new();
        for ptype in model.ptypes() {
            for tokens in model.policies(&ptype) {
                rules.push(NewRule::from_tokens(ptype.clone(), &tokens)?);
            }
        }

        let replaced = self.rules.replace_all(rules).await?;
        audit_policy_saved(replaced.removed.len(), replaced.inserted.len());
        Ok(())
    }

    async fn add_policy(
        &self,
        sec: &str,
        ptype: &str,
        rule: &[String],
    ) -> Result<(), ServiceError> {
        tracing::debug!(sec, ptype, "adding policy");
        self.rules.create(NewRule::from_tokens(ptype, rule)?).await?;
        audit_policy_added(ptype, 1);
        Ok(())
    }

    async fn add_policies(
        &self,
        sec: &str,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> Result<(), ServiceError> {
        tracing::debug!(sec, ptype, count = rules.len(), "adding policies");
        let new_rules = rules
            .iter()
            .map(|tokens| NewRule::from_tokens(ptype, tokens))
            .collect::<Result<Vec<_>, _>>()?;
        let created = self.rules.create_many(new_rules).await?;
        audit_policy_added(ptype, created.len());
        Ok(())
    }

    async fn remove_policy(
        &self,
        sec: &str,
        ptype: &str,
        rule: &[String],
    ) -> Result<bool, ServiceError> {
        tracing::debug!(sec, ptype, "removing policy");
        let filter = RuleFilter::exact(ptype, &rule_values(rule)?);
        let Some(first) = self.rules.find(&filter).await?.into_iter().next() else {
            return Ok(false);
        };

        self.rules.delete(&first.id).await?;
        audit_policy_removed(ptype, 1);
        Ok(true)
    }

    async fn remove_policies(
        &self,
        sec: &str,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> Result<usize, ServiceError> {
        let mut removed = 0;
        for rule in rules {
            if self.remove_policy(sec, ptype, rule).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn remove_filtered_policy(
        &self,
        sec: &str,
        ptype: &str,
        field_index: usize,
        values: &[String],
    ) -> Result<usize, ServiceError> {
        let filter = RuleFilter::from_field_index(ptype, field_index, values)?;
        if !filter.has_value_constraints() {
            tracing::warn!(
                sec,
                ptype,
                field_index,
                "filtered removal without values deletes every rule of the ptype"
            );
        }

        let removed = self.rules.delete_filtered(&filter).await?;
        audit_policy_filtered_removed(ptype, field_index, removed);
        Ok(removed)
    }
}
