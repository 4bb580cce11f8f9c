use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cursor::{Cursor, DEFAULT_PAGE_SIZE, SortDirection};

/// Number of positional value columns on a policy rule.
pub const RULE_ARITY: usize = 6;

/// Positional slots `v0..v5`. An empty string is an unset slot.
pub type RuleValues = [String; RULE_ARITY];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    #[error("a rule holds at most 6 values, got {0}")]
    TooManyValues(usize),
    #[error("field index {index} with {count} values does not fit 6 slots")]
    InvalidFieldIndex { index: usize, count: usize },
    #[error("invalid policy line: {0}")]
    InvalidPolicyLine(String),
}

/// One stored row of the evaluator's normalized policy model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub id: String,
    pub ptype: String,
    pub values: RuleValues,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl PolicyRule {
    /// Values with trailing unset slots removed, as the evaluator sees them.
    pub fn tokens(&self) -> Vec<String> {
        trimmed_tokens(&self.values)
    }

    /// `ptype, v0, v1, ...` with trailing unset slots trimmed.
    pub fn to_policy_line(&self) -> String {
        let mut parts = vec![self.ptype.clone()];
        parts.extend(self.tokens());
        parts.join(", ")
    }

    pub fn cursor(&self) -> Cursor {
        Cursor::after(&self.id, self.created_at)
    }
}

impl fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.to_policy_line(), self.id)
    }
}

/// Copies up to six tokens into a fixed slot array.
pub fn rule_values<S: AsRef<str>>(tokens: &[S]) -> Result<RuleValues, RuleError> {
    if tokens.len() > RULE_ARITY {
        return Err(RuleError::TooManyValues(tokens.len()));
    }
    let mut values = RuleValues::default();
    for (slot, token) in values.iter_mut().zip(tokens) {
        *slot = token.as_ref().to_string();
    }
    Ok(values)
}

pub fn trimmed_tokens(values: &RuleValues) -> Vec<String> {
    let used = values
        .iter()
        .rposition(|v| !v.is_empty())
        .map_or(0, |last| last + 1);
    values[..used].to_vec()
}

/// Parses `p, alice, data1, read` into a ptype and its slots.
pub fn parse_policy_line(line: &str) -> Result<(String, RuleValues), RuleError> {
    let mut tokens = line.split(',').map(str::trim);
    let ptype = match tokens.next() {
        Some(p) if !p.is_empty() => p.to_string(),
        _ => return Err(RuleError::InvalidPolicyLine(line.to_string())),
    };
    let rest: Vec<&str> = tokens.collect();
    if rest.is_empty() {
        return Err(RuleError::InvalidPolicyLine(line.to_string()));
    }
    Ok((ptype, rule_values(&rest)?))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRule {
    pub ptype: String,
    pub values: RuleValues,
    pub created_by: Option<String>,
}

impl NewRule {
    pub fn new(ptype: impl Into<String>, values: RuleValues) -> Self {
        Self {
            ptype: ptype.into(),
            values,
            created_by: None,
        }
    }

    pub fn from_tokens<S: AsRef<str>>(
        ptype: impl Into<String>,
        tokens: &[S],
    ) -> Result<Self, RuleError> {
        Ok(Self::new(ptype, rule_values(tokens)?))
    }

    pub fn created_by(mut self, actor: impl Into<String>) -> Self {
        self.created_by = Some(actor.into());
        self
    }

    pub fn into_rule(self, id: String, at: DateTime<Utc>) -> PolicyRule {
        PolicyRule {
            id,
            ptype: self.ptype,
            values: self.values,
            created_by: self.created_by.clone(),
            created_at: at,
            updated_by: self.created_by,
            updated_at: at,
        }
    }
}

/// Conjunctive equality filter over `ptype, v0..v5`. `None` leaves a
/// column unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleFilter {
    pub ptype: Option<String>,
    pub values: [Option<String>; RULE_ARITY],
}

impl RuleFilter {
    pub fn for_ptype(ptype: impl Into<String>) -> Self {
        Self {
            ptype: Some(ptype.into()),
            ..Default::default()
        }
    }

    /// Every slot constrained, unset slots included.
    pub fn exact(ptype: impl Into<String>, values: &RuleValues) -> Self {
        Self {
            ptype: Some(ptype.into()),
            values: values.clone().map(Some),
        }
    }

    pub fn with_value(mut self, index: usize, value: impl Into<String>) -> Self {
        if let Some(slot) = self.values.get_mut(index) {
            *slot = Some(value.into());
        }
        self
    }

    /// Builds the filter for a partial tuple anchored at `field_index`.
    ///
    /// `values[0]` lands in slot `field_index`, `values[1]` in the next slot,
    /// and so on. Empty strings leave their slot unconstrained, as do all
    /// slots outside the shifted window.
    pub fn from_field_index<S: AsRef<str>>(
        ptype: impl Into<String>,
        field_index: usize,
        values: &[S],
    ) -> Result<Self, RuleError> {
        if field_index >= RULE_ARITY || values.len() > RULE_ARITY - field_index {
            return Err(RuleError::InvalidFieldIndex {
                index: field_index,
                count: values.len(),
            });
        }

        let at = |offset: usize| {
            values
                .get(offset)
                .map(|v| v.as_ref())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let slots = match field_index {
            0 => [at(0), at(1), at(2), at(3), at(4), at(5)],
            1 => [None, at(0), at(1), at(2), at(3), at(4)],
            2 => [None, None, at(0), at(1), at(2), at(3)],
            3 => [None, None, None, at(0), at(1), at(2)],
            4 => [None, None, None, None, at(0), at(1)],
            5 => [None, None, None, None, None, at(0)],
            _ => unreachable!("field index bounds checked above"),
        };

        Ok(Self {
            ptype: Some(ptype.into()),
            values: slots,
        })
    }

    pub fn matches(&self, rule: &PolicyRule) -> bool {
        if let Some(ref ptype) = self.ptype
            && ptype != &rule.ptype
        {
            return false;
        }
        self.values
            .iter()
            .zip(&rule.values)
            .all(|(want, have)| want.as_ref().is_none_or(|w| w == have))
    }

    pub fn has_value_constraints(&self) -> bool {
        self.values.iter().any(Option::is_some)
    }
}

/// Partial update of a rule. Only fields that were set are written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleUpdate {
    pub ptype: Option<String>,
    pub values: [Option<String>; RULE_ARITY],
    pub updated_by: Option<String>,
}

impl RuleUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ptype(mut self, ptype: impl Into<String>) -> Self {
        self.ptype = Some(ptype.into());
        self
    }

    pub fn v0(mut self, value: impl Into<String>) -> Self {
        self.values[0] = Some(value.into());
        self
    }

    pub fn v1(mut self, value: impl Into<String>) -> Self {
        self.values[1] = Some(value.into());
        self
    }

    pub fn v2(mut self, value: impl Into<String>) -> Self {
        self.values[2] = Some(value.into());
        self
    }

    pub fn v3(mut self, value: impl Into<String>) -> Self {
        self.values[3] = Some(value.into());
        self
    }

    pub fn v4(mut self, value: impl Into<String>) -> Self {
        self.values[4] = Some(value.into());
        self
    }

    pub fn v5(mut self, value: impl Into<String>) -> Self {
        self.values[5] = Some(value.into());
        self
    }

    pub fn updated_by(mut self, actor: impl Into<String>) -> Self {
        self.updated_by = Some(actor.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ptype.is_none() && self.values.iter().all(Option::is_none)
    }

    pub fn apply(&self, rule: &mut PolicyRule, at: DateTime<Utc>) {
        if let Some(ref ptype) = self.ptype {
            rule.ptype = ptype.clone();
        }
        for (slot, value) in rule.values.iter_mut().zip(&self.values) {
            if let Some(v) = value {
                *slot = v.clone();
            }
        }
        if self.updated_by.is_some() {
            rule.updated_by = self.updated_by.clone();
        }
        rule.updated_at = at;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleQuery {
    pub filter: RuleFilter,
    pub cursor: Option<Cursor>,
    pub direction: SortDirection,
    pub limit: usize,
}

impl Default for RuleQuery {
    fn default() -> Self {
        Self {
            filter: RuleFilter::default(),
            cursor: None,
            direction: SortDirection::Desc,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}
