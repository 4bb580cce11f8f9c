use warden_core::rule::RuleError;
use warden_storage::StorageError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("field index {index} with {count} values does not fit 6 slots")]
    InvalidFieldIndex { index: usize, count: usize },

    #[error("invalid policy line: {0}")]
    InvalidPolicyLine(String),

    #[error("rule has {0} values, at most 6 allowed")]
    TooManyValues(usize),
}

impl From<RuleError> for ServiceError {
    fn from(err: RuleError) -> Self {
        match err {
            RuleError::InvalidFieldIndex { index, count } => {
                ServiceError::InvalidFieldIndex { index, count }
            }
            RuleError::InvalidPolicyLine(line) => ServiceError::InvalidPolicyLine(line),
            RuleError::TooManyValues(n) => ServiceError::TooManyValues(n),
        }
    }
}

impl ServiceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::Storage(e) if e.is_not_found())
    }
}
