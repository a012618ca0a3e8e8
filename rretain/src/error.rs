use serde::{Deserialize, Serialize};

use crate::topic::TopicError;
use crate::utils::NodeId;

pub type RetainResult<T> = std::result::Result<T, RetainError>;

/// Failures delivered through a [`crate::PendingResult`].
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetainError {
    /// Empty or malformed topic, rejected before the store is touched
    #[error("invalid topic, {0}")]
    InvalidTopic(String),
    /// Admission denied, the call had no side effect
    #[error("rate limit exceeded, caller: {0}")]
    RateLimitExceeded(String),
    /// Some peers did not answer a global read in time
    #[error("cluster timeout, no reply from nodes {0:?}")]
    ClusterTimeout(Vec<NodeId>),
    /// Storage or worker pool failure
    #[error("store unavailable, {0}")]
    StoreUnavailable(String),
    /// Retention limits (message count or payload size)
    #[error("quota exceeded, {0}")]
    QuotaExceeded(String),
}

impl RetainError {
    /// Soft failures still come with a usable, possibly incomplete result.
    #[inline]
    pub fn is_soft(&self) -> bool {
        matches!(self, RetainError::ClusterTimeout(_))
    }

    /// Level a failed call is logged at, node-side failures are warnings.
    #[inline]
    pub fn log_level(&self) -> log::Level {
        match self {
            RetainError::ClusterTimeout(_) | RetainError::StoreUnavailable(_) => log::Level::Warn,
            _ => log::Level::Debug,
        }
    }
}

impl From<TopicError> for RetainError {
    #[inline]
    fn from(e: TopicError) -> Self {
        RetainError::InvalidTopic(e.to_string())
    }
}

impl From<anyhow::Error> for RetainError {
    #[inline]
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<RetainError>() {
            Ok(e) => e,
            Err(e) => RetainError::StoreUnavailable(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions() {
        let e: RetainError = anyhow::anyhow!("disk gone").into();
        assert_eq!(e, RetainError::StoreUnavailable("disk gone".into()));

        let e: RetainError = anyhow::Error::new(RetainError::RateLimitExceeded("p1".into())).into();
        assert_eq!(e, RetainError::RateLimitExceeded("p1".into()));

        assert!(RetainError::ClusterTimeout(vec![2]).is_soft());
        assert!(!RetainError::InvalidTopic("".into()).is_soft());
        assert_eq!(RetainError::ClusterTimeout(vec![2, 3]).to_string(), "cluster timeout, no reply from nodes [2, 3]");
    }

    #[test]
    fn log_levels() {
        assert_eq!(RetainError::StoreUnavailable("pool closed".into()).log_level(), log::Level::Warn);
        assert_eq!(RetainError::ClusterTimeout(vec![2]).log_level(), log::Level::Warn);
        assert_eq!(RetainError::QuotaExceeded("full".into()).log_level(), log::Level::Debug);
        assert_eq!(RetainError::InvalidTopic("a/+".into()).log_level(), log::Level::Debug);
    }
}
