use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::anyhow;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

use crate::conf;
use crate::error::{RetainError, RetainResult};
use crate::types::CallerId;
use crate::Result;

/// Which bucket a call draws its token from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Read,
    Mutate,
}

/// Per-caller admission gate, one token bucket per caller and category.
pub struct Limiter {
    enable: bool,
    read: DefaultKeyedRateLimiter<CallerId>,
    mutate: DefaultKeyedRateLimiter<CallerId>,
}

impl Limiter {
    pub fn new(cfg: &conf::Limiter) -> Result<Self> {
        Ok(Self {
            enable: cfg.enable,
            read: RateLimiter::keyed(quota(cfg.read.burst, cfg.read.replenish_n_per)?),
            mutate: RateLimiter::keyed(quota(cfg.mutate.burst, cfg.mutate.replenish_n_per)?),
        })
    }

    #[inline]
    pub fn is_enable(&self) -> bool {
        self.enable
    }

    /// Take one token of `category` for `caller`.
    #[inline]
    pub fn check(&self, caller: &CallerId, category: Category) -> RetainResult<()> {
        if !self.enable {
            return Ok(());
        }
        let limiter = match category {
            Category::Read => &self.read,
            Category::Mutate => &self.mutate,
        };
        limiter.check_key(caller).map_err(|_| {
            log::debug!("{} rate limit exceeded, {:?}", caller, category);
            RetainError::RateLimitExceeded(caller.to_string())
        })
    }

    /// Forget callers whose buckets are full again.
    #[inline]
    pub fn retain_recent(&self) {
        self.read.retain_recent();
        self.mutate.retain_recent();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.read.len() + self.mutate.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//`burst` tokens, the whole bucket refilled within `replenish_n_per`
fn quota(burst: NonZeroU32, replenish_n_per: Duration) -> Result<Quota> {
    let period = replenish_n_per.as_nanos() as u64 / burst.get() as u64;
    let period = if period > 0 { Duration::from_nanos(period) } else { Duration::from_nanos(1) };
    log::debug!("burst: {:?}, {:?}, {:?}", burst, replenish_n_per, period);
    Ok(Quota::with_period(period).ok_or_else(|| anyhow!("period is 0"))?.allow_burst(burst))
}
