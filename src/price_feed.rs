// Price Feed Integration
//
// The engine reads the index price through this trait only, once per funding settlement.
// Which oracle network sits behind it is not the engine's concern. A feed answers by
// market key and must be able to refuse: stale data and too little history are errors,
// never a silently wrong price.

use crate::fixed::FixedDecimal;
use crate::types::Timestamp;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("no price for {0}")]
    NoPrice(String),

    #[error("price for {key} is {age_ms}ms old")]
    Stale { key: String, age_ms: i64 },

    #[error("not enough history for a {interval_ms}ms twap of {key}")]
    NotEnoughHistory { key: String, interval_ms: i64 },
}

/// Index price source. Implement this to plug an oracle network into funding.
pub trait PriceFeed {
    /// Latest price for `key` as of `now`.
    fn price(&self, key: &str, now: Timestamp) -> Result<FixedDecimal, OracleError>;

    /// Time weighted price over the `interval_ms` ending at `now`.
    fn twap(&self, key: &str, interval_ms: i64, now: Timestamp) -> Result<FixedDecimal, OracleError>;
}

const MAX_SAMPLES: usize = 1_000;

/// In-memory feed for tests and simulations. Prices are pushed by hand.
#[derive(Debug, Clone)]
pub struct MockPriceFeed {
    max_age_ms: i64,
    samples: HashMap<String, VecDeque<(Timestamp, FixedDecimal)>>,
}

impl MockPriceFeed {
    pub fn new(max_age_ms: i64) -> Self {
        Self {
            max_age_ms,
            samples: HashMap::new(),
        }
    }

    /// Samples must arrive in time order per key.
    pub fn set_price(&mut self, key: &str, price: FixedDecimal, at: Timestamp) {
        let history = self.samples.entry(key.to_string()).or_default();
        match history.back_mut() {
            Some(last) if last.0 == at => last.1 = price,
            _ => history.push_back((at, price)),
        }
        while history.len() > MAX_SAMPLES {
            history.pop_front();
        }
    }

    pub fn sample_count(&self, key: &str) -> usize {
        self.samples.get(key).map_or(0, VecDeque::len)
    }

    fn fresh_history(&self, key: &str, now: Timestamp) -> Result<&VecDeque<(Timestamp, FixedDecimal)>, OracleError> {
        let history = self
            .samples
            .get(key)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| OracleError::NoPrice(key.to_string()))?;
        if let Some((ts, _)) = history.back() {
            let age_ms = now.as_millis() - ts.as_millis();
            if self.max_age_ms > 0 && age_ms > self.max_age_ms {
                return Err(OracleError::Stale {
                    key: key.to_string(),
                    age_ms,
                });
            }
        }
        Ok(history)
    }
}

impl PriceFeed for MockPriceFeed {
    fn price(&self, key: &str, now: Timestamp) -> Result<FixedDecimal, OracleError> {
        let history = self.fresh_history(key, now)?;
        history
            .back()
            .map(|(_, price)| *price)
            .ok_or_else(|| OracleError::NoPrice(key.to_string()))
    }

    fn twap(&self, key: &str, interval_ms: i64, now: Timestamp) -> Result<FixedDecimal, OracleError> {
        let history = self.fresh_history(key, now)?;
        let not_enough = || OracleError::NotEnoughHistory {
            key: key.to_string(),
            interval_ms,
        };
        let Some(&(_, latest)) = history.back() else {
            return Err(OracleError::NoPrice(key.to_string()));
        };
        if interval_ms <= 0 {
            return Ok(latest);
        }

        let start = now.as_millis() - interval_ms;
        match history.front() {
            Some((first, _)) if first.as_millis() <= start => {}
            _ => return Err(not_enough()),
        }

        // each sample holds until the next one, the last one until now
        let mut weighted = FixedDecimal::ZERO;
        let mut until = now.as_millis();
        for (ts, price) in history.iter().rev() {
            let from = ts.as_millis().max(start);
            if until > from {
                let held = price.try_mul_int((until - from) as i128).map_err(|_| not_enough())?;
                weighted = weighted.try_add(held).map_err(|_| not_enough())?;
            }
            if ts.as_millis() <= start {
                break;
            }
            until = ts.as_millis();
        }
        weighted.try_div_int(interval_ms as i128).map_err(|_| not_enough())
    }
}
