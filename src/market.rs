//! Market configuration and state.
//!
//! A market is one virtual curve plus the positions opened against it. Collateral for every
//! market lives in the shared vault; the market only tracks who owns what exposure.

use crate::amm::{Amm, AmmParams};
use crate::config::ConfigError;
use crate::curve::CurveError;
use crate::fixed::FixedDecimal;
use crate::position::Position;
use crate::types::{AccountId, BlockTime, MarketId, TokenId, MILLIS_PER_HOUR};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Static market configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    pub id: MarketId,
    /// Human-readable name (e.g., "ETH-PERP")
    pub name: String,
    /// Collateral and settlement token
    pub quote_token: TokenId,
    /// Key the oracle knows the index price under
    pub price_feed_key: String,
    pub amm: AmmParams,
}

impl MarketConfig {
    /// Small ETH-PERP curve (1000 quote, 100 base), hourly funding. Used by the simulator.
    pub fn eth_perp(quote_token: TokenId) -> Self {
        Self {
            id: MarketId(1),
            name: "ETH-PERP".to_string(),
            quote_token,
            price_feed_key: "ETH".to_string(),
            amm: AmmParams {
                quote_reserve: FixedDecimal::from_int(1_000),
                base_reserve: FixedDecimal::from_int(100),
                toll_ratio: FixedDecimal::ZERO,
                spread_ratio: FixedDecimal::from_raw(1_000_000_000_000_000), // 0.1%
                fluctuation_limit_ratio: FixedDecimal::ZERO,
                trade_limit_ratio: FixedDecimal::from_raw(900_000_000_000_000_000), // 90%
                max_holding_base: FixedDecimal::ZERO,
                open_interest_notional_cap: FixedDecimal::ZERO,
                funding_period_ms: MILLIS_PER_HOUR,
                spot_price_twap_interval_ms: MILLIS_PER_HOUR,
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidMarket {
            reason: format!("{}: {}", self.name, reason),
        };
        let amm = &self.amm;
        if !amm.quote_reserve.is_positive() || !amm.base_reserve.is_positive() {
            return Err(invalid("reserves must be positive"));
        }
        let ratios = [
            amm.toll_ratio,
            amm.spread_ratio,
            amm.fluctuation_limit_ratio,
            amm.trade_limit_ratio,
        ];
        if ratios.iter().any(|r| r.is_negative() || *r > FixedDecimal::ONE) {
            return Err(invalid("ratios must be within [0, 1]"));
        }
        if amm.max_holding_base.is_negative() || amm.open_interest_notional_cap.is_negative() {
            return Err(invalid("caps must not be negative"));
        }
        if amm.funding_period_ms <= 0 {
            return Err(invalid("funding period must be positive"));
        }
        if amm.spot_price_twap_interval_ms < 0 {
            return Err(invalid("twap interval must not be negative"));
        }
        if self.price_feed_key.is_empty() {
            return Err(invalid("price feed key is empty"));
        }
        Ok(())
    }
}

/// Dynamic market state
#[derive(Debug, Clone)]
pub struct MarketState {
    pub config: MarketConfig,
    pub amm: Amm,
    pub positions: HashMap<AccountId, Position>,
    /// Sum of open notional entered, clamped at zero.
    pub open_interest_notional: FixedDecimal,
    /// Block of the last liquidation on this market.
    pub last_restriction_block: Option<u64>,
    /// Block of each trader's last open, close or liquidation. Outlives the position itself.
    pub last_action_blocks: HashMap<AccountId, u64>,
}

impl MarketState {
    pub fn new(config: MarketConfig, now: BlockTime) -> Result<Self, CurveError> {
        let amm = Amm::new(&config.amm, now)?;
        Ok(Self {
            config,
            amm,
            positions: HashMap::new(),
            open_interest_notional: FixedDecimal::ZERO,
            last_restriction_block: None,
            last_action_blocks: HashMap::new(),
        })
    }

    pub fn id(&self) -> MarketId {
        self.config.id
    }

    /// Stored position, or an empty one.
    pub fn position(&self, account: AccountId) -> Position {
        self.positions.get(&account).copied().unwrap_or_default()
    }

    // empty positions are dropped from storage
    pub fn set_position(&mut self, account: AccountId, position: Position) {
        if position.is_empty() {
            self.positions.remove(&account);
        } else {
            self.positions.insert(account, position);
        }
    }

    pub fn clear_position(&mut self, account: AccountId) {
        self.positions.remove(&account);
    }

    pub fn open_position_count(&self) -> usize {
        self.positions.values().filter(|p| p.has_size()).count()
    }

    pub fn enter_restriction_mode(&mut self, block_number: u64) {
        self.last_restriction_block = Some(block_number);
    }

    pub fn is_restricted(&self, block_number: u64) -> bool {
        self.last_restriction_block == Some(block_number)
    }

    pub fn record_action(&mut self, account: AccountId, block_number: u64) {
        self.last_action_blocks.insert(account, block_number);
    }

    // after a liquidation, a trader gets one open or close per block on this market
    pub fn action_allowed(&self, account: AccountId, block_number: u64) -> bool {
        !self.is_restricted(block_number) || self.last_action_blocks.get(&account) != Some(&block_number)
    }

    /// Applies `delta` to open interest. Returns the new total, clamped at zero.
    pub fn apply_open_interest(&mut self, delta: FixedDecimal) -> Result<FixedDecimal, CurveError> {
        let updated = self.open_interest_notional.try_add(delta)?.non_negative();
        self.open_interest_notional = updated;
        Ok(updated)
    }
}
