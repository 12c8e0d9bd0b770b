// 7.0 config.rs: all settings in one place. margin ratios, engine limits, token, markets.
// 7.1 presets per environment. everything round-trips through json with decimal strings.

use serde::{Deserialize, Serialize};

use crate::engine::{Engine, EngineConfig, EngineError};
use crate::fixed::FixedDecimal;
use crate::margin::MarginParams;
use crate::market::MarketConfig;
use crate::types::{BlockTime, MarketId, TokenId};

// Collateral token every market settles in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteTokenConfig {
    pub id: TokenId,
    pub symbol: String,
    // None when the token does not report a precision
    pub decimals: Option<u8>,
}

impl Default for QuoteTokenConfig {
    fn default() -> Self {
        Self {
            id: TokenId(1),
            symbol: "USDC".to_string(),
            decimals: Some(6),
        }
    }
}

// The complete exchange configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub environment: Environment,
    pub engine: EngineConfig,
    pub quote_token: QuoteTokenConfig,
    pub markets: Vec<MarketConfig>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        let quote_token = QuoteTokenConfig::default();
        let markets = vec![MarketConfig::eth_perp(quote_token.id)];
        Self {
            environment: Environment::Development,
            engine: EngineConfig::default(),
            quote_token,
            markets,
        }
    }
}

impl ExchangeConfig {
    // Looser margins and no fluctuation limit for test deployments
    pub fn testnet() -> Self {
        let mut config = Self::default();
        config.environment = Environment::Testnet;
        config.engine.margin.initial_margin_ratio = FixedDecimal::from_raw(50_000_000_000_000_000); // 20x
        config.engine.margin.maintenance_margin_ratio = FixedDecimal::from_raw(25_000_000_000_000_000); // 2.5%
        for market in &mut config.markets {
            market.name = format!("{} Testnet", market.name);
        }
        config
    }

    // Conservative settings: 10x, fluctuation limit and position cap on every market
    pub fn mainnet_conservative() -> Self {
        let mut config = Self::default();
        config.environment = Environment::Mainnet;
        config.engine.margin = MarginParams::default();
        for market in &mut config.markets {
            market.amm.fluctuation_limit_ratio = FixedDecimal::from_raw(12_000_000_000_000_000); // 1.2%
            market.amm.max_holding_base = FixedDecimal::from_int(10);
            market.amm.toll_ratio = FixedDecimal::from_raw(500_000_000_000_000); // 0.05%
        }
        config
    }

    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        let margin = &self.engine.margin;
        let unit = |r: FixedDecimal| r.is_positive() && r < FixedDecimal::ONE;

        if !unit(margin.initial_margin_ratio) {
            return Err(ConfigError::InvalidMargin {
                reason: "initial margin ratio must be between 0 and 1".to_string(),
            });
        }
        // maintenance must be below initial or every new position is instantly liquidatable
        if !unit(margin.maintenance_margin_ratio) || margin.maintenance_margin_ratio > margin.initial_margin_ratio {
            return Err(ConfigError::InvalidMargin {
                reason: "maintenance margin ratio must be in (0, initial]".to_string(),
            });
        }
        if margin.liquidation_fee_ratio.is_negative() || margin.liquidation_fee_ratio >= FixedDecimal::ONE {
            return Err(ConfigError::InvalidMargin {
                reason: "liquidation fee ratio must be in [0, 1)".to_string(),
            });
        }
        if margin.partial_liquidation_ratio.is_negative() || margin.partial_liquidation_ratio > FixedDecimal::ONE {
            return Err(ConfigError::InvalidMargin {
                reason: "partial liquidation ratio must be in [0, 1]".to_string(),
            });
        }

        if self.engine.max_events == 0 {
            return Err(ConfigError::InvalidEngine {
                reason: "event log needs room for at least one event".to_string(),
            });
        }
        if self.engine.twap_pnl_interval_ms < 0 {
            return Err(ConfigError::InvalidEngine {
                reason: "twap interval must not be negative".to_string(),
            });
        }

        let mut seen: Vec<MarketId> = Vec::with_capacity(self.markets.len());
        for market in &self.markets {
            if seen.contains(&market.id) {
                return Err(ConfigError::InvalidMarket {
                    reason: format!("duplicate market id {}", market.id.0),
                });
            }
            seen.push(market.id);
            if market.quote_token != self.quote_token.id {
                return Err(ConfigError::InvalidMarket {
                    reason: format!("{} settles in an unknown token", market.name),
                });
            }
            market.validate()?;
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse { reason: e.to_string() })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse { reason: e.to_string() })
    }

    // Engine with the quote token registered and every market listed
    pub fn build_engine(&self, genesis: BlockTime) -> Result<Engine, EngineError> {
        self.validate()?;
        let mut engine = Engine::new(self.engine.clone(), genesis);
        engine.register_token(self.quote_token.id, &self.quote_token.symbol, self.quote_token.decimals);
        for market in &self.markets {
            engine.add_market(market.clone())?;
        }
        Ok(engine)
    }
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid margin: {reason}")]
    InvalidMargin { reason: String },

    #[error("invalid market: {reason}")]
    InvalidMarket { reason: String },

    #[error("invalid engine: {reason}")]
    InvalidEngine { reason: String },

    #[error("parse error: {reason}")]
    Parse { reason: String },
}

// Environment presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Testnet,
    Mainnet,
}

impl Environment {
    pub fn config(&self) -> ExchangeConfig {
        match self {
            Environment::Development => ExchangeConfig::default(),
            Environment::Testnet => ExchangeConfig::testnet(),
            Environment::Mainnet => ExchangeConfig::mainnet_conservative(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = ExchangeConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_testnet_config_valid() {
        let config = ExchangeConfig::testnet();
        assert!(config.validate().is_ok());
        assert!(config.engine.margin.leverage_allowed(FixedDecimal::from_int(20)).unwrap());
    }

    #[test]
    fn test_mainnet_config_valid() {
        let config = ExchangeConfig::mainnet_conservative();
        assert!(config.validate().is_ok());
        assert!(config.markets.iter().all(|m| m.amm.max_holding_base.is_positive()));
    }

    #[test]
    fn test_invalid_margin() {
        let mut config = ExchangeConfig::default();
        // maintenance above initial
        config.engine.margin.maintenance_margin_ratio = FixedDecimal::from_raw(200_000_000_000_000_000);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidMargin { .. })));
    }

    #[test]
    fn test_duplicate_market() {
        let mut config = ExchangeConfig::default();
        let dup = config.markets[0].clone();
        config.markets.push(dup);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidMarket { .. })));
    }

    #[test]
    fn test_environment_presets() {
        assert!(Environment::Development.config().validate().is_ok());
        assert!(Environment::Testnet.config().validate().is_ok());
        assert!(Environment::Mainnet.config().validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = ExchangeConfig::mainnet_conservative();
        let json = config.to_json().unwrap();
        let back = ExchangeConfig::from_json(&json).unwrap();
        assert_eq!(back.environment, Environment::Mainnet);
        assert_eq!(back.markets[0].amm.max_holding_base, FixedDecimal::from_int(10));
        assert_eq!(back.engine.margin, config.engine.margin);
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(ExchangeConfig::from_json("{"), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_build_engine() {
        let engine = ExchangeConfig::default().build_engine(BlockTime::genesis()).unwrap();
        assert!(engine.market(MarketId(1)).is_some());
    }
}
