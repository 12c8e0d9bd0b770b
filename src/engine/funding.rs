//! Funding settlement.

use super::core::Engine;
use super::results::{EngineError, FundingResult};
use crate::events::{DebtReason, EventPayload, FundingPaidEvent};
use crate::funding::amm_funding_profit;
use crate::price_feed::{OracleError, PriceFeed};
use crate::types::MarketId;
use tracing::{info, warn};

impl Engine {
    /// Settles one funding period for a market.
    ///
    /// Positions pick up their share lazily on their next touch. What happens here is the curve's
    /// own side: as counterparty to net open interest it either earns funding, which goes to the
    /// insurance fund, or owes it, which the insurance fund pays into the vault.
    pub fn pay_funding(&mut self, market_id: MarketId, oracle: &dyn PriceFeed) -> Result<FundingResult, EngineError> {
        self.atomically(|engine| {
            let now = engine.clock.timestamp;
            let (key, interval) = {
                let market = engine.market_ref(market_id)?;
                if !market.amm.is_open() {
                    return Err(EngineError::MarketClosed);
                }
                if now < market.amm.next_funding_time() {
                    return Err(EngineError::FundingTooEarly);
                }
                (market.config.price_feed_key.clone(), market.config.amm.spot_price_twap_interval_ms)
            };
            let oracle_twap = oracle.twap(&key, interval, now)?;
            if !oracle_twap.is_positive() {
                return Err(OracleError::NoPrice(key).into());
            }

            let (settlement, profit) = {
                let market = engine.market_mut(market_id)?;
                let settlement = market.amm.settle_funding(oracle_twap, now)?;
                let profit = amm_funding_profit(settlement.premium_fraction, market.amm.total_position_size())?;
                (settlement, profit)
            };

            let token = engine.quote_token(market_id)?;
            if profit.is_positive() {
                engine.transfer_to_insurance_fund(token, profit)?;
            } else if profit.is_negative() {
                let owed = profit.abs();
                let covered = engine.insurance_fund.cover_shortfall(&mut engine.ledger, token, owed)?;
                let uncovered = owed.try_sub(covered)?;
                if uncovered.is_positive() {
                    warn!(market = market_id.0, %owed, %covered, "insurance fund short on funding");
                    engine.record_unresolved_debt(token, uncovered, DebtReason::FundingShortfall)?;
                }
            }

            info!(
                market = market_id.0,
                premium_fraction = %settlement.premium_fraction,
                funding_rate = %settlement.funding_rate,
                %profit,
                "funding paid"
            );
            engine.emit_event(EventPayload::FundingPaid(FundingPaidEvent {
                market_id,
                premium_fraction: settlement.premium_fraction,
                funding_rate: settlement.funding_rate,
                market_twap: settlement.market_twap,
                oracle_twap: settlement.oracle_twap,
                amm_funding_profit: profit,
            }));

            Ok(FundingResult {
                market_id,
                premium_fraction: settlement.premium_fraction,
                funding_rate: settlement.funding_rate,
                market_twap: settlement.market_twap,
                oracle_twap: settlement.oracle_twap,
                amm_funding_profit: profit,
                next_funding_time: settlement.next_funding_time,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::fixed::FixedDecimal;
    use crate::market::MarketConfig;
    use crate::price_feed::MockPriceFeed;
    use crate::token::Holder;
    use crate::types::{AccountId, BlockTime, Side, Timestamp, TokenId, MILLIS_PER_HOUR};

    const USDC: TokenId = TokenId(1);
    const ALICE: AccountId = AccountId(1);

    fn fx(s: &str) -> FixedDecimal {
        s.parse().unwrap()
    }

    fn setup() -> (Engine, MarketId) {
        let mut engine = Engine::new(EngineConfig::default(), BlockTime::genesis());
        engine.register_token(USDC, "USDC", Some(18));
        let mut config = MarketConfig::eth_perp(USDC);
        config.amm.spread_ratio = FixedDecimal::ZERO;
        let id = engine.add_market(config).unwrap();
        engine.mint(USDC, ALICE, fx("1000")).unwrap();
        (engine, id)
    }

    #[test]
    fn too_early_is_rejected() {
        let (mut engine, id) = setup();
        let mut oracle = MockPriceFeed::new(0);
        oracle.set_price("ETH", fx("10"), Timestamp::from_millis(0));
        engine.advance_time(60_000);
        assert_eq!(engine.pay_funding(id, &oracle), Err(EngineError::FundingTooEarly));
    }

    #[test]
    fn missing_oracle_price_is_an_error() {
        let (mut engine, id) = setup();
        let oracle = MockPriceFeed::new(0);
        engine.advance_time(MILLIS_PER_HOUR);
        assert!(matches!(
            engine.pay_funding(id, &oracle),
            Err(EngineError::StaleOrMissingPriceData(_))
        ));
    }

    #[test]
    fn longs_pay_when_the_curve_trades_rich() {
        let (mut engine, id) = setup();
        engine.advance_time(1);
        // 37.5 long moves the curve to 25.6 while the index stays at 10
        engine
            .open_position(id, ALICE, Side::Long, fx("60"), fx("10"), FixedDecimal::ZERO)
            .unwrap();
        let mut oracle = MockPriceFeed::new(0);
        oracle.set_price("ETH", fx("10"), Timestamp::from_millis(0));
        engine.advance_time(MILLIS_PER_HOUR);

        let result = engine.pay_funding(id, &oracle).unwrap();
        assert!(result.premium_fraction.is_positive());
        // the curve is short 37.5 base, so it earns what the long pays
        assert_eq!(
            result.amm_funding_profit,
            result.premium_fraction.try_mul(fx("37.5")).unwrap()
        );
        assert!(engine.balance_of(USDC, Holder::InsuranceFund).unwrap().is_positive());

        // the long's margin only moves on its next touch
        let current = engine.current_position(id, ALICE).unwrap();
        let stored = engine.position(id, ALICE).unwrap();
        assert_eq!(stored.margin, fx("60"));
        assert_eq!(current.margin, fx("60").try_sub(result.amm_funding_profit).unwrap());
    }
}
