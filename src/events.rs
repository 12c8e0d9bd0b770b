// 11.0: every state change produces an event. used for audit trails and for replaying what the
// clearing engine did. the EventPayload enum lists all event types. events from an operation
// that fails are discarded together with its state changes.

use crate::fixed::FixedDecimal;
use crate::types::{AccountId, MarketId, Timestamp, TokenId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub block_number: u64,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, block_number: u64, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            block_number,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    // Market lifecycle
    MarketAdded(MarketAddedEvent),
    LiquidityChanged(LiquidityChangedEvent),
    MarketShutdown(MarketShutdownEvent),

    // Position events
    PositionChanged(PositionChangedEvent),
    PositionAdjusted(PositionAdjustedEvent),
    PositionLiquidated(PositionLiquidatedEvent),
    PositionSettled(PositionSettledEvent),
    MarginChanged(MarginChangedEvent),

    // Funding
    FundingPaid(FundingPaidEvent),

    // Solvency
    BadDebt(BadDebtEvent),
    UnresolvedDebt(UnresolvedDebtEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketAddedEvent {
    pub market_id: MarketId,
    pub quote_token: TokenId,
    pub quote_reserve: FixedDecimal,
    pub base_reserve: FixedDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityChangedEvent {
    pub market_id: MarketId,
    pub quote_reserve: FixedDecimal,
    pub base_reserve: FixedDecimal,
    pub cumulative_notional: FixedDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketShutdownEvent {
    pub market_id: MarketId,
    pub settlement_price: FixedDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionChangedEvent {
    pub market_id: MarketId,
    pub account_id: AccountId,
    pub margin: FixedDecimal,
    pub exchanged_notional: FixedDecimal,
    pub exchanged_size: FixedDecimal,
    pub fee: FixedDecimal,
    pub position_size_after: FixedDecimal,
    pub realized_pnl: FixedDecimal,
    pub unrealized_pnl_after: FixedDecimal,
    pub bad_debt: FixedDecimal,
    pub liquidation_penalty: FixedDecimal,
    pub spot_price: FixedDecimal,
    pub funding_payment: FixedDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionAdjustedEvent {
    pub market_id: MarketId,
    pub account_id: AccountId,
    pub old_position_size: FixedDecimal,
    pub new_position_size: FixedDecimal,
    pub old_liquidity_index: usize,
    pub new_liquidity_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionLiquidatedEvent {
    pub market_id: MarketId,
    pub account_id: AccountId,
    pub liquidator: AccountId,
    pub exchanged_notional: FixedDecimal,
    pub exchanged_size: FixedDecimal,
    pub fee_to_liquidator: FixedDecimal,
    pub fee_to_insurance_fund: FixedDecimal,
    pub bad_debt: FixedDecimal,
    pub partial: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSettledEvent {
    pub market_id: MarketId,
    pub account_id: AccountId,
    pub value_transferred: FixedDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginChangedEvent {
    pub market_id: MarketId,
    pub account_id: AccountId,
    /// Positive when added, negative when removed.
    pub amount: FixedDecimal,
    pub funding_payment: FixedDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingPaidEvent {
    pub market_id: MarketId,
    pub premium_fraction: FixedDecimal,
    pub funding_rate: FixedDecimal,
    pub market_twap: FixedDecimal,
    pub oracle_twap: FixedDecimal,
    /// What the curve earned (positive) or owed (negative) as counterparty.
    pub amm_funding_profit: FixedDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BadDebtEvent {
    pub token: TokenId,
    pub debt_amount: FixedDecimal,
    pub from_prepaid: FixedDecimal,
    pub covered_by_insurance: FixedDecimal,
    pub unresolved: FixedDecimal,
}

/// A shortfall nobody could pay. Kept on the books, never silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnresolvedDebtEvent {
    pub token: TokenId,
    pub amount: FixedDecimal,
    pub reason: DebtReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebtReason {
    VaultShortfall,
    BadDebt,
    FundingShortfall,
    SettlementShortfall,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_for_audit() {
        let event = Event::new(
            EventId(1),
            Timestamp::from_millis(1000),
            3,
            EventPayload::UnresolvedDebt(UnresolvedDebtEvent {
                token: TokenId(1),
                amount: FixedDecimal::from_int(5),
                reason: DebtReason::VaultShortfall,
            }),
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("vault_shortfall"));
        assert!(json.contains("\"5\""));
    }

    #[test]
    fn liquidation_event() {
        let liq = PositionLiquidatedEvent {
            market_id: MarketId(1),
            account_id: AccountId(42),
            liquidator: AccountId(99),
            exchanged_notional: FixedDecimal::from_int(600),
            exchanged_size: FixedDecimal::from_int(-37),
            fee_to_liquidator: FixedDecimal::from_int(3),
            fee_to_insurance_fund: FixedDecimal::from_int(3),
            bad_debt: FixedDecimal::ZERO,
            partial: false,
        };
        assert!(liq.exchanged_size.is_negative());
    }
}
