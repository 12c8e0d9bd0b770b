//! Property-based tests for stress testing core math.
//!
//! These tests verify invariants hold under random inputs.

use proptest::prelude::*;
use vamm_core::curve::{input_price_with_reserves, output_price_with_reserves, reserves_after, spot_price};
use vamm_core::funding::funding_payment;
use vamm_core::margin::calc_remain_margin;
use vamm_core::*;

// Strategies for generating test data
fn reserve_strategy() -> impl Strategy<Value = FixedDecimal> {
    (1_000i64..10_000_000i64).prop_map(FixedDecimal::from_int)
}

fn amount_strategy() -> impl Strategy<Value = FixedDecimal> {
    (1i64..90_000i64).prop_map(|cents| FixedDecimal::from_raw(cents as i128 * 10_000_000_000_000_000))
}

fn signed_strategy() -> impl Strategy<Value = FixedDecimal> {
    (-1_000_000i64..1_000_000i64).prop_map(|x| FixedDecimal::from_raw(x as i128 * 1_000_000_000_000))
}

fn multiplier_strategy() -> impl Strategy<Value = FixedDecimal> {
    (1i64..1_000i64).prop_map(|x| FixedDecimal::from_raw(x as i128 * 10_000_000_000_000_000)) // 0.01 to 9.99
}

fn product(quote: FixedDecimal, base: FixedDecimal) -> FixedDecimal {
    quote.try_mul(base).unwrap()
}

proptest! {
    /// A long never leaves the curve with less than K
    #[test]
    fn buying_base_keeps_invariant(
        quote in reserve_strategy(),
        base in reserve_strategy(),
        amount in amount_strategy(),
    ) {
        let k = product(quote, base);
        let bought = input_price_with_reserves(Dir::AddToAmm, amount, quote, base).unwrap();
        let (q, b) = reserves_after(Dir::AddToAmm, amount, bought, quote, base).unwrap();
        prop_assert!(product(q, b) >= k);
    }

    /// Neither does a short, even when the base owed rounds up
    #[test]
    fn selling_base_keeps_invariant(
        quote in reserve_strategy(),
        base in reserve_strategy(),
        amount in amount_strategy(),
    ) {
        prop_assume!(amount < quote);
        let k = product(quote, base);
        let owed = input_price_with_reserves(Dir::RemoveFromAmm, amount, quote, base).unwrap();
        let (q, b) = reserves_after(Dir::RemoveFromAmm, amount, owed, quote, base).unwrap();
        prop_assert!(product(q, b) >= k);
    }

    /// Buying and selling straight back never returns more quote than was paid
    #[test]
    fn round_trip_never_profits(
        quote in reserve_strategy(),
        base in reserve_strategy(),
        amount in amount_strategy(),
    ) {
        let bought = input_price_with_reserves(Dir::AddToAmm, amount, quote, base).unwrap();
        prop_assume!(bought.is_positive());
        let (q, b) = reserves_after(Dir::AddToAmm, amount, bought, quote, base).unwrap();
        let returned = output_price_with_reserves(Dir::AddToAmm, bought, q, b).unwrap();
        prop_assert!(returned <= amount);
    }

    /// Scaling both reserves by the same multiplier leaves spot price alone
    #[test]
    fn migration_keeps_spot_price(
        quote in reserve_strategy(),
        base in reserve_strategy(),
        multiplier in multiplier_strategy(),
    ) {
        let before = spot_price(quote, base).unwrap();
        let after = spot_price(quote.try_mul(multiplier).unwrap(), base.try_mul(multiplier).unwrap()).unwrap();
        prop_assert_eq!(before, after);
    }

    /// What is left plus what nobody covers accounts for the whole change
    #[test]
    fn remain_margin_accounts_for_everything(
        margin in amount_strategy(),
        delta in signed_strategy(),
    ) {
        let (remain, bad_debt) = calc_remain_margin(margin, delta).unwrap();
        prop_assert!(!remain.is_negative());
        prop_assert!(!bad_debt.is_negative());
        prop_assert!(remain.is_zero() || bad_debt.is_zero());
        prop_assert_eq!(remain.try_sub(bad_debt).unwrap(), margin.try_add(delta).unwrap());
    }

    /// Longs and shorts of the same size pay each other exactly
    #[test]
    fn funding_zero_sum(
        size in amount_strategy(),
        checkpoint in signed_strategy(),
        latest in signed_strategy(),
    ) {
        let long = funding_payment(size, checkpoint, latest).unwrap();
        let short = funding_payment(size.try_neg().unwrap(), checkpoint, latest).unwrap();
        prop_assert_eq!(long.try_add(short).unwrap(), FixedDecimal::ZERO);
    }

    /// The liquidator gets half the penalty, never more
    #[test]
    fn penalty_split_is_complete(
        notional in amount_strategy(),
        ratio in 0i64..1_000i64,
    ) {
        let fee_ratio = FixedDecimal::from_raw(ratio as i128 * 100_000_000_000_000);
        let penalty = calculate_liquidation_penalty(notional, fee_ratio).unwrap();
        prop_assert_eq!(
            penalty.liquidator_reward.try_add(penalty.insurance_contribution).unwrap(),
            penalty.total
        );
        prop_assert!(penalty.liquidator_reward <= penalty.insurance_contribution);
    }

    /// Either the margin pays the reward and the rest goes to the reserve, or it falls short
    #[test]
    fn full_liquidation_split(
        remain in amount_strategy(),
        reward in amount_strategy(),
    ) {
        let split = split_remaining_margin(remain, reward).unwrap();
        prop_assert!(split.liquidation_bad_debt.is_zero() || split.remain_to_reserve.is_zero());
        prop_assert_eq!(
            split.remain_to_reserve.try_sub(split.liquidation_bad_debt).unwrap(),
            remain.try_sub(reward).unwrap()
        );
    }

    /// Opening and closing straight away never pays the trader and always restores base
    #[test]
    fn engine_round_trip(
        margin in 1i64..80i64,
        leverage in 1i64..=10i64,
        short in any::<bool>(),
    ) {
        let usdc = TokenId(1);
        let trader = AccountId(1);
        let mut engine = Engine::new(EngineConfig::default(), BlockTime::genesis());
        engine.register_token(usdc, "USDC", Some(18));
        let mut config = MarketConfig::eth_perp(usdc);
        config.amm.spread_ratio = FixedDecimal::ZERO;
        config.amm.trade_limit_ratio = FixedDecimal::ZERO;
        let id = engine.add_market(config).unwrap();
        engine.mint(usdc, trader, FixedDecimal::from_int(1_000)).unwrap();
        engine.advance_time(15_000);

        let side = if short { Side::Short } else { Side::Long };
        engine
            .open_position(id, trader, side, FixedDecimal::from_int(margin), FixedDecimal::from_int(leverage), FixedDecimal::ZERO)
            .unwrap();
        engine.close_position(id, trader, FixedDecimal::ZERO).unwrap();

        let amm = &engine.market(id).unwrap().amm;
        prop_assert_eq!(amm.base_reserve(), FixedDecimal::from_int(100));
        prop_assert!(amm.quote_reserve() >= FixedDecimal::from_int(1_000));
        prop_assert_eq!(amm.total_position_size(), FixedDecimal::ZERO);
        prop_assert!(engine.balance_of(usdc, Holder::Trader(trader)).unwrap() <= FixedDecimal::from_int(1_000));
        prop_assert!(engine.position(id, trader).unwrap().is_empty());
    }
}
