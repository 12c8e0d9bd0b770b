// 2.3: the virtual curve. owns the paired reserves of one market and everything that moves them:
// swaps with trading/slippage/fluctuation limits, per-block reserve snapshots, twap,
// funding index, liquidity migration epochs and one-shot shutdown.
// the clearing engine is the only caller; traders never touch reserves directly.

use crate::curve::{self, CurveError};
use crate::fixed::FixedDecimal;
use crate::snapshots::{LiquidityChangedSnapshot, ReserveHistory, ReserveSnapshot};
use crate::types::{AccountId, BlockTime, Dir, Timestamp, MILLIS_PER_DAY};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Open interest below this many raw units counts as none at shutdown.
pub const IGNORABLE_DIGIT_FOR_SHUTDOWN: i128 = 100;

/// Which side of the pair a swap amount is denominated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapAmount {
    /// Quote in or out, base is computed.
    Quote(FixedDecimal),
    /// Base in or out, quote is computed.
    Base(FixedDecimal),
}

/// Static parameters a curve is created with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmmParams {
    pub quote_reserve: FixedDecimal,
    pub base_reserve: FixedDecimal,
    pub toll_ratio: FixedDecimal,
    pub spread_ratio: FixedDecimal,
    pub fluctuation_limit_ratio: FixedDecimal,
    /// Max fraction of a reserve one swap may drain. Zero disables.
    pub trade_limit_ratio: FixedDecimal,
    /// Max absolute base a non-whitelisted trader may hold. Zero disables.
    pub max_holding_base: FixedDecimal,
    /// Max total open notional. Zero disables.
    pub open_interest_notional_cap: FixedDecimal,
    pub funding_period_ms: i64,
    pub spot_price_twap_interval_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingSettlement {
    pub premium_fraction: FixedDecimal,
    pub market_twap: FixedDecimal,
    pub oracle_twap: FixedDecimal,
    pub funding_rate: FixedDecimal,
    pub cumulative_premium_fraction: FixedDecimal,
    pub next_funding_time: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Amm {
    quote_reserve: FixedDecimal,
    base_reserve: FixedDecimal,
    toll_ratio: FixedDecimal,
    spread_ratio: FixedDecimal,
    fluctuation_limit_ratio: FixedDecimal,
    trade_limit_ratio: FixedDecimal,
    max_holding_base: FixedDecimal,
    open_interest_notional_cap: FixedDecimal,
    whitelist: HashSet<AccountId>,
    open: bool,
    settlement_price: FixedDecimal,
    funding_period_ms: i64,
    spot_price_twap_interval_ms: i64,
    next_funding_time: Timestamp,
    cumulative_premium_fraction: FixedDecimal,
    funding_rate: FixedDecimal,
    // net base held by traders: positive when traders are net long
    total_position_size: FixedDecimal,
    // net quote traders have put into the curve
    cumulative_notional: FixedDecimal,
    reserve_history: ReserveHistory,
    liquidity_history: Vec<LiquidityChangedSnapshot>,
}

impl Amm {
    pub fn new(params: &AmmParams, now: BlockTime) -> Result<Self, CurveError> {
        if !params.quote_reserve.is_positive() || !params.base_reserve.is_positive() {
            return Err(CurveError::ReserveDepleted);
        }
        let next_funding_time = initial_funding_time(now.timestamp, params.funding_period_ms);
        let reserve_history = ReserveHistory::new(ReserveSnapshot {
            quote_reserve: params.quote_reserve,
            base_reserve: params.base_reserve,
            timestamp: now.timestamp,
            block_number: now.number,
        });
        let genesis = LiquidityChangedSnapshot {
            cumulative_notional: FixedDecimal::ZERO,
            quote_reserve: params.quote_reserve,
            base_reserve: params.base_reserve,
            total_position_size: FixedDecimal::ZERO,
        };

        Ok(Self {
            quote_reserve: params.quote_reserve,
            base_reserve: params.base_reserve,
            toll_ratio: params.toll_ratio,
            spread_ratio: params.spread_ratio,
            fluctuation_limit_ratio: params.fluctuation_limit_ratio,
            trade_limit_ratio: params.trade_limit_ratio,
            max_holding_base: params.max_holding_base,
            open_interest_notional_cap: params.open_interest_notional_cap,
            whitelist: HashSet::new(),
            open: true,
            settlement_price: FixedDecimal::ZERO,
            funding_period_ms: params.funding_period_ms,
            spot_price_twap_interval_ms: params.spot_price_twap_interval_ms,
            next_funding_time,
            cumulative_premium_fraction: FixedDecimal::ZERO,
            funding_rate: FixedDecimal::ZERO,
            total_position_size: FixedDecimal::ZERO,
            cumulative_notional: FixedDecimal::ZERO,
            reserve_history,
            liquidity_history: vec![genesis],
        })
    }

    pub fn quote_reserve(&self) -> FixedDecimal {
        self.quote_reserve
    }

    pub fn base_reserve(&self) -> FixedDecimal {
        self.base_reserve
    }

    pub fn invariant(&self) -> Result<FixedDecimal, CurveError> {
        Ok(self.quote_reserve.try_mul(self.base_reserve)?)
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn settlement_price(&self) -> FixedDecimal {
        self.settlement_price
    }

    pub fn toll_ratio(&self) -> FixedDecimal {
        self.toll_ratio
    }

    pub fn spread_ratio(&self) -> FixedDecimal {
        self.spread_ratio
    }

    pub fn fluctuation_limit_ratio(&self) -> FixedDecimal {
        self.fluctuation_limit_ratio
    }

    pub fn max_holding_base(&self) -> FixedDecimal {
        self.max_holding_base
    }

    pub fn open_interest_notional_cap(&self) -> FixedDecimal {
        self.open_interest_notional_cap
    }

    pub fn is_whitelisted(&self, account: AccountId) -> bool {
        self.whitelist.contains(&account)
    }

    pub fn funding_period_ms(&self) -> i64 {
        self.funding_period_ms
    }

    pub fn next_funding_time(&self) -> Timestamp {
        self.next_funding_time
    }

    pub fn cumulative_premium_fraction(&self) -> FixedDecimal {
        self.cumulative_premium_fraction
    }

    pub fn funding_rate(&self) -> FixedDecimal {
        self.funding_rate
    }

    pub fn total_position_size(&self) -> FixedDecimal {
        self.total_position_size
    }

    pub fn cumulative_notional(&self) -> FixedDecimal {
        self.cumulative_notional
    }

    pub fn reserve_snapshots(&self) -> &[ReserveSnapshot] {
        self.reserve_history.as_slice()
    }

    pub fn liquidity_history(&self) -> &[LiquidityChangedSnapshot] {
        &self.liquidity_history
    }

    pub fn latest_liquidity_index(&self) -> usize {
        self.liquidity_history.len().saturating_sub(1)
    }

    // 2.3.1: setters. every knob moves only through here.
    pub fn set_fee_ratios(&mut self, toll_ratio: FixedDecimal, spread_ratio: FixedDecimal) {
        self.toll_ratio = toll_ratio;
        self.spread_ratio = spread_ratio;
    }

    pub fn set_fluctuation_limit_ratio(&mut self, ratio: FixedDecimal) {
        self.fluctuation_limit_ratio = ratio;
    }

    pub fn set_trade_limit_ratio(&mut self, ratio: FixedDecimal) {
        self.trade_limit_ratio = ratio;
    }

    pub fn set_max_holding_base(&mut self, cap: FixedDecimal) {
        self.max_holding_base = cap;
    }

    pub fn set_open_interest_notional_cap(&mut self, cap: FixedDecimal) {
        self.open_interest_notional_cap = cap;
    }

    pub fn set_whitelisted(&mut self, account: AccountId, whitelisted: bool) {
        if whitelisted {
            self.whitelist.insert(account);
        } else {
            self.whitelist.remove(&account);
        }
    }

    pub fn set_spot_price_twap_interval(&mut self, interval_ms: i64) {
        self.spot_price_twap_interval_ms = interval_ms;
    }

    // 2.3.2: pricing views
    pub fn spot_price(&self) -> Result<FixedDecimal, CurveError> {
        curve::spot_price(self.quote_reserve, self.base_reserve)
    }

    pub fn input_price(&self, dir_of_quote: Dir, quote_amount: FixedDecimal) -> Result<FixedDecimal, CurveError> {
        curve::input_price_with_reserves(dir_of_quote, quote_amount, self.quote_reserve, self.base_reserve)
    }

    pub fn output_price(&self, dir_of_base: Dir, base_amount: FixedDecimal) -> Result<FixedDecimal, CurveError> {
        curve::output_price_with_reserves(dir_of_base, base_amount, self.quote_reserve, self.base_reserve)
    }

    /// Pure quote: counterparty amount for moving `amount` in `dir`.
    pub fn quote(&self, dir: Dir, amount: SwapAmount) -> Result<FixedDecimal, CurveError> {
        match amount {
            SwapAmount::Quote(q) => self.input_price(dir, q),
            SwapAmount::Base(b) => self.output_price(dir, b),
        }
    }

    pub fn calc_fee(&self, notional: FixedDecimal) -> Result<(FixedDecimal, FixedDecimal), CurveError> {
        Ok(curve::calc_fee(notional, self.toll_ratio, self.spread_ratio)?)
    }

    pub fn twap_price(&self, interval_ms: i64, now: Timestamp) -> Result<FixedDecimal, CurveError> {
        self.reserve_history
            .twap(interval_ms, now, |s| curve::spot_price(s.quote_reserve, s.base_reserve))
    }

    /// Time weighted value of closing `base_amount` across the snapshot window.
    pub fn output_twap(
        &self,
        dir_of_base: Dir,
        base_amount: FixedDecimal,
        interval_ms: i64,
        now: Timestamp,
    ) -> Result<FixedDecimal, CurveError> {
        self.reserve_history.twap(interval_ms, now, |s| {
            curve::output_price_with_reserves(dir_of_base, base_amount, s.quote_reserve, s.base_reserve)
        })
    }

    // 2.3.3: swaps. `limit` of zero disables the slippage check.
    pub fn swap(
        &mut self,
        dir: Dir,
        amount: SwapAmount,
        limit: FixedDecimal,
        can_over_fluctuation: bool,
        now: BlockTime,
    ) -> Result<FixedDecimal, CurveError> {
        match amount {
            SwapAmount::Quote(q) => self.swap_input(dir, q, limit, can_over_fluctuation, now),
            SwapAmount::Base(b) => self.swap_output(dir, b, limit, can_over_fluctuation, now),
        }
    }

    pub fn swap_input(
        &mut self,
        dir_of_quote: Dir,
        quote_amount: FixedDecimal,
        base_limit: FixedDecimal,
        can_over_fluctuation: bool,
        now: BlockTime,
    ) -> Result<FixedDecimal, CurveError> {
        self.require_open()?;
        if quote_amount.is_zero() {
            return Ok(FixedDecimal::ZERO);
        }
        if dir_of_quote == Dir::RemoveFromAmm {
            self.check_trade_limit(self.quote_reserve, quote_amount)?;
        }

        let base_amount = self.input_price(dir_of_quote, quote_amount)?;
        // a long wants at least `limit` base, a short owes at most `limit`
        if !base_limit.is_zero() {
            let ok = match dir_of_quote {
                Dir::AddToAmm => base_amount >= base_limit,
                Dir::RemoveFromAmm => base_amount <= base_limit,
            };
            if !ok {
                return Err(CurveError::SlippageExceeded {
                    actual: base_amount,
                    limit: base_limit,
                });
            }
        }

        self.update_reserve(dir_of_quote, quote_amount, base_amount, can_over_fluctuation, now)?;
        Ok(base_amount)
    }

    pub fn swap_output(
        &mut self,
        dir_of_base: Dir,
        base_amount: FixedDecimal,
        quote_limit: FixedDecimal,
        can_over_fluctuation: bool,
        now: BlockTime,
    ) -> Result<FixedDecimal, CurveError> {
        self.require_open()?;
        if base_amount.is_zero() {
            return Ok(FixedDecimal::ZERO);
        }
        if dir_of_base == Dir::RemoveFromAmm {
            self.check_trade_limit(self.base_reserve, base_amount)?;
        }

        let quote_amount = self.output_price(dir_of_base, base_amount)?;
        let dir_of_quote = dir_of_base.opposite();
        // selling base wants at least `limit` quote, buying base pays at most `limit`
        if !quote_limit.is_zero() {
            let ok = match dir_of_quote {
                Dir::RemoveFromAmm => quote_amount >= quote_limit,
                Dir::AddToAmm => quote_amount <= quote_limit,
            };
            if !ok {
                return Err(CurveError::SlippageExceeded {
                    actual: quote_amount,
                    limit: quote_limit,
                });
            }
        }

        self.update_reserve(dir_of_quote, quote_amount, base_amount, can_over_fluctuation, now)?;
        Ok(quote_amount)
    }

    fn require_open(&self) -> Result<(), CurveError> {
        if self.open {
            Ok(())
        } else {
            Err(CurveError::Closed)
        }
    }

    fn check_trade_limit(&self, reserve: FixedDecimal, amount: FixedDecimal) -> Result<(), CurveError> {
        if self.trade_limit_ratio.is_zero() {
            return Ok(());
        }
        if reserve.try_mul(self.trade_limit_ratio)? < amount {
            return Err(CurveError::OverTradingLimit);
        }
        Ok(())
    }

    fn update_reserve(
        &mut self,
        dir_of_quote: Dir,
        quote_amount: FixedDecimal,
        base_amount: FixedDecimal,
        can_over_fluctuation: bool,
        now: BlockTime,
    ) -> Result<(), CurveError> {
        // must run against the pre-trade reserves
        self.check_block_fluctuation(dir_of_quote, quote_amount, base_amount, can_over_fluctuation, now)?;

        match dir_of_quote {
            Dir::AddToAmm => {
                self.check_trade_limit(self.base_reserve, base_amount)?;
                self.total_position_size = self.total_position_size.try_add(base_amount)?;
                self.cumulative_notional = self.cumulative_notional.try_add(quote_amount)?;
            }
            Dir::RemoveFromAmm => {
                self.check_trade_limit(self.quote_reserve, quote_amount)?;
                self.total_position_size = self.total_position_size.try_sub(base_amount)?;
                self.cumulative_notional = self.cumulative_notional.try_sub(quote_amount)?;
            }
        }
        let (quote, base) =
            curve::reserves_after(dir_of_quote, quote_amount, base_amount, self.quote_reserve, self.base_reserve)?;
        self.quote_reserve = quote;
        self.base_reserve = base;
        self.record_snapshot(now);
        Ok(())
    }

    fn record_snapshot(&mut self, now: BlockTime) {
        self.reserve_history.record(ReserveSnapshot {
            quote_reserve: self.quote_reserve,
            base_reserve: self.base_reserve,
            timestamp: now.timestamp,
            block_number: now.number,
        });
    }

    // 2.3.4: fluctuation limit. bounds come from the last price of an earlier block.
    fn price_boundaries(&self, ratio: FixedDecimal, block_number: u64) -> Result<(FixedDecimal, FixedDecimal), CurveError> {
        let reference = self
            .reserve_history
            .last_block_snapshot(block_number)
            .ok_or(CurveError::ReserveDepleted)?;
        let last_price = curve::spot_price(reference.quote_reserve, reference.base_reserve)?;
        let band = last_price.try_mul(ratio)?;
        Ok((last_price.try_add(band)?, last_price.try_sub(band)?))
    }

    fn within(price: FixedDecimal, bounds: (FixedDecimal, FixedDecimal)) -> bool {
        price <= bounds.0 && price >= bounds.1
    }

    fn check_block_fluctuation(
        &self,
        dir_of_quote: Dir,
        quote_amount: FixedDecimal,
        base_amount: FixedDecimal,
        can_over_fluctuation: bool,
        now: BlockTime,
    ) -> Result<(), CurveError> {
        if self.fluctuation_limit_ratio.is_zero() {
            return Ok(());
        }
        let bounds = self.price_boundaries(self.fluctuation_limit_ratio, now.number)?;
        if !Self::within(self.spot_price()?, bounds) {
            return Err(CurveError::AlreadyOverFluctuationLimit);
        }
        if !can_over_fluctuation {
            let (quote, base) =
                curve::reserves_after(dir_of_quote, quote_amount, base_amount, self.quote_reserve, self.base_reserve)?;
            if !Self::within(curve::spot_price(quote, base)?, bounds) {
                return Err(CurveError::OverFluctuationLimit);
            }
        }
        Ok(())
    }

    /// Would closing `base_amount` in `dir_of_base` push the price out of the band.
    pub fn is_over_fluctuation_limit(
        &self,
        dir_of_base: Dir,
        base_amount: FixedDecimal,
        now: BlockTime,
    ) -> Result<bool, CurveError> {
        if self.fluctuation_limit_ratio.is_zero() {
            return Ok(false);
        }
        let bounds = self.price_boundaries(self.fluctuation_limit_ratio, now.number)?;
        let quote_amount = self.output_price(dir_of_base, base_amount)?;
        let after = curve::reserves_after(
            dir_of_base.opposite(),
            quote_amount,
            base_amount,
            self.quote_reserve,
            self.base_reserve,
        );
        match after {
            Ok((quote, base)) => Ok(!Self::within(curve::spot_price(quote, base)?, bounds)),
            Err(CurveError::ReserveDepleted) => Ok(true),
            Err(e) => Err(e),
        }
    }

    // 2.3.5: funding. premium fraction = (market twap - oracle twap) * period / 1 day
    pub fn settle_funding(&mut self, oracle_twap: FixedDecimal, now: Timestamp) -> Result<FundingSettlement, CurveError> {
        self.require_open()?;
        if now < self.next_funding_time {
            return Err(CurveError::FundingTooEarly);
        }
        let market_twap = self.twap_price(self.spot_price_twap_interval_ms, now)?;
        let premium = market_twap.try_sub(oracle_twap)?;
        let premium_fraction = premium
            .try_mul_int(self.funding_period_ms as i128)?
            .try_div_int(MILLIS_PER_DAY as i128)?;

        self.funding_rate = premium_fraction.try_div(oracle_twap)?;
        self.cumulative_premium_fraction = self.cumulative_premium_fraction.try_add(premium_fraction)?;

        // two settlements can never land closer than half a period apart
        let min_next = now.plus(self.funding_period_ms / 2);
        let on_hour = self.next_funding_time.plus(self.funding_period_ms).floor_hour();
        self.next_funding_time = on_hour.max(min_next);

        Ok(FundingSettlement {
            premium_fraction,
            market_twap,
            oracle_twap,
            funding_rate: self.funding_rate,
            cumulative_premium_fraction: self.cumulative_premium_fraction,
            next_funding_time: self.next_funding_time,
        })
    }

    // 2.3.6: liquidity migration. both reserves scale by the multiplier so spot price holds.
    pub fn migrate_liquidity(
        &mut self,
        multiplier: FixedDecimal,
        fluctuation_limit_ratio: FixedDecimal,
        now: BlockTime,
    ) -> Result<LiquidityChangedSnapshot, CurveError> {
        self.require_open()?;
        if multiplier == FixedDecimal::ONE || !multiplier.is_positive() {
            return Err(CurveError::InvalidMultiplier(multiplier));
        }
        // longs must still fit in the new base reserve
        if self.total_position_size.is_positive() {
            let lower_bound = self
                .total_position_size
                .try_add(FixedDecimal::UNIT)?
                .try_div(self.base_reserve)?;
            if multiplier < lower_bound {
                return Err(CurveError::InvalidMultiplier(multiplier));
            }
        }
        if !fluctuation_limit_ratio.is_zero() {
            let bounds = self.price_boundaries(fluctuation_limit_ratio, now.number)?;
            if !Self::within(self.spot_price()?, bounds) {
                return Err(CurveError::AlreadyOverFluctuationLimit);
            }
        }

        let quote_before = self.quote_reserve;
        let base_before = self.base_reserve;
        let quote_after = quote_before.try_mul(multiplier)?;
        let base_after = base_before.try_mul(multiplier)?;
        if !quote_after.is_positive() || !base_after.is_positive() {
            return Err(CurveError::ReserveDepleted);
        }
        self.quote_reserve = quote_after;
        self.base_reserve = base_after;
        self.total_position_size =
            self.calc_base_after_liquidity_migration(self.total_position_size, quote_before, base_before)?;

        let snapshot = LiquidityChangedSnapshot {
            cumulative_notional: self.cumulative_notional,
            quote_reserve: self.quote_reserve,
            base_reserve: self.base_reserve,
            total_position_size: self.total_position_size,
        };
        self.liquidity_history.push(snapshot);
        self.record_snapshot(now);
        Ok(snapshot)
    }

    /// Re-expresses a signed base amount held on the `from` curve in units of the current curve:
    /// value it by a hypothetical close on the old reserves, then size that notional here.
    pub fn calc_base_after_liquidity_migration(
        &self,
        base_amount: FixedDecimal,
        from_quote_reserve: FixedDecimal,
        from_base_reserve: FixedDecimal,
    ) -> Result<FixedDecimal, CurveError> {
        if base_amount.is_zero() {
            return Ok(base_amount);
        }
        let is_long = base_amount.is_positive();
        let notional = curve::output_price_with_reserves(
            Dir::closing_base(base_amount),
            base_amount.abs(),
            from_quote_reserve,
            from_base_reserve,
        )?;
        let dir = if is_long { Dir::RemoveFromAmm } else { Dir::AddToAmm };
        let new_base = self.input_price(dir, notional)?;
        if is_long {
            Ok(new_base)
        } else {
            Ok(new_base.try_neg()?)
        }
    }

    // 2.3.7: shutdown. settlement price = open notional / total size, measured from the
    // start of the latest liquidity epoch. zero when nobody holds a position.
    pub fn shutdown(&mut self) -> Result<FixedDecimal, CurveError> {
        self.require_open()?;
        let latest = self
            .liquidity_history
            .last()
            .copied()
            .ok_or(CurveError::ReserveDepleted)?;
        let previous_k = latest.base_reserve.try_mul(latest.quote_reserve)?;
        let init_base = latest.total_position_size.try_add(latest.base_reserve)?;
        let init_quote = previous_k.try_div(init_base)?;
        let notional = init_quote.try_sub(self.quote_reserve)?;

        if self.total_position_size.abs().raw() >= IGNORABLE_DIGIT_FOR_SHUTDOWN {
            self.settlement_price = notional.abs().try_div(self.total_position_size.abs())?;
        }
        self.open = false;
        Ok(self.settlement_price)
    }
}

/// First funding time for a curve created at `now`.
pub fn initial_funding_time(now: Timestamp, funding_period_ms: i64) -> Timestamp {
    now.plus(funding_period_ms).floor_hour()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MILLIS_PER_HOUR;

    fn fx(s: &str) -> FixedDecimal {
        s.parse().unwrap()
    }

    fn params() -> AmmParams {
        AmmParams {
            quote_reserve: fx("1000"),
            base_reserve: fx("100"),
            toll_ratio: FixedDecimal::ZERO,
            spread_ratio: FixedDecimal::ZERO,
            fluctuation_limit_ratio: FixedDecimal::ZERO,
            trade_limit_ratio: fx("0.9"),
            max_holding_base: FixedDecimal::ZERO,
            open_interest_notional_cap: FixedDecimal::ZERO,
            funding_period_ms: MILLIS_PER_HOUR,
            spot_price_twap_interval_ms: MILLIS_PER_HOUR,
        }
    }

    fn block(n: u64) -> BlockTime {
        BlockTime::new(n, Timestamp::from_millis(n as i64 * 15_000))
    }

    #[test]
    fn swap_input_moves_reserves_and_keeps_k() {
        let mut amm = Amm::new(&params(), block(0)).unwrap();
        let k = amm.invariant().unwrap();
        let base = amm.swap_input(Dir::AddToAmm, fx("600"), FixedDecimal::ZERO, false, block(1)).unwrap();
        assert_eq!(base, fx("37.5"));
        assert_eq!(amm.quote_reserve(), fx("1600"));
        assert_eq!(amm.base_reserve(), fx("62.5"));
        assert_eq!(amm.invariant().unwrap(), k);
        assert_eq!(amm.total_position_size(), fx("37.5"));
        assert_eq!(amm.cumulative_notional(), fx("600"));
    }

    #[test]
    fn swap_output_reverses_swap_input() {
        let mut amm = Amm::new(&params(), block(0)).unwrap();
        let base = amm.swap_input(Dir::AddToAmm, fx("600"), FixedDecimal::ZERO, false, block(1)).unwrap();
        let quote = amm.swap_output(Dir::AddToAmm, base, FixedDecimal::ZERO, false, block(2)).unwrap();
        assert_eq!(quote, fx("600"));
        assert_eq!(amm.quote_reserve(), fx("1000"));
        assert_eq!(amm.base_reserve(), fx("100"));
        assert_eq!(amm.total_position_size(), FixedDecimal::ZERO);
    }

    #[test]
    fn slippage_limits() {
        let mut amm = Amm::new(&params(), block(0)).unwrap();
        let err = amm.swap_input(Dir::AddToAmm, fx("600"), fx("38"), false, block(1)).unwrap_err();
        assert!(matches!(err, CurveError::SlippageExceeded { .. }));
        let err = amm.swap_input(Dir::RemoveFromAmm, fx("200"), fx("20"), false, block(1)).unwrap_err();
        assert!(matches!(err, CurveError::SlippageExceeded { .. }));
    }

    #[test]
    fn trade_limit_blocks_huge_swaps() {
        let mut amm = Amm::new(&params(), block(0)).unwrap();
        let err = amm.swap_input(Dir::RemoveFromAmm, fx("950"), FixedDecimal::ZERO, false, block(1)).unwrap_err();
        assert_eq!(err, CurveError::OverTradingLimit);
    }

    #[test]
    fn fluctuation_limit_rejects_big_moves_unless_bypassed() {
        let mut p = params();
        p.fluctuation_limit_ratio = fx("0.05");
        let mut amm = Amm::new(&p, block(0)).unwrap();
        // +10% quote moves the price about 21%
        let err = amm.swap_input(Dir::AddToAmm, fx("100"), FixedDecimal::ZERO, false, block(1)).unwrap_err();
        assert_eq!(err, CurveError::OverFluctuationLimit);

        amm.swap_input(Dir::AddToAmm, fx("100"), FixedDecimal::ZERO, true, block(1)).unwrap();
        // same block: the reference is still block 0, price already outside
        let err = amm.swap_input(Dir::AddToAmm, fx("1"), FixedDecimal::ZERO, true, block(1)).unwrap_err();
        assert_eq!(err, CurveError::AlreadyOverFluctuationLimit);
        // next block re-anchors on the new price
        amm.swap_input(Dir::AddToAmm, fx("1"), FixedDecimal::ZERO, false, block(2)).unwrap();
    }

    #[test]
    fn over_fluctuation_view_matches_swap() {
        let mut p = params();
        p.fluctuation_limit_ratio = fx("0.05");
        let amm = Amm::new(&p, block(0)).unwrap();
        assert!(amm.is_over_fluctuation_limit(Dir::AddToAmm, fx("10"), block(1)).unwrap());
        assert!(!amm.is_over_fluctuation_limit(Dir::AddToAmm, fx("1"), block(1)).unwrap());
    }

    #[test]
    fn closed_amm_rejects_swaps() {
        let mut amm = Amm::new(&params(), block(0)).unwrap();
        amm.shutdown().unwrap();
        assert_eq!(
            amm.swap_input(Dir::AddToAmm, fx("1"), FixedDecimal::ZERO, false, block(1)),
            Err(CurveError::Closed)
        );
        assert_eq!(amm.shutdown(), Err(CurveError::Closed));
    }

    #[test]
    fn shutdown_prices_open_interest() {
        let mut amm = Amm::new(&params(), block(0)).unwrap();
        amm.swap_input(Dir::AddToAmm, fx("600"), FixedDecimal::ZERO, false, block(1)).unwrap();
        let price = amm.shutdown().unwrap();
        // 600 quote for 37.5 base
        assert_eq!(price, fx("16"));
        assert!(!amm.is_open());
    }

    #[test]
    fn shutdown_ignores_only_sub_threshold_interest() {
        // 100 raw units of base bought for 1001 raw units of quote
        let mut amm = Amm::new(&params(), block(0)).unwrap();
        let size = FixedDecimal::from_raw(IGNORABLE_DIGIT_FOR_SHUTDOWN);
        amm.swap_output(Dir::RemoveFromAmm, size, FixedDecimal::ZERO, false, block(1)).unwrap();
        assert_eq!(amm.total_position_size(), size);
        assert_eq!(amm.shutdown().unwrap(), fx("10.01"));

        let mut amm = Amm::new(&params(), block(0)).unwrap();
        let size = FixedDecimal::from_raw(IGNORABLE_DIGIT_FOR_SHUTDOWN - 1);
        amm.swap_output(Dir::RemoveFromAmm, size, FixedDecimal::ZERO, false, block(1)).unwrap();
        assert_eq!(amm.shutdown().unwrap(), FixedDecimal::ZERO);
    }

    #[test]
    fn shutdown_without_positions_settles_at_zero() {
        let mut amm = Amm::new(&params(), block(0)).unwrap();
        assert_eq!(amm.shutdown().unwrap(), FixedDecimal::ZERO);
    }

    #[test]
    fn funding_requires_period_elapsed() {
        let mut amm = Amm::new(&params(), block(0)).unwrap();
        assert_eq!(amm.next_funding_time(), Timestamp::from_millis(MILLIS_PER_HOUR));
        let early = Timestamp::from_millis(MILLIS_PER_HOUR - 1);
        assert_eq!(amm.settle_funding(fx("10"), early), Err(CurveError::FundingTooEarly));

        // market 10 vs oracle 9.6 for one hour -> 0.4 / 24
        let now = Timestamp::from_millis(MILLIS_PER_HOUR);
        let settlement = amm.settle_funding(fx("9.6"), now).unwrap();
        assert_eq!(settlement.premium_fraction, fx("0.4").try_div_int(24).unwrap());
        assert_eq!(amm.cumulative_premium_fraction(), settlement.premium_fraction);
        assert_eq!(amm.next_funding_time(), Timestamp::from_millis(2 * MILLIS_PER_HOUR));
    }

    #[test]
    fn late_funding_uses_buffer_period() {
        let mut amm = Amm::new(&params(), block(0)).unwrap();
        let late = Timestamp::from_millis(5 * MILLIS_PER_HOUR + 10);
        amm.settle_funding(fx("10"), late).unwrap();
        assert_eq!(amm.next_funding_time(), late.plus(MILLIS_PER_HOUR / 2));
    }

    #[test]
    fn migration_keeps_spot_price() {
        let mut amm = Amm::new(&params(), block(0)).unwrap();
        amm.swap_input(Dir::AddToAmm, fx("250"), FixedDecimal::ZERO, false, block(1)).unwrap();
        let price_before = amm.spot_price().unwrap();
        amm.migrate_liquidity(fx("2"), FixedDecimal::ZERO, block(2)).unwrap();
        assert_eq!(amm.spot_price().unwrap(), price_before);
        assert_eq!(amm.liquidity_history().len(), 2);
        assert_eq!(amm.latest_liquidity_index(), 1);

        // the 20 base held by traders is worth the same 250 quote on the deeper curve
        let size = amm.total_position_size();
        assert!(size < fx("20"));
        let value = amm.output_price(Dir::AddToAmm, size).unwrap();
        assert!(value.try_sub(fx("250")).unwrap().abs() <= fx("0.000000001"));
    }

    #[test]
    fn migration_rejects_unit_multiplier() {
        let mut amm = Amm::new(&params(), block(0)).unwrap();
        assert_eq!(
            amm.migrate_liquidity(FixedDecimal::ONE, FixedDecimal::ZERO, block(1)),
            Err(CurveError::InvalidMultiplier(FixedDecimal::ONE))
        );
    }
}
