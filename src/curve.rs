// 2.0: constant product math. pure functions over (quote reserve, base reserve).
// nothing here mutates state; the amm in amm.rs owns the reserves and calls into this.
// K = quote * base. when K / reserve_after truncates, the curve keeps the dust:
// a trader adding to the curve gets one raw unit less, a trader removing pays one more.

use crate::fixed::{FixedDecimal, MathError};
use crate::types::Dir;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CurveError {
    #[error("reserve would be depleted")]
    ReserveDepleted,

    #[error("over trading limit")]
    OverTradingLimit,

    #[error("slippage: got {actual}, limit {limit}")]
    SlippageExceeded {
        actual: FixedDecimal,
        limit: FixedDecimal,
    },

    #[error("price is already over fluctuation limit")]
    AlreadyOverFluctuationLimit,

    #[error("price is over fluctuation limit")]
    OverFluctuationLimit,

    #[error("invalid liquidity multiplier {0}")]
    InvalidMultiplier(FixedDecimal),

    #[error("amm is closed")]
    Closed,

    #[error("settle funding too early")]
    FundingTooEarly,

    #[error(transparent)]
    Math(#[from] MathError),
}

pub fn spot_price(quote_reserve: FixedDecimal, base_reserve: FixedDecimal) -> Result<FixedDecimal, CurveError> {
    Ok(quote_reserve.try_div(base_reserve)?)
}

/// Base received (quote added) or base owed (quote removed) for `quote_amount`.
pub fn input_price_with_reserves(
    dir: Dir,
    quote_amount: FixedDecimal,
    quote_reserve: FixedDecimal,
    base_reserve: FixedDecimal,
) -> Result<FixedDecimal, CurveError> {
    if quote_amount.is_zero() {
        return Ok(FixedDecimal::ZERO);
    }
    let invariant = quote_reserve.try_mul(base_reserve)?;
    let quote_after = match dir {
        Dir::AddToAmm => quote_reserve.try_add(quote_amount)?,
        Dir::RemoveFromAmm => quote_reserve.try_sub(quote_amount)?,
    };
    if !quote_after.is_positive() {
        return Err(CurveError::ReserveDepleted);
    }

    let (base_after, inexact) = invariant.try_div_exact(quote_after)?;
    if !base_after.is_positive() {
        return Err(CurveError::ReserveDepleted);
    }
    let mut base_amount = base_after.try_sub(base_reserve)?.abs();
    if inexact {
        base_amount = match dir {
            Dir::AddToAmm => base_amount.try_sub(FixedDecimal::UNIT)?.non_negative(),
            Dir::RemoveFromAmm => base_amount.try_add(FixedDecimal::UNIT)?,
        };
    }
    Ok(base_amount)
}

/// Quote received (base added) or quote owed (base removed) for `base_amount`.
pub fn output_price_with_reserves(
    dir: Dir,
    base_amount: FixedDecimal,
    quote_reserve: FixedDecimal,
    base_reserve: FixedDecimal,
) -> Result<FixedDecimal, CurveError> {
    if base_amount.is_zero() {
        return Ok(FixedDecimal::ZERO);
    }
    let invariant = quote_reserve.try_mul(base_reserve)?;
    let base_after = match dir {
        Dir::AddToAmm => base_reserve.try_add(base_amount)?,
        Dir::RemoveFromAmm => base_reserve.try_sub(base_amount)?,
    };
    if !base_after.is_positive() {
        return Err(CurveError::ReserveDepleted);
    }

    let (quote_after, inexact) = invariant.try_div_exact(base_after)?;
    if !quote_after.is_positive() {
        return Err(CurveError::ReserveDepleted);
    }
    let mut quote_amount = quote_after.try_sub(quote_reserve)?.abs();
    if inexact {
        quote_amount = match dir {
            Dir::AddToAmm => quote_amount.try_sub(FixedDecimal::UNIT)?.non_negative(),
            Dir::RemoveFromAmm => quote_amount.try_add(FixedDecimal::UNIT)?,
        };
    }
    Ok(quote_amount)
}

/// Reserves after moving `quote_amount` in `dir_of_quote` and base the other way.
pub fn reserves_after(
    dir_of_quote: Dir,
    quote_amount: FixedDecimal,
    base_amount: FixedDecimal,
    quote_reserve: FixedDecimal,
    base_reserve: FixedDecimal,
) -> Result<(FixedDecimal, FixedDecimal), CurveError> {
    let (quote, base) = match dir_of_quote {
        Dir::AddToAmm => (
            quote_reserve.try_add(quote_amount)?,
            base_reserve.try_sub(base_amount)?,
        ),
        Dir::RemoveFromAmm => (
            quote_reserve.try_sub(quote_amount)?,
            base_reserve.try_add(base_amount)?,
        ),
    };
    if !quote.is_positive() || !base.is_positive() {
        return Err(CurveError::ReserveDepleted);
    }
    Ok((quote, base))
}

// 2.1: fees are fractions of notional. toll -> fee pool, spread -> reserve.
pub fn calc_fee(
    notional: FixedDecimal,
    toll_ratio: FixedDecimal,
    spread_ratio: FixedDecimal,
) -> Result<(FixedDecimal, FixedDecimal), MathError> {
    if notional.is_zero() {
        return Ok((FixedDecimal::ZERO, FixedDecimal::ZERO));
    }
    let notional = notional.abs();
    Ok((notional.try_mul(toll_ratio)?, notional.try_mul(spread_ratio)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fx(s: &str) -> FixedDecimal {
        s.parse().unwrap()
    }

    #[test]
    fn long_600_on_1000_100_buys_37_5() {
        let base = input_price_with_reserves(Dir::AddToAmm, fx("600"), fx("1000"), fx("100")).unwrap();
        assert_eq!(base, fx("37.5"));
    }

    #[test]
    fn short_owes_more_base_than_long_receives() {
        let long = input_price_with_reserves(Dir::AddToAmm, fx("250"), fx("1000"), fx("100")).unwrap();
        let short = input_price_with_reserves(Dir::RemoveFromAmm, fx("250"), fx("1000"), fx("100")).unwrap();
        assert_eq!(long, fx("20"));
        // 100000 / 750 = 133.333.. so the short owes one raw unit more than the truncated amount
        assert_eq!(short, fx("33.333333333333333334"));
    }

    #[test]
    fn output_rounding_favors_curve() {
        // selling 3 base into (1000, 100): 100000 / 103 truncates
        let received = output_price_with_reserves(Dir::AddToAmm, fx("3"), fx("1000"), fx("100")).unwrap();
        let exact_after = fx("100000").try_div(fx("103")).unwrap();
        assert_eq!(received, fx("1000").try_sub(exact_after).unwrap().try_sub(FixedDecimal::UNIT).unwrap());

        let paid = output_price_with_reserves(Dir::RemoveFromAmm, fx("3"), fx("1000"), fx("100")).unwrap();
        assert!(paid > received);
    }

    #[test]
    fn draining_a_reserve_fails() {
        assert_eq!(
            input_price_with_reserves(Dir::RemoveFromAmm, fx("1000"), fx("1000"), fx("100")),
            Err(CurveError::ReserveDepleted)
        );
        assert_eq!(
            output_price_with_reserves(Dir::RemoveFromAmm, fx("100"), fx("1000"), fx("100")),
            Err(CurveError::ReserveDepleted)
        );
    }

    #[test]
    fn zero_amount_is_noop() {
        assert_eq!(
            input_price_with_reserves(Dir::AddToAmm, FixedDecimal::ZERO, fx("1000"), fx("100")).unwrap(),
            FixedDecimal::ZERO
        );
        assert_eq!(calc_fee(FixedDecimal::ZERO, fx("0.01"), fx("0.01")).unwrap(), (FixedDecimal::ZERO, FixedDecimal::ZERO));
    }

    #[test]
    fn fee_split() {
        let (toll, spread) = calc_fee(fx("600"), fx("0.001"), fx("0.002")).unwrap();
        assert_eq!(toll, fx("0.6"));
        assert_eq!(spread, fx("1.2"));
    }
}
