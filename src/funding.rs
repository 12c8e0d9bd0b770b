// 5.0: funding. the curve keeps a cumulative premium fraction (quote per unit of base).
// a position owes size * (cumulative now - cumulative at its last touch).
// positive premium means the curve traded above the index: longs pay, shorts receive.
// 5.1 is per-position settlement, 5.2 is what the curve itself earns or owes.

use crate::fixed::{FixedDecimal, MathError};
use crate::position::Position;

// 5.1: payment owed by the position since its checkpoint, positive = trader pays
pub fn funding_payment(
    size: FixedDecimal,
    checkpoint: FixedDecimal,
    latest_cumulative_premium_fraction: FixedDecimal,
) -> Result<FixedDecimal, MathError> {
    if size.is_zero() {
        return Ok(FixedDecimal::ZERO);
    }
    latest_cumulative_premium_fraction.try_sub(checkpoint)?.try_mul(size)
}

/// Applies accrued funding to the position's margin and moves its checkpoint.
///
/// Margin may go negative here. The caller decides whether that is bad debt, a
/// liquidation, or a rejected operation.
pub fn settle(position: &mut Position, latest_cumulative_premium_fraction: FixedDecimal) -> Result<FixedDecimal, MathError> {
    let payment = funding_payment(
        position.size,
        position.last_updated_cumulative_premium_fraction,
        latest_cumulative_premium_fraction,
    )?;
    position.margin = position.margin.try_sub(payment)?;
    position.last_updated_cumulative_premium_fraction = latest_cumulative_premium_fraction;
    Ok(payment)
}

// 5.2: the curve is the counterparty of net open interest. with traders net long and a
// positive premium the curve collects; otherwise it pays out of the reserve.
pub fn amm_funding_profit(
    premium_fraction: FixedDecimal,
    total_position_size: FixedDecimal,
) -> Result<FixedDecimal, MathError> {
    premium_fraction.try_mul(total_position_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fx(s: &str) -> FixedDecimal {
        s.parse().unwrap()
    }

    #[test]
    fn longs_pay_positive_premium() {
        assert_eq!(funding_payment(fx("10"), fx("0"), fx("0.5")).unwrap(), fx("5"));
        assert_eq!(funding_payment(fx("-10"), fx("0"), fx("0.5")).unwrap(), fx("-5"));
        assert_eq!(funding_payment(fx("0"), fx("0"), fx("0.5")).unwrap(), fx("0"));
    }

    #[test]
    fn settle_moves_checkpoint_once() {
        let mut position = Position {
            size: fx("10"),
            margin: fx("20"),
            open_notional: fx("100"),
            last_updated_cumulative_premium_fraction: fx("0.1"),
            ..Position::default()
        };
        let paid = settle(&mut position, fx("0.6")).unwrap();
        assert_eq!(paid, fx("5"));
        assert_eq!(position.margin, fx("15"));
        assert_eq!(position.last_updated_cumulative_premium_fraction, fx("0.6"));

        // nothing accrues twice
        assert_eq!(settle(&mut position, fx("0.6")).unwrap(), fx("0"));
        assert_eq!(position.margin, fx("15"));
    }

    #[test]
    fn settle_can_drive_margin_negative() {
        let mut position = Position {
            size: fx("-10"),
            margin: fx("1"),
            open_notional: fx("100"),
            ..Position::default()
        };
        settle(&mut position, fx("-0.3")).unwrap();
        assert_eq!(position.margin, fx("-2"));
    }

    #[test]
    fn amm_side_of_funding() {
        assert_eq!(amm_funding_profit(fx("0.5"), fx("20")).unwrap(), fx("10"));
        assert_eq!(amm_funding_profit(fx("0.5"), fx("-20")).unwrap(), fx("-10"));
    }
}
