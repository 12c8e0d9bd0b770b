// 2.2: reserve history. one snapshot per block feeds the twap and the fluctuation limit.
// liquidity snapshots are the epoch table for positions opened before a migration.

use crate::curve::CurveError;
use crate::fixed::FixedDecimal;
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveSnapshot {
    pub quote_reserve: FixedDecimal,
    pub base_reserve: FixedDecimal,
    pub timestamp: Timestamp,
    pub block_number: u64,
}

/// Curve state at the start of a liquidity epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityChangedSnapshot {
    pub cumulative_notional: FixedDecimal,
    pub quote_reserve: FixedDecimal,
    pub base_reserve: FixedDecimal,
    pub total_position_size: FixedDecimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReserveHistory {
    snapshots: Vec<ReserveSnapshot>,
}

impl ReserveHistory {
    pub fn new(initial: ReserveSnapshot) -> Self {
        Self {
            snapshots: vec![initial],
        }
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn latest(&self) -> Option<&ReserveSnapshot> {
        self.snapshots.last()
    }

    pub fn as_slice(&self) -> &[ReserveSnapshot] {
        &self.snapshots
    }

    // 2.2.1: same block overwrites, new block appends
    pub fn record(&mut self, snapshot: ReserveSnapshot) {
        match self.snapshots.last_mut() {
            Some(last) if last.block_number == snapshot.block_number => *last = snapshot,
            _ => self.snapshots.push(snapshot),
        }
    }

    /// Last snapshot taken before `block_number`, or the only one there is.
    pub fn last_block_snapshot(&self, block_number: u64) -> Option<&ReserveSnapshot> {
        let len = self.snapshots.len();
        let latest = self.snapshots.last()?;
        if latest.block_number == block_number && len > 1 {
            self.snapshots.get(len - 2)
        } else {
            Some(latest)
        }
    }

    // 2.2.2: walk snapshots backwards weighting each price by how long it held.
    // `price_at` picks what to average (spot price, or the value of a hypothetical close).
    pub fn twap<F>(&self, interval_ms: i64, now: Timestamp, price_at: F) -> Result<FixedDecimal, CurveError>
    where
        F: Fn(&ReserveSnapshot) -> Result<FixedDecimal, CurveError>,
    {
        let Some(latest) = self.snapshots.last() else {
            return Err(CurveError::ReserveDepleted);
        };
        let latest_price = price_at(latest)?;
        if interval_ms <= 0 || self.snapshots.len() == 1 {
            return Ok(latest_price);
        }

        let base_timestamp = now.as_millis() - interval_ms;
        // nothing traded inside the window
        if latest.timestamp.as_millis() <= base_timestamp {
            return Ok(latest_price);
        }
        let mut previous_timestamp = latest.timestamp.as_millis();
        let mut period = now.as_millis() - previous_timestamp;
        let mut weighted = latest_price.try_mul_int(period as i128)?;

        for snapshot in self.snapshots.iter().rev().skip(1) {
            let price = price_at(snapshot)?;
            let ts = snapshot.timestamp.as_millis();
            if ts <= base_timestamp {
                let tail = previous_timestamp - base_timestamp;
                weighted = weighted.try_add(price.try_mul_int(tail as i128)?)?;
                return Ok(weighted.try_div_int(interval_ms as i128)?);
            }
            let fraction = previous_timestamp - ts;
            weighted = weighted.try_add(price.try_mul_int(fraction as i128)?)?;
            period += fraction;
            previous_timestamp = ts;
        }

        // history shorter than the interval
        if period == 0 {
            return Ok(latest_price);
        }
        Ok(weighted.try_div_int(period as i128)?)
    }
}
