// 1.0: all the primitives live here. ids, sides, curve directions, block clock.
// each id is a newtype so the compiler catches type mixups.

use crate::fixed::FixedDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarketId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenId(pub u32);

// Long = profit when price goes up. Short = profit when price goes down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn sign(&self) -> i128 {
        match self {
            Side::Long => 1,
            Side::Short => -1,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    /// Side of a signed base size. `None` when flat.
    pub fn of(size: FixedDecimal) -> Option<Side> {
        if size.is_positive() {
            Some(Side::Long)
        } else if size.is_negative() {
            Some(Side::Short)
        } else {
            None
        }
    }

    // 1.1: a long pays quote into the curve, a short pulls quote out of it
    pub fn quote_dir(&self) -> Dir {
        match self {
            Side::Long => Dir::AddToAmm,
            Side::Short => Dir::RemoveFromAmm,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

// 1.2: direction of an asset relative to the curve reserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dir {
    AddToAmm,
    RemoveFromAmm,
}

impl Dir {
    pub fn opposite(&self) -> Self {
        match self {
            Dir::AddToAmm => Dir::RemoveFromAmm,
            Dir::RemoveFromAmm => Dir::AddToAmm,
        }
    }

    /// Direction of base that closes a position of the given signed size.
    pub fn closing_base(size: FixedDecimal) -> Self {
        if size.is_negative() {
            Dir::RemoveFromAmm
        } else {
            Dir::AddToAmm
        }
    }
}

// 1.3: millisecond timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

pub const MILLIS_PER_SECOND: i64 = 1_000;
pub const MILLIS_PER_HOUR: i64 = 3_600_000;
pub const MILLIS_PER_DAY: i64 = 86_400_000;

impl Timestamp {
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub fn from_secs(secs: i64) -> Self {
        Self(secs * MILLIS_PER_SECOND)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    pub fn plus(&self, millis: i64) -> Self {
        Self(self.0 + millis)
    }

    pub fn minus(&self, millis: i64) -> Self {
        Self(self.0 - millis)
    }

    /// Floors to the start of the hour.
    pub fn floor_hour(&self) -> Self {
        Self(self.0.div_euclid(MILLIS_PER_HOUR) * MILLIS_PER_HOUR)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match chrono::DateTime::from_timestamp_millis(self.0) {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
            None => write!(f, "{}ms", self.0),
        }
    }
}

// 1.4: the engine runs one operation at a time inside numbered blocks.
// snapshots, the fluctuation limit and restriction mode all key off the block number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTime {
    pub number: u64,
    pub timestamp: Timestamp,
}

impl BlockTime {
    pub fn new(number: u64, timestamp: Timestamp) -> Self {
        Self { number, timestamp }
    }

    pub fn genesis() -> Self {
        Self::new(0, Timestamp::from_millis(0))
    }

    /// Next block, `millis` later.
    pub fn advance(&self, millis: i64) -> Self {
        Self::new(self.number + 1, self.timestamp.plus(millis))
    }
}

// 1.5: how to value an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PnlCalcOption {
    /// Hypothetical close against current reserves.
    SpotPrice,
    /// Hypothetical close averaged over reserve snapshots.
    Twap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PnlPreference {
    Max,
    Min,
}
