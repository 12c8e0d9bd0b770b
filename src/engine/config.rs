//! Engine configuration options.

use crate::margin::MarginParams;
use crate::types::MILLIS_PER_SECOND;
use serde::{Deserialize, Serialize};

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of events to retain in memory.
    pub max_events: usize,
    /// Margin ratios shared by every market.
    pub margin: MarginParams,
    /// Window for the twap valuation of positions.
    pub twap_pnl_interval_ms: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_events: 100_000,
            margin: MarginParams::default(),
            twap_pnl_interval_ms: 15 * 60 * MILLIS_PER_SECOND,
        }
    }
}
