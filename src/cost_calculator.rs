//! Cost calculator for usage entries
//!
//! Computes per-entry USD costs from the active pricing table according to
//! the configured [`CostMode`]. Swapping the table does not recompute
//! previously set costs; the engine calls [`Calculator::apply_all`] again
//! after a swap.

use crate::pricing::PricingTable;
use crate::types::{CostMode, UsageEntry};

/// Calculates costs from token usage and the active pricing table
#[derive(Debug, Clone, Default)]
pub struct Calculator {
    table: PricingTable,
    mode: CostMode,
}

impl Calculator {
    /// Create a calculator over a pricing table
    pub fn new(table: PricingTable, mode: CostMode) -> Self {
        Self { table, mode }
    }

    /// The configured cost mode
    pub fn mode(&self) -> CostMode {
        self.mode
    }

    /// Replace the pricing table used for subsequent calculations
    pub fn update_table(&mut self, table: PricingTable) {
        self.table = table;
    }

    /// Cost in USD for a single entry under the configured mode
    pub fn calculate(&self, entry: &UsageEntry) -> f64 {
        match self.mode {
            CostMode::Display => entry.cost_usd,
            CostMode::Calculate => self.calculate_from_tokens(entry),
            CostMode::Auto => {
                if entry.cost_usd > 0.0 {
                    entry.cost_usd
                } else {
                    self.calculate_from_tokens(entry)
                }
            }
        }
    }

    fn calculate_from_tokens(&self, entry: &UsageEntry) -> f64 {
        let pricing = match self.table.lookup(&entry.model) {
            Some(p) => p,
            None => return 0.0,
        };

        let t = &entry.tokens;
        (t.input_tokens as f64 * pricing.input
            + t.output_tokens as f64 * pricing.output
            + t.cache_creation_tokens as f64 * pricing.cache_creation
            + t.cache_read_tokens as f64 * pricing.cache_read)
            / 1_000_000.0
    }

    /// Calculate and set `cost_usd` on every entry
    pub fn apply_all(&self, entries: &mut [UsageEntry]) {
        for entry in entries.iter_mut() {
            entry.cost_usd = self.calculate(entry);
        }
    }

    /// Cost saved by cache reads for a single entry.
    ///
    /// `cache_read_tokens * (input_rate - cache_read_rate) / 1M`, zero when
    /// the model is unknown or nothing was read from cache.
    pub fn cache_savings(&self, entry: &UsageEntry) -> f64 {
        if entry.tokens.cache_read_tokens == 0 {
            return 0.0;
        }
        let pricing = match self.table.lookup(&entry.model) {
            Some(p) => p,
            None => return 0.0,
        };
        entry.tokens.cache_read_tokens as f64 * (pricing.input - pricing.cache_read) / 1_000_000.0
    }
}
