//! Pricing table with deterministic model-name resolution
//!
//! The table maps model keys to per-1M-token rates. An embedded catalog
//! ships with the binary; a remotely fetched catalog may be overlaid on top
//! of it (overlay keys replace base keys, foreign keys are added).

use crate::error::Result;
use crate::types::ModelPricing;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default catalog compiled into the binary
const EMBEDDED_PRICING: &str = include_str!("../embedded/pricing.json");

/// Map from model key to per-1M-token rates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingTable(HashMap<String, ModelPricing>);

impl PricingTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the embedded default catalog
    pub fn load_default() -> Result<Self> {
        let table: HashMap<String, ModelPricing> = serde_json::from_str(EMBEDDED_PRICING)?;
        Ok(Self(table))
    }

    /// Insert a single model's rates
    pub fn insert(&mut self, model: impl Into<String>, pricing: ModelPricing) {
        self.0.insert(model.into(), pricing);
    }

    /// Overlay `other` onto this table. Existing keys are overwritten.
    pub fn merge(&mut self, other: PricingTable) {
        self.0.extend(other.0);
    }

    /// Number of models in the table
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resolve pricing for a model name.
    ///
    /// Resolution order: exact key match, then the longest key that is a
    /// prefix of `model`, then the lexicographically first key that `model`
    /// is a prefix of (covers abbreviated names). The result is independent
    /// of map iteration order.
    pub fn lookup(&self, model: &str) -> Option<ModelPricing> {
        if let Some(p) = self.0.get(model) {
            return Some(*p);
        }

        let mut best: Option<(&str, &ModelPricing)> = None;
        for (key, p) in &self.0 {
            if model.starts_with(key.as_str())
                && best.map_or(true, |(b, _)| key.len() > b.len())
            {
                best = Some((key, p));
            }
        }
        if let Some((_, p)) = best {
            return Some(*p);
        }

        let mut keys: Vec<&String> = self.0.keys().collect();
        keys.sort();
        keys.iter()
            .find(|key| key.starts_with(model))
            .map(|key| self.0[key.as_str()])
    }
}

impl FromIterator<(String, ModelPricing)> for PricingTable {
    fn from_iter<T: IntoIterator<Item = (String, ModelPricing)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
