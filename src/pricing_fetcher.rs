//! Remote pricing catalog fetch and normalisation
//!
//! The remote catalog (LiteLLM's hosted JSON) stores per-token rates keyed
//! by model name, including vendor-prefixed variants like
//! `anthropic.claude-...` and `vertex_ai/claude-...`. Only bare `claude-`
//! keys are kept; per-token rates are converted to per-1M-token rates to
//! match the embedded catalog format.

use crate::error::{Result, SmiError};
use crate::pricing::PricingTable;
use crate::types::ModelPricing;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Hosted catalog with per-token rates for every model LiteLLM knows about
pub const LITELLM_PRICING_URL: &str =
    "https://raw.githubusercontent.com/BerriAI/litellm/main/model_prices_and_context_window.json";

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One model entry from the remote catalog. Rates are USD per token.
#[derive(Debug, Deserialize)]
struct RemoteEntry {
    input_cost_per_token: Option<f64>,
    output_cost_per_token: Option<f64>,
    cache_creation_input_token_cost: Option<f64>,
    cache_read_input_token_cost: Option<f64>,
}

/// Fetch the remote catalog and normalise it into a [`PricingTable`].
///
/// A non-200 status or a decode failure yields an error; the caller keeps
/// its previous table in that case.
pub async fn fetch_remote(url: &str) -> Result<PricingTable> {
    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()?;

    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(SmiError::Api(format!(
            "pricing catalog returned HTTP {}",
            response.status().as_u16()
        )));
    }

    let raw: HashMap<String, serde_json::Value> = response.json().await?;
    let table = normalize(raw);
    debug!(models = table.len(), "fetched remote pricing catalog");
    Ok(table)
}

/// Keep bare `claude-` models with both input and output rates, converting
/// per-token prices to per-1M-token prices.
fn normalize(raw: HashMap<String, serde_json::Value>) -> PricingTable {
    raw.into_iter()
        .filter(|(key, _)| key.starts_with("claude-"))
        .filter_map(|(key, value)| {
            let entry: RemoteEntry = serde_json::from_value(value).ok()?;
            let input = entry.input_cost_per_token?;
            let output = entry.output_cost_per_token?;
            Some((
                key,
                ModelPricing {
                    input: input * 1_000_000.0,
                    output: output * 1_000_000.0,
                    cache_creation: entry.cache_creation_input_token_cost.unwrap_or(0.0)
                        * 1_000_000.0,
                    cache_read: entry.cache_read_input_token_cost.unwrap_or(0.0) * 1_000_000.0,
                },
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_catalog() -> HashMap<String, serde_json::Value> {
        let value = json!({
            "claude-sonnet-4-5": {
                "input_cost_per_token": 0.000003,
                "output_cost_per_token": 0.000015,
                "cache_creation_input_token_cost": 0.00000375,
                "cache_read_input_token_cost": 0.0000003,
                "max_tokens": 64000,
                "litellm_provider": "anthropic"
            },
            "anthropic.claude-sonnet-4-5": {
                "input_cost_per_token": 0.000003,
                "output_cost_per_token": 0.000015
            },
            "vertex_ai/claude-sonnet-4-5": {
                "input_cost_per_token": 0.000003,
                "output_cost_per_token": 0.000015
            },
            "claude-no-output": {
                "input_cost_per_token": 0.000003
            },
            "gpt-4o": {
                "input_cost_per_token": 0.0000025,
                "output_cost_per_token": 0.00001
            }
        });
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_normalize_keeps_bare_claude_keys_only() {
        let table = normalize(raw_catalog());
        assert_eq!(table.len(), 1);
        assert!(table.lookup("claude-sonnet-4-5").is_some());
    }

    #[test]
    fn test_normalize_converts_to_per_million() {
        let table = normalize(raw_catalog());
        let p = table.lookup("claude-sonnet-4-5").unwrap();
        assert!((p.input - 3.0).abs() < 1e-9);
        assert!((p.output - 15.0).abs() < 1e-9);
        assert!((p.cache_creation - 3.75).abs() < 1e-9);
        assert!((p.cache_read - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_drops_incomplete_entries() {
        let table = normalize(raw_catalog());
        assert!(table.lookup("claude-no-output").is_none());
    }

    #[test]
    fn test_normalize_defaults_missing_cache_rates() {
        let value = json!({
            "claude-basic": {
                "input_cost_per_token": 0.000001,
                "output_cost_per_token": 0.000002
            }
        });
        let table = normalize(serde_json::from_value(value).unwrap());
        let p = table.lookup("claude-basic").unwrap();
        assert_eq!(p.cache_creation, 0.0);
        assert_eq!(p.cache_read, 0.0);
    }
}
