//! Live session window metrics
//!
//! The "current session" is the five-hour window anchored to the quota
//! endpoint's reset timestamp. Burn metrics (token and cost rates, cache
//! savings, per-model breakdown) are computed over the entries inside that
//! window; without a quota anchor the active block stands in.

use crate::aggregation::{ModelBreakdown, SessionBlock};
use crate::cost_calculator::Calculator;
use crate::types::{TokenCounts, UsageEntry};
use crate::usage_api::ApiUsage;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Burn statistics over the current session window
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionMetrics {
    /// Token sums inside the window
    pub tokens: TokenCounts,
    /// Cost sum inside the window
    pub total_cost: f64,
    /// Cost avoided through cache reads
    pub cache_savings: f64,
    /// Input+output tokens per minute since the window's first entry
    pub tokens_per_min: f64,
    /// Cost per hour since the window's first entry
    pub cost_per_hour: f64,
    /// Number of entries inside the window
    pub entry_count: usize,
    /// Per-model share of the window
    pub models: BTreeMap<String, ModelBreakdown>,
    /// Window start when anchored to the quota endpoint
    pub window_start: Option<DateTime<Utc>>,
    /// Window end when anchored to the quota endpoint
    pub window_end: Option<DateTime<Utc>>,
}

/// Compute burn metrics for the current session.
///
/// `entries` must be sorted ascending by timestamp. Returns `None` when no
/// entry falls inside the session window (or no window can be determined).
pub fn build_session_metrics(
    entries: &[UsageEntry],
    blocks: &[SessionBlock],
    api_usage: Option<&ApiUsage>,
    calc: &Calculator,
    now: DateTime<Utc>,
) -> Option<SessionMetrics> {
    let window = api_usage.and_then(|usage| {
        let start = usage.session_start().ok()?;
        let end = usage.session_end().ok()?;
        Some((start, end))
    });

    let session_entries: Vec<&UsageEntry> = match window {
        Some((start, _)) => entries.iter().filter(|e| e.timestamp >= start).collect(),
        None => active_block(blocks)
            .map(|block| block.entries.iter().collect())
            .unwrap_or_default(),
    };

    let first = session_entries.first()?;

    let mut metrics = SessionMetrics {
        window_start: window.map(|(start, _)| start),
        window_end: window.map(|(_, end)| end),
        ..Default::default()
    };

    for entry in &session_entries {
        metrics.tokens += entry.tokens;
        metrics.total_cost += entry.cost_usd;
        metrics.cache_savings += calc.cache_savings(entry);
        metrics.entry_count += 1;

        let mb = metrics.models.entry(entry.model.clone()).or_default();
        mb.model = entry.model.clone();
        mb.tokens += entry.total_tokens();
        mb.cost += entry.cost_usd;
    }

    let total_tokens = metrics.tokens.total();
    for mb in metrics.models.values_mut() {
        if total_tokens > 0 {
            mb.percentage = mb.tokens as f64 / total_tokens as f64 * 100.0;
        }
    }

    let elapsed = (now - first.timestamp).max(Duration::minutes(1));
    let minutes = elapsed.num_seconds() as f64 / 60.0;
    let active_tokens = metrics.tokens.input_tokens + metrics.tokens.output_tokens;
    metrics.tokens_per_min = active_tokens as f64 / minutes;
    metrics.cost_per_hour = metrics.total_cost / (minutes / 60.0);

    Some(metrics)
}

fn active_block(blocks: &[SessionBlock]) -> Option<&SessionBlock> {
    blocks
        .iter()
        .rev()
        .find(|b| b.status == crate::aggregation::BlockStatus::Active)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::build_blocks_at;
    use crate::pricing::PricingTable;
    use crate::types::{CostMode, ModelPricing};
    use crate::usage_api::WindowUsage;
    use chrono::TimeZone;

    fn calc() -> Calculator {
        let mut table = PricingTable::new();
        table.insert(
            "claude-sonnet-4-5",
            ModelPricing {
                input: 3.0,
                output: 15.0,
                cache_creation: 3.75,
                cache_read: 0.3,
            },
        );
        Calculator::new(table, CostMode::Auto)
    }

    fn usage(resets_at: &str) -> ApiUsage {
        ApiUsage {
            five_hour: WindowUsage {
                utilization: 50.0,
                resets_at: resets_at.to_string(),
            },
            seven_day: WindowUsage {
                utilization: 10.0,
                resets_at: resets_at.to_string(),
            },
            fetched_at: Utc::now(),
        }
    }

    fn entry_at(ts: DateTime<Utc>, input: u64, output: u64, cache_read: u64, cost: f64) -> UsageEntry {
        UsageEntry {
            timestamp: ts,
            tokens: TokenCounts::new(input, output, 0, cache_read),
            cost_usd: cost,
            model: "claude-sonnet-4-5".to_string(),
            message_id: String::new(),
            request_id: String::new(),
            session_id: "s1".to_string(),
            project_path: String::new(),
        }
    }

    fn utc(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, h, m, s).unwrap()
    }

    #[test]
    fn test_window_includes_entries_from_start() {
        let api = usage("2025-01-15T17:00:00Z"); // window [12:00, 17:00)
        let entries = vec![
            entry_at(utc(11, 59, 0), 1000, 0, 0, 0.1),
            entry_at(utc(12, 0, 0) + Duration::milliseconds(1), 200, 100, 0, 0.2),
            entry_at(utc(13, 30, 0), 300, 150, 0, 0.3),
        ];

        let m = build_session_metrics(&entries, &[], Some(&api), &calc(), utc(14, 0, 0)).unwrap();
        assert_eq!(m.entry_count, 2);
        assert_eq!(m.tokens.input_tokens, 500);
        assert!((m.total_cost - 0.5).abs() < 1e-12);
        assert_eq!(m.window_start, Some(utc(12, 0, 0)));
        assert_eq!(m.window_end, Some(utc(17, 0, 0)));
    }

    #[test]
    fn test_burn_rates() {
        let api = usage("2025-01-15T17:00:00Z");
        // First in-window entry at 13:00, now 13:30 -> 30 minutes elapsed
        let entries = vec![
            entry_at(utc(13, 0, 0), 2000, 1000, 0, 0.6),
            entry_at(utc(13, 20, 0), 1000, 2000, 0, 0.6),
        ];

        let m = build_session_metrics(&entries, &[], Some(&api), &calc(), utc(13, 30, 0)).unwrap();
        // (2000+1000+1000+2000) active tokens over 30 minutes
        assert!((m.tokens_per_min - 200.0).abs() < 1e-9);
        // $1.20 over half an hour
        assert!((m.cost_per_hour - 2.4).abs() < 1e-9);
    }

    #[test]
    fn test_elapsed_clamped_to_one_minute() {
        let api = usage("2025-01-15T17:00:00Z");
        let entries = vec![entry_at(utc(13, 0, 0), 600, 0, 0, 0.0)];

        // "now" is just one second after the entry
        let m = build_session_metrics(&entries, &[], Some(&api), &calc(), utc(13, 0, 1)).unwrap();
        assert!((m.tokens_per_min - 600.0).abs() < 1e-9);
    }

    #[test]
    fn test_cache_savings_accumulates() {
        let api = usage("2025-01-15T17:00:00Z");
        let entries = vec![entry_at(utc(13, 0, 0), 0, 0, 1_000_000, 0.0)];

        let m = build_session_metrics(&entries, &[], Some(&api), &calc(), utc(13, 30, 0)).unwrap();
        // 1M * (3.0 - 0.3) / 1M
        assert!((m.cache_savings - 2.7).abs() < 1e-9);
    }

    #[test]
    fn test_model_breakdown_percentages() {
        let api = usage("2025-01-15T17:00:00Z");
        let mut entries = vec![entry_at(utc(13, 0, 0), 100, 50, 0, 0.1)];
        let mut other = entry_at(utc(13, 5, 0), 300, 150, 0, 0.2);
        other.model = "claude-opus-4-5".to_string();
        entries.push(other);

        let m = build_session_metrics(&entries, &[], Some(&api), &calc(), utc(13, 30, 0)).unwrap();
        assert!((m.models["claude-sonnet-4-5"].percentage - 25.0).abs() < 1e-9);
        assert!((m.models["claude-opus-4-5"].percentage - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_falls_back_to_active_block() {
        let entries = vec![
            entry_at(utc(13, 0, 0), 100, 50, 0, 0.1),
            entry_at(utc(13, 10, 0), 200, 100, 0, 0.2),
        ];
        let blocks = build_blocks_at(&entries, utc(13, 30, 0));

        let m = build_session_metrics(&entries, &blocks, None, &calc(), utc(13, 30, 0)).unwrap();
        assert_eq!(m.entry_count, 2);
        assert!(m.window_start.is_none());
    }

    #[test]
    fn test_no_window_no_block_is_none() {
        let entries = vec![entry_at(utc(3, 0, 0), 100, 50, 0, 0.1)];
        // Blocks built long after the entry: nothing active
        let blocks = build_blocks_at(&entries, utc(23, 0, 0));
        assert!(build_session_metrics(&entries, &blocks, None, &calc(), utc(23, 0, 0)).is_none());
    }

    #[test]
    fn test_empty_window_is_none() {
        let api = usage("2025-01-15T17:00:00Z");
        let entries = vec![entry_at(utc(3, 0, 0), 100, 50, 0, 0.1)];
        assert!(build_session_metrics(&entries, &[], Some(&api), &calc(), utc(13, 0, 0)).is_none());
    }
}
