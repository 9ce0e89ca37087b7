//! Aggregation of usage entries into blocks and calendar summaries
//!
//! Session blocks are fixed five-hour windows anchored on hour boundaries;
//! daily and monthly aggregates group entries by their local calendar date
//! under the configured timezone.

use crate::types::{TokenCounts, UsageEntry};
use chrono::{DateTime, Datelike, Duration, DurationRound, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::BTreeMap;

/// Length of one session block
pub const BLOCK_HOURS: i64 = 5;

/// Block lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockStatus {
    /// The chronologically last block whose end is still in the future
    Active,
    /// Every other block
    Done,
}

/// Per-model share of a block or session window
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelBreakdown {
    /// Model identifier
    pub model: String,
    /// Total tokens attributed to the model
    pub tokens: u64,
    /// Total cost attributed to the model
    pub cost: f64,
    /// Share of the window's total tokens, 0-100
    pub percentage: f64,
}

/// A five-hour activity window
#[derive(Debug, Clone, Serialize)]
pub struct SessionBlock {
    /// First entry's timestamp truncated down to the hour
    pub start_time: DateTime<Utc>,
    /// `start_time + 5h`
    pub end_time: DateTime<Utc>,
    /// Entries inside the half-open window `[start, end)`
    pub entries: Vec<UsageEntry>,
    /// Accumulated token sums
    #[serde(flatten)]
    pub tokens: TokenCounts,
    /// Accumulated cost
    pub total_cost: f64,
    /// Number of entries
    pub message_count: usize,
    /// Whether the block is still open
    pub status: BlockStatus,
    /// Per-model share of the block
    pub models: BTreeMap<String, ModelBreakdown>,
}

impl SessionBlock {
    /// Sum of all token categories in the block
    pub fn total_tokens(&self) -> u64 {
        self.tokens.total()
    }
}

/// Group entries into five-hour session blocks.
///
/// Entries must be sorted ascending by timestamp. A new block opens whenever
/// an entry's timestamp is at or after the current block's end; the block
/// start is the opening entry's timestamp floored to the hour.
pub fn build_blocks(entries: &[UsageEntry]) -> Vec<SessionBlock> {
    build_blocks_at(entries, Utc::now())
}

/// [`build_blocks`] with an explicit "now" for status evaluation.
pub fn build_blocks_at(entries: &[UsageEntry], now: DateTime<Utc>) -> Vec<SessionBlock> {
    let mut blocks: Vec<SessionBlock> = Vec::new();
    let mut current: Option<SessionBlock> = None;

    for entry in entries {
        let needs_new = match &current {
            Some(block) => entry.timestamp >= block.end_time,
            None => true,
        };
        if needs_new {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            let start = entry
                .timestamp
                .duration_trunc(Duration::hours(1))
                .unwrap_or(entry.timestamp);
            current = Some(SessionBlock {
                start_time: start,
                end_time: start + Duration::hours(BLOCK_HOURS),
                entries: Vec::new(),
                tokens: TokenCounts::default(),
                total_cost: 0.0,
                message_count: 0,
                status: BlockStatus::Done,
                models: BTreeMap::new(),
            });
        }

        let block = current.as_mut().expect("block opened above");
        block.tokens += entry.tokens;
        block.total_cost += entry.cost_usd;
        block.message_count += 1;

        let mb = block.models.entry(entry.model.clone()).or_default();
        mb.model = entry.model.clone();
        mb.tokens += entry.total_tokens();
        mb.cost += entry.cost_usd;

        block.entries.push(entry.clone());
    }

    if let Some(block) = current.take() {
        blocks.push(block);
    }

    let last = blocks.len().saturating_sub(1);
    for (i, block) in blocks.iter_mut().enumerate() {
        block.status = if i == last && now < block.end_time {
            BlockStatus::Active
        } else {
            BlockStatus::Done
        };

        let total = block.tokens.total();
        for mb in block.models.values_mut() {
            if total > 0 {
                mb.percentage = mb.tokens as f64 / total as f64 * 100.0;
            }
        }
    }

    blocks
}

/// Usage totals for one local calendar day
#[derive(Debug, Clone, Default, Serialize)]
pub struct DailyAggregate {
    /// Date formatted `YYYY-MM-DD` in the aggregation timezone
    pub date: String,
    /// Token sums for the day
    #[serde(flatten)]
    pub tokens: TokenCounts,
    /// Cost sum for the day
    pub total_cost: f64,
    /// Number of entries
    pub entries_count: usize,
}

impl DailyAggregate {
    /// Sum of all token categories for the day
    pub fn total_tokens(&self) -> u64 {
        self.tokens.total()
    }
}

/// Usage totals for one calendar month, with per-day breakdown
#[derive(Debug, Clone, Default, Serialize)]
pub struct MonthlyAggregate {
    /// Month formatted `YYYY-MM`
    pub month: String,
    /// Day of month to that day's aggregate
    pub days: BTreeMap<u32, DailyAggregate>,
    /// Token sums for the month
    pub tokens: TokenCounts,
    /// Cost sum for the month
    pub total_cost: f64,
    /// Number of entries
    pub entries_count: usize,
}

impl MonthlyAggregate {
    /// Sum of all token categories for the month
    pub fn total_tokens(&self) -> u64 {
        self.tokens.total()
    }
}

/// Group entries by their local calendar date. Output is sorted by date
/// descending (most recent first).
pub fn aggregate_daily(entries: &[UsageEntry], tz: Tz) -> Vec<DailyAggregate> {
    let mut groups: BTreeMap<String, DailyAggregate> = BTreeMap::new();

    for entry in entries {
        let date = entry.timestamp.with_timezone(&tz).format("%Y-%m-%d").to_string();
        let agg = groups.entry(date.clone()).or_insert_with(|| DailyAggregate {
            date,
            ..Default::default()
        });
        agg.tokens += entry.tokens;
        agg.total_cost += entry.cost_usd;
        agg.entries_count += 1;
    }

    groups.into_values().rev().collect()
}

/// Aggregate the entries whose local date falls in `(year, month)`.
pub fn aggregate_monthly(entries: &[UsageEntry], tz: Tz, year: i32, month: u32) -> MonthlyAggregate {
    let label = tz
        .with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .earliest()
        .map(|dt| dt.format("%Y-%m").to_string())
        .unwrap_or_else(|| format!("{year:04}-{month:02}"));

    let mut agg = MonthlyAggregate {
        month: label,
        ..Default::default()
    };

    for entry in entries {
        let local = entry.timestamp.with_timezone(&tz);
        if local.year() != year || local.month() != month {
            continue;
        }

        let day = agg.days.entry(local.day()).or_insert_with(|| DailyAggregate {
            date: local.format("%Y-%m-%d").to_string(),
            ..Default::default()
        });
        day.tokens += entry.tokens;
        day.total_cost += entry.cost_usd;
        day.entries_count += 1;

        agg.tokens += entry.tokens;
        agg.total_cost += entry.cost_usd;
        agg.entries_count += 1;
    }

    agg
}
