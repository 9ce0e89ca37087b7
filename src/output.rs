//! JSON export payloads for `--no-tui`

use crate::aggregation::{DailyAggregate, SessionBlock};
use crate::error::Result;

/// Render daily aggregates (most recent first) as indented JSON.
pub fn render_daily_json(daily: &[DailyAggregate]) -> Result<String> {
    Ok(serde_json::to_string_pretty(daily)?)
}

/// Render session blocks (ascending by start time) as indented JSON.
pub fn render_blocks_json(blocks: &[SessionBlock]) -> Result<String> {
    Ok(serde_json::to_string_pretty(blocks)?)
}
