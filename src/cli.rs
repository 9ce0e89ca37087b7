//! Command-line interface
//!
//! The binary runs the live dashboard engine by default; `--no-tui` switches
//! to a one-shot JSON export of either daily aggregates or session blocks.

use crate::error::{Result, SmiError};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Terminal dashboard and JSON exporter for Claude Code usage logs
#[derive(Debug, Parser)]
#[command(name = "claude-smi", version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Claude Code data directory containing per-project JSONL logs
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Output JSON to stdout instead of running the dashboard
    #[arg(long)]
    pub no_tui: bool,

    /// Payload for --no-tui
    #[arg(long, value_enum, default_value = "daily")]
    pub view: ExportView,

    /// Override the configured timezone (e.g. Asia/Seoul)
    #[arg(long, value_name = "TZ")]
    pub timezone: Option<String>,

    /// Keep entries from this date (YYYY-MM-DD, inclusive)
    #[arg(long, value_name = "DATE")]
    pub since: Option<String>,

    /// Keep entries until this date (YYYY-MM-DD, inclusive)
    #[arg(long, value_name = "DATE")]
    pub until: Option<String>,
}

/// `--no-tui` payload selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportView {
    /// Daily aggregates, most recent first
    Daily,
    /// Five-hour session blocks, ascending by start time
    Blocks,
}

/// Validate a `--since`/`--until` flag value.
pub fn validate_date_flag(value: &str) -> Result<()> {
    chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| SmiError::InvalidDate(value.to_string()))
}
