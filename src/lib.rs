//! claude-smi - Local telemetry aggregator and live dashboard for Claude
//! Code usage logs
//!
//! This library provides the data plane of the dashboard:
//! - Incremental JSONL ingestion with offset tracking and deduplication
//! - A pricing catalog merged from embedded defaults and a remote fetch
//! - Per-entry cost computation, five-hour session blocks and calendar
//!   aggregates
//! - A live session window anchored to the quota endpoint's reset time
//! - A single-threaded engine loop publishing immutable snapshots
//!
//! # Examples
//!
//! ```no_run
//! use claude_smi::{
//!     aggregation, cost_calculator::Calculator, parser, pricing::PricingTable,
//!     scanner::{self, CancelFlag}, types::CostMode,
//! };
//!
//! fn main() -> claude_smi::Result<()> {
//!     let outcome = scanner::scan_and_parse(
//!         &CancelFlag::new(),
//!         std::path::Path::new("/home/me/.claude/projects"),
//!     );
//!     let mut entries = parser::dedup(outcome.entries);
//!
//!     let calc = Calculator::new(PricingTable::load_default()?, CostMode::Auto);
//!     calc.apply_all(&mut entries);
//!
//!     let daily = aggregation::aggregate_daily(&entries, chrono_tz::UTC);
//!     println!("{} active days", daily.len());
//!     Ok(())
//! }
//! ```

pub mod aggregation;
pub mod cli;
pub mod config;
pub mod cost_calculator;
pub mod engine;
pub mod error;
pub mod filters;
pub mod output;
pub mod parser;
pub mod pricing;
pub mod pricing_fetcher;
pub mod scanner;
pub mod session;
pub mod timezone;
pub mod types;
pub mod usage_api;
pub mod watcher;

// Re-export commonly used types
pub use error::{Result, SmiError};
pub use types::{CostMode, ModelPricing, TokenCounts, UsageEntry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
