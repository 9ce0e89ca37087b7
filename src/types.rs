//! Core domain types for claude-smi
//!
//! The fundamental types shared across the crate: token counts, usage
//! entries parsed from JSONL session logs, pricing rows, and the cost
//! calculation mode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign};

/// Token counts for a single assistant response
///
/// Tracks all four token categories that Claude Code reports per message.
///
/// # Examples
/// ```
/// use claude_smi::types::TokenCounts;
///
/// let tokens = TokenCounts::new(100, 50, 10, 5);
/// assert_eq!(tokens.total(), 165);
///
/// let combined = tokens + TokenCounts::new(50, 25, 5, 2);
/// assert_eq!(combined.input_tokens, 150);
/// ```
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenCounts {
    /// Input tokens used
    pub input_tokens: u64,
    /// Output tokens generated
    pub output_tokens: u64,
    /// Cache creation tokens
    pub cache_creation_tokens: u64,
    /// Cache read tokens
    pub cache_read_tokens: u64,
}

impl TokenCounts {
    /// Create new TokenCounts
    pub fn new(
        input_tokens: u64,
        output_tokens: u64,
        cache_creation_tokens: u64,
        cache_read_tokens: u64,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            cache_creation_tokens,
            cache_read_tokens,
        }
    }

    /// Sum of all four token categories
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_creation_tokens + self.cache_read_tokens
    }
}

impl Add for TokenCounts {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
            cache_creation_tokens: self.cache_creation_tokens + other.cache_creation_tokens,
            cache_read_tokens: self.cache_read_tokens + other.cache_read_tokens,
        }
    }
}

impl AddAssign for TokenCounts {
    fn add_assign(&mut self, other: Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_tokens += other.cache_creation_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
    }
}

/// One assistant response record parsed from a session log
///
/// Timestamps are normalised to UTC at parse time. `message_id` and
/// `request_id` may be empty; entries where both are empty can never be
/// deduplicated and are always kept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageEntry {
    /// Timestamp of the response (UTC)
    pub timestamp: DateTime<Utc>,
    /// Token counts
    #[serde(flatten)]
    pub tokens: TokenCounts,
    /// Cost in USD; adopted from the source record or computed later
    pub cost_usd: f64,
    /// Model identifier
    pub model: String,
    /// Message id from the record, may be empty
    pub message_id: String,
    /// Request id from the record, may be empty
    pub request_id: String,
    /// Session id from the record
    pub session_id: String,
    /// Parent directory of the source file
    pub project_path: String,
}

impl UsageEntry {
    /// Sum of input, output and cache tokens
    pub fn total_tokens(&self) -> u64 {
        self.tokens.total()
    }

    /// Key used for deduplication across files and restarts
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.message_id, self.request_id)
    }
}

/// Cost calculation mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostMode {
    /// Use the record's cost when strictly positive, otherwise compute
    #[default]
    Auto,
    /// Always compute from tokens
    Calculate,
    /// Always use the record's cost verbatim
    Display,
}

impl fmt::Display for CostMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Calculate => write!(f, "calculate"),
            Self::Display => write!(f, "display"),
        }
    }
}

impl std::str::FromStr for CostMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "calculate" => Ok(Self::Calculate),
            "display" => Ok(Self::Display),
            _ => Err(format!("Invalid cost mode: {s}")),
        }
    }
}

/// Per-model rates in USD per one million tokens
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Input token rate
    pub input: f64,
    /// Output token rate
    pub output: f64,
    /// Cache creation token rate
    #[serde(default)]
    pub cache_creation: f64,
    /// Cache read token rate
    #[serde(default)]
    pub cache_read: f64,
}

/// Raw JSONL record shape
///
/// Only the fields the parser cares about; everything else in the line is
/// ignored. Assistant records carry the usage payload under `message.usage`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRecord {
    /// Record type; only "assistant" records carry usage
    #[serde(rename = "type", default)]
    pub record_type: String,
    /// RFC3339 timestamp string
    #[serde(default)]
    pub timestamp: String,
    /// Session identifier
    #[serde(rename = "sessionId", default)]
    pub session_id: String,
    /// Request identifier
    #[serde(rename = "requestId", default)]
    pub request_id: String,
    /// Pre-calculated cost, adopted verbatim when present
    #[serde(rename = "costUSD", default)]
    pub cost_usd: Option<f64>,
    /// Message payload
    #[serde(default)]
    pub message: Option<RawMessage>,
}

/// Message portion of a raw record
#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    /// Message identifier
    #[serde(default)]
    pub id: String,
    /// Model identifier
    #[serde(default)]
    pub model: String,
    /// Usage payload; absent on non-response messages
    #[serde(default)]
    pub usage: Option<RawUsage>,
}

/// Usage portion of a raw record
#[derive(Debug, Clone, Deserialize)]
pub struct RawUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}
