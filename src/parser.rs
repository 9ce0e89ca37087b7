//! Streaming JSONL parser and entry deduplication
//!
//! One session log line is one JSON object. Only records with
//! `type == "assistant"` and a non-null `message.usage` become entries;
//! everything else is counted as skipped. Malformed lines are counted as
//! errors and never abort the stream.

use crate::types::{RawRecord, TokenCounts, UsageEntry};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::HashSet;
use std::io::{BufRead, Read};

/// Initial per-line buffer capacity
const LINE_BUFFER_BYTES: usize = 1024 * 1024;
/// Hard cap on a single line; longer lines count as errors
const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

/// Result of parsing one byte stream
#[derive(Debug, Default)]
pub struct ParseResult {
    /// Entries extracted from assistant records
    pub entries: Vec<UsageEntry>,
    /// Records of other types, or assistant records without usage
    pub skipped: usize,
    /// Malformed lines, bad timestamps and oversize lines
    pub errored: usize,
}

/// Parse JSONL from a reader, line by line.
///
/// `project_path` is the parent directory of the source file and is stamped
/// on every produced entry.
pub fn parse_reader<R: BufRead>(mut reader: R, project_path: &str) -> ParseResult {
    let mut result = ParseResult::default();
    let mut buf: Vec<u8> = Vec::with_capacity(LINE_BUFFER_BYTES);

    loop {
        buf.clear();
        let n = match (&mut reader)
            .take(MAX_LINE_BYTES as u64 + 1)
            .read_until(b'\n', &mut buf)
        {
            Ok(n) => n,
            Err(_) => {
                result.errored += 1;
                break;
            }
        };
        if n == 0 {
            break;
        }

        if !buf.ends_with(b"\n") && buf.len() > MAX_LINE_BYTES {
            // Oversize line: count it once and discard through its newline.
            result.errored += 1;
            if drain_line(&mut reader).is_err() {
                break;
            }
            continue;
        }

        let line = trim_line(&buf);
        if line.is_empty() {
            continue;
        }

        match parse_line(line, project_path) {
            LineOutcome::Entry(entry) => result.entries.push(*entry),
            LineOutcome::Skipped => result.skipped += 1,
            LineOutcome::Errored => result.errored += 1,
        }
    }

    result
}

enum LineOutcome {
    Entry(Box<UsageEntry>),
    Skipped,
    Errored,
}

fn parse_line(line: &[u8], project_path: &str) -> LineOutcome {
    let rec: RawRecord = match serde_json::from_slice(line) {
        Ok(rec) => rec,
        Err(_) => return LineOutcome::Errored,
    };

    // Only assistant records carry usage data
    if rec.record_type != "assistant" {
        return LineOutcome::Skipped;
    }

    let message = match rec.message {
        Some(m) => m,
        None => return LineOutcome::Skipped,
    };
    let usage = match message.usage {
        Some(u) => u,
        None => return LineOutcome::Skipped,
    };

    let timestamp = match parse_timestamp(&rec.timestamp) {
        Some(ts) => ts,
        None => return LineOutcome::Errored,
    };

    LineOutcome::Entry(Box::new(UsageEntry {
        timestamp,
        tokens: TokenCounts {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_creation_tokens: usage.cache_creation_input_tokens,
            cache_read_tokens: usage.cache_read_input_tokens,
        },
        cost_usd: rec.cost_usd.unwrap_or(0.0),
        model: message.model,
        message_id: message.id,
        request_id: rec.request_id,
        session_id: rec.session_id,
        project_path: project_path.to_string(),
    }))
}

/// Parse RFC3339 (any fractional precision), falling back to the
/// millisecond-Z form some older logs carry.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.3fZ")
        .ok()
        .map(|naive| naive.and_utc())
}

fn trim_line(buf: &[u8]) -> &[u8] {
    let mut line = buf;
    if line.ends_with(b"\n") {
        line = &line[..line.len() - 1];
    }
    if line.ends_with(b"\r") {
        line = &line[..line.len() - 1];
    }
    line
}

/// Discard the remainder of an oversize line up to and including its newline.
fn drain_line<R: BufRead>(reader: &mut R) -> std::io::Result<()> {
    let mut chunk: Vec<u8> = Vec::with_capacity(LINE_BUFFER_BYTES);
    loop {
        chunk.clear();
        let n = reader
            .by_ref()
            .take(LINE_BUFFER_BYTES as u64)
            .read_until(b'\n', &mut chunk)?;
        if n == 0 || chunk.ends_with(b"\n") {
            return Ok(());
        }
    }
}

/// Remove duplicate entries by `message_id:request_id`.
///
/// Entries are stably sorted ascending by timestamp first, so the earliest
/// occurrence of each key wins. The literal key `":"` (both ids empty) can
/// never collide and is always kept.
pub fn dedup(mut entries: Vec<UsageEntry>) -> Vec<UsageEntry> {
    entries.sort_by_key(|e| e.timestamp);

    let mut seen: HashSet<String> = HashSet::with_capacity(entries.len());
    entries.retain(|e| {
        let key = e.dedup_key();
        if key == ":" {
            return true;
        }
        seen.insert(key)
    });

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Cursor;

    const ASSISTANT_LINE: &str = r#"{"type":"assistant","timestamp":"2026-01-15T10:30:00.123Z","sessionId":"s1","requestId":"req_1","message":{"id":"msg_1","model":"claude-sonnet-4-5","usage":{"input_tokens":100,"output_tokens":50,"cache_creation_input_tokens":10,"cache_read_input_tokens":5}}}"#;

    fn parse(input: &str) -> ParseResult {
        parse_reader(Cursor::new(input.as_bytes()), "/proj")
    }

    #[test]
    fn test_parses_assistant_record() {
        let result = parse(ASSISTANT_LINE);
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.skipped, 0);
        assert_eq!(result.errored, 0);

        let e = &result.entries[0];
        assert_eq!(e.tokens.input_tokens, 100);
        assert_eq!(e.tokens.output_tokens, 50);
        assert_eq!(e.tokens.cache_creation_tokens, 10);
        assert_eq!(e.tokens.cache_read_tokens, 5);
        assert_eq!(e.model, "claude-sonnet-4-5");
        assert_eq!(e.message_id, "msg_1");
        assert_eq!(e.request_id, "req_1");
        assert_eq!(e.session_id, "s1");
        assert_eq!(e.project_path, "/proj");
        assert_eq!(
            e.timestamp,
            Utc.with_ymd_and_hms(2026, 1, 15, 10, 30, 0).unwrap()
                + chrono::Duration::milliseconds(123)
        );
    }

    #[test]
    fn test_skips_non_assistant_records() {
        let input = format!(
            "{}\n{}\n{}\n",
            r#"{"type":"user","timestamp":"2026-01-15T10:00:00Z"}"#,
            r#"{"type":"summary","summary":"hi"}"#,
            ASSISTANT_LINE
        );
        let result = parse(&input);
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.skipped, 2);
        assert_eq!(result.errored, 0);
    }

    #[test]
    fn test_skips_assistant_without_usage() {
        let input = r#"{"type":"assistant","timestamp":"2026-01-15T10:00:00Z","message":{"id":"m","model":"claude-sonnet-4-5"}}"#;
        let result = parse(input);
        assert!(result.entries.is_empty());
        assert_eq!(result.skipped, 1);
    }

    #[test]
    fn test_counts_malformed_lines() {
        let input = format!("not json at all\n{{\"type\":\n{}\n", ASSISTANT_LINE);
        let result = parse(&input);
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.errored, 2);
    }

    #[test]
    fn test_counts_bad_timestamp() {
        let input = r#"{"type":"assistant","timestamp":"yesterday","message":{"id":"m","model":"claude-sonnet-4-5","usage":{"input_tokens":1,"output_tokens":1}}}"#;
        let result = parse(input);
        assert!(result.entries.is_empty());
        assert_eq!(result.errored, 1);
    }

    #[test]
    fn test_skips_empty_lines_silently() {
        let input = format!("\n\n{}\n\n", ASSISTANT_LINE);
        let result = parse(&input);
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.skipped, 0);
        assert_eq!(result.errored, 0);
    }

    #[test]
    fn test_millisecond_fallback_timestamp() {
        // Fallback form without offset designator support in parse_from_rfc3339
        let ts = parse_timestamp("2026-01-15T10:30:00.500Z").unwrap();
        assert_eq!(
            ts,
            Utc.with_ymd_and_hms(2026, 1, 15, 10, 30, 0).unwrap()
                + chrono::Duration::milliseconds(500)
        );
        // Nanosecond precision goes through the RFC3339 path
        assert!(parse_timestamp("2026-01-15T10:30:00.123456789Z").is_some());
        assert!(parse_timestamp("garbage").is_none());
    }

    #[test]
    fn test_oversize_line_counts_once_and_continues() {
        let huge = format!(
            "{{\"type\":\"assistant\",\"pad\":\"{}\"}}\n{}\n",
            "x".repeat(MAX_LINE_BYTES + 16),
            ASSISTANT_LINE
        );
        let result = parse(&huge);
        assert_eq!(result.errored, 1);
        assert_eq!(result.entries.len(), 1);
    }

    fn entry_at(ts: DateTime<Utc>, message_id: &str, request_id: &str) -> UsageEntry {
        UsageEntry {
            timestamp: ts,
            tokens: TokenCounts::new(10, 5, 0, 0),
            cost_usd: 0.0,
            model: "claude-sonnet-4-5".to_string(),
            message_id: message_id.to_string(),
            request_id: request_id.to_string(),
            session_id: "s1".to_string(),
            project_path: String::new(),
        }
    }

    #[test]
    fn test_dedup_keeps_earliest() {
        let t = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let entries = vec![
            entry_at(t + chrono::Duration::minutes(1), "m1", "r1"),
            entry_at(t, "m1", "r1"),
        ];

        let out = dedup(entries);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].timestamp, t);
    }

    #[test]
    fn test_dedup_keeps_empty_keys() {
        let t = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let entries = vec![
            entry_at(t, "", ""),
            entry_at(t + chrono::Duration::seconds(1), "", ""),
            entry_at(t + chrono::Duration::seconds(2), "m1", "r1"),
        ];

        let out = dedup(entries);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_dedup_is_idempotent_and_sorted() {
        let t = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let entries = vec![
            entry_at(t + chrono::Duration::hours(2), "m3", "r3"),
            entry_at(t, "m1", "r1"),
            entry_at(t + chrono::Duration::hours(1), "m2", "r2"),
            entry_at(t + chrono::Duration::hours(3), "m1", "r1"),
        ];

        let once = dedup(entries);
        assert_eq!(once.len(), 3);
        assert!(once.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        let twice = dedup(once.clone());
        assert_eq!(once, twice);
    }
}
