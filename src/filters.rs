//! Entry filtering: inclusive date ranges and project selection

use crate::error::{Result, SmiError};
use crate::types::UsageEntry;
use chrono::{DateTime, Duration, NaiveDate, TimeZone};
use chrono_tz::Tz;
use std::collections::HashSet;

/// Keep entries whose local timestamp falls within `[since, until]`.
///
/// Dates are `YYYY-MM-DD` interpreted in `tz`; both bounds are inclusive and
/// `until` extends to the last nanosecond of that day. `None` means the bound
/// is unconstrained. Invalid date strings yield an error.
pub fn filter_by_time_range(
    entries: Vec<UsageEntry>,
    since: Option<&str>,
    until: Option<&str>,
    tz: Tz,
) -> Result<Vec<UsageEntry>> {
    if since.is_none() && until.is_none() {
        return Ok(entries);
    }

    let since_bound = since.map(|s| local_day_start(s, tz)).transpose()?;
    let until_bound = until.map(|s| local_day_end(s, tz)).transpose()?;

    Ok(entries
        .into_iter()
        .filter(|e| {
            let local = e.timestamp.with_timezone(&tz);
            if let Some(start) = since_bound {
                if local < start {
                    return false;
                }
            }
            if let Some(end) = until_bound {
                if local > end {
                    return false;
                }
            }
            true
        })
        .collect())
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| SmiError::InvalidDate(raw.to_string()))
}

fn local_day_start(raw: &str, tz: Tz) -> Result<DateTime<Tz>> {
    let date = parse_date(raw)?;
    let naive = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| SmiError::InvalidDate(raw.to_string()))?;
    tz.from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| SmiError::InvalidDate(raw.to_string()))
}

fn local_day_end(raw: &str, tz: Tz) -> Result<DateTime<Tz>> {
    let date = parse_date(raw)?;
    let next_midnight = date
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| SmiError::InvalidDate(raw.to_string()))?;
    let dt = tz
        .from_local_datetime(&next_midnight)
        .earliest()
        .ok_or_else(|| SmiError::InvalidDate(raw.to_string()))?;
    Ok(dt - Duration::nanoseconds(1))
}

/// Distinct project paths over the entry set, sorted ascending.
pub fn collect_projects(entries: &[UsageEntry]) -> Vec<String> {
    let mut set: HashSet<&str> = HashSet::new();
    for entry in entries {
        if !entry.project_path.is_empty() {
            set.insert(entry.project_path.as_str());
        }
    }
    let mut projects: Vec<String> = set.into_iter().map(str::to_string).collect();
    projects.sort();
    projects
}

/// Keep entries belonging to one of the active projects. An empty selection
/// keeps everything.
pub fn filter_by_projects(entries: &[UsageEntry], active: &HashSet<String>) -> Vec<UsageEntry> {
    if active.is_empty() {
        return entries.to_vec();
    }
    entries
        .iter()
        .filter(|e| active.contains(&e.project_path))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenCounts;
    use chrono::{TimeZone, Utc};

    fn entry_at(ts: DateTime<Utc>, project: &str) -> UsageEntry {
        UsageEntry {
            timestamp: ts,
            tokens: TokenCounts::new(10, 5, 0, 0),
            cost_usd: 0.0,
            model: "claude-sonnet-4-5".to_string(),
            message_id: String::new(),
            request_id: String::new(),
            session_id: "s1".to_string(),
            project_path: project.to_string(),
        }
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_both_bounds_inclusive() {
        let entries = vec![
            entry_at(utc(2026, 1, 9, 23, 59, 59), "a"),
            entry_at(utc(2026, 1, 10, 0, 0, 0), "a"),
            entry_at(utc(2026, 1, 15, 12, 0, 0), "a"),
            entry_at(utc(2026, 1, 20, 23, 59, 59), "a"),
            entry_at(utc(2026, 1, 21, 0, 0, 0), "a"),
        ];

        let out = filter_by_time_range(entries, Some("2026-01-10"), Some("2026-01-20"), chrono_tz::UTC)
            .unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].timestamp, utc(2026, 1, 10, 0, 0, 0));
        assert_eq!(out[2].timestamp, utc(2026, 1, 20, 23, 59, 59));
    }

    #[test]
    fn test_unbounded_sides() {
        let entries = vec![
            entry_at(utc(2026, 1, 5, 0, 0, 0), "a"),
            entry_at(utc(2026, 1, 15, 0, 0, 0), "a"),
        ];

        let since_only =
            filter_by_time_range(entries.clone(), Some("2026-01-10"), None, chrono_tz::UTC).unwrap();
        assert_eq!(since_only.len(), 1);

        let until_only =
            filter_by_time_range(entries.clone(), None, Some("2026-01-10"), chrono_tz::UTC).unwrap();
        assert_eq!(until_only.len(), 1);

        let unbounded = filter_by_time_range(entries, None, None, chrono_tz::UTC).unwrap();
        assert_eq!(unbounded.len(), 2);
    }

    #[test]
    fn test_bounds_use_local_timezone() {
        // 2026-01-10T16:00Z is already 01:00 on the 11th in Seoul
        let entries = vec![entry_at(utc(2026, 1, 10, 16, 0, 0), "a")];

        let seoul = filter_by_time_range(
            entries.clone(),
            Some("2026-01-11"),
            None,
            chrono_tz::Asia::Seoul,
        )
        .unwrap();
        assert_eq!(seoul.len(), 1);

        let utc_view =
            filter_by_time_range(entries, Some("2026-01-11"), None, chrono_tz::UTC).unwrap();
        assert!(utc_view.is_empty());
    }

    #[test]
    fn test_invalid_date_is_an_error() {
        let entries = vec![entry_at(utc(2026, 1, 10, 0, 0, 0), "a")];
        assert!(matches!(
            filter_by_time_range(entries.clone(), Some("not-a-date"), None, chrono_tz::UTC),
            Err(SmiError::InvalidDate(_))
        ));
        assert!(matches!(
            filter_by_time_range(entries, None, Some("2026-13-40"), chrono_tz::UTC),
            Err(SmiError::InvalidDate(_))
        ));
    }

    #[test]
    fn test_collect_projects_sorted_unique() {
        let t = utc(2026, 1, 10, 0, 0, 0);
        let entries = vec![
            entry_at(t, "/home/u/b"),
            entry_at(t, "/home/u/a"),
            entry_at(t, "/home/u/b"),
            entry_at(t, ""),
        ];
        assert_eq!(collect_projects(&entries), vec!["/home/u/a", "/home/u/b"]);
    }

    #[test]
    fn test_project_filter() {
        let t = utc(2026, 1, 10, 0, 0, 0);
        let entries = vec![entry_at(t, "/a"), entry_at(t, "/b"), entry_at(t, "/c")];

        let none: HashSet<String> = HashSet::new();
        assert_eq!(filter_by_projects(&entries, &none).len(), 3);

        let some: HashSet<String> = ["/a".to_string(), "/c".to_string()].into();
        let filtered = filter_by_projects(&entries, &some);
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|e| e.project_path != "/b"));
    }
}
