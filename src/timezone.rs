//! IANA timezone resolution for aggregation and display

use crate::error::{Result, SmiError};
use chrono_tz::Tz;
use std::str::FromStr;

/// Resolve an IANA timezone name like `Asia/Seoul` or `UTC`.
pub fn resolve(name: &str) -> Result<Tz> {
    Tz::from_str(name).map_err(|_| SmiError::InvalidTimezone(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_zones() {
        assert_eq!(resolve("UTC").unwrap(), Tz::UTC);
        assert_eq!(resolve("Asia/Seoul").unwrap().name(), "Asia/Seoul");
        assert_eq!(
            resolve("America/New_York").unwrap().name(),
            "America/New_York"
        );
    }

    #[test]
    fn test_resolve_invalid_zone() {
        assert!(matches!(
            resolve("Mars/Olympus_Mons"),
            Err(SmiError::InvalidTimezone(_))
        ));
    }
}
