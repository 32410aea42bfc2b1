//! Cache generation key

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Date stamp at the end of a dated label, as in `Covid19-SP-23/10/2021`.
const LABEL_DATE_FORMAT: &str = "%d/%m/%Y";

/// Identifies one cache generation: a human-readable label plus a version number.
///
/// Bumping the version is the only way cached resources are ever refreshed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheVersion {
    pub label: String,
    pub version: u32,
}

impl CacheVersion {
    pub fn new(label: impl Into<String>, version: u32) -> ConfigResult<Self> {
        let label = label.into();
        if label.trim().is_empty() {
            return Err(ConfigError::InvalidVersion(
                "cache label must not be empty".to_string(),
            ));
        }
        Ok(Self { label, version })
    }

    /// Generation name used to address the cache storage.
    pub fn name(&self) -> String {
        self.to_string()
    }

    /// Key of the next deployment on the same label.
    pub fn bumped(&self) -> Self {
        Self {
            label: self.label.clone(),
            version: self.version + 1,
        }
    }

    /// Date stamped at the end of the label, if any.
    pub fn label_date(&self) -> Option<NaiveDate> {
        self.split_label().map(|(_, date)| date)
    }

    fn split_label(&self) -> Option<(&str, NaiveDate)> {
        let (prefix, stamp) = self.label.rsplit_once('-')?;
        let date = NaiveDate::parse_from_str(stamp, LABEL_DATE_FORMAT).ok()?;
        Some((prefix, date))
    }

    /// Key of the next deployment made on `date`.
    ///
    /// The first deployment on a new date restamps the label and restarts at
    /// version 1; further deployments that day increment the version. A label
    /// without a date gets one appended.
    pub fn next_for(&self, date: NaiveDate) -> Self {
        let prefix = match self.split_label() {
            Some((_, stamped)) if stamped == date => return self.bumped(),
            Some((prefix, _)) => prefix,
            None => self.label.as_str(),
        };
        Self {
            label: format!("{prefix}-{}", date.format(LABEL_DATE_FORMAT)),
            version: 1,
        }
    }
}

impl fmt::Display for CacheVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.label, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_pads_version() {
        let version = CacheVersion::new("X", 1).unwrap();
        assert_eq!(version.name(), "X-01");
        assert_eq!(version.bumped().name(), "X-02");
    }

    #[test]
    fn test_name_keeps_label_verbatim() {
        let version = CacheVersion::new("Covid19-SP-23/10/2021", 1).unwrap();
        assert_eq!(version.to_string(), "Covid19-SP-23/10/2021-01");

        let wide = CacheVersion::new("X", 123).unwrap();
        assert_eq!(wide.name(), "X-123");
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_next_for_same_day_increments() {
        let version = CacheVersion::new("Covid19-SP-23/10/2021", 1).unwrap();
        let next = version.next_for(date(2021, 10, 23));
        assert_eq!(next.name(), "Covid19-SP-23/10/2021-02");
        assert_eq!(next.next_for(date(2021, 10, 23)).version, 3);
    }

    #[test]
    fn test_next_for_new_day_restamps_and_resets() {
        let version = CacheVersion::new("Covid19-SP-23/10/2021", 7).unwrap();
        let next = version.next_for(date(2021, 10, 24));
        assert_eq!(next.name(), "Covid19-SP-24/10/2021-01");
        assert_eq!(next.label_date(), Some(date(2021, 10, 24)));
    }

    #[test]
    fn test_next_for_undated_label_appends_date() {
        let version = CacheVersion::new("X", 4).unwrap();
        assert_eq!(version.label_date(), None);
        assert_eq!(version.next_for(date(2022, 1, 5)).name(), "X-05/01/2022-01");
    }

    #[test]
    fn test_empty_label_rejected() {
        assert!(matches!(
            CacheVersion::new("  ", 1),
            Err(ConfigError::InvalidVersion(_))
        ));
    }
}
