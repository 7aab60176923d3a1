//! Rotation and sync policies. They are evaluated independently after
//! every write.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{TopologyError, TopologyResult};

/// Binary size units accepted by `rotation_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SizeUnit {
    B,
    KB,
    MB,
    GB,
    TB,
}

impl SizeUnit {
    pub fn bytes(self) -> u64 {
        match self {
            Self::B => 1,
            Self::KB => 1 << 10,
            Self::MB => 1 << 20,
            Self::GB => 1 << 30,
            Self::TB => 1 << 40,
        }
    }
}

impl FromStr for SizeUnit {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "B" => Ok(Self::B),
            "KB" | "K" => Ok(Self::KB),
            "MB" | "M" => Ok(Self::MB),
            "GB" | "G" => Ok(Self::GB),
            "TB" | "T" => Ok(Self::TB),
            other => Err(TopologyError::configuration(format!(
                "unknown size unit '{other}' (expected B, KB, MB, GB or TB)"
            ))),
        }
    }
}

impl fmt::Display for SizeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self {
            Self::B => "B",
            Self::KB => "KB",
            Self::MB => "MB",
            Self::GB => "GB",
            Self::TB => "TB",
        };
        f.write_str(unit)
    }
}

/// Rotate once the active file holds at least `threshold_bytes`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FileSizeRotationPolicy {
    pub size: f64,
    pub unit: SizeUnit,
    pub threshold_bytes: u64,
}

impl FileSizeRotationPolicy {
    pub fn new(size: f64, unit: SizeUnit) -> TopologyResult<Self> {
        if !size.is_finite() || size <= 0.0 {
            return Err(TopologyError::configuration(format!(
                "rotation size must be positive, got {size}{unit}"
            )));
        }
        let threshold_bytes = (size * unit.bytes() as f64).round() as u64;
        if threshold_bytes == 0 {
            return Err(TopologyError::configuration(format!(
                "rotation size {size}{unit} is smaller than one byte"
            )));
        }
        Ok(Self {
            size,
            unit,
            threshold_bytes,
        })
    }

    /// `offset` is the active file's size after the latest write.
    pub fn mark(&self, offset: u64) -> bool {
        offset >= self.threshold_bytes
    }
}

impl FromStr for FileSizeRotationPolicy {
    type Err = TopologyError;

    /// Parses values such as `1024MB`, `1.5 GB` or `4096` (bytes).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(trimmed.len());
        let (number, unit) = trimmed.split_at(split);

        let size: f64 = number.parse().map_err(|_| {
            TopologyError::configuration(format!("invalid rotation size '{trimmed}'"))
        })?;
        Self::new(size, unit.parse()?)
    }
}

/// Sync after every `count` records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountSyncPolicy {
    count: u64,
    #[serde(skip)]
    pending: u64,
}

impl CountSyncPolicy {
    pub fn new(count: u64) -> TopologyResult<Self> {
        if count == 0 {
            return Err(TopologyError::configuration(
                "sync count must be at least 1",
            ));
        }
        Ok(Self { count, pending: 0 })
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Records written since the last sync
    pub fn pending(&self) -> u64 {
        self.pending
    }

    /// Count one record; true when a sync is now due.
    pub fn mark(&mut self) -> bool {
        self.pending += 1;
        self.pending >= self.count
    }

    pub fn reset(&mut self) {
        self.pending = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1024MB", 1024 * 1024 * 1024)]
    #[case("1 KB", 1024)]
    #[case("1.5kb", 1536)]
    #[case("2G", 2 * 1024 * 1024 * 1024)]
    #[case("4096", 4096)]
    #[case("10B", 10)]
    fn test_rotation_size_parsing(#[case] raw: &str, #[case] expected: u64) {
        let policy: FileSizeRotationPolicy = raw.parse().unwrap();
        assert_eq!(policy.threshold_bytes, expected);
    }

    #[rstest]
    #[case("")]
    #[case("MB")]
    #[case("0MB")]
    #[case("-5MB")]
    #[case("12PB")]
    #[case("1.2.3KB")]
    fn test_rotation_size_rejects(#[case] raw: &str) {
        assert!(raw.parse::<FileSizeRotationPolicy>().unwrap_err().is_configuration());
    }

    #[test]
    fn test_rotation_marks_at_threshold() {
        let policy = FileSizeRotationPolicy::new(1.0, SizeUnit::KB).unwrap();
        assert!(!policy.mark(1023));
        assert!(policy.mark(1024));
        assert!(policy.mark(5000));
    }

    #[test]
    fn test_sync_policy_counts_and_resets() {
        let mut policy = CountSyncPolicy::new(3).unwrap();
        assert!(!policy.mark());
        assert!(!policy.mark());
        assert!(policy.mark());
        assert_eq!(policy.pending(), 3);
        policy.reset();
        assert_eq!(policy.pending(), 0);
        assert!(CountSyncPolicy::new(0).is_err());
    }
}
