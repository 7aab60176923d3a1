//! Human-readable `Duration` output for settings shipped in descriptors.

use serde::Serializer;
use std::time::Duration;

/// Serialize as a humantime string such as `30s` or `1m 30s`, the same
/// notation the properties file accepts.
pub fn as_humantime<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(&humantime::format_duration(*duration))
}
