use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::{TopologyError, TopologyResult};

pub mod defaults;
pub mod duration_serde;
pub mod keys;
pub mod properties;
pub mod settings;

pub use settings::{ClusterCoordinates, HBaseSettings, RestartPolicy, TopologySettings};

use defaults::ENV_OVERRIDE_PREFIX;

/// Flat, immutable property set a pipeline is built from.
///
/// Values are kept exactly as loaded; the typed accessors decide whether a
/// value is blank, malformed or missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineConfig {
    entries: BTreeMap<String, String>,
}

impl PipelineConfig {
    pub fn from_map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Load from a `.toml` file or, for any other extension, a Java-style
    /// `.properties` file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> TopologyResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            TopologyError::configuration(format!(
                "cannot read properties file {}: {e}",
                path.display()
            ))
        })?;

        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::parse_toml(&contents)?,
            _ => Self::parse_properties(&contents)?,
        };

        info!(
            "Loaded {} properties from {}",
            config.entries.len(),
            path.display()
        );
        Ok(config)
    }

    pub fn parse_properties(contents: &str) -> TopologyResult<Self> {
        Ok(Self {
            entries: properties::parse(contents)?,
        })
    }

    /// Parse a flat TOML document. Scalars are stringified, arrays are
    /// comma-joined and nested tables flatten to dotted keys.
    pub fn parse_toml(contents: &str) -> TopologyResult<Self> {
        let table: toml::Table = toml::from_str(contents)
            .map_err(|e| TopologyError::configuration(format!("invalid TOML properties: {e}")))?;

        let mut entries = BTreeMap::new();
        flatten_toml("", &table, &mut entries)?;
        Ok(Self { entries })
    }

    /// Return a copy with the given entries replacing existing ones.
    pub fn with_overrides<I, K, V>(&self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut entries = self.entries.clone();
        for (key, value) in overrides {
            entries.insert(key.into(), value.into());
        }
        Self { entries }
    }

    /// Apply `STREAM_TOPOLOGY_<KEY>` variables, e.g. `STREAM_TOPOLOGY_WORK_NUM=8`.
    pub fn with_env_overrides<I>(&self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let overrides: Vec<(String, String)> = vars
            .into_iter()
            .filter_map(|(name, value)| {
                name.strip_prefix(ENV_OVERRIDE_PREFIX)
                    .filter(|key| !key.is_empty())
                    .map(|key| (key.to_ascii_lowercase(), value))
            })
            .collect();

        for (key, _) in &overrides {
            debug!("Property '{}' overridden from environment", key);
        }
        self.with_overrides(overrides)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Required value with surrounding whitespace removed; blank counts as missing.
    pub fn require(&self, key: &str) -> TopologyResult<&str> {
        match self.get(key).map(str::trim) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(TopologyError::missing_key(key)),
        }
    }

    /// Required value taken verbatim, so whitespace-only values survive.
    pub fn require_raw(&self, key: &str) -> TopologyResult<&str> {
        match self.get(key) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(TopologyError::missing_key(key)),
        }
    }

    /// Optional value; blank is treated the same as absent.
    pub fn optional(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|value| !value.is_empty())
    }

    pub fn require_parsed<T>(&self, key: &str) -> TopologyResult<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        let raw = self.require(key)?;
        raw.parse::<T>()
            .map_err(|e| TopologyError::invalid_value(key, raw, e))
    }

    pub fn parse_or<T>(&self, key: &str, default: T) -> TopologyResult<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.optional(key) {
            Some(raw) => raw
                .parse::<T>()
                .map_err(|e| TopologyError::invalid_value(key, raw, e)),
            None => Ok(default),
        }
    }

    /// Human-readable duration such as `30s` or `1m 30s`.
    pub fn duration_or(&self, key: &str, default: &str) -> TopologyResult<Duration> {
        let raw = self.optional(key).unwrap_or(default);
        humantime::parse_duration(raw).map_err(|e| TopologyError::invalid_value(key, raw, e))
    }

    /// Fail with the first required key that is missing or blank.
    pub fn validate_required(&self) -> TopologyResult<()> {
        for key in keys::REQUIRED {
            if *key == keys::DELIMITER {
                self.require_raw(key)?;
            } else {
                self.require(key)?;
            }
        }
        Ok(())
    }
}

fn flatten_toml(
    prefix: &str,
    table: &toml::Table,
    entries: &mut BTreeMap<String, String>,
) -> TopologyResult<()> {
    for (key, value) in table {
        let full_key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };

        match value {
            toml::Value::Table(nested) => flatten_toml(&full_key, nested, entries)?,
            toml::Value::Array(items) => {
                let joined = items
                    .iter()
                    .map(toml_scalar)
                    .collect::<TopologyResult<Vec<_>>>()
                    .map_err(|_| {
                        TopologyError::configuration(format!(
                            "array '{full_key}' may only contain scalar values"
                        ))
                    })?
                    .join(",");
                entries.insert(full_key, joined);
            }
            scalar => {
                entries.insert(full_key, toml_scalar(scalar)?);
            }
        }
    }
    Ok(())
}

fn toml_scalar(value: &toml::Value) -> TopologyResult<String> {
    match value {
        toml::Value::String(s) => Ok(s.clone()),
        toml::Value::Integer(i) => Ok(i.to_string()),
        toml::Value::Float(f) => Ok(f.to_string()),
        toml::Value::Boolean(b) => Ok(b.to_string()),
        toml::Value::Datetime(dt) => Ok(dt.to_string()),
        _ => Err(TopologyError::configuration("expected a scalar value")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::reference_config;
    use rstest::rstest;

    #[test]
    fn test_reference_config_is_complete() {
        assert!(reference_config().validate_required().is_ok());
    }

    #[rstest]
    #[case("task_name")]
    #[case("nimbus_seeds")]
    #[case("work_num")]
    #[case("zk_hosts_port")]
    #[case("kafka_topic")]
    #[case("zk_root")]
    #[case("hdfs_url")]
    #[case("hdfs_work_dir")]
    #[case("delimiter")]
    fn test_each_required_key_is_enforced(#[case] key: &str) {
        let mut entries = reference_config().entries;
        entries.remove(key);
        let config = PipelineConfig { entries };

        let err = config.validate_required().unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains(key));
    }

    #[test]
    fn test_blank_value_counts_as_missing() {
        let config = reference_config().with_overrides([("kafka_topic", "   ")]);
        assert!(config.require("kafka_topic").is_err());
        assert!(config.validate_required().is_err());
    }

    #[test]
    fn test_whitespace_delimiter_is_present() {
        let config = reference_config().with_overrides([("delimiter", " ")]);
        assert_eq!(config.require_raw("delimiter").unwrap(), " ");
        assert!(config.validate_required().is_ok());
    }

    #[test]
    fn test_parsed_accessors() {
        let config = reference_config().with_overrides([("sync_count", "abc")]);
        assert_eq!(config.require_parsed::<u32>("work_num").unwrap(), 4);
        assert!(config.parse_or::<u64>("sync_count", 1).is_err());
        assert_eq!(config.parse_or::<u64>("poll_batch_size", 7).unwrap(), 7);
        assert_eq!(
            config.duration_or("submit_timeout", "30s").unwrap(),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_env_overrides_only_apply_prefixed_vars() {
        let config = reference_config().with_env_overrides(vec![
            ("STREAM_TOPOLOGY_WORK_NUM".to_string(), "8".to_string()),
            ("STREAM_TOPOLOGY_".to_string(), "ignored".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ]);
        assert_eq!(config.get("work_num"), Some("8"));
        assert!(!config.contains("home"));
        assert!(!config.contains(""));
    }

    #[test]
    fn test_parse_toml_flattens_values() {
        let config = PipelineConfig::parse_toml(
            r#"
            task_name = "ingest1"
            work_num = 4
            nimbus_seeds = ["10.0.0.1:6627", "10.0.0.2:6627"]

            [hbase]
            hmaster = "hm:16000"
            "#,
        )
        .unwrap();

        assert_eq!(config.get("work_num"), Some("4"));
        assert_eq!(config.get("nimbus_seeds"), Some("10.0.0.1:6627,10.0.0.2:6627"));
        assert_eq!(config.get("hbase.hmaster"), Some("hm:16000"));
    }

    #[test]
    fn test_load_from_file_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let props = dir.path().join("ingest.properties");
        std::fs::write(&props, "task_name = ingest1\nkafka_topic=events\n").unwrap();
        let config = PipelineConfig::load_from_file(&props).unwrap();
        assert_eq!(config.get("task_name"), Some("ingest1"));

        let toml_path = dir.path().join("ingest.toml");
        std::fs::write(&toml_path, "work_num = 2\n").unwrap();
        let config = PipelineConfig::load_from_file(&toml_path).unwrap();
        assert_eq!(config.get("work_num"), Some("2"));

        let missing = PipelineConfig::load_from_file(dir.path().join("absent.properties"));
        assert!(missing.unwrap_err().is_configuration());
    }
}
