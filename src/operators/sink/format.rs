//! On-disk layout: how records become lines and how files are named.

use serde::{Deserialize, Serialize};

use crate::config::keys;
use crate::errors::{TopologyError, TopologyResult};
use crate::record::Record;
use crate::storage::join_path;

/// Fields joined by a single-character delimiter, one record per line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelimitedRecordFormat {
    delimiter: char,
}

impl DelimitedRecordFormat {
    pub fn new(delimiter: char) -> Self {
        Self { delimiter }
    }

    /// Accepts exactly one character; whitespace is allowed.
    pub fn parse(raw: &str) -> TopologyResult<Self> {
        let mut chars = raw.chars();
        match (chars.next(), chars.next()) {
            (Some(delimiter), None) => Ok(Self { delimiter }),
            _ => Err(TopologyError::invalid_value(
                keys::DELIMITER,
                raw,
                format!(
                    "delimiter must be exactly one character, got {}",
                    raw.chars().count()
                ),
            )),
        }
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    pub fn format(&self, record: &Record) -> Vec<u8> {
        let mut delimiter = [0u8; 4];
        let delimiter = self.delimiter.encode_utf8(&mut delimiter);
        let mut line = record.fields.join(&*delimiter);
        line.push('\n');
        line.into_bytes()
    }
}

/// `<prefix><topology>-<component>-<task>-<rotation>-<timestamp_ms><extension>`
///
/// The topology name keeps pipelines that share a work directory apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultFileNameFormat {
    pub path: String,
    pub prefix: String,
    pub extension: String,
}

impl DefaultFileNameFormat {
    pub fn name(
        &self,
        topology: &str,
        component: &str,
        task: u32,
        rotation: u64,
        timestamp_ms: i64,
    ) -> String {
        let topology = topology.replace(['/', '\\'], "_");
        format!(
            "{}{topology}-{component}-{task}-{rotation}-{timestamp_ms}{}",
            self.prefix, self.extension
        )
    }

    pub fn full_path(&self, name: &str) -> String {
        join_path(&self.path, name)
    }
}
