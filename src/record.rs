//! The unit of data flowing between operators.

use serde::{Deserialize, Serialize};

/// Where a record was read from: `(partition, offset)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourcePosition {
    pub partition: i32,
    pub offset: i64,
}

impl SourcePosition {
    pub fn new(partition: i32, offset: i64) -> Self {
        Self { partition, offset }
    }
}

/// An ordered list of text fields plus the position it originated from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Record {
    pub fields: Vec<String>,
    pub position: Option<SourcePosition>,
}

impl Record {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            position: None,
        }
    }

    /// A single-field record holding an opaque text payload.
    pub fn text<S: Into<String>>(payload: S) -> Self {
        Self {
            fields: vec![payload.into()],
            position: None,
        }
    }

    pub fn with_position(mut self, position: SourcePosition) -> Self {
        self.position = Some(position);
        self
    }

    /// Derive a new record from this one, keeping its source position.
    pub fn derive<I, S>(&self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            position: self.position,
        }
    }
}
