//! Built-in pipelines.

use tracing::debug;

use crate::config::{PipelineConfig, TopologySettings, keys};
use crate::errors::{TopologyError, TopologyResult};
use crate::operators::{OperatorFactories, ProcessingStage};
use crate::record::Record;
use crate::topology::{PipelineBlueprint, TopologyBuilder};

/// Topic → optional field splitting → rotated files.
///
/// With `input_field_separator` set, each payload is split into fields
/// before the sink joins them with `delimiter`; otherwise payloads are
/// written as single-field lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestBlueprint;

impl PipelineBlueprint for IngestBlueprint {
    fn define_operators(
        &self,
        config: &PipelineConfig,
        factories: &OperatorFactories,
        builder: &mut TopologyBuilder,
    ) -> TopologyResult<()> {
        builder.set_source(factories.build_source(config)?);
        if let Some(separator) = config.get(keys::INPUT_FIELD_SEPARATOR).filter(|s| !s.is_empty()) {
            builder.add_stage(SplitFieldsStage::new(separator));
        }
        builder.set_sink(factories.build_sink(config)?);
        Ok(())
    }
}

/// Splits a single text payload into fields on a separator.
#[derive(Debug, Clone)]
pub struct SplitFieldsStage {
    separator: String,
    expected_fields: Option<usize>,
}

impl SplitFieldsStage {
    pub fn new<S: Into<String>>(separator: S) -> Self {
        Self {
            separator: separator.into(),
            expected_fields: None,
        }
    }

    /// Drop records that do not split into exactly `count` fields.
    pub fn with_expected_fields(mut self, count: usize) -> Self {
        self.expected_fields = Some(count);
        self
    }
}

impl ProcessingStage for SplitFieldsStage {
    fn name(&self) -> &str {
        "split-fields"
    }

    fn spec(&self) -> serde_json::Value {
        serde_json::json!({
            "operator": "split_fields",
            "separator": self.separator,
            "expected_fields": self.expected_fields,
        })
    }

    fn prepare(&mut self, settings: &TopologySettings) -> TopologyResult<()> {
        if self.separator.is_empty() {
            return Err(TopologyError::configuration(format!(
                "'{}' must not be empty",
                keys::INPUT_FIELD_SEPARATOR
            )));
        }
        debug!("Splitting '{}' payloads on {:?}", settings.name, self.separator);
        Ok(())
    }

    fn process(&mut self, record: Record) -> TopologyResult<Vec<Record>> {
        let fields: Vec<String> = record
            .fields
            .iter()
            .flat_map(|field| field.split(self.separator.as_str()))
            .map(str::to_string)
            .collect();

        match self.expected_fields {
            Some(count) if fields.len() != count => {
                debug!(
                    "Dropping record at {:?}: {} fields, expected {}",
                    record.position,
                    fields.len(),
                    count
                );
                Ok(Vec::new())
            }
            _ => Ok(vec![record.derive(fields)]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SourcePosition;

    #[test]
    fn test_split_keeps_position() {
        let mut stage = SplitFieldsStage::new("\t");
        let record = Record::text("a\tb\tc").with_position(SourcePosition::new(0, 9));

        let out = stage.process(record).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].fields, vec!["a", "b", "c"]);
        assert_eq!(out[0].position, Some(SourcePosition::new(0, 9)));
    }

    #[test]
    fn test_expected_field_count_filters() {
        let mut stage = SplitFieldsStage::new("|").with_expected_fields(2);
        assert_eq!(stage.process(Record::text("a|b")).unwrap().len(), 1);
        assert!(stage.process(Record::text("a|b|c")).unwrap().is_empty());
    }
}
