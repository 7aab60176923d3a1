use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(not(feature = "kafka"))]
use stream_topology::TopologyError;
#[cfg(feature = "kafka")]
use stream_topology::operators::source::KafkaConnector;
use stream_topology::{
    DeployMode, Pipeline, PipelineConfig, SubmissionOutcome, TopologyResult,
    config::keys,
    operators::{
        OperatorFactories,
        source::{BrokerConnector, MemoryBroker, OffsetStore, offsets::offset_store_from_config},
    },
    pipelines::IngestBlueprint,
};

#[derive(Parser)]
#[command(name = "stream-topology")]
#[command(version)]
#[command(about = "Submit a message-queue to rotating-file ingestion topology")]
#[command(long_about = None)]
struct Cli {
    /// Topology properties file (.properties or .toml)
    properties: PathBuf,

    /// Deployment mode: local or cluster
    mode: String,

    /// Publish each line of this file to an in-memory topic and stop when
    /// it has been ingested (local development runs)
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_logging(cli: &Cli) {
    let log_filter = format!("stream_topology={}", cli.log_level);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| log_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn broker_connector(cli: &Cli, config: &PipelineConfig) -> Result<Arc<dyn BrokerConnector>> {
    let offsets = offset_store_from_config(config);

    if let Some(replay) = &cli.replay {
        let topic = config.require(keys::KAFKA_TOPIC)?;
        let contents = std::fs::read_to_string(replay)
            .with_context(|| format!("cannot read replay file {}", replay.display()))?;

        let broker = MemoryBroker::with_offset_store(offsets);
        for line in contents.lines() {
            broker.publish(topic, bytes::Bytes::copy_from_slice(line.as_bytes()));
        }
        broker.close_topic(topic);
        info!(
            "Replaying {} lines from {} into topic '{}'",
            broker.message_count(topic),
            replay.display(),
            topic
        );
        return Ok(Arc::new(broker));
    }

    Ok(default_connector(offsets)?)
}

#[cfg(feature = "kafka")]
fn default_connector(offsets: Arc<dyn OffsetStore>) -> TopologyResult<Arc<dyn BrokerConnector>> {
    Ok(Arc::new(KafkaConnector::new(offsets)))
}

#[cfg(not(feature = "kafka"))]
fn default_connector(_offsets: Arc<dyn OffsetStore>) -> TopologyResult<Arc<dyn BrokerConnector>> {
    Err(TopologyError::configuration(
        "no message source: this build has no Kafka support (enable the `kafka` feature) \
         and no --replay file was given",
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    info!("Starting stream-topology v{}", env!("CARGO_PKG_VERSION"));

    let mode: DeployMode = cli.mode.parse()?;
    let config = PipelineConfig::load_from_file(&cli.properties)?.with_env_overrides(std::env::vars());
    config.validate_required()?;

    let factories = OperatorFactories::new(broker_connector(&cli, &config)?);
    let pipeline = Pipeline::new(config, &IngestBlueprint, &factories)?;

    match pipeline.submit(mode).await? {
        SubmissionOutcome::LocalCompleted(summary) => {
            info!(
                records_read = summary.records_read,
                records_written = summary.records_written,
                files_rolled = summary.files_rolled,
                commits = summary.commits,
                restarts = summary.restarts,
                "Local run finished"
            );
        }
        SubmissionOutcome::ClusterAccepted(receipt) => {
            info!(
                topology_id = %receipt.topology_id,
                status = %receipt.status,
                "Topology submitted via {}",
                receipt.seed
            );
        }
    }

    Ok(())
}
