#![allow(dead_code)]

use std::sync::Arc;

use stream_topology::operators::OperatorFactories;
use stream_topology::operators::source::MemoryBroker;
use stream_topology::pipelines::IngestBlueprint;
use stream_topology::{Pipeline, PipelineConfig};

/// Properties of the reference ingestion topology.
pub fn reference_config() -> PipelineConfig {
    PipelineConfig::from_map([
        ("task_name", "ingest1"),
        ("nimbus_seeds", "10.0.0.1:6627,10.0.0.2:6627"),
        ("work_num", "4"),
        ("zk_hosts_port", "zk1:2181,zk2:2181"),
        ("kafka_topic", "events"),
        ("zk_root", "/storm"),
        ("hdfs_url", "hdfs://nn:8020"),
        ("hdfs_work_dir", "/data/events"),
        ("delimiter", ","),
    ])
}

pub fn ingest_pipeline(config: PipelineConfig, broker: &MemoryBroker) -> Pipeline {
    let factories = OperatorFactories::new(Arc::new(broker.clone()));
    Pipeline::new(config, &IngestBlueprint, &factories).unwrap()
}

/// Bind a router to an ephemeral local port and return `host:port`.
pub async fn serve(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr.to_string()
}
