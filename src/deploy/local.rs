//! In-process execution engine.
//!
//! Drives source → stages → sink on a single tokio task. A source position
//! is committed only after every record derived from it is synced, so a
//! crash or restart redelivers rather than loses (at-least-once).

use rand::Rng;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RestartPolicy;
use crate::errors::{TopologyError, TopologyResult};
use crate::operators::OperatorContext;
use crate::record::{Record, SourcePosition};
use crate::topology::Topology;

/// Counters reported when a local run ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LocalRunSummary {
    pub records_read: u64,
    pub records_written: u64,
    pub files_rolled: u64,
    pub commits: u64,
    pub restarts: u32,
}

/// Runs topologies in the current process.
#[derive(Debug, Clone, Default)]
pub struct LocalCluster {
    task_index: u32,
}

impl LocalCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run until the source is exhausted, the engine gives up, or
    /// `shutdown` is cancelled.
    pub async fn run(
        &self,
        topology: Topology,
        shutdown: CancellationToken,
    ) -> TopologyResult<LocalRunSummary> {
        let context = OperatorContext::new(topology.name(), self.task_index);
        info!("Starting topology '{}' on the local cluster", context.topology);

        let engine = Engine::new(topology, context);
        tokio::spawn(engine.run(shutdown))
            .await
            .map_err(|e| TopologyError::illegal_state(format!("local engine task failed: {e}")))?
    }
}

/// Positions waiting for durability, and positions ready to commit.
#[derive(Debug, Default)]
struct AckTracker {
    pending: Vec<SourcePosition>,
    ackable: Vec<SourcePosition>,
}

impl AckTracker {
    /// Record that a source record's outputs were written.
    fn written(&mut self, position: Option<SourcePosition>, synced: bool, unsynced: u64) {
        let all_durable = unsynced == 0;
        if all_durable || synced {
            self.ackable.append(&mut self.pending);
        }
        match position {
            Some(position) if all_durable => self.ackable.push(position),
            Some(position) => self.pending.push(position),
            None => {}
        }
    }

    /// Everything written is durable (the sink was closed).
    fn all_durable(&mut self) {
        self.ackable.append(&mut self.pending);
    }

    fn take_ackable(&mut self) -> Vec<SourcePosition> {
        std::mem::take(&mut self.ackable)
    }

    fn discard(&mut self) {
        self.pending.clear();
        self.ackable.clear();
    }
}

struct Engine {
    topology: Topology,
    context: OperatorContext,
    summary: LocalRunSummary,
    acks: AckTracker,
    consecutive_failures: u32,
}

impl Engine {
    fn new(topology: Topology, context: OperatorContext) -> Self {
        Self {
            topology,
            context,
            summary: LocalRunSummary::default(),
            acks: AckTracker::default(),
            consecutive_failures: 0,
        }
    }

    async fn run(mut self, shutdown: CancellationToken) -> TopologyResult<LocalRunSummary> {
        let policy = self.topology.settings.restart;

        loop {
            if shutdown.is_cancelled() {
                return Ok(self.summary);
            }

            let result = match self.open_all().await {
                Ok(()) => self.pump(&shutdown).await,
                Err(e) => Err(e),
            };

            let e = match result {
                Ok(()) => {
                    self.close_all().await?;
                    info!(
                        "Topology '{}' finished: {:?}",
                        self.context.topology, self.summary
                    );
                    return Ok(self.summary);
                }
                Err(e) => e,
            };

            self.abandon().await;
            self.consecutive_failures += 1;
            if !e.is_retryable() || self.consecutive_failures > policy.max_attempts {
                error!(
                    "Topology '{}' failed after {} restarts: {}",
                    self.context.topology, self.summary.restarts, e
                );
                return Err(e);
            }

            let delay = with_jitter(&policy, self.consecutive_failures);
            warn!(
                "Topology '{}' failed ({}); restart {}/{} in {:?}",
                self.context.topology, e, self.consecutive_failures, policy.max_attempts, delay
            );
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(self.summary),
                _ = tokio::time::sleep(delay) => {}
            }
            self.summary.restarts += 1;
        }
    }

    async fn open_all(&mut self) -> TopologyResult<()> {
        self.topology.source.open(&self.context).await?;
        for stage in &mut self.topology.stages {
            stage.prepare(&self.topology.settings)?;
        }
        self.topology.sink.open(&self.context).await
    }

    async fn pump(&mut self, shutdown: &CancellationToken) -> TopologyResult<()> {
        loop {
            let batch = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested; draining local topology");
                    return Ok(());
                }
                batch = self.topology.source.next_batch() => batch?,
            };

            let Some(records) = batch else {
                info!("Source of topology '{}' is exhausted", self.context.topology);
                return Ok(());
            };
            if records.is_empty() {
                continue;
            }

            self.summary.records_read += records.len() as u64;
            for record in records {
                self.process(record).await?;
            }
            self.commit_ackable().await?;
            self.consecutive_failures = 0;
        }
    }

    async fn process(&mut self, record: Record) -> TopologyResult<()> {
        let position = record.position;
        let mut outputs = vec![record];
        for stage in &mut self.topology.stages {
            let mut next = Vec::with_capacity(outputs.len());
            for output in outputs {
                next.extend(stage.process(output)?);
            }
            outputs = next;
        }

        let mut synced = false;
        for output in &outputs {
            let outcome = self.topology.sink.write(output).await?;
            self.summary.records_written += 1;
            synced |= outcome.synced;
            if outcome.rotated {
                self.summary.files_rolled += 1;
            }
        }

        self.acks
            .written(position, synced, self.topology.sink.unsynced_records());
        Ok(())
    }

    async fn commit_ackable(&mut self) -> TopologyResult<()> {
        let positions = self.acks.take_ackable();
        if positions.is_empty() {
            return Ok(());
        }
        self.topology.source.commit(&positions).await?;
        self.summary.commits += 1;
        debug!("Committed {} positions", positions.len());
        Ok(())
    }

    async fn close_all(&mut self) -> TopologyResult<()> {
        self.topology.sink.close().await?;
        self.acks.all_durable();
        self.commit_ackable().await?;
        self.topology.source.close().await
    }

    /// Release operators after a failure; unacknowledged records are redelivered.
    async fn abandon(&mut self) {
        if let Err(e) = self.topology.sink.close().await {
            debug!("Ignoring sink close failure during restart: {}", e);
        }
        if let Err(e) = self.topology.source.close().await {
            debug!("Ignoring source close failure during restart: {}", e);
        }
        self.acks.discard();
    }
}

fn with_jitter(policy: &RestartPolicy, attempt: u32) -> Duration {
    let base = policy.delay_for(attempt);
    let spread = (base.as_millis() / 4) as u64;
    if spread == 0 {
        return base;
    }
    base + Duration::from_millis(rand::rng().random_range(0..=spread))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TopologySettings;
    use crate::operators::sink::{FileSink, SinkSpec};
    use crate::operators::source::{MemoryBroker, MessageSource, SourceSpec};
    use crate::operators::ProcessingStage;
    use crate::test_support::{MemoryFileSystem, reference_config};
    use crate::topology::TopologyBuilder;
    use bytes::Bytes;
    use std::sync::Arc;

    #[test]
    fn test_ack_tracker_waits_for_sync() {
        let mut acks = AckTracker::default();
        acks.written(Some(SourcePosition::new(0, 0)), false, 1);
        acks.written(Some(SourcePosition::new(0, 1)), false, 2);
        assert!(acks.take_ackable().is_empty());

        // A sync inside the third record's writes covers the first two only.
        acks.written(Some(SourcePosition::new(0, 2)), true, 1);
        assert_eq!(
            acks.take_ackable(),
            vec![SourcePosition::new(0, 0), SourcePosition::new(0, 1)]
        );

        acks.written(Some(SourcePosition::new(0, 3)), true, 0);
        assert_eq!(
            acks.take_ackable(),
            vec![SourcePosition::new(0, 2), SourcePosition::new(0, 3)]
        );
    }

    #[test]
    fn test_jitter_stays_within_a_quarter() {
        let policy = RestartPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(400),
        };
        for _ in 0..50 {
            let delay = with_jitter(&policy, 2);
            assert!(delay >= Duration::from_millis(800));
            assert!(delay <= Duration::from_millis(1000));
        }
    }

    fn topology(broker: &MemoryBroker, fs: &MemoryFileSystem, overrides: &[(&str, &str)]) -> Topology {
        let config = reference_config()
            .with_overrides([("restart_backoff", "10ms"), ("poll_timeout", "20ms")])
            .with_overrides(overrides.iter().copied());
        let source = MessageSource::new(
            SourceSpec::from_config(&config).unwrap(),
            Arc::new(broker.clone()),
        );
        let sink = FileSink::new(SinkSpec::from_config(&config).unwrap(), Arc::new(fs.clone())).unwrap();

        let mut builder = TopologyBuilder::new();
        builder.set_source(source).set_sink(sink);
        builder
            .build(TopologySettings::from_config(&config).unwrap())
            .unwrap()
    }

    fn publish(broker: &MemoryBroker, count: usize) {
        for i in 0..count {
            broker.publish("events", Bytes::from(format!("event-{i}")));
        }
    }

    async fn committed(broker: &MemoryBroker) -> i64 {
        broker
            .offset_store()
            .load("/storm/ingest1")
            .await
            .unwrap()
            .get(&0)
            .copied()
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_bounded_run_writes_and_commits_everything() {
        let broker = MemoryBroker::new();
        let fs = MemoryFileSystem::default();
        publish(&broker, 10);
        broker.close_topic("events");

        let summary = LocalCluster::new()
            .run(
                topology(&broker, &fs, &[("sync_count", "4"), ("rotation_size", "30B")]),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(summary.records_read, 10);
        assert_eq!(summary.records_written, 10);
        assert!(summary.files_rolled >= 2);
        assert_eq!(summary.restarts, 0);
        assert_eq!(committed(&broker).await, 10);

        let expected: String = (0..10).map(|i| format!("event-{i}\n")).collect();
        assert_eq!(fs.contents(), expected);
    }

    #[tokio::test]
    async fn test_unsynced_records_are_not_committed_mid_run() {
        let broker = MemoryBroker::new();
        let fs = MemoryFileSystem::default();
        publish(&broker, 5);

        let shutdown = CancellationToken::new();
        let run = tokio::spawn({
            let topology = topology(&broker, &fs, &[("sync_count", "3")]);
            let shutdown = shutdown.clone();
            async move { LocalCluster::new().run(topology, shutdown).await }
        });

        // Records 0..3 are synced, 3 and 4 are still pending.
        for _ in 0..100 {
            if committed(&broker).await == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(committed(&broker).await, 3);

        shutdown.cancel();
        let summary = run.await.unwrap().unwrap();
        assert_eq!(summary.records_written, 5);
        assert_eq!(committed(&broker).await, 5);
    }

    #[tokio::test]
    async fn test_storage_outage_exhausts_restarts() {
        let broker = MemoryBroker::new();
        let fs = MemoryFileSystem::default();
        fs.set_unavailable(true);

        let err = LocalCluster::new()
            .run(
                topology(&broker, &fs, &[("restart_attempts", "2")]),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TopologyError::StorageUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_restart_redelivers_uncommitted_records() {
        let broker = MemoryBroker::new();
        let fs = MemoryFileSystem::default();
        publish(&broker, 4);
        broker.close_topic("events");
        fs.set_fail_writes(true);

        let recovering = fs.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(15)).await;
            recovering.set_fail_writes(false);
        });

        let summary = LocalCluster::new()
            .run(
                topology(&broker, &fs, &[("restart_attempts", "10")]),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(summary.restarts >= 1);
        assert_eq!(committed(&broker).await, 4);
        let contents = fs.contents();
        for i in 0..4 {
            assert!(contents.contains(&format!("event-{i}\n")));
        }
    }

    #[derive(Debug)]
    struct Reject;

    impl ProcessingStage for Reject {
        fn name(&self) -> &str {
            "reject"
        }

        fn process(&mut self, _record: Record) -> TopologyResult<Vec<Record>> {
            Err(TopologyError::illegal_state("poison record"))
        }
    }

    #[tokio::test]
    async fn test_non_retryable_failures_are_not_restarted() {
        let broker = MemoryBroker::new();
        let fs = MemoryFileSystem::default();
        publish(&broker, 1);

        let config = reference_config().with_overrides([("poll_timeout", "20ms")]);
        let mut builder = TopologyBuilder::new();
        builder
            .set_source(MessageSource::new(
                SourceSpec::from_config(&config).unwrap(),
                Arc::new(broker.clone()),
            ))
            .add_stage(Reject)
            .set_sink(FileSink::new(SinkSpec::from_config(&config).unwrap(), Arc::new(fs)).unwrap());
        let topology = builder.build(TopologySettings::from_config(&config).unwrap()).unwrap();

        let err = LocalCluster::new()
            .run(topology, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TopologyError::IllegalState { .. }));
        assert_eq!(committed(&broker).await, 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_opens_nothing() {
        let broker = MemoryBroker::new();
        let fs = MemoryFileSystem::default();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let summary = LocalCluster::new()
            .run(topology(&broker, &fs, &[]), shutdown)
            .await
            .unwrap();
        assert_eq!(summary, LocalRunSummary::default());
        assert!(fs.files().is_empty());
    }
}
