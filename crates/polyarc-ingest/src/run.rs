//! One crawl run across every configured entity
//!
//! Checkpoints are read once at the start, each entity is crawled in turn,
//! freshly written partitions are fanned out, and only then are the advanced
//! checkpoints persisted. An aborted run therefore leaves the stored
//! checkpoints where they were and the next run re-covers the same window.

use chrono::{DateTime, Utc};
use polyarc_common::EntityKind;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::checkpoint::{
    document_store, save_targets, CheckpointStore, DocumentStore, RunStateStore, TargetList,
};
use crate::config::{CrawlConfig, FanoutMode};
use crate::driver::{CrawlSummary, PaginationDriver};
use crate::error::Result;
use crate::fanout::{fan_out, DatasetPublisher, FanoutReport, GitPublisher, LocalMirrorPublisher};
use crate::fetch::{FetchClient, PageSource};
use crate::manifest::RunManifest;
use crate::normalize::format_timestamp;
use crate::sink::{ArchiveSink, FilesystemSink, SinkSet, TableSink};
use crate::writer::PartitionWriter;

/// How one entity fared
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntityOutcome {
    Crawled(CrawlSummary),
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityReport {
    pub entity: EntityKind,
    pub checkpoint_before: Option<DateTime<Utc>>,
    pub checkpoint_after: Option<DateTime<Utc>>,
    pub outcome: EntityOutcome,
}

impl EntityReport {
    pub fn failed(&self) -> bool {
        match &self.outcome {
            EntityOutcome::Crawled(summary) => !summary.completed(),
            EntityOutcome::Failed { .. } => true,
        }
    }

    pub fn summary(&self) -> Option<&CrawlSummary> {
        match &self.outcome {
            EntityOutcome::Crawled(summary) => Some(summary),
            EntityOutcome::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Set when the once-per-day guard short-circuited the run
    pub skipped_today: bool,
    pub entities: Vec<EntityReport>,
    pub fanout: Option<FanoutReport>,
    /// Checkpoints as persisted at the end of the run
    pub checkpoints: BTreeMap<EntityKind, DateTime<Utc>>,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.entities.iter().any(EntityReport::failed)
    }

    pub fn cap_hits(&self) -> Vec<EntityKind> {
        self.entities
            .iter()
            .filter_map(EntityReport::summary)
            .filter(|summary| summary.cap_hit())
            .map(|summary| summary.entity)
            .collect()
    }
}

/// Wires the fetch client, sinks, state backend and publisher for a run
pub struct Crawler {
    config: CrawlConfig,
    source: Arc<dyn PageSource>,
    state: Arc<dyn DocumentStore>,
    publisher: Option<Arc<dyn DatasetPublisher>>,
}

impl Crawler {
    pub fn new(
        config: CrawlConfig,
        source: Arc<dyn PageSource>,
        state: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            config,
            source,
            state,
            publisher: None,
        }
    }

    /// Build every collaborator from configuration
    pub fn from_config(config: CrawlConfig) -> Result<Self> {
        let source: Arc<dyn PageSource> =
            Arc::new(FetchClient::new(&config.api, config.backoff)?);
        let state = document_store(&config)?;
        let publisher: Option<Arc<dyn DatasetPublisher>> = match config.fanout.mode {
            FanoutMode::None => None,
            FanoutMode::Git => Some(Arc::new(GitPublisher::from_config(&config)?)),
            FanoutMode::Mirror => Some(Arc::new(LocalMirrorPublisher::new(
                config.fanout.work_dir.clone(),
                config.fanout.counts_file_name.clone(),
            ))),
        };

        Ok(Self::new(config, source, state).with_publisher(publisher))
    }

    pub fn with_publisher(mut self, publisher: Option<Arc<dyn DatasetPublisher>>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    pub fn checkpoints(&self) -> CheckpointStore {
        CheckpointStore::new(self.state.clone(), self.config.state.checkpoint_path.clone())
    }

    pub fn run_state(&self) -> RunStateStore {
        RunStateStore::new(self.state.clone(), self.config.state.run_state_path.clone())
    }

    fn sinks(&self) -> Result<Arc<dyn ArchiveSink>> {
        let mut sinks =
            SinkSet::new().with(Arc::new(FilesystemSink::new(&self.config.archive.out_root)));
        if let Some(table) = &self.config.archive.table_store {
            sinks = sinks.with(Arc::new(TableSink::new(table.clone())?));
        }
        info!(sinks = ?sinks.names(), "Archive sinks ready");
        Ok(Arc::new(sinks))
    }

    /// Crawl every configured entity, fan out, then persist checkpoints.
    ///
    /// Entity failures are reported, not returned. Errors are reserved for
    /// failures that must stop the run before checkpoints move: a fan-out
    /// publish failure or a checkpoint save failure.
    #[instrument(skip_all, fields(entities = self.config.entities.len()))]
    pub async fn run(&self, once_per_day: bool) -> Result<RunReport> {
        let started = Utc::now();
        let run_state = self.run_state();
        if once_per_day && run_state.completed_on(started).await {
            info!(day = %started.format("%Y-%m-%d"), "Crawl already completed today; skipping");
            return Ok(RunReport {
                skipped_today: true,
                ..RunReport::default()
            });
        }

        let checkpoints = self.checkpoints();
        let before = checkpoints.load_all().await;
        let writer = PartitionWriter::new(self.sinks()?, self.config.acceptance);
        let driver = PaginationDriver::new(self.source.as_ref(), &writer, &self.config.paging);

        let mut report = RunReport::default();
        let mut advanced = BTreeMap::new();

        for &kind in &self.config.entities {
            let checkpoint_before = before.get(&kind).copied();
            info!(
                entity = %kind,
                checkpoint = checkpoint_before.as_ref().map(format_timestamp).as_deref().unwrap_or("none"),
                "Crawling entity"
            );

            let entity_report = match driver.crawl(kind, checkpoint_before).await {
                Ok(summary) => {
                    let manifest = RunManifest::new(&self.config, &summary, checkpoint_before);
                    if let Err(e) = writer.write_manifest(&manifest).await {
                        warn!(entity = %kind, error = %e, "Failed to write run manifest");
                    }
                    let checkpoint_after = summary.next_checkpoint(checkpoint_before);
                    if let Some(ts) = checkpoint_after {
                        advanced.insert(kind, ts);
                    }
                    EntityReport {
                        entity: kind,
                        checkpoint_before,
                        checkpoint_after,
                        outcome: EntityOutcome::Crawled(summary),
                    }
                },
                Err(e) => {
                    error!(entity = %kind, error = %e, "Entity crawl failed");
                    EntityReport {
                        entity: kind,
                        checkpoint_before,
                        checkpoint_after: checkpoint_before,
                        outcome: EntityOutcome::Failed {
                            error: e.to_string(),
                        },
                    }
                },
            };
            report.entities.push(entity_report);
        }

        if let Some(publisher) = &self.publisher {
            let paths = writer.written_paths().await;
            let fanout = fan_out(
                publisher.as_ref(),
                &self.config.archive.out_root,
                &paths,
                &self.config.fanout.repo_prefix,
            )
            .await?;
            self.record_targets(&fanout).await;
            report.fanout = Some(fanout);
        }

        report.checkpoints = if advanced.is_empty() {
            before
        } else {
            checkpoints.save_all(&advanced).await?
        };

        if report.has_failures() {
            warn!("Run finished with failures; run state not updated");
        } else if let Err(e) = run_state.mark_completed(Utc::now()).await {
            warn!(error = %e, "Failed to record run state");
        }

        Ok(report)
    }

    /// Best-effort record of the datasets this run touched
    async fn record_targets(&self, fanout: &FanoutReport) {
        let mut repos = vec![self.config.github.orchestrator_repo.clone()];
        repos.extend(fanout.touched());
        let targets = TargetList {
            org: self.config.github.org.clone(),
            prefix: self.config.fanout.repo_prefix.clone(),
            repos,
            updated_at_utc: Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        };
        if let Err(e) =
            save_targets(self.state.as_ref(), &self.config.state.targets_path, &targets).await
        {
            warn!(error = %e, "Failed to save fan-out targets");
        }
    }
}
