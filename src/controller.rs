//! Run lifecycle: start, finalize and status.
//!
//! ## Start
//!
//! `start` discovers the input documents, fixes the run parameters, snapshots
//! the stopword object into the run namespace, writes the manifest and fans
//! out one Read trigger per document. Nothing is published unless the run is
//! valid. If the fan-out itself fails, the run namespace is purged, so Reads
//! already published find no stopword snapshot and write nothing.
//!
//! ## Finalize
//!
//! Clean joins every bucket result into the final object, publishes the
//! completion event and then purges the run namespace. The final object lives
//! outside the namespace, so its existence marks the run finished for every
//! later duplicate trigger.
//!
//! ## Status
//!
//! Derived from the objects that exist; nothing else is tracked.

use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use crate::coordinator::{decode_object, StageContext, StageReport};
use crate::error::{PipelineError, PipelineResult};
use crate::layout;
use crate::partition::{PartitionHash, PartitionHasher};
use crate::queue::MessageQueue;
use crate::store::BlobStore;
use crate::transform::render_groups;
use crate::types::{
    AnagramGroup, CleanRequest, CompletionEvent, ReadRequest, RunHandle, RunId, RunManifest,
    RunParams, RunStatus, Stage,
};

/// Overrides for a single run. Unset fields fall back to configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartOptions {
    /// Stopword object to use.
    pub stopwords_path: Option<String>,
    /// Prefix listed for input documents.
    pub input_prefix: Option<String>,
    /// Shuffle fan-out.
    pub bucket_count: Option<usize>,
    /// Partition digest.
    pub partition_hash: Option<PartitionHash>,
}

/// Starts runs, finalizes them and reports their progress.
pub struct RunController<S: BlobStore, Q: MessageQueue> {
    ctx: StageContext<S, Q>,
}

impl<S: BlobStore, Q: MessageQueue> RunController<S, Q> {
    /// Create a controller over a stage context.
    pub fn new(ctx: StageContext<S, Q>) -> Self {
        Self { ctx }
    }

    /// Start a run over every document under `input_prefix`.
    pub async fn start(&self, stopwords_path: &str, input_prefix: &str) -> PipelineResult<RunHandle> {
        self.start_with(StartOptions {
            stopwords_path: Some(stopwords_path.to_string()),
            input_prefix: Some(input_prefix.to_string()),
            ..Default::default()
        })
        .await
    }

    /// Start a run with per-run overrides.
    pub async fn start_with(&self, options: StartOptions) -> PipelineResult<RunHandle> {
        let config = self.ctx.config();
        let bucket_count = options.bucket_count.unwrap_or(config.bucket_count);
        let partition_hash = options.partition_hash.unwrap_or(config.partition_hash);
        PartitionHasher::new(bucket_count, partition_hash)?;

        let stopwords_path = options
            .stopwords_path
            .unwrap_or_else(|| config.stopwords_path.clone());
        let input_prefix = options
            .input_prefix
            .unwrap_or_else(|| config.input_prefix.clone());

        let stopwords = self.ctx.load_bytes(&stopwords_path).await?;
        let documents = self.discover_inputs(&input_prefix).await?;
        if documents.is_empty() {
            return Err(PipelineError::InputNotFound(format!(
                "no input documents under {:?}",
                input_prefix
            )));
        }

        let run_id = RunId::generate();
        let params = RunParams::new(documents.len(), bucket_count, partition_hash);
        params.validate()?;

        let manifest = RunManifest {
            run_id: run_id.clone(),
            params,
            documents,
            stopwords_path: layout::stopwords(&run_id),
            output_path: self.ctx.final_output(&run_id),
            created_at: Utc::now(),
        };

        self.ctx
            .persist_bytes(&manifest.stopwords_path, stopwords)
            .await?;
        self.ctx
            .persist_json(&layout::manifest(&run_id), &manifest)
            .await?;

        if let Err(e) = self.fan_out(&manifest).await {
            // Reads already in flight fail on the missing stopword snapshot.
            let purged = self.ctx.purge(&layout::run_namespace(&run_id)).await?;
            warn!(run_id = %run_id, purged, error = %e, "Aborted run start");
            return Err(e);
        }

        info!(
            run_id = %run_id,
            documents = params.input_count,
            buckets = params.bucket_count,
            hash = partition_hash.name(),
            "Started run"
        );
        Ok(RunHandle::from(&manifest))
    }

    async fn fan_out(&self, manifest: &RunManifest) -> PipelineResult<()> {
        for (source_index, document) in manifest.documents.iter().enumerate() {
            self.ctx
                .publish(&ReadRequest {
                    run_id: manifest.run_id.clone(),
                    target_document: document.clone(),
                    source_index,
                    stopwords_path: manifest.stopwords_path.clone(),
                    params: manifest.params,
                })
                .await?;
        }
        Ok(())
    }

    async fn discover_inputs(&self, input_prefix: &str) -> PipelineResult<Vec<String>> {
        let config = self.ctx.config();
        let suffix = &config.input_suffix;
        let mut documents: Vec<String> = self
            .ctx
            .list(input_prefix)
            .await?
            .into_iter()
            .filter(|path| !path.ends_with('/') && path.ends_with(suffix.as_str()))
            .filter(|path| !path.starts_with(layout::RUNS_ROOT))
            .filter(|path| {
                config.output_prefix.is_empty() || !path.starts_with(config.output_prefix.as_str())
            })
            .collect();
        documents.sort();
        documents.dedup();
        Ok(documents)
    }

    /// Join every bucket result in bucket order, publish completion and purge
    /// the namespace.
    pub async fn finalize(&self, request: &CleanRequest) -> PipelineResult<StageReport> {
        let run = &request.run_id;
        let final_path = self.ctx.final_output(run);

        if let Some(existing) = self.ctx.load_optional(&final_path).await? {
            if !self.ctx.exists(&layout::manifest(run)).await? {
                warn!(run_id = %run, "Run already finalized, ignoring duplicate cleanup");
                return Ok(StageReport::skipped(run.clone(), Stage::Clean, 0));
            }
            // An earlier attempt wrote the result but did not finish purging.
            let group_count = String::from_utf8_lossy(&existing)
                .lines()
                .filter(|line| !line.is_empty())
                .count();
            info!(run_id = %run, "Resuming interrupted cleanup");
            self.complete(run, &final_path, group_count).await?;
            return Ok(StageReport::completed(run.clone(), Stage::Clean, 0, 0, 1));
        }

        let mut groups: Vec<AnagramGroup> = Vec::new();
        for bucket in 0..request.params.bucket_count {
            let path = layout::result_output(run, bucket);
            let Some(bytes) = self.ctx.load_optional(&path).await? else {
                if self.ctx.is_finalized(run).await? {
                    warn!(run_id = %run, "Run finalized concurrently, ignoring duplicate cleanup");
                    return Ok(StageReport::skipped(run.clone(), Stage::Clean, 0));
                }
                return Err(PipelineError::TransientIo(format!(
                    "result {} not yet visible",
                    path
                )));
            };
            groups.extend(decode_object::<Vec<AnagramGroup>>(&path, &bytes)?);
        }

        self.ctx
            .persist_bytes(&final_path, render_groups(&groups).into_bytes())
            .await?;
        info!(run_id = %run, groups = groups.len(), path = %final_path, "Wrote final result");

        self.complete(run, &final_path, groups.len()).await?;
        Ok(StageReport::completed(run.clone(), Stage::Clean, 0, 1, 1))
    }

    async fn complete(&self, run: &RunId, final_path: &str, group_count: usize) -> PipelineResult<usize> {
        self.ctx
            .publish(&CompletionEvent {
                run_id: run.clone(),
                final_object_path: final_path.to_string(),
                group_count,
                finished_at: Utc::now(),
            })
            .await?;

        let purged = self.ctx.purge(&layout::run_namespace(run)).await?;
        info!(run_id = %run, purged, "Purged run namespace");
        Ok(purged)
    }

    /// Load a run's manifest, if it still exists.
    pub async fn manifest(&self, run: &RunId) -> PipelineResult<Option<RunManifest>> {
        let path = layout::manifest(run);
        match self.ctx.load_optional(&path).await? {
            Some(bytes) => Ok(Some(decode_object(&path, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Report where a run stands.
    pub async fn status(&self, run: &RunId) -> PipelineResult<RunStatus> {
        let final_path = self.ctx.final_output(run);
        if self.ctx.exists(&final_path).await? {
            return Ok(RunStatus::Done {
                run_id: run.clone(),
                final_object_path: final_path,
            });
        }

        let manifest = match self.manifest(run).await? {
            Some(manifest) => manifest,
            None => return Ok(RunStatus::Unknown { run_id: run.clone() }),
        };
        let params = manifest.params;

        let stages = [
            (Stage::Read, params.input_count),
            (Stage::Map, params.input_count),
            (Stage::Shuffle, params.expected_partitions()?),
            (Stage::Reduce, params.bucket_count),
        ];
        for (stage, expected) in stages {
            let Some(dir) = layout::stage_dir(run, stage) else {
                continue;
            };
            let observed = self.ctx.list(&dir).await?.len();
            if observed < expected {
                return Ok(RunStatus::InProgress {
                    run_id: run.clone(),
                    stage,
                    observed,
                    expected,
                });
            }
        }

        Ok(RunStatus::InProgress {
            run_id: run.clone(),
            stage: Stage::Clean,
            observed: 0,
            expected: 1,
        })
    }
}
