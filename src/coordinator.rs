//! Stage coordinator: one stateless handler per pipeline stage.
//!
//! Each handler runs one unit of work and follows the same protocol:
//!
//! 1. Decode and validate the trigger
//! 2. Ignore the trigger if the run is already finalized
//! 3. Fetch input object(s) by computed path
//! 4. Apply the pure transform
//! 5. Persist output object(s) (whole-object overwrite)
//! 6. For barrier-gated transitions, check the barrier
//! 7. Publish the next trigger(s)
//!
//! A failure at any step aborts the invocation before step 7, so no trigger
//! ever points at an output that is not durable. Re-running a unit writes
//! identical bytes to identical paths.

use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use crate::barrier::BarrierTracker;
use crate::config::PipelineConfig;
use crate::controller::RunController;
use crate::error::{PipelineError, PipelineResult};
use crate::layout;
use crate::partition::PartitionHasher;
use crate::queue::MessageQueue;
use crate::store::BlobStore;
use crate::transform::{map_to_pairs, normalize, parse_stopwords, reduce_groups};
use crate::types::{
    decode, encode, AnagramPair, CleanRequest, MapRequest, ReadRequest, ReduceRequest, RunId,
    ShuffleRequest, Stage, Topic, TopicMessage,
};

/// Outcome of one stage invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    /// Run the invocation belonged to.
    pub run_id: RunId,
    /// Stage that ran.
    pub stage: Stage,
    /// Source index (Read/Map/Shuffle) or bucket index (Reduce); 0 for Clean.
    pub unit: usize,
    /// Objects written.
    pub outputs_written: usize,
    /// Messages published.
    pub triggers_published: usize,
    /// The trigger was a duplicate and nothing was done.
    pub skipped: bool,
}

impl StageReport {
    /// Report for an invocation that did its work.
    pub fn completed(
        run_id: RunId,
        stage: Stage,
        unit: usize,
        outputs_written: usize,
        triggers_published: usize,
    ) -> Self {
        Self {
            run_id,
            stage,
            unit,
            outputs_written,
            triggers_published,
            skipped: false,
        }
    }

    /// Report for an ignored duplicate trigger.
    pub fn skipped(run_id: RunId, stage: Stage, unit: usize) -> Self {
        Self {
            run_id,
            stage,
            unit,
            outputs_written: 0,
            triggers_published: 0,
            skipped: true,
        }
    }
}

/// Record stage metrics.
pub fn record_stage_metrics(report: &StageReport, latency_ms: u64) {
    info!(
        target: "anagram_pipeline::metrics",
        metric_type = "stage",
        run_id = %report.run_id,
        stage = %report.stage,
        unit = report.unit,
        outputs_written = report.outputs_written,
        triggers_published = report.triggers_published,
        skipped = report.skipped,
        latency_ms = latency_ms,
        "stage_metric"
    );
}

/// Storage, queue and configuration shared by every handler.
pub struct StageContext<S: BlobStore, Q: MessageQueue> {
    store: Arc<S>,
    queue: Arc<Q>,
    config: Arc<PipelineConfig>,
}

impl<S: BlobStore, Q: MessageQueue> StageContext<S, Q> {
    /// Create a context.
    pub fn new(store: Arc<S>, queue: Arc<Q>, config: PipelineConfig) -> Self {
        Self {
            store,
            queue,
            config: Arc::new(config),
        }
    }

    /// Blob store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Message queue.
    pub fn queue(&self) -> &Arc<Q> {
        &self.queue
    }

    /// Deployment configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Location of a run's final result.
    pub fn final_output(&self, run: &RunId) -> String {
        layout::final_output(&self.config.output_prefix, run)
    }

    /// Fetch an object, or `None` if it does not exist.
    pub async fn load_optional(&self, path: &str) -> PipelineResult<Option<Vec<u8>>> {
        self.store.get(path).await.map_err(PipelineError::from_store)
    }

    /// Fetch an object that must exist.
    pub async fn load_bytes(&self, path: &str) -> PipelineResult<Vec<u8>> {
        self.load_optional(path)
            .await?
            .ok_or_else(|| PipelineError::InputNotFound(path.to_string()))
    }

    /// Fetch and decode a JSON object that must exist.
    pub async fn load_json<T: DeserializeOwned>(&self, path: &str) -> PipelineResult<T> {
        let bytes = self.load_bytes(path).await?;
        decode_object(path, &bytes)
    }

    /// Write raw bytes.
    pub async fn persist_bytes(&self, path: &str, body: Vec<u8>) -> PipelineResult<()> {
        self.store
            .put(path, body)
            .await
            .map_err(PipelineError::from_store)
    }

    /// Encode and write a JSON object.
    pub async fn persist_json<T: Serialize>(&self, path: &str, value: &T) -> PipelineResult<()> {
        let body = serde_json::to_vec(value).map_err(|e| PipelineError::CorruptObject {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        self.persist_bytes(path, body).await
    }

    /// Check whether an object exists.
    pub async fn exists(&self, path: &str) -> PipelineResult<bool> {
        self.store.exists(path).await.map_err(PipelineError::from_store)
    }

    /// List objects under a prefix.
    pub async fn list(&self, prefix: &str) -> PipelineResult<Vec<String>> {
        self.store.list(prefix).await.map_err(PipelineError::from_store)
    }

    /// Delete every object under a prefix.
    pub async fn purge(&self, prefix: &str) -> PipelineResult<usize> {
        self.store
            .delete_all(prefix)
            .await
            .map_err(PipelineError::from_store)
    }

    /// Whether the run's final result has been written.
    pub async fn is_finalized(&self, run: &RunId) -> PipelineResult<bool> {
        self.exists(&self.final_output(run)).await
    }

    /// Encode and publish a message on its topic.
    pub async fn publish<M: TopicMessage>(&self, message: &M) -> PipelineResult<()> {
        let payload = encode(message)?;
        self.queue
            .publish(M::TOPIC, payload)
            .await
            .map_err(PipelineError::from_queue)
    }
}

impl<S: BlobStore, Q: MessageQueue> Clone for StageContext<S, Q> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            queue: Arc::clone(&self.queue),
            config: Arc::clone(&self.config),
        }
    }
}

/// Decode a JSON stage object.
pub fn decode_object<T: DeserializeOwned>(path: &str, bytes: &[u8]) -> PipelineResult<T> {
    serde_json::from_slice(bytes).map_err(|e| PipelineError::CorruptObject {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

fn ensure_in_run(path: &str, run: &RunId) -> PipelineResult<()> {
    if !layout::belongs_to_run(path, run) {
        return Err(PipelineError::MalformedPayload(format!(
            "object {:?} is outside run {}",
            path, run
        )));
    }
    Ok(())
}

/// Runs stage invocations against a store and queue.
pub struct StageCoordinator<S: BlobStore, Q: MessageQueue> {
    ctx: StageContext<S, Q>,
    barrier: BarrierTracker<S>,
    controller: RunController<S, Q>,
}

impl<S: BlobStore + 'static, Q: MessageQueue + 'static> StageCoordinator<S, Q> {
    /// Create a coordinator.
    pub fn new(store: Arc<S>, queue: Arc<Q>, config: PipelineConfig) -> Self {
        let ctx = StageContext::new(store, queue, config);
        Self {
            barrier: BarrierTracker::new(Arc::clone(ctx.store())),
            controller: RunController::new(ctx.clone()),
            ctx,
        }
    }

    /// Run controller sharing this coordinator's store and queue.
    pub fn controller(&self) -> &RunController<S, Q> {
        &self.controller
    }

    /// Shared stage context.
    pub fn context(&self) -> &StageContext<S, Q> {
        &self.ctx
    }

    /// Handle one delivered message.
    pub async fn handle(&self, topic: Topic, payload: &[u8]) -> PipelineResult<StageReport> {
        let start = Instant::now();
        let result = self.route(topic, payload).await;

        match &result {
            Ok(report) => record_stage_metrics(report, start.elapsed().as_millis() as u64),
            Err(e) => warn!(
                topic = %topic,
                code = e.code(),
                retryable = e.is_retryable(),
                error = %e,
                "Stage invocation failed"
            ),
        }

        result
    }

    async fn route(&self, topic: Topic, payload: &[u8]) -> PipelineResult<StageReport> {
        match topic {
            Topic::Read => self.read(decode(payload)?).await,
            Topic::Map => self.map(decode(payload)?).await,
            Topic::Shuffle => self.shuffle(decode(payload)?).await,
            Topic::Reduce => self.reduce(decode(payload)?).await,
            Topic::Clean => self.clean(decode(payload)?).await,
            Topic::Finished => Err(PipelineError::MalformedPayload(
                "completion events are not stage triggers".to_string(),
            )),
        }
    }

    fn duplicate(&self, run: &RunId, stage: Stage, unit: usize) -> StageReport {
        warn!(
            run_id = %run,
            stage = %stage,
            unit,
            "Run already finalized, ignoring duplicate trigger"
        );
        StageReport::skipped(run.clone(), stage, unit)
    }

    /// Delete `written` again if the run was finalized meanwhile.
    ///
    /// Clean writes the final object before it purges, so a write that raced
    /// the purge was either removed by it or is followed by a visible final
    /// object here.
    async fn retract_if_finalized(
        &self,
        run: &RunId,
        stage: Stage,
        unit: usize,
        written: &[String],
    ) -> PipelineResult<Option<StageReport>> {
        if !self.ctx.is_finalized(run).await? {
            return Ok(None);
        }
        for path in written {
            self.ctx.purge(path).await?;
        }
        Ok(Some(self.duplicate(run, stage, unit)))
    }

    /// Read: normalize one document into a word list.
    pub async fn read(&self, request: ReadRequest) -> PipelineResult<StageReport> {
        request.validate()?;
        let run = &request.run_id;
        if self.ctx.is_finalized(run).await? {
            return Ok(self.duplicate(run, Stage::Read, request.source_index));
        }

        let stopwords = self.ctx.load_bytes(&request.stopwords_path).await?;
        let stopwords = parse_stopwords(&String::from_utf8_lossy(&stopwords));
        let document = self.ctx.load_bytes(&request.target_document).await?;
        let words = normalize(&String::from_utf8_lossy(&document), &stopwords);

        let output = layout::read_output(run, request.source_index);
        self.ctx.persist_json(&output, &words).await?;
        if let Some(report) = self
            .retract_if_finalized(run, Stage::Read, request.source_index, &[output.clone()])
            .await?
        {
            return Ok(report);
        }

        self.ctx
            .publish(&MapRequest {
                run_id: run.clone(),
                target_object: output,
                source_index: request.source_index,
                params: request.params,
            })
            .await?;

        info!(
            run_id = %run,
            document = %request.target_document,
            words = words.len(),
            "Finished read"
        );
        Ok(StageReport::completed(run.clone(), Stage::Read, request.source_index, 1, 1))
    }

    /// Map: pair every word with its anagram key.
    pub async fn map(&self, request: MapRequest) -> PipelineResult<StageReport> {
        request.validate()?;
        let run = &request.run_id;
        ensure_in_run(&request.target_object, run)?;
        if self.ctx.is_finalized(run).await? {
            return Ok(self.duplicate(run, Stage::Map, request.source_index));
        }

        let words: Vec<String> = self.ctx.load_json(&request.target_object).await?;
        let pairs = map_to_pairs(&words);

        let output = layout::map_output(run, request.source_index);
        self.ctx.persist_json(&output, &pairs).await?;
        if let Some(report) = self
            .retract_if_finalized(run, Stage::Map, request.source_index, &[output.clone()])
            .await?
        {
            return Ok(report);
        }

        self.ctx
            .publish(&ShuffleRequest {
                run_id: run.clone(),
                target_object: output,
                source_index: request.source_index,
                params: request.params,
            })
            .await?;

        info!(run_id = %run, source = request.source_index, pairs = pairs.len(), "Finished map");
        Ok(StageReport::completed(run.clone(), Stage::Map, request.source_index, 1, 1))
    }

    /// Shuffle: split one pair list into per-bucket partitions and, if this
    /// was the last partition set to land, trigger every reducer.
    pub async fn shuffle(&self, request: ShuffleRequest) -> PipelineResult<StageReport> {
        request.validate()?;
        let run = &request.run_id;
        let params = request.params;
        ensure_in_run(&request.target_object, run)?;
        if self.ctx.is_finalized(run).await? {
            return Ok(self.duplicate(run, Stage::Shuffle, request.source_index));
        }

        let hasher = PartitionHasher::new(params.bucket_count, params.partition_hash)?;
        let pairs: Vec<AnagramPair> = self.ctx.load_json(&request.target_object).await?;
        let partitions = hasher.partition(pairs);

        let mut written = Vec::with_capacity(partitions.len());
        for (bucket, partition) in partitions.iter().enumerate() {
            let path = layout::shuffle_partition(run, bucket, request.source_index);
            self.ctx.persist_json(&path, partition).await?;
            written.push(path);
        }
        if let Some(report) = self
            .retract_if_finalized(run, Stage::Shuffle, request.source_index, &written)
            .await?
        {
            return Ok(report);
        }
        info!(
            run_id = %run,
            source = request.source_index,
            buckets = partitions.len(),
            "Finished shuffle"
        );

        let complete = self
            .barrier
            .check_and_arm(&layout::shuffle_dir(run), params.expected_partitions()?)
            .await?;

        let mut triggers = 0;
        if complete {
            for bucket_index in 0..params.bucket_count {
                self.ctx
                    .publish(&ReduceRequest {
                        run_id: run.clone(),
                        bucket_index,
                        params,
                    })
                    .await?;
                triggers += 1;
            }
            info!(run_id = %run, reducers = triggers, "All shufflers finished, triggered reducers");
        }

        Ok(StageReport::completed(
            run.clone(),
            Stage::Shuffle,
            request.source_index,
            partitions.len(),
            triggers,
        ))
    }

    /// Reduce: group every partition of one bucket and, if this was the last
    /// bucket to land, trigger Clean.
    pub async fn reduce(&self, request: ReduceRequest) -> PipelineResult<StageReport> {
        request.validate()?;
        let run = &request.run_id;
        let params = request.params;
        let bucket = request.bucket_index;
        if self.ctx.is_finalized(run).await? {
            return Ok(self.duplicate(run, Stage::Reduce, bucket));
        }

        let mut pairs: Vec<AnagramPair> = Vec::new();
        for source in 0..params.input_count {
            let path = layout::shuffle_partition(run, bucket, source);
            let bytes = self.ctx.load_optional(&path).await?.ok_or_else(|| {
                PipelineError::TransientIo(format!("partition {} not yet visible", path))
            })?;
            pairs.extend(decode_object::<Vec<AnagramPair>>(&path, &bytes)?);
        }

        let groups = reduce_groups(pairs);
        let output = layout::result_output(run, bucket);
        self.ctx.persist_json(&output, &groups).await?;
        if let Some(report) = self
            .retract_if_finalized(run, Stage::Reduce, bucket, &[output])
            .await?
        {
            return Ok(report);
        }
        info!(run_id = %run, bucket, groups = groups.len(), "Finished reduce");

        let complete = self
            .barrier
            .check_and_arm(&layout::result_dir(run), params.bucket_count)
            .await?;

        let mut triggers = 0;
        if complete {
            self.ctx
                .publish(&CleanRequest {
                    run_id: run.clone(),
                    params,
                })
                .await?;
            triggers = 1;
            info!(run_id = %run, "All reducers finished, triggered cleanup");
        }

        Ok(StageReport::completed(run.clone(), Stage::Reduce, bucket, 1, triggers))
    }

    /// Clean: finalize the run.
    pub async fn clean(&self, request: CleanRequest) -> PipelineResult<StageReport> {
        request.validate()?;
        self.controller.finalize(&request).await
    }
}
