//! Pipeline Executor: orders the fixed 8-stage DAG into a
//! topological execution, wires artifacts between stages via the Artifact
//! Store Adapter, bounds fan-out concurrency to `N_clip`, and surfaces stage
//! failures classified as retryable vs fatal.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use reelcut_core::{Job, JobId, JobStatus, ReelcutConfig, StageName};
use reelcut_storage::{ArtifactStoreAdapter, MetadataStore};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{PipelineOutcome, StageError};
use crate::progress::ProgressPublisher;
use crate::stage_runner::{StageBodyRunner, StageContext, count_input_clips};

/// One node of the fixed DAG. `Normalize` fans out one node per input clip
///, every other stage is a singleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum NodeId {
    AudioSlice,
    Beats,
    Plan,
    Normalize(usize),
    CutAndConcat,
    StyleGrade,
    Mux,
    QualityGate,
}

impl NodeId {
    fn stage_name(self) -> StageName {
        match self {
            NodeId::AudioSlice => StageName::AudioSlice,
            NodeId::Beats => StageName::Beats,
            NodeId::Plan => StageName::Plan,
            NodeId::Normalize(_) => StageName::Normalize,
            NodeId::CutAndConcat => StageName::CutAndConcat,
            NodeId::StyleGrade => StageName::StyleGrade,
            NodeId::Mux => StageName::Mux,
            NodeId::QualityGate => StageName::QualityGate,
        }
    }

    /// Declared dependencies: `audio_slice`
    /// first; `beats -> plan` and the `normalize` fan-out both become ready
    /// as soon as `audio_slice` completes and run concurrently; `cut_and_concat`
    /// waits on `plan` and every `normalize_i`; the rest is a linear tail.
    fn deps(self, clip_count: usize) -> Vec<NodeId> {
        match self {
            NodeId::AudioSlice => vec![],
            NodeId::Beats => vec![NodeId::AudioSlice],
            NodeId::Plan => vec![NodeId::Beats],
            NodeId::Normalize(_) => vec![NodeId::AudioSlice],
            NodeId::CutAndConcat => {
                let mut deps: Vec<NodeId> = (0..clip_count).map(NodeId::Normalize).collect();
                deps.push(NodeId::Plan);
                deps
            }
            NodeId::StyleGrade => vec![NodeId::CutAndConcat],
            NodeId::Mux => vec![NodeId::StyleGrade],
            NodeId::QualityGate => vec![NodeId::Mux],
        }
    }

    fn progress_percent(self, clip_count: usize) -> u8 {
        // Coarse per-stage weights; monotonicity is the only property that
        // matters, not the exact curve.
        match self {
            NodeId::AudioSlice => 5,
            NodeId::Beats => 15,
            NodeId::Plan => 20,
            NodeId::Normalize(i) => {
                let span = 35u32; // 20 -> 55 across the fan-out
                let per_clip = span / clip_count.max(1) as u32;
                (20 + per_clip * (i as u32 + 1)).min(55) as u8
            }
            NodeId::CutAndConcat => 80,
            NodeId::StyleGrade => 92,
            NodeId::Mux => 97,
            NodeId::QualityGate => 100,
        }
    }

    fn all(clip_count: usize) -> Vec<NodeId> {
        let mut nodes = vec![NodeId::AudioSlice, NodeId::Beats, NodeId::Plan];
        nodes.extend((0..clip_count).map(NodeId::Normalize));
        nodes.extend([NodeId::CutAndConcat, NodeId::StyleGrade, NodeId::Mux, NodeId::QualityGate]);
        nodes
    }
}

pub struct PipelineExecutor {
    metadata: Arc<dyn MetadataStore>,
    artifacts: Arc<ArtifactStoreAdapter>,
    stages: Arc<dyn StageBodyRunner>,
    progress: Arc<ProgressPublisher>,
    config: ReelcutConfig,
}

impl PipelineExecutor {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        artifacts: Arc<ArtifactStoreAdapter>,
        stages: Arc<dyn StageBodyRunner>,
        progress: Arc<ProgressPublisher>,
        config: ReelcutConfig,
    ) -> Self {
        Self { metadata, artifacts, stages, progress, config }
    }

    async fn is_cancelled(&self, job_id: JobId) -> bool {
        matches!(self.metadata.get_job(job_id).await, Ok(job) if job.status == JobStatus::Cancelled)
    }

    /// `PipelineExecutor::run`: drives `job_id` through every
    /// stage of the fixed DAG, dispatching ready nodes to a pool bounded by
    /// `N_clip` concurrent stage bodies, checking for cancellation at each
    /// stage boundary, and tie-breaking parallel failures by reporting the
    /// first one observed while cancelling its siblings.
    pub async fn run(&self, job_id: JobId) -> PipelineOutcome {
        let job = match self.metadata.get_job(job_id).await {
            Ok(job) => job,
            Err(_) => {
                return PipelineOutcome::StageFailed {
                    stage: StageName::Input,
                    error: StageError::FatalTool(format!("job {job_id} not found")),
                };
            }
        };

        let ctx = StageContext::new(self.artifacts.clone(), self.config.clone());
        let clip_count = match count_input_clips(&ctx, job_id).await {
            Ok(n) => n,
            Err(error) => return PipelineOutcome::StageFailed { stage: StageName::Input, error },
        };
        if clip_count == 0 {
            return PipelineOutcome::StageFailed {
                stage: StageName::Plan,
                error: StageError::PlanInfeasible("job has zero input clips".to_string()),
            };
        }

        let all_nodes = NodeId::all(clip_count);
        let mut completed: HashSet<NodeId> = HashSet::new();
        let mut dispatched: HashSet<NodeId> = HashSet::new();
        let mut first_failure: Option<(NodeId, StageError)> = None;

        let semaphore = Arc::new(Semaphore::new(self.config.n_clip.max(1)));
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let mut joinset: JoinSet<(NodeId, Result<(), StageError>)> = JoinSet::new();

        'outer: loop {
            if first_failure.is_none() && joinset.is_empty() && self.is_cancelled(job_id).await {
                self.cleanup_incomplete(job_id, &dispatched, &completed).await;
                let frontier = all_nodes.iter().find(|n| !completed.contains(n)).copied().unwrap_or(NodeId::AudioSlice);
                return PipelineOutcome::StageCancelled { stage: frontier.stage_name() };
            }

            if first_failure.is_none() {
                for &node in &all_nodes {
                    if dispatched.contains(&node) || completed.contains(&node) {
                        continue;
                    }
                    if !node.deps(clip_count).iter().all(|d| completed.contains(d)) {
                        continue;
                    }
                    dispatched.insert(node);

                    let stages = self.stages.clone();
                    let ctx = ctx.clone();
                    let job = job.clone();
                    let permit = semaphore.clone();
                    let cancelled = cancel_flag.clone();

                    joinset.spawn(async move {
                        let _permit = permit.acquire_owned().await.expect("semaphore never closed");
                        if cancelled.load(Ordering::SeqCst) {
                            return (node, Err(StageError::CancelObserved));
                        }
                        let result = run_node(&stages, &ctx, job_id, node, &job, clip_count).await;
                        (node, result)
                    });
                }
            }

            let Some(joined) = joinset.join_next().await else {
                break 'outer;
            };

            match joined {
                Ok((node, Ok(()))) => {
                    completed.insert(node);
                    self.progress.publish_now(job_id, node.progress_percent(clip_count), node.stage_name().as_str()).await;
                }
                Ok((node, Err(error))) => {
                    if first_failure.is_none() && !matches!(error, StageError::CancelObserved) {
                        tracing::warn!(%job_id, stage = %node.stage_name(), ?error, "stage failed, cancelling siblings");
                        cancel_flag.store(true, Ordering::SeqCst);
                        first_failure = Some((node, error));
                        // Aborting here drops each sibling task's in-flight `ToolInvocation`
                        // future; `kill_on_drop(true)` on the spawned child then tears down
                        // the subprocess instead of leaving it running unattended.
                        joinset.abort_all();
                    }
                }
                Err(join_error) => {
                    if join_error.is_cancelled() {
                        // Expected once `abort_all` has been called for a sibling failure.
                    } else if join_error.is_panic() {
                        tracing::error!(%job_id, "stage task panicked");
                        if first_failure.is_none() {
                            first_failure = Some((
                                NodeId::AudioSlice,
                                StageError::FatalTool("stage task panicked".to_string()),
                            ));
                            cancel_flag.store(true, Ordering::SeqCst);
                            joinset.abort_all();
                        }
                    }
                }
            }
        }

        if let Some((node, error)) = first_failure {
            return PipelineOutcome::StageFailed { stage: node.stage_name(), error };
        }
        PipelineOutcome::Completed
    }

    /// Deletes artifacts for stages that were dispatched but never completed
    /// when a cancellation is observed: partial output from an aborted
    /// stage is never left behind.
    async fn cleanup_incomplete(&self, job_id: JobId, dispatched: &HashSet<NodeId>, completed: &HashSet<NodeId>) {
        let mut stages_to_clean: HashSet<StageName> = HashSet::new();
        for node in dispatched.difference(completed) {
            stages_to_clean.insert(node.stage_name());
        }
        for stage in stages_to_clean {
            if let Err(err) = self.artifacts.delete_stage(job_id, stage).await {
                tracing::warn!(%job_id, %stage, %err, "failed to clean up partial artifacts after cancellation");
            }
        }
    }
}

async fn run_node(
    stages: &Arc<dyn StageBodyRunner>,
    ctx: &StageContext,
    job_id: JobId,
    node: NodeId,
    job: &Job,
    clip_count: usize,
) -> Result<(), StageError> {
    match node {
        NodeId::AudioSlice => stages.audio_slice(ctx, job_id).await,
        NodeId::Beats => stages.beats(ctx, job_id).await,
        NodeId::Plan => stages.plan(ctx, job_id, job).await,
        NodeId::Normalize(index) => stages.normalize(ctx, job_id, index, clip_count).await,
        NodeId::CutAndConcat => stages.cut_and_concat(ctx, job_id).await,
        NodeId::StyleGrade => stages.style_grade(ctx, job_id, job).await,
        NodeId::Mux => stages.mux(ctx, job_id).await,
        NodeId::QualityGate => stages.quality_gate(ctx, job_id).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reelcut_broker::InMemoryBroker;
    use reelcut_core::{ContentKind, Style};
    use reelcut_storage::{BlobStore, FilesystemBlobStore, InMemoryMetadataStore};
    use std::sync::atomic::AtomicUsize;

    /// A scripted `StageBodyRunner` double: every stage body succeeds
    /// immediately except ones named in `fail_on`, which return the given
    /// error. This lets Pipeline Executor / Worker tests exercise the spec's
    /// end-to-end scenarios (§8) without a real media toolchain.
    struct ScriptedStages {
        fail_on: Vec<(StageName, StageError)>,
        normalize_calls: AtomicUsize,
    }

    impl ScriptedStages {
        fn new(fail_on: Vec<(StageName, StageError)>) -> Self {
            Self { fail_on, normalize_calls: AtomicUsize::new(0) }
        }

        fn maybe_fail(&self, stage: StageName) -> Result<(), StageError> {
            if let Some((_, error)) = self.fail_on.iter().find(|(s, _)| *s == stage) {
                return Err(error.clone());
            }
            Ok(())
        }

        async fn write(&self, ctx: &StageContext, job_id: JobId, stage: StageName, name: &str) -> Result<(), StageError> {
            ctx.artifacts
                .put(job_id, stage, name, ContentKind::Json, b"{}".to_vec())
                .await
                .map(|_| ())
                .map_err(|e| StageError::FatalTool(e.to_string()))
        }
    }

    #[async_trait]
    impl StageBodyRunner for ScriptedStages {
        async fn audio_slice(&self, ctx: &StageContext, job_id: JobId) -> Result<(), StageError> {
            self.maybe_fail(StageName::AudioSlice)?;
            self.write(ctx, job_id, StageName::AudioSlice, "sliced_audio").await
        }

        async fn beats(&self, ctx: &StageContext, job_id: JobId) -> Result<(), StageError> {
            self.maybe_fail(StageName::Beats)?;
            self.write(ctx, job_id, StageName::Beats, "beat_plan").await
        }

        async fn plan(&self, ctx: &StageContext, job_id: JobId, _job: &Job) -> Result<(), StageError> {
            self.maybe_fail(StageName::Plan)?;
            self.write(ctx, job_id, StageName::Plan, "segments").await
        }

        async fn normalize(&self, ctx: &StageContext, job_id: JobId, index: usize, _clip_count: usize) -> Result<(), StageError> {
            self.normalize_calls.fetch_add(1, Ordering::SeqCst);
            self.maybe_fail(StageName::Normalize)?;
            self.write(ctx, job_id, StageName::Normalize, &format!("normalized_{index}")).await
        }

        async fn cut_and_concat(&self, ctx: &StageContext, job_id: JobId) -> Result<(), StageError> {
            self.maybe_fail(StageName::CutAndConcat)?;
            self.write(ctx, job_id, StageName::CutAndConcat, "concatenated").await
        }

        async fn style_grade(&self, ctx: &StageContext, job_id: JobId, _job: &Job) -> Result<(), StageError> {
            self.maybe_fail(StageName::StyleGrade)?;
            self.write(ctx, job_id, StageName::StyleGrade, "graded").await
        }

        async fn mux(&self, ctx: &StageContext, job_id: JobId) -> Result<(), StageError> {
            self.maybe_fail(StageName::Mux)?;
            self.write(ctx, job_id, StageName::Mux, "muxed").await
        }

        async fn quality_gate(&self, ctx: &StageContext, job_id: JobId) -> Result<(), StageError> {
            self.maybe_fail(StageName::QualityGate)?;
            self.write(ctx, job_id, StageName::QualityGate, "muxed").await
        }
    }

    struct Harness {
        metadata: Arc<dyn MetadataStore>,
        artifacts: Arc<ArtifactStoreAdapter>,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let metadata: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());
            let blobs: Arc<dyn BlobStore> = Arc::new(FilesystemBlobStore::new(dir.path()));
            let artifacts = Arc::new(ArtifactStoreAdapter::new(blobs, metadata.clone()));
            Self { metadata, artifacts, _dir: dir }
        }

        async fn new_job_with_clips(&self, clip_count: usize) -> JobId {
            let job = Job::new(JobId::new(), Style::EnergeticDance, chrono::Utc::now());
            let id = job.id;
            self.metadata.create_job(job).await.unwrap();
            for i in 0..clip_count {
                self.artifacts
                    .put(id, StageName::Input, &format!("clip_{i}"), ContentKind::Video, b"x".to_vec())
                    .await
                    .unwrap();
            }
            self.metadata
                .try_transition(id, JobStatus::Processing, Box::new(|_| {}))
                .await
                .unwrap();
            id
        }

        fn executor(&self, stages: Arc<dyn StageBodyRunner>) -> PipelineExecutor {
            let progress = ProgressPublisher::new(self.metadata.clone());
            PipelineExecutor::new(self.metadata.clone(), self.artifacts.clone(), stages, progress, ReelcutConfig::default())
        }
    }

    #[tokio::test]
    async fn happy_path_completes_and_writes_final_output() {
        let harness = Harness::new();
        let job_id = harness.new_job_with_clips(3).await;
        let stages: Arc<dyn StageBodyRunner> = Arc::new(ScriptedStages::new(vec![]));
        let outcome = harness.executor(stages).run(job_id).await;

        assert!(matches!(outcome, PipelineOutcome::Completed));
        let job = harness.metadata.get_job(job_id).await.unwrap();
        assert_eq!(job.progress, 100);
    }

    #[tokio::test]
    async fn fatal_tool_failure_on_normalize_cancels_siblings_and_reports_first_failure() {
        let harness = Harness::new();
        let job_id = harness.new_job_with_clips(3).await;
        let stages: Arc<dyn StageBodyRunner> =
            Arc::new(ScriptedStages::new(vec![(StageName::Normalize, StageError::FatalTool("boom".to_string()))]));
        let outcome = harness.executor(stages).run(job_id).await;

        match outcome {
            PipelineOutcome::StageFailed { stage, error } => {
                assert_eq!(stage, StageName::Normalize);
                assert!(matches!(error, StageError::FatalTool(_)));
            }
            other => panic!("expected StageFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn single_clip_job_has_one_normalize_and_completes() {
        let harness = Harness::new();
        let job_id = harness.new_job_with_clips(1).await;
        let stages: Arc<dyn StageBodyRunner> = Arc::new(ScriptedStages::new(vec![]));
        let outcome = harness.executor(stages).run(job_id).await;
        assert!(matches!(outcome, PipelineOutcome::Completed));
    }

    #[tokio::test]
    async fn cancellation_before_any_dispatch_aborts_the_whole_graph() {
        let harness = Harness::new();
        let job_id = harness.new_job_with_clips(2).await;
        harness.metadata.try_transition(job_id, JobStatus::Cancelled, Box::new(|_| {})).await.unwrap();

        let stages: Arc<dyn StageBodyRunner> = Arc::new(ScriptedStages::new(vec![]));
        let outcome = harness.executor(stages).run(job_id).await;
        assert!(matches!(outcome, PipelineOutcome::StageCancelled { .. }));
    }

    #[allow(dead_code)]
    fn _silence_unused_import_warning() {
        let _ = InMemoryBroker::new();
    }
}
