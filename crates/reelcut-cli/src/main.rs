//! `reelcut`: a thin binary wiring the Job Service, Worker, Pipeline
//! Executor, and Scheduler into a runnable demo service — upload
//! simulation (reads local files straight into the blob store, standing in
//! for the out-of-scope HTTP upload surface), one worker loop, and one
//! reaper/scheduler loop, all in a single process.

mod cli;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use reelcut_broker::{Broker, InMemoryBroker};
use reelcut_core::{ArtifactRef, ContentKind, JobId, JobStatus, ReelcutConfig, Style};
use reelcut_engine::{
    CreateJobInputs, DefaultStageBodyRunner, JobService, PipelineExecutor, ProgressPublisher, RetentionReaper,
    Scheduler, Shutdown, StageBodyRunner, Worker,
};
use reelcut_storage::{ArtifactStoreAdapter, BlobStore, FilesystemBlobStore, InMemoryMetadataStore, MetadataStore};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "reelcut=info".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Submit(args) => run_submit(args).await,
    }
}

async fn run_submit(args: cli::SubmitArgs) -> anyhow::Result<()> {
    let config = ReelcutConfig::from_env();

    let metadata: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());
    let blobs: Arc<dyn BlobStore> = Arc::new(FilesystemBlobStore::new(&args.storage_dir));
    let artifacts = Arc::new(ArtifactStoreAdapter::new(blobs.clone(), metadata.clone()));
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());

    let style = Style::from_str(&args.style).ok_or_else(|| anyhow::anyhow!("unknown style: {}", args.style))?;
    let clips = upload_inputs(blobs.as_ref(), &args.clips, ContentKind::Video, "upload/clip").await?;
    let audio = upload_input(blobs.as_ref(), &args.audio, ContentKind::Audio, "upload/audio").await?;

    let job_service = JobService::new(metadata.clone(), artifacts.clone(), broker.clone(), config.clone());
    let job_id = job_service
        .create(CreateJobInputs { clips, audio, window: (args.window_start, args.window_start + 30.0), style })
        .await
        .context("JobService::Create rejected the job")?;
    tracing::info!(%job_id, %style, "submitted job");

    let stages: Arc<dyn StageBodyRunner> = Arc::new(DefaultStageBodyRunner);
    // Every progress update in this pipeline lands at a stage boundary and
    // goes through `publish_now`, already rate-limited to one write per
    // completed node; there is no sub-stage source to coalesce here, so the
    // ticking flusher is not wired up.
    let progress = ProgressPublisher::new(metadata.clone());
    let pipeline = Arc::new(PipelineExecutor::new(metadata.clone(), artifacts.clone(), stages, progress.clone(), config.clone()));
    let worker = Worker::new(metadata.clone(), broker.clone(), pipeline, progress.clone(), config.clone());
    let reaper = Arc::new(RetentionReaper::new(metadata.clone(), artifacts.clone(), config.clone()));
    let scheduler = Scheduler::new(reaper, broker.clone(), config.reaper_interval);

    let shutdown = Shutdown::new();
    let worker_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { worker.run(shutdown).await }
    });
    let scheduler_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { scheduler.run(shutdown).await }
    });

    let outcome = wait_for_terminal(metadata.as_ref(), job_id, args.poll_interval).await?;
    shutdown.request();
    let _ = worker_handle.await;
    let _ = scheduler_handle.await;

    print_outcome(&outcome, job_id);
    Ok(())
}

async fn upload_inputs(
    blobs: &dyn BlobStore,
    paths: &[std::path::PathBuf],
    content_kind: ContentKind,
    prefix: &str,
) -> anyhow::Result<Vec<ArtifactRef>> {
    let mut refs = Vec::with_capacity(paths.len());
    for (index, path) in paths.iter().enumerate() {
        refs.push(upload_one(blobs, path, content_kind, &format!("{prefix}_{index}")).await?);
    }
    Ok(refs)
}

async fn upload_input(blobs: &dyn BlobStore, path: &Path, content_kind: ContentKind, key: &str) -> anyhow::Result<ArtifactRef> {
    upload_one(blobs, path, content_kind, key).await
}

async fn upload_one(blobs: &dyn BlobStore, path: &Path, content_kind: ContentKind, key: &str) -> anyhow::Result<ArtifactRef> {
    let data = tokio::fs::read(path).await.with_context(|| format!("reading {}", path.display()))?;
    let size = data.len() as u64;
    blobs.put(key, data).await.with_context(|| format!("staging upload for {}", path.display()))?;
    Ok(ArtifactRef { blob_key: key.to_string(), content_kind, size })
}

/// Polls the job row until it reaches a terminal status, printing progress
/// as it changes. A real deployment would watch `JobService::Get` from the
/// (out-of-scope) HTTP surface instead of a tight poll loop; here it plays
/// the same role the upload-simulation flow needs to know when to exit.
async fn wait_for_terminal(metadata: &dyn MetadataStore, job_id: JobId, poll_interval: Duration) -> anyhow::Result<reelcut_core::Job> {
    let mut last_percent = u8::MAX;
    loop {
        let job = metadata.get_job(job_id).await.context("job vanished while waiting for completion")?;
        if job.progress != last_percent {
            tracing::info!(%job_id, percent = job.progress, step = %job.current_step, "progress");
            last_percent = job.progress;
        }
        if job.status.is_terminal() {
            return Ok(job);
        }
        tokio::time::sleep(poll_interval).await;
    }
}

fn print_outcome(job: &reelcut_core::Job, job_id: JobId) {
    match job.status {
        JobStatus::Completed => {
            println!("job {job_id} completed: output_artifact_id={:?}", job.output_artifact_id);
        }
        JobStatus::Failed => {
            let error = job.error.as_ref();
            println!(
                "job {job_id} failed: kind={:?} stage={:?} message={}",
                error.map(|e| e.kind),
                error.and_then(|e| e.stage),
                error.map(|e| e.message.as_str()).unwrap_or("")
            );
        }
        JobStatus::Cancelled => println!("job {job_id} cancelled"),
        other => println!("job {job_id} ended in unexpected non-terminal status {other}"),
    }
}
