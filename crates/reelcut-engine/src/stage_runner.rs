//! Stage Runner: given a stage name and a job, resolves inputs
//! from the Artifact Store Adapter into scratch files, invokes the stage
//! body (a Tool Invoker call, the Beat Analyzer, or the Cut Planner), writes
//! outputs back, and classifies any failure.

use std::sync::Arc;

use async_trait::async_trait;
use reelcut_core::{Artifact, ContentKind, Job, JobId, ReelcutConfig, Segment, StageName};
use reelcut_storage::ArtifactStoreAdapter;
use reelcut_toolinvoke::{ToolInvocation, ToolOutcome};

use crate::error::StageError;

#[derive(Clone)]
pub struct StageContext {
    pub artifacts: Arc<ArtifactStoreAdapter>,
    pub config: ReelcutConfig,
}

impl StageContext {
    pub fn new(artifacts: Arc<ArtifactStoreAdapter>, config: ReelcutConfig) -> Self {
        Self { artifacts, config }
    }
}

/// The Stage Runner's body dispatch: one method per named stage,
/// each a Tool Invoker call, a Beat Analyzer call, or a Cut Planner call.
/// Pulled out as a trait so the Pipeline Executor can be driven against a
/// scripted double in tests without shelling out to a real media toolchain.
#[async_trait]
pub trait StageBodyRunner: Send + Sync {
    async fn audio_slice(&self, ctx: &StageContext, job_id: JobId) -> Result<(), StageError>;
    async fn beats(&self, ctx: &StageContext, job_id: JobId) -> Result<(), StageError>;
    async fn plan(&self, ctx: &StageContext, job_id: JobId, job: &Job) -> Result<(), StageError>;
    async fn normalize(&self, ctx: &StageContext, job_id: JobId, index: usize, clip_count: usize) -> Result<(), StageError>;
    async fn cut_and_concat(&self, ctx: &StageContext, job_id: JobId) -> Result<(), StageError>;
    async fn style_grade(&self, ctx: &StageContext, job_id: JobId, job: &Job) -> Result<(), StageError>;
    async fn mux(&self, ctx: &StageContext, job_id: JobId) -> Result<(), StageError>;
    async fn quality_gate(&self, ctx: &StageContext, job_id: JobId) -> Result<(), StageError>;
}

/// The real Stage Runner: shells out to the external media toolchain via the
/// Tool Invoker for every stage body.
pub struct DefaultStageBodyRunner;

#[async_trait]
impl StageBodyRunner for DefaultStageBodyRunner {
    async fn audio_slice(&self, ctx: &StageContext, job_id: JobId) -> Result<(), StageError> {
        run_audio_slice(ctx, job_id).await
    }

    async fn beats(&self, ctx: &StageContext, job_id: JobId) -> Result<(), StageError> {
        run_beats(ctx, job_id).await
    }

    async fn plan(&self, ctx: &StageContext, job_id: JobId, job: &Job) -> Result<(), StageError> {
        run_plan(ctx, job_id, job).await
    }

    async fn normalize(&self, ctx: &StageContext, job_id: JobId, index: usize, clip_count: usize) -> Result<(), StageError> {
        run_normalize(ctx, job_id, index, clip_count).await
    }

    async fn cut_and_concat(&self, ctx: &StageContext, job_id: JobId) -> Result<(), StageError> {
        run_cut_and_concat(ctx, job_id).await
    }

    async fn style_grade(&self, ctx: &StageContext, job_id: JobId, job: &Job) -> Result<(), StageError> {
        run_style_grade(ctx, job_id, job).await
    }

    async fn mux(&self, ctx: &StageContext, job_id: JobId) -> Result<(), StageError> {
        run_mux(ctx, job_id).await
    }

    async fn quality_gate(&self, ctx: &StageContext, job_id: JobId) -> Result<(), StageError> {
        run_quality_gate(ctx, job_id).await
    }
}

/// Runs `audio_slice`: trims the uploaded audio to the requested window and
/// re-encodes it to a uniform codec.
pub async fn run_audio_slice(ctx: &StageContext, job_id: JobId) -> Result<(), StageError> {
    let audio = read_input(ctx, job_id, "audio").await?;
    let window = read_window(ctx, job_id).await?;

    let scratch = scratch_dir()?;
    let input_path = scratch.path().join("in.audio");
    let output_path = scratch.path().join("sliced.wav");
    write_scratch(&input_path, &audio).await?;

    let outcome = ToolInvocation::new("ffmpeg", ctx.config.stage_timeouts.audio_slice)
        .grace_period(ctx.config.tool_grace_period)
        .args([
            "-y".to_string(),
            "-ss".to_string(),
            format!("{:.3}", window.start_sec),
            "-to".to_string(),
            format!("{:.3}", window.end_sec),
            "-i".to_string(),
            input_path.display().to_string(),
            "-ar".to_string(),
            "44100".to_string(),
            "-ac".to_string(),
            "2".to_string(),
            output_path.display().to_string(),
        ])
        .invoke()
        .await
        .map_err(|e| StageError::FatalTool(e.to_string()))?;
    require_success(&outcome)?;

    let sliced = read_scratch(&output_path).await?;
    put_output(ctx, job_id, StageName::AudioSlice, "sliced_audio", ContentKind::Audio, sliced).await
}

/// Runs `beats`: calls the Beat Analyzer on `sliced_audio`.
pub async fn run_beats(ctx: &StageContext, job_id: JobId) -> Result<(), StageError> {
    let sliced_audio = read_input(ctx, job_id, "sliced_audio").await?;
    let window = read_window(ctx, job_id).await?;
    let window_length = window.end_sec - window.start_sec;

    let beat_plan = reelcut_beats::analyze(sliced_audio, Some("wav"), window_length, reelcut_beats::AnalyzeConfig::default())
        .map_err(|e| StageError::AnalysisFailed(e.to_string()))?;

    let bytes = serde_json::to_vec(&beat_plan).map_err(|e| StageError::FatalTool(e.to_string()))?;
    put_output(ctx, job_id, StageName::Beats, "beat_plan", ContentKind::Json, bytes).await
}

/// Runs `plan`: calls the Cut Planner with `beat_plan` + clip count + style.
pub async fn run_plan(ctx: &StageContext, job_id: JobId, job: &Job) -> Result<(), StageError> {
    let beat_plan_bytes = read_input(ctx, job_id, "beat_plan").await?;
    let beat_plan: reelcut_core::BeatPlan =
        serde_json::from_slice(&beat_plan_bytes).map_err(|e| StageError::FatalTool(e.to_string()))?;

    let clip_count = count_input_clips(ctx, job_id).await?;
    let segments =
        reelcut_planner::plan(&beat_plan, clip_count, job.style).map_err(|e| StageError::PlanInfeasible(e.to_string()))?;

    let bytes = serde_json::to_vec(&segments).map_err(|e| StageError::FatalTool(e.to_string()))?;
    put_output(ctx, job_id, StageName::Plan, "segments", ContentKind::Json, bytes).await
}

/// Runs one fan-out instance of `normalize` for clip `index`: stretches or
/// trims it to `target_duration = 30 / clip_count` at a fixed target
/// resolution.
pub async fn run_normalize(ctx: &StageContext, job_id: JobId, index: usize, clip_count: usize) -> Result<(), StageError> {
    let clip = read_input(ctx, job_id, &format!("clip_{index}")).await?;
    let target_duration = 30.0 / clip_count as f64;

    let scratch = scratch_dir()?;
    let input_path = scratch.path().join("in.clip");
    let output_path = scratch.path().join("normalized.mp4");
    write_scratch(&input_path, &clip).await?;

    // A clip shorter than `target_duration` is stretched (slowed down) up to
    // it via `setpts`; `-t` below then only trims the rare case where
    // `setpts` overshoots on rounding. A clip at or past `target_duration`
    // already needs no stretch, and an unprobeable input (e.g. a still
    // image, or a tool that can't report duration) falls back to trim-only,
    // matching the previous behavior.
    let speed_factor = match probe_duration_sec(&input_path, ctx.config.stage_timeouts.normalize, ctx.config.tool_grace_period).await {
        Some(source_duration) if source_duration > 0.0 && source_duration < target_duration => {
            target_duration / source_duration
        }
        _ => 1.0,
    };
    let video_filter = format!(
        "setpts={speed_factor:.6}*PTS,scale=1080:1920:force_original_aspect_ratio=increase,crop=1080:1920,fps=30"
    );

    let outcome = ToolInvocation::new("ffmpeg", ctx.config.stage_timeouts.normalize)
        .grace_period(ctx.config.tool_grace_period)
        .args([
            "-y".to_string(),
            "-i".to_string(),
            input_path.display().to_string(),
            "-t".to_string(),
            format!("{target_duration:.3}"),
            "-vf".to_string(),
            video_filter,
            "-an".to_string(),
            output_path.display().to_string(),
        ])
        .invoke()
        .await
        .map_err(|e| StageError::FatalTool(e.to_string()))?;
    require_success(&outcome)?;

    let normalized = read_scratch(&output_path).await?;
    put_output(ctx, job_id, StageName::Normalize, &format!("normalized_{index}"), ContentKind::Video, normalized).await
}

/// Probes a scratch file's duration in seconds via `ffprobe`, the same
/// opaque-stdout-avoiding shell-redirect pattern `run_quality_gate` uses.
/// Returns `None` on any probe failure rather than erroring the stage —
/// normalize falls back to trim-only when duration can't be determined.
async fn probe_duration_sec(path: &std::path::Path, timeout: std::time::Duration, grace_period: std::time::Duration) -> Option<f64> {
    let report_path = path.with_extension("probe.json");
    let command = format!(
        "ffprobe -v error -show_entries format=duration -of json '{}' > '{}'",
        path.display(),
        report_path.display()
    );
    let outcome = ToolInvocation::new("sh", timeout)
        .grace_period(grace_period)
        .args(["-c".to_string(), command])
        .invoke()
        .await
        .ok()?;
    if !outcome.success() {
        return None;
    }

    #[derive(serde::Deserialize)]
    struct DurationFormat {
        duration: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct DurationReport {
        format: DurationFormat,
    }

    let bytes = tokio::fs::read(&report_path).await.ok()?;
    let report: DurationReport = serde_json::from_slice(&bytes).ok()?;
    report.format.duration.as_deref()?.parse().ok()
}

/// Runs `cut_and_concat`: builds one continuous silent track from the
/// normalized clips using the planned segment boundaries and transitions.
pub async fn run_cut_and_concat(ctx: &StageContext, job_id: JobId) -> Result<(), StageError> {
    let segments_bytes = read_input(ctx, job_id, "segments").await?;
    let segments: Vec<Segment> = serde_json::from_slice(&segments_bytes).map_err(|e| StageError::FatalTool(e.to_string()))?;

    let scratch = scratch_dir()?;
    let mut input_args = Vec::new();
    for segment in &segments {
        let bytes = read_input(ctx, job_id, &segment.source_artifact_name).await?;
        let path = scratch.path().join(format!("{}.mp4", segment.source_artifact_name));
        write_scratch(&path, &bytes).await?;
        input_args.push("-i".to_string());
        input_args.push(path.display().to_string());
    }

    let output_path = scratch.path().join("concatenated.mp4");
    let filter_complex = build_concat_filter(&segments);

    let mut args = input_args;
    args.push("-y".to_string());
    args.push("-filter_complex".to_string());
    args.push(filter_complex);
    args.push("-map".to_string());
    args.push("[outv]".to_string());
    args.push(output_path.display().to_string());

    let outcome = ToolInvocation::new("ffmpeg", ctx.config.stage_timeouts.cut_and_concat)
        .grace_period(ctx.config.tool_grace_period)
        .args(args)
        .invoke()
        .await
        .map_err(|e| StageError::FatalTool(e.to_string()))?;
    require_success(&outcome)?;

    let concatenated = read_scratch(&output_path).await?;
    put_output(ctx, job_id, StageName::CutAndConcat, "concatenated", ContentKind::Video, concatenated).await
}

/// Builds an ffmpeg `filter_complex` graph chaining each segment's input
/// with `xfade` at crossfade boundaries or a plain `concat` at hard cuts.
/// Crossfade duration is already capped by the Cut Planner, so this stage
/// only has to honor what it was given.
fn build_concat_filter(segments: &[Segment]) -> String {
    use reelcut_core::TransitionKind;

    if segments.len() == 1 {
        return "[0:v]copy[outv]".to_string();
    }

    let mut parts = Vec::new();
    let mut running_offset = 0.0_f64;
    let mut last_label = "0:v".to_string();

    for (i, segment) in segments.iter().enumerate() {
        if i + 1 >= segments.len() {
            break;
        }
        let next_label = format!("{}:v", i + 1);
        let clip_duration = segment.source_out_sec;
        running_offset += clip_duration;
        let out_label = format!("v{i}");

        match segment.transition_out.kind {
            TransitionKind::HardCut => {
                parts.push(format!(
                    "[{last_label}][{next_label}]concat=n=2:v=1:a=0[{out_label}]"
                ));
            }
            TransitionKind::Crossfade | TransitionKind::FadeBlack => {
                let duration_sec = segment.transition_out.duration_ms as f64 / 1000.0;
                let offset = (running_offset - duration_sec).max(0.0);
                parts.push(format!(
                    "[{last_label}][{next_label}]xfade=transition=fade:duration={duration_sec:.3}:offset={offset:.3}[{out_label}]"
                ));
            }
        }
        last_label = out_label;
    }

    parts.push(format!("[{last_label}]null[outv]"));
    parts.join(";")
}

/// Runs `style_grade`: applies the style's color contract via ffmpeg's `eq`
/// filter.
pub async fn run_style_grade(ctx: &StageContext, job_id: JobId, job: &Job) -> Result<(), StageError> {
    let concatenated = read_input(ctx, job_id, "concatenated").await?;
    let grade = job.style.color_grade();

    let scratch = scratch_dir()?;
    let input_path = scratch.path().join("in.mp4");
    let output_path = scratch.path().join("graded.mp4");
    write_scratch(&input_path, &concatenated).await?;

    let eq_filter = format!(
        "eq=saturation={:.3}:contrast={:.3},colortemperature=temperature={}",
        grade.saturation_scale, grade.contrast_scale, grade.temperature_kelvin
    );

    let outcome = ToolInvocation::new("ffmpeg", ctx.config.stage_timeouts.style_grade)
        .grace_period(ctx.config.tool_grace_period)
        .args([
            "-y".to_string(),
            "-i".to_string(),
            input_path.display().to_string(),
            "-vf".to_string(),
            eq_filter,
            output_path.display().to_string(),
        ])
        .invoke()
        .await
        .map_err(|e| StageError::FatalTool(e.to_string()))?;
    require_success(&outcome)?;

    let graded = read_scratch(&output_path).await?;
    put_output(ctx, job_id, StageName::StyleGrade, "graded", ContentKind::Video, graded).await
}

/// Runs `mux`: combines the graded video with the sliced audio into one
/// container.
pub async fn run_mux(ctx: &StageContext, job_id: JobId) -> Result<(), StageError> {
    let graded = read_input(ctx, job_id, "graded").await?;
    let sliced_audio = read_input(ctx, job_id, "sliced_audio").await?;

    let scratch = scratch_dir()?;
    let video_path = scratch.path().join("graded.mp4");
    let audio_path = scratch.path().join("sliced.wav");
    let output_path = scratch.path().join("muxed.mp4");
    write_scratch(&video_path, &graded).await?;
    write_scratch(&audio_path, &sliced_audio).await?;

    let outcome = ToolInvocation::new("ffmpeg", ctx.config.stage_timeouts.mux)
        .grace_period(ctx.config.tool_grace_period)
        .args([
            "-y".to_string(),
            "-i".to_string(),
            video_path.display().to_string(),
            "-i".to_string(),
            audio_path.display().to_string(),
            "-c:v".to_string(),
            "copy".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-shortest".to_string(),
            output_path.display().to_string(),
        ])
        .invoke()
        .await
        .map_err(|e| StageError::FatalTool(e.to_string()))?;
    require_success(&outcome)?;

    let muxed = read_scratch(&output_path).await?;
    put_output(ctx, job_id, StageName::Mux, "muxed", ContentKind::Video, muxed).await
}

#[derive(serde::Deserialize)]
struct ProbeStream {
    codec_type: String,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(serde::Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

#[derive(serde::Deserialize)]
struct ProbeReport {
    format: ProbeFormat,
    streams: Vec<ProbeStream>,
}

/// Runs `quality_gate`: probes the muxed container and verifies duration,
/// resolution, and stream presence. `ffprobe` writes stdout to a file via a
/// shell redirect rather than through the Tool Invoker's stdout, which the
/// invoker deliberately discards as opaque to the media tool's own output
/// conventions.
pub async fn run_quality_gate(ctx: &StageContext, job_id: JobId) -> Result<(), StageError> {
    let muxed = read_input(ctx, job_id, "muxed").await?;

    let scratch = scratch_dir()?;
    let input_path = scratch.path().join("muxed.mp4");
    let report_path = scratch.path().join("probe.json");
    write_scratch(&input_path, &muxed).await?;

    let command = format!(
        "ffprobe -v error -show_entries format=duration:stream=codec_type,width,height -of json '{}' > '{}'",
        input_path.display(),
        report_path.display()
    );
    let outcome = ToolInvocation::new("sh", ctx.config.stage_timeouts.quality_gate)
        .grace_period(ctx.config.tool_grace_period)
        .args(["-c".to_string(), command])
        .invoke()
        .await
        .map_err(|e| StageError::FatalTool(e.to_string()))?;
    require_success(&outcome)?;

    let report_bytes = read_scratch(&report_path).await?;
    let report: ProbeReport = serde_json::from_slice(&report_bytes)
        .map_err(|e| StageError::FatalTool(format!("malformed probe report: {e}")))?;

    let duration: f64 = report
        .format
        .duration
        .as_deref()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| StageError::FatalTool("probe report missing duration".to_string()))?;
    if (duration - 30.0).abs() > 0.5 {
        return Err(StageError::QualityGateFailed(format!("output duration {duration:.2}s outside 30s ± 0.5s")));
    }

    let has_video = report.streams.iter().any(|s| s.codec_type == "video" && s.width == Some(1080) && s.height == Some(1920));
    let has_audio = report.streams.iter().any(|s| s.codec_type == "audio");
    if !has_video {
        return Err(StageError::QualityGateFailed("output is missing a 1080x1920 video stream".to_string()));
    }
    if !has_audio {
        return Err(StageError::QualityGateFailed("output is missing an audio stream".to_string()));
    }

    ctx.artifacts
        .put(job_id, StageName::QualityGate, "muxed", ContentKind::Video, muxed)
        .await
        .map_err(|e| StageError::FatalTool(e.to_string()))?;
    Ok(())
}

struct Window {
    start_sec: f64,
    end_sec: f64,
}

async fn read_window(ctx: &StageContext, job_id: JobId) -> Result<Window, StageError> {
    let bytes = read_input(ctx, job_id, "window").await?;
    #[derive(serde::Deserialize)]
    struct WindowDto {
        start_sec: f64,
        end_sec: f64,
    }
    let dto: WindowDto = serde_json::from_slice(&bytes).map_err(|e| StageError::FatalTool(e.to_string()))?;
    Ok(Window { start_sec: dto.start_sec, end_sec: dto.end_sec })
}

pub(crate) async fn count_input_clips(ctx: &StageContext, job_id: JobId) -> Result<usize, StageError> {
    let artifacts: Vec<Artifact> = ctx.artifacts.list(job_id).await;
    Ok(artifacts
        .iter()
        .filter(|a| a.stage == StageName::Input && a.name.starts_with("clip_"))
        .count())
}

async fn read_input(ctx: &StageContext, job_id: JobId, name: &str) -> Result<Vec<u8>, StageError> {
    for stage in [
        StageName::Input,
        StageName::AudioSlice,
        StageName::Beats,
        StageName::Plan,
        StageName::Normalize,
        StageName::CutAndConcat,
        StageName::StyleGrade,
        StageName::Mux,
    ] {
        if let Ok(bytes) = ctx.artifacts.get(job_id, stage, name).await {
            return Ok(bytes);
        }
    }
    Err(StageError::FatalTool(format!("input artifact {name} not found for job {job_id}")))
}

async fn put_output(
    ctx: &StageContext,
    job_id: JobId,
    stage: StageName,
    name: &str,
    content_kind: ContentKind,
    data: Vec<u8>,
) -> Result<(), StageError> {
    ctx.artifacts
        .put(job_id, stage, name, content_kind, data)
        .await
        .map(|_: Artifact| ())
        .map_err(|e| StageError::FatalTool(e.to_string()))
}

fn scratch_dir() -> Result<tempfile::TempDir, StageError> {
    tempfile::tempdir().map_err(|e| StageError::FatalTool(format!("failed to create scratch dir: {e}")))
}

async fn write_scratch(path: &std::path::Path, data: &[u8]) -> Result<(), StageError> {
    tokio::fs::write(path, data).await.map_err(|e| StageError::FatalTool(e.to_string()))
}

async fn read_scratch(path: &std::path::Path) -> Result<Vec<u8>, StageError> {
    tokio::fs::read(path).await.map_err(|e| StageError::FatalTool(e.to_string()))
}

/// Classifies a non-success `ToolOutcome`: timeouts are
/// `TransientTool` (the tool may succeed on a subsequent attempt with a
/// shorter input or less contention), non-zero exits with a recognised
/// transient pattern in stderr are `TransientTool`, everything else is
/// `FatalTool`.
fn require_success(outcome: &ToolOutcome) -> Result<(), StageError> {
    if outcome.success() {
        return Ok(());
    }
    if outcome.timed_out {
        return Err(StageError::Timeout);
    }
    if is_transient_pattern(&outcome.stderr_tail) {
        return Err(StageError::TransientTool(outcome.stderr_tail.clone()));
    }
    Err(StageError::FatalTool(outcome.stderr_tail.clone()))
}

fn is_transient_pattern(stderr_tail: &str) -> bool {
    const TRANSIENT_PATTERNS: &[&str] =
        &["Resource temporarily unavailable", "Connection reset", "I/O error", "Device or resource busy"];
    TRANSIENT_PATTERNS.iter().any(|pattern| stderr_tail.contains(pattern))
}
