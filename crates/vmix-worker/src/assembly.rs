//! Renders an assembly plan into the final file.
//!
//! Steps run in a fixed order: transform every entry, concatenate, lay the
//! audio, overlay the logo, append the tagline, encode. Each one reads the
//! previous step's file from the run workspace. Any failure aborts the run
//! tagged with its [`AssemblyStage`]; the workspace is discarded by the
//! caller, so nothing partial reaches the output path.

use futures::future::join_all;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use vmix_media::render::{
    audio_mix_command, concat_command, final_encode_command, logo_command, segment_command, tagline_command,
    write_concat_list,
};
use vmix_media::{resolve_main_duration, CommandRunner, FfmpegCommand, InpaintFilter, MediaError, MediaProbe};
use vmix_models::{AssemblyPlan, OutputSpec, PlanEntry, SourceId, SourceVideo};

use crate::cancel::CancelToken;
use crate::error::{AssemblyStage, PipelineError, PipelineResult};
use crate::workspace::RunWorkspace;

/// What assembly produced.
#[derive(Debug, Clone)]
pub struct AssemblyOutput {
    /// Encoded file inside the run workspace
    pub path: PathBuf,
    /// Length of the concatenated plan
    pub content_duration: f64,
    /// Length of the main content after audio sync, before the tagline
    pub main_duration: f64,
    /// Background audio length, when a track was laid
    pub audio_duration: Option<f64>,
    pub has_audio: bool,
}

/// Turns a plan into the final file.
pub struct AssemblyEngine {
    runner: Arc<dyn CommandRunner>,
    probe: Arc<dyn MediaProbe>,
    inpaint: Arc<dyn InpaintFilter>,
    render_permits: Arc<Semaphore>,
    cancel: CancelToken,
}

impl AssemblyEngine {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        probe: Arc<dyn MediaProbe>,
        inpaint: Arc<dyn InpaintFilter>,
        max_ffmpeg_processes: usize,
        cancel: CancelToken,
    ) -> Self {
        Self {
            runner,
            probe,
            inpaint,
            render_permits: Arc::new(Semaphore::new(max_ffmpeg_processes.max(1))),
            cancel,
        }
    }

    async fn run(&self, stage: AssemblyStage, cmd: &FfmpegCommand, duration: f64) -> PipelineResult<()> {
        self.cancel.check()?;
        debug!(stage = %stage, args = ?cmd.build_args(), "Running FFmpeg");
        self.runner
            .execute(stage.as_str(), cmd, duration)
            .await
            .map_err(|e| PipelineError::assembly(stage, e))
    }

    /// Render `plan` with `videos` as sources. Consumes the plan.
    pub async fn assemble(
        &self,
        plan: AssemblyPlan,
        videos: &[SourceVideo],
        spec: &OutputSpec,
        workspace: &RunWorkspace,
    ) -> PipelineResult<AssemblyOutput> {
        if plan.is_empty() {
            return Err(PipelineError::EmptySelection);
        }
        let content_duration = plan.total_duration();
        let by_id: HashMap<SourceId, &SourceVideo> = videos.iter().map(|v| (v.id, v)).collect();

        // 1. Transform
        let segments = self.render_segments(plan.into_entries(), &by_id, spec, workspace).await?;

        // 2. Concatenate
        self.cancel.check()?;
        let list = workspace.file("concat.txt");
        write_concat_list(&segments, &list)
            .await
            .map_err(|e| PipelineError::assembly(AssemblyStage::Concatenate, e))?;
        let mut current = workspace.file("concat.mp4");
        self.run(
            AssemblyStage::Concatenate,
            &concat_command(&list, &current),
            content_duration,
        )
        .await?;
        info!(segments = segments.len(), duration = content_duration, "Segments concatenated");

        // 3. Audio
        let mut main_duration = content_duration;
        let mut audio_duration = None;
        let has_audio = spec.audio.is_some();
        if let Some(track) = &spec.audio {
            let track_duration = self
                .probe
                .duration(&track.path)
                .await
                .map_err(|e| PipelineError::assembly(AssemblyStage::Audio, e))?;
            main_duration = resolve_main_duration(
                content_duration,
                Some((track, track_duration)),
                spec.sync_duration_to_audio,
            );
            audio_duration = Some(track_duration);

            let next = workspace.file("audio.mp4");
            let cmd = audio_mix_command(
                &current,
                content_duration,
                track,
                track_duration,
                main_duration,
                &spec.encoding,
                &next,
            );
            self.run(AssemblyStage::Audio, &cmd, main_duration).await?;
            info!(
                audio = track_duration,
                main = main_duration,
                synced = spec.sync_duration_to_audio,
                "Audio laid"
            );
            current = next;
        }

        // 4. Logo
        if let Some(logo) = &spec.logo {
            if !tokio::fs::try_exists(&logo.path).await.unwrap_or(false) {
                return Err(PipelineError::assembly(
                    AssemblyStage::Logo,
                    MediaError::FileNotFound(logo.path.clone()),
                ));
            }
            let next = workspace.file("logo.mp4");
            self.run(
                AssemblyStage::Logo,
                &logo_command(&current, logo, spec, has_audio, &next),
                main_duration,
            )
            .await?;
            current = next;
        }

        // 5. Tagline
        if let Some(tagline) = &spec.tagline {
            let tagline_duration = self
                .probe
                .duration(tagline)
                .await
                .map_err(|e| PipelineError::assembly(AssemblyStage::Tagline, e))?;
            let next = workspace.file("tagline.mp4");
            let cmd = tagline_command(&current, tagline, tagline_duration, spec, has_audio, &next);
            self.run(AssemblyStage::Tagline, &cmd, main_duration + tagline_duration)
                .await?;
            current = next;
        }

        // 6. Encode
        let output = workspace.file("final.mp4");
        self.run(
            AssemblyStage::Encode,
            &final_encode_command(&current, spec, has_audio, &output),
            main_duration,
        )
        .await?;

        Ok(AssemblyOutput {
            path: output,
            content_duration,
            main_duration,
            audio_duration,
            has_audio,
        })
    }

    /// Render every entry on the bounded pool. Paths come back in plan order.
    async fn render_segments(
        &self,
        entries: Vec<PlanEntry>,
        videos: &HashMap<SourceId, &SourceVideo>,
        spec: &OutputSpec,
        workspace: &RunWorkspace,
    ) -> PipelineResult<Vec<PathBuf>> {
        let total = entries.len();
        let jobs = entries.iter().enumerate().map(|(index, entry)| {
            let output = workspace.segment_path(index);
            async move {
                let _permit = self
                    .render_permits
                    .acquire()
                    .await
                    .map_err(|_| PipelineError::Cancelled)?;
                self.cancel.check()?;

                let video = videos.get(&entry.segment.source()).ok_or_else(|| {
                    PipelineError::assembly(
                        AssemblyStage::Transform,
                        MediaError::internal(format!("plan references unknown {}", entry.segment.source())),
                    )
                })?;
                let cmd = segment_command(video, entry, spec, self.inpaint.as_ref(), &output);
                self.run(AssemblyStage::Transform, &cmd, entry.segment.duration())
                    .await?;
                debug!(index, total, segment = %entry.segment, "Segment rendered");
                Ok::<PathBuf, PipelineError>(output)
            }
        });

        join_all(jobs).await.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmix_media::{DelogoInpaint, Ffprobe, FfmpegRunner};
    use vmix_models::RunId;

    fn engine(cancel: CancelToken) -> AssemblyEngine {
        AssemblyEngine::new(
            Arc::new(FfmpegRunner::new()),
            Arc::new(Ffprobe),
            Arc::new(DelogoInpaint),
            2,
            cancel,
        )
    }

    #[tokio::test]
    async fn test_empty_plan_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let workspace = RunWorkspace::create(root.path(), &RunId::new()).await.unwrap();
        let engine = engine(CancelToken::new());

        let result = engine
            .assemble(AssemblyPlan::default(), &[], &OutputSpec::default(), &workspace)
            .await;
        assert!(matches!(result, Err(PipelineError::EmptySelection)));
    }

    #[tokio::test]
    async fn test_cancelled_before_render() {
        let root = tempfile::tempdir().unwrap();
        let workspace = RunWorkspace::create(root.path(), &RunId::new()).await.unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let engine = engine(cancel);

        let video = SourceVideo {
            id: SourceId(0),
            path: PathBuf::from("/nonexistent/a.mp4"),
            duration: 20.0,
            width: 1920,
            height: 1080,
            fps: 30.0,
            has_audio: false,
        };
        let plan = AssemblyPlan::new(vec![PlanEntry {
            segment: vmix_models::Segment::new(SourceId(0), 0.0, 4.0).unwrap(),
            crop: vmix_models::CropDecision::Letterbox,
            text_action: vmix_models::TextAction::None,
        }]);

        let result = engine.assemble(plan, &[video], &OutputSpec::default(), &workspace).await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }
}
