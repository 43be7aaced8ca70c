//! Run driver: probe, analyze, select, plan, assemble.
//!
//! Stages are strictly sequential; work inside the analysis and transform
//! stages runs on bounded pools. Results are always collected in source or
//! plan order before the next stage reads them, so pool scheduling never
//! changes the output.

use futures::future::try_join_all;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn, Instrument};

use vmix_media::{
    build_face_profile, load_reference_image, move_file, plan_crop, AnalyzerSettings, ClipAnalyzer, CommandRunner,
    DelogoInpaint, EdgeDensityTextDetector, EmbeddingFaceMatcher, FaceMatcher, FfmpegFrameSource, FfmpegRunner,
    Ffprobe, FrameSource, InpaintFilter, MediaError, MediaProbe, SourceAnalysis, TextRegionDetector,
};
use vmix_models::{
    AnalysisMode, AssemblyPlan, FaceProfile, OutputSpec, PlanEntry, RunId, RunReport, RunRequest, RunWarning,
    ScoredSegment, SelectionConstraints, SourceId, SourceReport, SourceVideo, TextHandlingMode,
};

use crate::assembly::AssemblyEngine;
use crate::cancel::CancelToken;
use crate::config::WorkerConfig;
use crate::error::{AssemblyStage, PipelineError, PipelineResult};
use crate::logging::RunLogger;
use crate::selector::{ClipSelector, Selection};
use crate::workspace::RunWorkspace;

/// Result of analyzing one source, gathered before the report is touched.
struct SourceOutcome {
    source: SourceId,
    analysis: Result<SourceAnalysis, MediaError>,
    degradations: Vec<(AnalysisMode, AnalysisMode)>,
}

/// Candidates of every usable source, in source order.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub candidates: Vec<ScoredSegment>,
    /// Mode in effect once every source finished
    pub effective_mode: AnalysisMode,
}

/// Drives one run at a time through every stage.
pub struct Pipeline {
    config: WorkerConfig,
    frames: Arc<dyn FrameSource>,
    text: Arc<dyn TextRegionDetector>,
    faces: Arc<EmbeddingFaceMatcher>,
    inpaint: Arc<dyn InpaintFilter>,
    probe: Arc<dyn MediaProbe>,
    /// Replaces the cancellable FFmpeg runner built per run
    runner: Option<Arc<dyn CommandRunner>>,
    cancel: CancelToken,
}

impl Pipeline {
    /// Pipeline with the FFmpeg decoder and the built-in detectors.
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            frames: Arc::new(FfmpegFrameSource::new()),
            text: Arc::new(EdgeDensityTextDetector::default()),
            faces: Arc::new(EmbeddingFaceMatcher::heuristic()),
            inpaint: Arc::new(DelogoInpaint),
            probe: Arc::new(Ffprobe),
            runner: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_frame_source(mut self, frames: Arc<dyn FrameSource>) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_text_detector(mut self, text: Arc<dyn TextRegionDetector>) -> Self {
        self.text = text;
        self
    }

    pub fn with_face_matcher(mut self, faces: Arc<EmbeddingFaceMatcher>) -> Self {
        self.faces = faces;
        self
    }

    pub fn with_inpaint_filter(mut self, inpaint: Arc<dyn InpaintFilter>) -> Self {
        self.inpaint = inpaint;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn MediaProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_command_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    fn runner(&self) -> Arc<dyn CommandRunner> {
        match &self.runner {
            Some(runner) => Arc::clone(runner),
            None => Arc::new(
                FfmpegRunner::new()
                    .with_cancel(self.cancel.subscribe())
                    .with_timeout(self.config.ffmpeg_timeout.as_secs()),
            ),
        }
    }

    /// Run a request end to end. The output file exists only on success.
    pub async fn run(&self, request: RunRequest) -> PipelineResult<RunReport> {
        request.validate()?;
        let run_id = RunId::new();
        let logger = RunLogger::new(&run_id);
        let span = logger.span();
        let result = self.run_validated(request, run_id, logger.clone()).instrument(span).await;
        match &result {
            Err(PipelineError::Cancelled) => logger.log_warning("run cancelled"),
            Err(e) => logger.log_error(&e.to_string()),
            Ok(_) => {}
        }
        result
    }

    async fn run_validated(&self, request: RunRequest, run_id: RunId, logger: RunLogger) -> PipelineResult<RunReport> {
        let spec = request.output_spec();
        let constraints = request.config.constraints();
        let mut report = RunReport::new(run_id.clone(), request.config.analysis_mode);
        let workspace = RunWorkspace::create(&self.config.work_dir, &run_id).await?;

        logger.log_start(&format!(
            "{} sources, target {:.1}s, mode {}",
            request.sources.len(),
            constraints.target_duration,
            request.config.analysis_mode
        ));

        // Probe
        let videos = self.probe_sources(&request.sources, &mut report).await?;
        if videos.is_empty() {
            return Err(PipelineError::NoUsableInput {
                skipped: request.sources.len(),
            });
        }
        logger.log_progress(&format!("{} of {} sources readable", videos.len(), request.sources.len()));
        self.cancel.check()?;

        // Reference face
        let profile = self
            .face_profile(request.reference_photo.as_deref(), request.config.face_threshold)
            .await?;
        self.cancel.check()?;

        // Analyze
        let analysis_log = logger.for_stage("analysis");
        analysis_log.log_start(&format!("{} sources", videos.len()));
        let settings = AnalyzerSettings::from_config(&request.config);
        let analysis = self
            .analyze_sources(&videos, profile, settings, request.config.analysis_mode, &mut report)
            .await?;
        report.effective_analysis_mode = analysis.effective_mode;
        analysis_log.log_completion(&format!("{} candidates", analysis.candidates.len()));
        self.cancel.check()?;

        // Select
        let selection = select_and_report(&constraints, analysis.candidates, &mut report);
        if selection.segments.is_empty() {
            return Err(PipelineError::EmptySelection);
        }
        for warning in &report.warnings {
            logger.log_warning(&format!("{:?}", warning));
        }
        logger.for_stage("selection").log_completion(&format!(
            "{} segments, {:.2}s",
            selection.segments.len(),
            selection.total_duration
        ));

        // Plan and assemble
        let plan = build_plan(&selection, &videos, constraints.text_handling, &spec);
        self.cancel.check()?;
        let engine = AssemblyEngine::new(
            self.runner(),
            Arc::clone(&self.probe),
            Arc::clone(&self.inpaint),
            self.config.max_ffmpeg_processes,
            self.cancel.clone(),
        );
        let output = engine.assemble(plan, &videos, &spec, &workspace).await?;

        if let (true, Some(audio)) = (spec.sync_duration_to_audio, output.audio_duration) {
            report.warn(RunWarning::AudioPrecedence {
                target: constraints.target_duration,
                audio,
            });
        }
        report.final_duration = output.main_duration;

        // Finalize
        self.cancel.check()?;
        move_file(&output.path, &request.output_path)
            .await
            .map_err(|e| PipelineError::assembly(AssemblyStage::Finalize, e))?;
        report.finish(&request.output_path);

        logger.log_completion(&format!(
            "{} ({:.2}s, {} warnings)",
            request.output_path.display(),
            report.final_duration,
            report.warnings.len()
        ));
        Ok(report)
    }

    /// Probe every source in submission order, skipping unreadable ones.
    pub async fn probe_sources(&self, paths: &[PathBuf], report: &mut RunReport) -> PipelineResult<Vec<SourceVideo>> {
        let mut videos = Vec::with_capacity(paths.len());
        for (index, path) in paths.iter().enumerate() {
            let id = SourceId(index);
            report.sources.push(SourceReport::new(id, path));

            let probed = match self.probe.source(id, path).await {
                Ok(video) if video.duration > 0.0 && video.width > 0 && video.height > 0 => Ok(video),
                Ok(video) => Err(format!(
                    "no playable video stream ({}x{}, {:.2}s)",
                    video.width, video.height, video.duration
                )),
                Err(e) if e.is_unreadable_input() => Err(e.to_string()),
                Err(e) => return Err(e.into()),
            };

            match probed {
                Ok(video) => {
                    info!(source = %id, duration = video.duration, width = video.width, height = video.height, "Source probed");
                    videos.push(video);
                }
                Err(reason) => skip_source(report, id, reason),
            }
        }
        Ok(videos)
    }

    /// Build the reference profile from the largest face in the photo.
    pub async fn face_profile(&self, photo: Option<&Path>, threshold: f64) -> PipelineResult<Option<FaceProfile>> {
        let Some(photo) = photo else {
            return Ok(None);
        };
        let path = photo.to_path_buf();
        let faces = Arc::clone(&self.faces);
        let profile = tokio::task::spawn_blocking(move || {
            let image = load_reference_image(&path)?;
            build_face_profile(&image, faces.detector(), faces.embedder(), threshold)
        })
        .await
        .map_err(|e| MediaError::internal(format!("reference photo task failed: {}", e)))??;

        match profile {
            Some(profile) => {
                info!(photo = %photo.display(), threshold, "Face profile built");
                Ok(Some(profile))
            }
            None => Err(PipelineError::NoFaceInReference(photo.to_path_buf())),
        }
    }

    /// Analyze every video on the bounded pool.
    ///
    /// A source that cannot be decoded is skipped. A source that overruns the
    /// time budget lowers the shared mode for itself and every source not yet
    /// finished, then retries; overrunning at `fast` fails the run.
    pub async fn analyze_sources(
        &self,
        videos: &[SourceVideo],
        profile: Option<FaceProfile>,
        settings: AnalyzerSettings,
        mode: AnalysisMode,
        report: &mut RunReport,
    ) -> PipelineResult<AnalysisOutcome> {
        let mut analyzer = ClipAnalyzer::new(Arc::clone(&self.frames), Arc::clone(&self.text), settings)
            .with_cancel(self.cancel.subscribe());
        if let Some(profile) = profile {
            let matcher: Arc<dyn FaceMatcher> = self.faces.clone();
            analyzer = analyzer.with_face_profile(matcher, profile);
        }

        let shared_mode = AtomicU8::new(mode.rank());
        let permits = Semaphore::new(self.config.max_parallel_analyses.max(1));

        let outcomes = try_join_all(
            videos
                .iter()
                .map(|video| self.analyze_one(&analyzer, video, &shared_mode, &permits)),
        )
        .await?;

        let mut candidates = Vec::new();
        for outcome in outcomes {
            for (from, to) in outcome.degradations {
                report.warn(RunWarning::AnalysisDegraded {
                    source: outcome.source,
                    from,
                    to,
                });
            }
            match outcome.analysis {
                Ok(analysis) => {
                    if let Some(entry) = report.source_mut(outcome.source) {
                        entry.rejected += analysis.rejected;
                    }
                    candidates.extend(analysis.candidates);
                }
                Err(e) => skip_source(report, outcome.source, e.to_string()),
            }
        }

        if report.usable_sources() == 0 {
            return Err(PipelineError::NoUsableInput {
                skipped: report.sources.len(),
            });
        }

        Ok(AnalysisOutcome {
            candidates,
            effective_mode: AnalysisMode::from_rank(shared_mode.load(Ordering::SeqCst)),
        })
    }

    async fn analyze_one(
        &self,
        analyzer: &ClipAnalyzer,
        video: &SourceVideo,
        shared_mode: &AtomicU8,
        permits: &Semaphore,
    ) -> PipelineResult<SourceOutcome> {
        let _permit = permits.acquire().await.map_err(|_| PipelineError::Cancelled)?;
        self.cancel.check()?;

        let budget = self.config.analysis_timeout;
        let mut degradations = Vec::new();
        loop {
            let mode = AnalysisMode::from_rank(shared_mode.load(Ordering::SeqCst));
            match tokio::time::timeout(budget, analyzer.analyze(video, mode)).await {
                Ok(Ok(analysis)) => {
                    return Ok(SourceOutcome {
                        source: video.id,
                        analysis: Ok(analysis),
                        degradations,
                    })
                }
                Ok(Err(MediaError::Cancelled)) => return Err(PipelineError::Cancelled),
                Ok(Err(e @ (MediaError::FfmpegNotFound | MediaError::FfprobeNotFound))) => return Err(e.into()),
                Ok(Err(e)) => {
                    warn!(source = %video.id, error = %e, "Analysis failed, skipping source");
                    return Ok(SourceOutcome {
                        source: video.id,
                        analysis: Err(e),
                        degradations,
                    });
                }
                Err(_) => {
                    let Some(cheaper) = mode.degrade() else {
                        return Err(PipelineError::ResourceExhausted {
                            source_id: video.id,
                            reason: format!("analysis exceeded {}s in {} mode", budget.as_secs_f64(), mode),
                        });
                    };
                    shared_mode.fetch_min(cheaper.rank(), Ordering::SeqCst);
                    let now = AnalysisMode::from_rank(shared_mode.load(Ordering::SeqCst));
                    warn!(source = %video.id, from = %mode, to = %now, "Analysis over budget, degrading");
                    degradations.push((mode, now));
                }
            }
        }
    }
}

fn skip_source(report: &mut RunReport, source: SourceId, reason: String) {
    warn!(source = %source, reason = %reason, "Skipping unreadable source");
    if let Some(entry) = report.source_mut(source) {
        entry.skipped = true;
    }
    report.warn(RunWarning::UnreadableSource { source, reason });
}

/// Run the selector and fold its outcome into the report.
pub fn select_and_report(
    constraints: &SelectionConstraints,
    candidates: Vec<ScoredSegment>,
    report: &mut RunReport,
) -> Selection {
    let mut offered: HashMap<SourceId, usize> = HashMap::new();
    for c in &candidates {
        *offered.entry(c.source()).or_insert(0) += 1;
    }

    let selection = ClipSelector::new(constraints.clone()).select(candidates);
    let accepted = selection.accepted_per_source();

    for entry in report.sources.iter_mut().filter(|s| !s.skipped) {
        let taken = accepted.get(&entry.source).copied().unwrap_or(0);
        entry.accepted = taken;
        entry.rejected += offered.get(&entry.source).copied().unwrap_or(0).saturating_sub(taken);
    }
    let unused: Vec<SourceId> = report
        .sources
        .iter()
        .filter(|s| !s.skipped && s.accepted == 0)
        .map(|s| s.source)
        .collect();
    for source in unused {
        report.warn(RunWarning::NoAcceptedSegments { source });
    }

    if selection.diversity_relaxed && selection.adjacent_repeats() > 0 {
        report.warn(RunWarning::DiversityRelaxed {
            adjacent_repeats: selection.adjacent_repeats(),
        });
    }
    if selection.insufficient_content {
        report.insufficient_content = true;
        report.warn(RunWarning::InsufficientContent {
            requested: constraints.target_duration,
            achieved: selection.total_duration,
        });
    }
    report.segment_count = selection.segments.len();
    report.final_duration = selection.total_duration;
    selection
}

/// Attach a crop and text decision to every selected segment, in order.
pub fn build_plan(
    selection: &Selection,
    videos: &[SourceVideo],
    text_handling: TextHandlingMode,
    spec: &OutputSpec,
) -> AssemblyPlan {
    let entries = selection
        .segments
        .iter()
        .filter_map(|candidate| {
            let video = videos.iter().find(|v| v.id == candidate.source())?;
            let (crop, text_action) = plan_crop(
                video.width,
                video.height,
                &candidate.evidence,
                text_handling,
                spec.aspect(),
            );
            Some(PlanEntry {
                segment: candidate.segment,
                crop,
                text_action,
            })
        })
        .collect();
    AssemblyPlan::new(entries)
}
