use std::path::{Path, PathBuf};

use rally_cut_decoder::{DynFrameProvider, FrameError, FrameSize, StopSignal};
use rally_cut_rally::{ArcParams, ClusterParams, RallyEngine, RallyParams, RallyReport};
use rally_cut_types::BallTable;
use tracing::info;

use crate::ball_log::{BallLog, BallLogState, default_ball_log_path};
use crate::error::RallyCutError;
use crate::orchestrator::{ExtractorSettings, VideoBallsExtractor};
use crate::progress::ProgressReporter;
use crate::rally_log::{default_rally_log_path, entries, write_rally_log};
use crate::settings::EffectiveSettings;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub extractor: ExtractorSettings,
    pub arcs: ArcParams,
    pub rally: RallyParams,
    pub cluster: ClusterParams,
    pub ball_log: PathBuf,
    pub rally_log: PathBuf,
    pub skip_detection: bool,
    pub show_progress: bool,
}

impl PipelineConfig {
    pub fn from_settings(settings: &EffectiveSettings, input: &Path) -> Self {
        Self {
            extractor: ExtractorSettings {
                target_height: settings.detection.target_height,
                detection: settings.detection.params,
                background: settings.background,
                workers: settings.detection.workers,
                cache_capacity: settings.decoder.cache_capacity,
                resize_workers: settings.decoder.resize_workers,
                backup_interval: settings.output.backup_interval,
                preview_dir: settings.detection.preview_dir.clone(),
            },
            arcs: settings.arcs,
            rally: settings.rally,
            cluster: settings.cluster,
            ball_log: settings
                .output
                .ball_log
                .clone()
                .unwrap_or_else(|| default_ball_log_path(input)),
            rally_log: settings
                .output
                .rally_log
                .clone()
                .unwrap_or_else(|| default_rally_log_path(input)),
            skip_detection: settings.skip_detection,
            show_progress: true,
        }
    }
}

#[derive(Debug)]
pub struct PipelineSummary {
    pub balls: BallLogState,
    /// `None` when the run was cancelled before rally extraction.
    pub report: Option<RallyReport>,
    pub analysed: u64,
}

pub async fn run_pipeline(
    provider: DynFrameProvider,
    config: &PipelineConfig,
    stop: StopSignal,
) -> Result<PipelineSummary, (RallyCutError, u64)> {
    let log = BallLog::new(&config.ball_log);
    let resume = log.load().map_err(|err| (err, 0u64))?;

    if config.skip_detection {
        let state = resume.ok_or_else(|| {
            (
                RallyCutError::IncompleteBallLog {
                    path: config.ball_log.clone(),
                    processed: 0,
                    total: 0,
                },
                0u64,
            )
        })?;
        if !state.is_complete() {
            return Err((
                RallyCutError::IncompleteBallLog {
                    path: config.ball_log.clone(),
                    processed: state.resume_frame(),
                    total: state.total_frames,
                },
                0,
            ));
        }
        let frame_size = provider
            .metadata()
            .frame_size()
            .map(|size| size.with_target_height(config.extractor.target_height))
            .ok_or_else(|| {
                (
                    RallyCutError::from(FrameError::configuration(
                        "video does not report its frame size",
                    )),
                    0u64,
                )
            })?;
        info!(path = %config.ball_log.display(), "reusing ball log; detection skipped");
        let report = extract_rallies(&state.table, frame_size, config).map_err(|err| (err, 0u64))?;
        return Ok(PipelineSummary {
            balls: state,
            report: Some(report),
            analysed: 0,
        });
    }

    let total = provider.metadata().calculate_total_frames().unwrap_or(0);
    let resumed = resume
        .as_ref()
        .filter(|state| state.total_frames == total)
        .map_or(0, |state| state.table.processed_count() as u64);
    if resumed > 0 {
        info!(resumed, total, "resuming from ball log");
    }
    let reporter = if config.show_progress {
        ProgressReporter::new(total, resumed)
    } else {
        ProgressReporter::hidden()
    };

    let extractor = VideoBallsExtractor::new(config.extractor.clone(), stop)
        .with_log(log)
        .with_progress(reporter.callback());
    let outcome = match extractor.run(provider, resume).await {
        Ok(outcome) => outcome,
        Err((err, analysed)) => {
            reporter.abandon(format!("failed after {analysed} frames"));
            return Err((err, analysed));
        }
    };
    reporter.finish(
        outcome.state.table.processed_count() as u64,
        outcome.state.total_frames,
    );

    if outcome.cancelled {
        info!(
            path = %config.ball_log.display(),
            "analysis interrupted; ball log saved for resuming"
        );
        return Ok(PipelineSummary {
            balls: outcome.state,
            report: None,
            analysed: outcome.analysed,
        });
    }

    let report = extract_rallies(&outcome.state.table, outcome.frame_size, config)
        .map_err(|err| (err, outcome.analysed))?;
    Ok(PipelineSummary {
        balls: outcome.state,
        report: Some(report),
        analysed: outcome.analysed,
    })
}

/// Builds arcs and rallies from a ball table and writes the rally log.
pub fn extract_rallies(
    table: &BallTable,
    frame_size: FrameSize,
    config: &PipelineConfig,
) -> Result<RallyReport, RallyCutError> {
    let engine = RallyEngine::new(&config.arcs, &config.rally, config.cluster, frame_size)?;
    let report = engine.run(table);
    write_rally_log(&config.rally_log, &entries(&report))?;
    info!(
        path = %config.rally_log.display(),
        rallies = report.rallies.len(),
        "rally log written"
    );
    Ok(report)
}
