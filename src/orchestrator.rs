//! Drives the frame source, the background model and a pool of ball
//! extractors over a whole video.
//!
//! Frames are dispatched strictly in order; results come back in completion
//! order and land in an indexed [`BallTable`]. A disposal task keeps the frame
//! cache and the background windows trimmed to what is still needed.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rally_cut_decoder::{
    DynFrameProvider, FrameError, FrameSize, FrameSource, FrameSourceConfig, RgbFrame, StopSignal,
};
use rally_cut_detector::{
    BackgroundConfig, BackgroundModel, DetectionParams, DetectionThresholds, FrameBallExtractor,
    PreviewWriter,
};
use rally_cut_types::{BallPosition, ScaleContext};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::ball_log::{BallLog, BallLogState};
use crate::error::RallyCutError;

const DISPOSAL_PERIOD: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct ExtractorSettings {
    pub target_height: u32,
    pub detection: DetectionParams,
    pub background: BackgroundConfig,
    pub workers: usize,
    pub cache_capacity: usize,
    pub resize_workers: usize,
    /// Recorded frames between two ball log backups.
    pub backup_interval: u64,
    pub preview_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Frames with a result, including resumed ones.
    pub processed: u64,
    pub total: u64,
    pub frame: u64,
}

pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

#[derive(Debug)]
pub struct ExtractionOutcome {
    pub state: BallLogState,
    pub frame_size: FrameSize,
    /// Frames analysed during this run.
    pub analysed: u64,
    pub cancelled: bool,
}

pub struct VideoBallsExtractor {
    settings: ExtractorSettings,
    log: Option<BallLog>,
    progress: Option<ProgressCallback>,
    stop: StopSignal,
}

struct DisposalGuard(AbortHandle);

impl Drop for DisposalGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Default)]
struct InFlight(Mutex<BTreeSet<u64>>);

impl InFlight {
    fn lock(&self) -> MutexGuard<'_, BTreeSet<u64>> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

struct Recorder<'a> {
    state: BallLogState,
    in_flight: &'a InFlight,
    log: Option<&'a BallLog>,
    progress: Option<&'a ProgressCallback>,
    backup_interval: u64,
    analysed: u64,
    /// Frames of the table holding a result, including resumed ones.
    processed: u64,
    since_backup: u64,
}

impl Recorder<'_> {
    async fn record(&mut self, frame: u64, balls: Vec<BallPosition>) {
        if !self.state.table.is_processed(frame as usize) {
            self.processed += 1;
        }
        self.state.table.set(frame as usize, balls);
        self.in_flight.lock().remove(&frame);
        self.analysed += 1;
        self.since_backup += 1;
        if let Some(progress) = self.progress {
            progress(ProgressUpdate {
                processed: self.processed,
                total: self.state.total_frames,
                frame,
            });
        }
        if self.since_backup >= self.backup_interval {
            self.since_backup = 0;
            self.backup().await;
        }
    }

    async fn backup(&self) {
        let Some(log) = self.log.cloned() else {
            return;
        };
        let table = self.state.table.clone();
        let total = self.state.total_frames;
        match tokio::task::spawn_blocking(move || log.save(&table, total)).await {
            Ok(Ok(())) => debug!(frames = self.analysed, "ball log backup written"),
            Ok(Err(err)) => warn!(error = %err, "failed to back up ball log"),
            Err(err) => warn!(error = %err, "ball log backup task failed"),
        }
    }
}

impl VideoBallsExtractor {
    pub fn new(settings: ExtractorSettings, stop: StopSignal) -> Self {
        Self {
            settings,
            log: None,
            progress: None,
            stop,
        }
    }

    pub fn with_log(mut self, log: BallLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Analyses every frame not yet present in `resume`.
    ///
    /// On failure the error comes with the number of frames analysed, so the
    /// caller can tell a backend that never produced anything from one that
    /// broke halfway.
    pub async fn run(
        &self,
        provider: DynFrameProvider,
        resume: Option<BallLogState>,
    ) -> Result<ExtractionOutcome, (RallyCutError, u64)> {
        let settings = &self.settings;
        let metadata = provider.metadata();
        let total = metadata
            .calculate_total_frames()
            .ok_or((RallyCutError::UnknownLength, 0u64))?;
        let source_size = metadata.frame_size().ok_or_else(|| {
            (
                RallyCutError::from(FrameError::configuration(
                    "video does not report its frame size",
                )),
                0u64,
            )
        })?;
        let target = source_size.with_target_height(settings.target_height);

        let mut state = match resume {
            Some(state) if state.total_frames == total && state.table.len() == total as usize => {
                state
            }
            Some(state) => {
                warn!(
                    logged = state.total_frames,
                    actual = total,
                    "ball log belongs to a video of another length; starting over"
                );
                BallLogState::new(total)
            }
            None => BallLogState::new(total),
        };
        // Frame 0 has no predecessor to diff against.
        if total > 0 && !state.table.is_processed(0) {
            state.table.set(0, Vec::new());
        }
        let analysis_start = state.resume_frame().max(1);
        if analysis_start >= total {
            info!(total, "every frame is already analysed");
            state.last_parsed_frame = state.table.last_contiguous_processed().map(|f| f as u64);
            return Ok(ExtractionOutcome {
                state,
                frame_size: target,
                analysed: 0,
                cancelled: false,
            });
        }

        settings
            .background
            .check_cache_capacity(settings.cache_capacity)
            .map_err(|err| (RallyCutError::from(err), 0u64))?;
        let source = FrameSource::start(
            provider,
            FrameSourceConfig {
                target,
                cache_capacity: settings.cache_capacity,
                resize_workers: settings.resize_workers,
                start_frame: analysis_start - 1,
            },
            self.stop.clone(),
        )
        .map_err(|err| (RallyCutError::from(err), 0u64))?;
        let background = BackgroundModel::start(
            source.clone(),
            settings.background,
            target,
            analysis_start,
            total,
            self.stop.clone(),
        )
        .map_err(|err| (RallyCutError::from(err), 0u64))?;

        let thresholds = settings
            .detection
            .resolve(&ScaleContext::for_height(target.height));
        let preview = settings.preview_dir.clone().map(PreviewWriter::new);
        let workers = settings.workers.max(1);
        let (idle_tx, mut idle_rx) = mpsc::channel(workers);
        for _ in 0..workers {
            let extractor = FrameBallExtractor::new(thresholds, target).with_preview(preview.clone());
            if idle_tx.try_send(extractor).is_err() {
                break;
            }
        }
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<(u64, Vec<BallPosition>)>();

        let in_flight = Arc::new(InFlight::default());
        let next_frame = Arc::new(AtomicU64::new(analysis_start));
        let disposal = tokio::spawn(dispose_loop(
            source.clone(),
            background.clone(),
            Arc::clone(&in_flight),
            Arc::clone(&next_frame),
        ));
        let disposal_guard = DisposalGuard(disposal.abort_handle());

        info!(
            total,
            start = analysis_start,
            size = %target,
            workers,
            "analysing frames"
        );

        let processed = state.table.processed_count() as u64;
        let mut recorder = Recorder {
            state,
            in_flight: &in_flight,
            log: self.log.as_ref(),
            progress: self.progress.as_ref(),
            backup_interval: settings.backup_interval.max(1),
            analysed: 0,
            processed,
            since_backup: 0,
        };
        let mut stop = self.stop.clone();
        let mut previous: Option<Arc<RgbFrame>> = None;
        let mut failure: Option<RallyCutError> = None;
        let mut decoded_until = total;
        let mut frame = analysis_start;

        while frame < total {
            if stop.is_stopped() {
                info!(frame, "stop requested; finishing in-flight frames");
                break;
            }
            next_frame.store(frame, Ordering::Release);
            while let Ok((done, balls)) = result_rx.try_recv() {
                recorder.record(done, balls).await;
            }

            let previous_frame = match previous.take() {
                Some(previous_frame) => Ok(previous_frame),
                None => source.get_frame(frame - 1).await,
            };
            let fetched = match previous_frame {
                Ok(previous_frame) => source
                    .get_frame(frame)
                    .await
                    .map(|current| (previous_frame, current)),
                Err(err) => Err(err),
            };
            let (previous_frame, current) = match fetched {
                Ok(pair) => pair,
                Err(err) => {
                    if stop.is_stopped() {
                        continue;
                    }
                    if let Some(end) = source.exhausted_at().filter(|end| *end <= frame) {
                        warn!(frame, decoded = end, "video ended before its declared length");
                        decoded_until = end;
                        break;
                    }
                    warn!(frame, error = %err, "frame unavailable; recording it without balls");
                    recorder.record(frame, Vec::new()).await;
                    frame += 1;
                    continue;
                }
            };

            let covering = tokio::select! {
                biased;
                _ = stop.stopped() => continue,
                covering = background.get_background(frame) => covering,
            };
            let Some(covering) = covering else {
                if stop.is_stopped() {
                    continue;
                }
                warn!(frame, "background production ended without covering frame; stopping early");
                if recorder.analysed == 0 {
                    failure = Some(RallyCutError::NoBackground { frame });
                }
                break;
            };

            let mut extractor = tokio::select! {
                biased;
                _ = stop.stopped() => continue,
                idle = idle_rx.recv() => match idle {
                    Some(extractor) => extractor,
                    None => break,
                },
            };
            if let Err(err) = extractor.assign(frame, previous_frame, Arc::clone(&current), covering)
            {
                failure = Some(err.into());
                break;
            }
            in_flight.lock().insert(frame);
            tokio::spawn(run_job(
                frame,
                extractor,
                idle_tx.clone(),
                result_tx.clone(),
                thresholds,
                target,
                preview.clone(),
            ));

            previous = Some(current);
            frame += 1;
        }
        next_frame.store(frame, Ordering::Release);

        drop(result_tx);
        while !in_flight.lock().is_empty() {
            match result_rx.recv().await {
                Some((done, balls)) => recorder.record(done, balls).await,
                None => break,
            }
        }
        drop(disposal_guard);

        let cancelled = self.stop.is_stopped();
        let analysed = recorder.analysed;
        let mut state = recorder.state;
        if decoded_until < total {
            state.table.truncate(decoded_until as usize);
            state.total_frames = decoded_until;
        }
        state.last_parsed_frame = state.table.last_contiguous_processed().map(|f| f as u64);

        if let Some(log) = &self.log {
            if let Err(err) = log.save(&state.table, state.total_frames) {
                return Err((err, analysed));
            }
            debug!(path = %log.path().display(), "ball log written");
        }
        if let Some(err) = failure {
            return Err((err, analysed));
        }
        if analysed == 0 && !cancelled {
            return Err((RallyCutError::NoFrames, 0));
        }

        info!(
            analysed,
            processed = state.table.processed_count(),
            total = state.total_frames,
            cancelled,
            "frame analysis finished"
        );
        Ok(ExtractionOutcome {
            state,
            frame_size: target,
            analysed,
            cancelled,
        })
    }
}

async fn run_job(
    frame: u64,
    mut extractor: FrameBallExtractor,
    idle_tx: mpsc::Sender<FrameBallExtractor>,
    result_tx: mpsc::UnboundedSender<(u64, Vec<BallPosition>)>,
    thresholds: DetectionThresholds,
    target: FrameSize,
    preview: Option<PreviewWriter>,
) {
    let joined = tokio::task::spawn_blocking(move || {
        let result = extractor.extract();
        (extractor, result)
    })
    .await;
    let balls = match joined {
        Ok((extractor, result)) => {
            if let Err(err) = idle_tx.try_send(extractor) {
                debug!(frame, error = %err, "extractor not returned to the idle pool");
            }
            result.unwrap_or_else(|err| {
                warn!(frame, error = %err, "ball extraction failed");
                Vec::new()
            })
        }
        Err(err) => {
            warn!(frame, error = %err, "ball extraction task died; replacing extractor");
            let replacement = FrameBallExtractor::new(thresholds, target).with_preview(preview);
            if let Err(err) = idle_tx.try_send(replacement) {
                debug!(frame, error = %err, "replacement extractor not added to the idle pool");
            }
            Vec::new()
        }
    };
    if result_tx.send((frame, balls)).is_err() {
        debug!(frame, "result dropped; the run has already finished");
    }
}

/// Lowest frame index still needed by the dispatcher, the running jobs or the
/// background builder.
fn disposal_watermark(next_frame: u64, oldest_in_flight: Option<u64>, needed_from: Option<u64>) -> u64 {
    let mut low = next_frame.saturating_sub(1);
    if let Some(oldest) = oldest_in_flight {
        low = low.min(oldest.saturating_sub(1));
    }
    if let Some(needed) = needed_from {
        low = low.min(needed);
    }
    low
}

async fn dispose_loop(
    source: FrameSource,
    background: BackgroundModel,
    in_flight: Arc<InFlight>,
    next_frame: Arc<AtomicU64>,
) {
    let mut ticker = tokio::time::interval(DISPOSAL_PERIOD);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let oldest = in_flight.lock().iter().next().copied();
        let low = disposal_watermark(
            next_frame.load(Ordering::Acquire),
            oldest,
            background.needed_from(),
        );
        source.dispose_frames_before(low);
        background.dispose_older_than(low);
    }
}
