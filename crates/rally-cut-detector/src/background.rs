//! Background images synthesized by per-patch majority voting.
//!
//! Windows cover `[start + k * frames_per_background, start + (k + 1) * frames_per_background)`.
//! Each window samples `samples` frames `sample_spacing` apart, clusters the
//! centre pixel of every patch across those samples and copies the patch from
//! the sample closest to the majority cluster.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use rally_cut_decoder::{FrameSource, StopSignal};
use rally_cut_types::{BufferPool, FrameError, FrameResult, FrameSize, RGB_CHANNELS, RgbFrame};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::error::{DetectorError, DetectorResult};
use crate::kmeans::majority_cluster;

/// Anything that can hand out analysis-sized frames by index.
pub trait FrameFetcher: Clone + Send + Sync + 'static {
    fn fetch(&self, index: u64) -> impl Future<Output = FrameResult<Arc<RgbFrame>>> + Send;
}

impl FrameFetcher for FrameSource {
    fn fetch(&self, index: u64) -> impl Future<Output = FrameResult<Arc<RgbFrame>>> + Send {
        self.get_frame(index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    pub samples: usize,
    pub sample_spacing: u64,
    /// Side of the square voting patch; must be odd so it has a centre pixel.
    pub patch_size: usize,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            samples: 10,
            sample_spacing: 20,
            patch_size: 5,
        }
    }
}

impl BackgroundConfig {
    pub fn frames_per_background(&self) -> u64 {
        self.samples as u64 * self.sample_spacing
    }

    pub fn validate(&self) -> DetectorResult<()> {
        if self.patch_size == 0 || self.patch_size % 2 == 0 {
            return Err(DetectorError::configuration(format!(
                "background patch size must be odd, got {}",
                self.patch_size
            )));
        }
        if self.samples == 0 || self.sample_spacing == 0 {
            return Err(DetectorError::configuration(
                "background needs at least one sample and a positive sample spacing",
            ));
        }
        Ok(())
    }

    /// The frame cache must hold a whole window or sampling can starve the decoder.
    pub fn check_cache_capacity(&self, cache_capacity: usize) -> DetectorResult<()> {
        if cache_capacity as u64 <= self.frames_per_background() {
            return Err(DetectorError::configuration(format!(
                "frame cache capacity {} must exceed frames per background {}",
                cache_capacity,
                self.frames_per_background()
            )));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct Background {
    window_start: u64,
    window_end: u64,
    image: RgbFrame,
}

impl Background {
    /// Wraps an externally produced background valid for `[window_start, window_end)`.
    pub fn from_image(window_start: u64, window_end: u64, image: RgbFrame) -> Self {
        Self {
            window_start,
            window_end,
            image,
        }
    }

    pub fn window_start(&self) -> u64 {
        self.window_start
    }

    /// Exclusive.
    pub fn window_end(&self) -> u64 {
        self.window_end
    }

    pub fn covers(&self, frame: u64) -> bool {
        (self.window_start..self.window_end).contains(&frame)
    }

    pub fn image(&self) -> &RgbFrame {
        &self.image
    }
}

struct BackgroundState {
    windows: VecDeque<Arc<Background>>,
    /// Every window ending at or before this was built or abandoned.
    processed_until: u64,
    finished: bool,
    /// Lowest frame the builder still has to fetch.
    needed_from: Option<u64>,
    pool: BufferPool,
}

struct Shared {
    state: Mutex<BackgroundState>,
    changed: watch::Sender<u64>,
}

enum Lookup {
    Found(Arc<Background>),
    Wait,
    Missing,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BackgroundState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn notify(&self) {
        self.changed.send_modify(|version| *version = version.wrapping_add(1));
    }

    fn lookup(&self, frame: u64) -> Lookup {
        let state = self.lock();
        if let Some(window) = state.windows.iter().find(|window| window.covers(frame)) {
            return Lookup::Found(Arc::clone(window));
        }
        if frame >= state.processed_until && !state.finished {
            return Lookup::Wait;
        }
        let fallback = state
            .windows
            .iter()
            .rev()
            .find(|window| window.window_start <= frame)
            .or_else(|| state.windows.front());
        match fallback {
            Some(window) => Lookup::Found(Arc::clone(window)),
            None if state.finished => Lookup::Missing,
            None => Lookup::Wait,
        }
    }

    fn set_needed(&self, frame: Option<u64>) {
        self.lock().needed_from = frame;
    }

    fn acquire_buffer(&self) -> Vec<u8> {
        self.lock().pool.acquire()
    }

    fn complete_window(&self, window_end: u64, background: Option<Background>) {
        {
            let mut state = self.lock();
            if let Some(background) = background {
                state.windows.push_back(Arc::new(background));
            }
            state.processed_until = state.processed_until.max(window_end);
        }
        self.notify();
    }

    fn finish(&self) {
        {
            let mut state = self.lock();
            state.finished = true;
            state.needed_from = None;
        }
        self.notify();
    }
}

struct BuilderGuard(AbortHandle);

impl Drop for BuilderGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Clone)]
pub struct BackgroundModel {
    shared: Arc<Shared>,
    config: BackgroundConfig,
    _builder: Arc<BuilderGuard>,
}

impl BackgroundModel {
    /// Starts building windows from `start_frame`. Must be called inside a tokio runtime.
    pub fn start<F: FrameFetcher>(
        fetcher: F,
        config: BackgroundConfig,
        target: FrameSize,
        start_frame: u64,
        total_frames: u64,
        stop: StopSignal,
    ) -> DetectorResult<Self> {
        config.validate()?;
        let shared = Arc::new(Shared {
            state: Mutex::new(BackgroundState {
                windows: VecDeque::new(),
                processed_until: start_frame,
                finished: false,
                needed_from: Some(start_frame),
                pool: BufferPool::new(target.byte_len(), 4),
            }),
            changed: watch::channel(0).0,
        });
        let builder = tokio::spawn(build_windows(
            Arc::clone(&shared),
            fetcher,
            config,
            target,
            start_frame,
            total_frames,
            stop,
        ));
        Ok(Self {
            shared,
            config,
            _builder: Arc::new(BuilderGuard(builder.abort_handle())),
        })
    }

    pub fn config(&self) -> &BackgroundConfig {
        &self.config
    }

    /// Waits for the window covering `frame`. Once building has ended, falls back
    /// to the closest earlier window; `None` only if no window was ever built.
    pub async fn get_background(&self, frame: u64) -> Option<Arc<Background>> {
        let mut changes = self.shared.changed.subscribe();
        loop {
            match self.shared.lookup(frame) {
                Lookup::Found(background) => return Some(background),
                Lookup::Missing => return None,
                Lookup::Wait => {}
            }
            if changes.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Recycles windows that end at or before `frame`, always keeping the newest one.
    pub fn dispose_older_than(&self, frame: u64) {
        let mut state = self.shared.lock();
        let mut released = 0usize;
        while state.windows.len() > 1 {
            let Some(front) = state.windows.front() else {
                break;
            };
            if front.window_end > frame {
                break;
            }
            if let Some(window) = state.windows.pop_front() {
                released += 1;
                if let Ok(background) = Arc::try_unwrap(window) {
                    state.pool.release(background.image.into_data());
                }
            }
        }
        if released > 0 {
            debug!(before = frame, released, "disposed background windows");
        }
    }

    /// Lowest frame index the builder still needs from the frame source.
    pub fn needed_from(&self) -> Option<u64> {
        self.shared.lock().needed_from
    }

    pub fn is_finished(&self) -> bool {
        self.shared.lock().finished
    }

    pub fn retained_windows(&self) -> usize {
        self.shared.lock().windows.len()
    }
}

async fn build_windows<F: FrameFetcher>(
    shared: Arc<Shared>,
    fetcher: F,
    config: BackgroundConfig,
    target: FrameSize,
    start_frame: u64,
    total_frames: u64,
    mut stop: StopSignal,
) {
    let frames_per_background = config.frames_per_background();
    let mut window_start = start_frame;

    'windows: loop {
        if stop.is_stopped() {
            break;
        }
        let indices: Vec<u64> = (0..config.samples as u64)
            .map(|sample| window_start + sample * config.sample_spacing)
            .collect();
        if indices.iter().any(|index| *index >= total_frames) {
            debug!(window_start, total_frames, "no complete background window left");
            break;
        }

        let mut samples = Vec::with_capacity(indices.len());
        for &index in &indices {
            shared.set_needed(Some(index));
            let fetched = tokio::select! {
                biased;
                _ = stop.stopped() => break 'windows,
                fetched = fetcher.fetch(index) => fetched,
            };
            match fetched {
                Ok(frame) => samples.push(frame),
                Err(FrameError::FrameNotFound { index }) => {
                    warn!(window_start, sample = index, "sample frame never arrived; background building ends");
                    break 'windows;
                }
                Err(err) => {
                    warn!(window_start, sample = index, error = %err, "abandoning background window");
                    break;
                }
            }
        }
        let window_end = window_start + frames_per_background;
        shared.set_needed(Some(window_end));

        let background = if samples.len() == indices.len() {
            compose_window(&shared, samples, config.patch_size, target, window_start, window_end)
                .await
        } else {
            None
        };
        shared.complete_window(window_end, background);
        window_start = window_end;
    }
    shared.finish();
}

async fn compose_window(
    shared: &Shared,
    samples: Vec<Arc<RgbFrame>>,
    patch_size: usize,
    target: FrameSize,
    window_start: u64,
    window_end: u64,
) -> Option<Background> {
    if let Some(frame) = samples.iter().find(|frame| frame.size() != target) {
        warn!(
            window_start,
            size = %frame.size(),
            expected = %target,
            "sample frame has the wrong size; abandoning background window"
        );
        return None;
    }
    let mut buffer = shared.acquire_buffer();
    let composed = tokio::task::spawn_blocking(move || {
        compose_background(
            &samples,
            patch_size,
            &mut buffer,
            target.width as usize,
            target.height as usize,
        );
        RgbFrame::from_owned(target.width, target.height, None, buffer)
    })
    .await;
    match composed {
        Ok(Ok(image)) => {
            debug!(window_start, window_end, "background window ready");
            Some(Background {
                window_start,
                window_end,
                image,
            })
        }
        Ok(Err(err)) => {
            warn!(window_start, error = %err, "abandoning background window");
            None
        }
        Err(err) => {
            warn!(window_start, error = %err, "background worker failed");
            None
        }
    }
}

/// Writes the majority-vote background of `samples` into `out`.
pub fn compose_background(
    samples: &[Arc<RgbFrame>],
    patch_size: usize,
    out: &mut [u8],
    width: usize,
    height: usize,
) {
    assert_eq!(out.len(), width * height * RGB_CHANNELS);
    if samples.is_empty() || width == 0 || height == 0 {
        return;
    }
    let row_bytes = width * RGB_CHANNELS;
    out.par_chunks_mut(patch_size * row_bytes)
        .enumerate()
        .for_each(|(band, rows)| {
            let y0 = band * patch_size;
            let band_height = rows.len() / row_bytes;
            let center_y = (y0 + band_height / 2) as u32;
            let mut colors = Vec::with_capacity(samples.len());
            let mut assignment = Vec::with_capacity(samples.len());
            for x0 in (0..width).step_by(patch_size) {
                let patch_width = patch_size.min(width - x0);
                let center_x = (x0 + patch_width / 2) as u32;
                colors.clear();
                colors.extend(samples.iter().map(|frame| frame.pixel(center_x, center_y)));
                let vote = majority_cluster(&colors, &mut assignment);
                let source = samples[vote.representative].data();
                for dy in 0..band_height {
                    let src = (y0 + dy) * row_bytes + x0 * RGB_CHANNELS;
                    let dst = dy * row_bytes + x0 * RGB_CHANNELS;
                    let len = patch_width * RGB_CHANNELS;
                    rows[dst..dst + len].copy_from_slice(&source[src..src + len]);
                }
            }
        });
}
