//! Bounded, index-addressable frame cache in front of a sequential decoder.
//!
//! One driver task pulls frames from the backend stream in order, reserves a
//! cache slot for each one and hands the resize to a small pool of blocking
//! workers. Consumers await any index inside the retained window; indices below
//! the disposal watermark or past the end of the decoded stream fail with
//! [`FrameError::FrameNotFound`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Semaphore, watch};
use tokio::task::AbortHandle;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use crate::core::{DynFrameProvider, FrameError, FrameResult, FrameSize, RgbFrame, VideoMetadata};
use crate::resize::resize_rgb_into;
use crate::stop::StopSignal;
use rally_cut_types::BufferPool;

pub const DEFAULT_CACHE_CAPACITY: usize = 400;
pub const DEFAULT_RESIZE_WORKERS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSourceConfig {
    pub target: FrameSize,
    /// Maximum number of frames kept between the disposal watermark and the decoder.
    pub cache_capacity: usize,
    pub resize_workers: usize,
    /// Frames before this index are decoded but never cached.
    pub start_frame: u64,
}

impl FrameSourceConfig {
    pub fn new(target: FrameSize) -> Self {
        Self {
            target,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            resize_workers: DEFAULT_RESIZE_WORKERS,
            start_frame: 0,
        }
    }

    fn validate(&self) -> FrameResult<()> {
        if self.target.is_empty() {
            return Err(FrameError::configuration(format!(
                "target size {} must be non-empty",
                self.target
            )));
        }
        if self.cache_capacity == 0 {
            return Err(FrameError::configuration(
                "frame cache capacity must be greater than zero",
            ));
        }
        if self.resize_workers == 0 {
            return Err(FrameError::configuration(
                "at least one resize worker is required",
            ));
        }
        Ok(())
    }
}

enum Slot {
    Pending,
    Ready(Arc<RgbFrame>),
    Failed(String),
}

struct CacheState {
    /// Every index below this was disposed.
    base: u64,
    /// `slots[i]` holds frame `base + i`.
    slots: VecDeque<Slot>,
    /// Next index the driver will reserve.
    next: u64,
    /// One past the last reserved index once decoding has ended.
    end: Option<u64>,
    /// Decoding ended because a stop was requested, not because the stream ran out.
    stopped: bool,
    pool: BufferPool,
}

struct Shared {
    state: Mutex<CacheState>,
    changed: watch::Sender<u64>,
    target: FrameSize,
    capacity: usize,
}

struct DriverGuard(AbortHandle);

impl Drop for DriverGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Handle to a running frame cache. Clones share the same cache.
#[derive(Clone)]
pub struct FrameSource {
    shared: Arc<Shared>,
    metadata: VideoMetadata,
    _driver: Arc<DriverGuard>,
}

impl FrameSource {
    /// Starts decoding immediately. Must be called inside a tokio runtime.
    pub fn start(
        provider: DynFrameProvider,
        config: FrameSourceConfig,
        stop: StopSignal,
    ) -> FrameResult<Self> {
        config.validate()?;
        let metadata = provider.metadata();
        let shared = Arc::new(Shared {
            state: Mutex::new(CacheState {
                base: config.start_frame,
                slots: VecDeque::with_capacity(config.cache_capacity),
                next: config.start_frame,
                end: None,
                stopped: false,
                pool: BufferPool::new(config.target.byte_len(), config.cache_capacity),
            }),
            changed: watch::channel(0).0,
            target: config.target,
            capacity: config.cache_capacity,
        });
        let stream = provider.into_stream();
        let driver = tokio::spawn(drive(
            Arc::clone(&shared),
            stream,
            config,
            metadata.calculate_total_frames(),
            stop,
        ));
        Ok(Self {
            shared,
            metadata,
            _driver: Arc::new(DriverGuard(driver.abort_handle())),
        })
    }

    pub fn metadata(&self) -> VideoMetadata {
        self.metadata
    }

    pub fn total_frames(&self) -> Option<u64> {
        self.metadata.calculate_total_frames()
    }

    pub fn target_size(&self) -> FrameSize {
        self.shared.target
    }

    /// Waits until frame `index` is decoded and resized.
    pub async fn get_frame(&self, index: u64) -> FrameResult<Arc<RgbFrame>> {
        let mut changes = self.shared.changed.subscribe();
        loop {
            if let Some(frame) = self.shared.lookup(index)? {
                return Ok(frame);
            }
            if changes.changed().await.is_err() {
                return Err(FrameError::not_found(index));
            }
        }
    }

    /// Releases every cached frame below `index` back to the buffer pool.
    pub fn dispose_frames_before(&self, index: u64) {
        let released = {
            let mut state = self.shared.lock();
            if index <= state.base {
                return;
            }
            let count = ((index - state.base) as usize).min(state.slots.len());
            let mut released = 0usize;
            for slot in state.slots.drain(..count).collect::<Vec<_>>() {
                if let Slot::Ready(frame) = slot {
                    released += 1;
                    if let Ok(frame) = Arc::try_unwrap(frame) {
                        state.pool.release(frame.into_data());
                    }
                }
            }
            state.base = index;
            released
        };
        if released > 0 {
            debug!(before = index, released, "disposed cached frames");
        }
        self.shared.notify();
    }

    /// Lowest index still retained and the next index the decoder will produce.
    pub fn cached_range(&self) -> (u64, u64) {
        let state = self.shared.lock();
        (state.base, state.next.max(state.base))
    }

    /// Number of frames the decoder produced, once decoding has ended.
    pub fn decoded_end(&self) -> Option<u64> {
        self.shared.lock().end
    }

    /// Like [`Self::decoded_end`], but only when the stream itself ran out.
    /// A decoder halted by a stop request reports `None`.
    pub fn exhausted_at(&self) -> Option<u64> {
        let state = self.shared.lock();
        if state.stopped { None } else { state.end }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn notify(&self) {
        self.changed.send_modify(|version| *version = version.wrapping_add(1));
    }

    fn lookup(&self, index: u64) -> FrameResult<Option<Arc<RgbFrame>>> {
        let state = self.lock();
        if index < state.base {
            return Err(FrameError::not_found(index));
        }
        match state.slots.get((index - state.base) as usize) {
            Some(Slot::Ready(frame)) => Ok(Some(Arc::clone(frame))),
            Some(Slot::Failed(reason)) => Err(FrameError::InvalidFrame {
                reason: reason.clone(),
            }),
            Some(Slot::Pending) => Ok(None),
            None => match state.end {
                Some(end) if index >= end => Err(FrameError::not_found(index)),
                _ => Ok(None),
            },
        }
    }

    /// Reserves a pending slot for `index`; `None` when the frame was disposed already.
    fn reserve(&self, index: u64) -> Option<Vec<u8>> {
        let mut state = self.lock();
        state.next = index + 1;
        if index < state.base {
            return None;
        }
        state.slots.push_back(Slot::Pending);
        Some(state.pool.acquire())
    }

    fn has_room(&self, index: u64) -> bool {
        let state = self.lock();
        index < state.base || index - state.base < self.capacity as u64
    }

    fn complete(&self, index: u64, result: FrameResult<RgbFrame>) {
        {
            let mut state = self.lock();
            if index < state.base {
                if let Ok(frame) = result {
                    state.pool.release(frame.into_data());
                }
                return;
            }
            let position = (index - state.base) as usize;
            if let Some(slot) = state.slots.get_mut(position) {
                *slot = match result {
                    Ok(frame) => Slot::Ready(Arc::new(frame)),
                    Err(err) => Slot::Failed(err.to_string()),
                };
            }
        }
        self.notify();
    }

    fn finish(&self, produced: u64, stopped: bool) {
        {
            let mut state = self.lock();
            let end = produced.max(state.base);
            state.end = Some(end);
            state.stopped = stopped;
        }
        self.notify();
    }
}

async fn drive(
    shared: Arc<Shared>,
    mut stream: crate::core::FrameStream,
    config: FrameSourceConfig,
    total_frames: Option<u64>,
    mut stop: StopSignal,
) {
    let workers = Arc::new(Semaphore::new(config.resize_workers));
    let mut changes = shared.changed.subscribe();
    let mut decoded = 0u64;
    let mut stopped = false;

    loop {
        let item = tokio::select! {
            biased;
            _ = stop.stopped() => {
                stopped = true;
                break;
            }
            item = stream.next() => item,
        };
        let Some(item) = item else { break };
        let frame = match item {
            Ok(frame) => frame,
            Err(err) => {
                warn!(frame = decoded, error = %err, "decoder failed; no further frames");
                break;
            }
        };
        let index = decoded;
        decoded += 1;
        if index < config.start_frame {
            continue;
        }

        while !shared.has_room(index) {
            tokio::select! {
                biased;
                _ = stop.stopped() => {
                    stopped = true;
                    break;
                }
                changed = changes.changed() => {
                    if changed.is_err() {
                        stopped = true;
                        break;
                    }
                }
            }
        }
        if stopped {
            decoded = index;
            break;
        }

        let Some(mut buffer) = shared.reserve(index) else {
            continue;
        };
        let permit = match Arc::clone(&workers).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let worker_shared = Arc::clone(&shared);
        let target = config.target;
        tokio::task::spawn_blocking(move || {
            resize_rgb_into(&frame, target, &mut buffer);
            let result = RgbFrame::from_owned(target.width, target.height, frame.timestamp(), buffer)
                .map(|resized| resized.with_frame_index(Some(index)));
            worker_shared.complete(index, result);
            drop(permit);
        });
    }

    if !stopped {
        if let Some(total) = total_frames {
            if decoded < total {
                warn!(
                    decoded,
                    declared = total,
                    "video ended before its declared frame count"
                );
            }
        }
    } else {
        debug!(decoded, "frame source stopped on request");
    }
    shared.finish(decoded, stopped);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::{MockScene, boxed_mock};
    use crate::stop::stop_channel;
    use std::time::Duration;

    fn source_for(scene: MockScene, config: FrameSourceConfig) -> FrameSource {
        let provider = boxed_mock(scene, Some(4)).unwrap();
        FrameSource::start(provider, config, StopSignal::never()).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn frames_have_target_size() {
        let target = FrameSize::new(64, 36);
        let source = source_for(MockScene::empty(128, 72, 12), FrameSourceConfig::new(target));
        for index in [0, 5, 11] {
            let frame = source.get_frame(index).await.unwrap();
            assert_eq!(frame.size(), target);
            assert_eq!(frame.data().len(), target.byte_len());
            assert_eq!(frame.frame_index(), Some(index));
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_frames_fail_once_decoding_ends() {
        let mut scene = MockScene::empty(32, 18, 20);
        scene.truncate_at = Some(6);
        let source = source_for(scene, FrameSourceConfig::new(FrameSize::new(32, 18)));
        assert!(source.get_frame(5).await.is_ok());
        let err = source.get_frame(6).await.unwrap_err();
        assert!(matches!(err, FrameError::FrameNotFound { index: 6 }));
        assert_eq!(source.decoded_end(), Some(6));
        assert_eq!(source.exhausted_at(), Some(6));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn disposed_frames_are_not_found() {
        let source = source_for(
            MockScene::empty(32, 18, 10),
            FrameSourceConfig::new(FrameSize::new(16, 8)),
        );
        source.get_frame(4).await.unwrap();
        source.dispose_frames_before(3);
        assert!(matches!(
            source.get_frame(2).await,
            Err(FrameError::FrameNotFound { index: 2 })
        ));
        assert!(source.get_frame(3).await.is_ok());
        assert_eq!(source.cached_range().0, 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bounded_cache_waits_for_disposal() {
        let mut config = FrameSourceConfig::new(FrameSize::new(16, 8));
        config.cache_capacity = 4;
        let source = source_for(MockScene::empty(16, 8, 30), config);
        source.get_frame(3).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let (base, next) = source.cached_range();
        assert_eq!(base, 0);
        assert!(next - base <= 4);

        let pending = tokio::time::timeout(Duration::from_millis(50), source.get_frame(10)).await;
        assert!(pending.is_err());

        source.dispose_frames_before(8);
        let frame = tokio::time::timeout(Duration::from_secs(5), source.get_frame(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.frame_index(), Some(10));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn start_frame_skips_earlier_frames() {
        let mut config = FrameSourceConfig::new(FrameSize::new(16, 8));
        config.start_frame = 5;
        let source = source_for(MockScene::empty(16, 8, 10), config);
        assert!(matches!(
            source.get_frame(4).await,
            Err(FrameError::FrameNotFound { index: 4 })
        ));
        assert_eq!(source.get_frame(5).await.unwrap().frame_index(), Some(5));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_request_ends_decoding() {
        let (handle, signal) = stop_channel();
        let mut config = FrameSourceConfig::new(FrameSize::new(16, 8));
        config.cache_capacity = 2;
        let provider = boxed_mock(MockScene::empty(16, 8, 50), Some(2)).unwrap();
        let source = FrameSource::start(provider, config, signal).unwrap();
        source.get_frame(1).await.unwrap();
        handle.request_stop();
        let result = tokio::time::timeout(Duration::from_secs(5), source.get_frame(30))
            .await
            .unwrap();
        assert!(matches!(result, Err(FrameError::FrameNotFound { .. })));
        assert!(source.decoded_end().is_some());
        assert_eq!(source.exhausted_at(), None);
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let mut config = FrameSourceConfig::new(FrameSize::new(16, 8));
        config.cache_capacity = 0;
        assert!(config.validate().is_err());
        let empty = FrameSourceConfig::new(FrameSize::new(0, 8));
        assert!(empty.validate().is_err());
    }
}
