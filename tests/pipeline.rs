use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rally_cut::ball_log::{BallLog, BallLogState};
use rally_cut::rally_log::read_rally_log;
use rally_cut::{
    ExtractorSettings, PipelineConfig, ProgressCallback, ProgressUpdate, RallyCutError,
    StopSignal, VideoBallsExtractor, run_pipeline, stop_channel,
};
use rally_cut_decoder::backends::mock::boxed_mock;
use rally_cut_decoder::{DynFrameProvider, MockBall, MockScene};
use rally_cut_detector::{BackgroundConfig, DetectionParams};
use rally_cut_rally::{ArcParams, ClusterParams, RallyParams};
use rally_cut_types::{BallPosition, BallTable};

const FRAMES: u64 = 120;

fn scene() -> MockScene {
    let mut scene = MockScene::empty(320, 180, FRAMES);
    scene
        .balls
        .push(MockBall::linear(10, 60, (40.0, 140.0), (4.0, -2.0)));
    scene
}

fn provider(scene: MockScene) -> DynFrameProvider {
    boxed_mock(scene, Some(4)).unwrap()
}

fn extractor_settings() -> ExtractorSettings {
    ExtractorSettings {
        target_height: 180,
        detection: DetectionParams::default(),
        background: BackgroundConfig {
            samples: 4,
            sample_spacing: 10,
            patch_size: 5,
        },
        workers: 2,
        cache_capacity: 100,
        resize_workers: 2,
        backup_interval: 25,
        preview_dir: None,
    }
}

fn pipeline_config(dir: &Path, skip_detection: bool) -> PipelineConfig {
    PipelineConfig {
        extractor: extractor_settings(),
        arcs: ArcParams::default(),
        rally: RallyParams::default(),
        cluster: ClusterParams::default(),
        ball_log: dir.join("match.balls.json"),
        rally_log: dir.join("match.rallies.json"),
        skip_detection,
        show_progress: false,
    }
}

async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(120), future)
        .await
        .expect("pipeline did not finish in time")
}

#[tokio::test(flavor = "multi_thread")]
async fn every_frame_gets_a_result() {
    let dir = tempfile::tempdir().unwrap();
    let log = BallLog::new(dir.path().join("balls.json"));
    let latest = Arc::new(AtomicU64::new(0));
    let seen = Arc::clone(&latest);
    let on_progress: ProgressCallback = Arc::new(move |update: ProgressUpdate| {
        seen.fetch_max(update.processed, Ordering::Relaxed);
    });
    let extractor = VideoBallsExtractor::new(extractor_settings(), StopSignal::never())
        .with_log(log.clone())
        .with_progress(on_progress);

    let outcome = within(extractor.run(provider(scene()), None)).await.unwrap();
    assert!(!outcome.cancelled);
    assert_eq!(latest.load(Ordering::Relaxed), FRAMES);
    assert_eq!(outcome.analysed, FRAMES - 1);
    assert_eq!(outcome.state.total_frames, FRAMES);
    assert_eq!(outcome.state.table.processed_count(), FRAMES as usize);
    assert!(outcome.state.is_complete());
    assert!(outcome.state.table.balls(0).is_empty());
    assert_eq!(outcome.frame_size.height, 180);

    let saved = log.load().unwrap().unwrap();
    assert!(saved.is_complete());
    assert_eq!(saved.last_parsed_frame, Some(FRAMES - 1));
}

#[tokio::test(flavor = "multi_thread")]
async fn resumes_after_the_logged_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let log = BallLog::new(dir.path().join("balls.json"));
    let mut table = BallTable::new(FRAMES as usize);
    for frame in 0..60 {
        table.set(frame, Vec::new());
    }
    log.save(&table, FRAMES).unwrap();
    let resume = log.load().unwrap();
    assert_eq!(resume.as_ref().map(BallLogState::resume_frame), Some(60));

    let extractor = VideoBallsExtractor::new(extractor_settings(), StopSignal::never()).with_log(log.clone());
    let outcome = within(extractor.run(provider(scene()), resume)).await.unwrap();
    assert_eq!(outcome.analysed, FRAMES - 60);
    assert!(outcome.state.is_complete());
    assert!(log.load().unwrap().unwrap().is_complete());
}

#[tokio::test(flavor = "multi_thread")]
async fn short_video_ends_the_table_early() {
    let mut truncated = scene();
    truncated.truncate_at = Some(80);
    let extractor = VideoBallsExtractor::new(extractor_settings(), StopSignal::never());

    let outcome = within(extractor.run(provider(truncated), None)).await.unwrap();
    assert_eq!(outcome.state.total_frames, 80);
    assert_eq!(outcome.state.table.len(), 80);
    assert_eq!(outcome.analysed, 79);
    assert!(outcome.state.is_complete());
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_before_start_flushes_the_log() {
    let dir = tempfile::tempdir().unwrap();
    let log = BallLog::new(dir.path().join("balls.json"));
    let (handle, stop) = stop_channel();
    handle.request_stop();
    let extractor = VideoBallsExtractor::new(extractor_settings(), stop).with_log(log.clone());

    let outcome = within(extractor.run(provider(scene()), None)).await.unwrap();
    assert!(outcome.cancelled);
    assert_eq!(outcome.analysed, 0);
    let saved = log.load().unwrap().unwrap();
    assert_eq!(saved.resume_frame(), 1);
    assert!(!saved.is_complete());
}

#[tokio::test(flavor = "multi_thread")]
async fn interrupted_run_resumes_from_its_log() {
    let dir = tempfile::tempdir().unwrap();
    let config = pipeline_config(dir.path(), false);
    let mut slow = scene();
    slow.frame_interval = Duration::from_millis(15);

    let (handle, stop) = stop_channel();
    let handle = Arc::new(handle);
    let trigger = Arc::clone(&handle);
    let on_progress: ProgressCallback = Arc::new(move |update: ProgressUpdate| {
        if update.processed >= 30 {
            trigger.request_stop();
        }
    });
    let extractor = VideoBallsExtractor::new(config.extractor.clone(), stop)
        .with_log(BallLog::new(&config.ball_log))
        .with_progress(on_progress);
    let outcome = within(extractor.run(provider(slow), None)).await.unwrap();
    assert!(outcome.cancelled);
    assert_eq!(outcome.state.total_frames, FRAMES);
    assert_eq!(outcome.state.table.len(), FRAMES as usize);

    let saved = BallLog::new(&config.ball_log).load().unwrap().unwrap();
    assert_eq!(saved.total_frames, FRAMES);
    let resume_at = saved.resume_frame();
    assert!(resume_at >= 30, "resume frame {resume_at}");
    assert!(resume_at < FRAMES);

    let summary = within(run_pipeline(provider(scene()), &config, StopSignal::never()))
        .await
        .unwrap();
    assert_eq!(summary.analysed, FRAMES - resume_at);
    assert!(summary.balls.is_complete());
    assert!(summary.report.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn full_pipeline_writes_both_logs() {
    let dir = tempfile::tempdir().unwrap();
    let config = pipeline_config(dir.path(), false);

    let summary = within(run_pipeline(provider(scene()), &config, StopSignal::never()))
        .await
        .unwrap();
    assert!(summary.report.is_some());
    assert!(summary.balls.is_complete());
    assert!(BallLog::new(&config.ball_log).load().unwrap().is_some());
    let rallies = read_rally_log(&config.rally_log).unwrap();
    assert_eq!(rallies.len(), summary.report.unwrap().rallies.len());
}

fn two_shot_table(total: usize) -> BallTable {
    let mut table = BallTable::new(total);
    for frame in 0..total {
        let mut balls = Vec::new();
        if (20..=60).contains(&frame) {
            let t = (frame - 20) as f64;
            balls.push(BallPosition::new(300.0 + 12.0 * t, 500.0 - 8.0 * t));
        }
        if (64..=110).contains(&frame) {
            let t = (frame - 64) as f64;
            balls.push(BallPosition::new(790.0 - 10.0 * t, 190.0 + 7.0 * t));
        }
        table.set(frame, balls);
    }
    table
}

#[tokio::test(flavor = "multi_thread")]
async fn skip_detection_rebuilds_rallies_from_the_log() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = pipeline_config(dir.path(), true);
    config.extractor.target_height = 720;
    BallLog::new(&config.ball_log)
        .save(&two_shot_table(200), 200)
        .unwrap();

    // Only the metadata of the default 1280x720 scene is read.
    let summary = within(run_pipeline(
        provider(MockScene::default()),
        &config,
        StopSignal::never(),
    ))
    .await
    .unwrap();
    assert_eq!(summary.analysed, 0);
    let report = summary.report.unwrap();
    assert_eq!(report.rallies.len(), 1);
    assert_eq!((report.rallies[0].start, report.rallies[0].stop), (20, 110));

    let logged = read_rally_log(&config.rally_log).unwrap();
    assert_eq!(logged.len(), 1);
    assert_eq!((logged[0].start, logged[0].stop), (20, 110));
    assert!(logged[0].is_selected);
}

#[tokio::test(flavor = "multi_thread")]
async fn skip_detection_needs_a_complete_log() {
    let dir = tempfile::tempdir().unwrap();
    let config = pipeline_config(dir.path(), true);
    let mut table = BallTable::new(50);
    table.set(0, Vec::new());
    BallLog::new(&config.ball_log).save(&table, 50).unwrap();

    let err = within(run_pipeline(
        provider(scene()),
        &config,
        StopSignal::never(),
    ))
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        (RallyCutError::IncompleteBallLog { processed: 1, total: 50, .. }, 0)
    ));
}
