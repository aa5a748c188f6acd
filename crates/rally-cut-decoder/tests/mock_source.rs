use std::time::Duration;

use rally_cut_decoder::{
    Backend, Configuration, FrameError, FrameSize, FrameSource, FrameSourceConfig, StopSignal,
};

#[tokio::test(flavor = "multi_thread")]
async fn mock_backend_feeds_frame_source() {
    let config = Configuration {
        backend: Backend::Mock,
        ..Configuration::default()
    };
    let provider = config.create_provider().expect("mock backend available");
    let metadata = provider.metadata();
    let native = metadata.frame_size().expect("mock reports its size");
    let target = native.with_target_height(360);
    assert_eq!(target, FrameSize::new(640, 360));

    let source =
        FrameSource::start(provider, FrameSourceConfig::new(target), StopSignal::never()).unwrap();
    let total = source.total_frames().unwrap();

    for index in 0..total {
        let frame = source.get_frame(index).await.unwrap();
        assert_eq!(frame.size(), target);
        if index > 0 {
            source.dispose_frames_before(index - 1);
        }
    }
    let past_end = tokio::time::timeout(Duration::from_secs(5), source.get_frame(total))
        .await
        .unwrap();
    assert!(matches!(past_end, Err(FrameError::FrameNotFound { .. })));
}

#[tokio::test(flavor = "multi_thread")]
async fn consumers_may_read_out_of_order_inside_the_window() {
    let provider = Configuration {
        backend: Backend::Mock,
        ..Configuration::default()
    }
    .create_provider()
    .unwrap();
    let source = FrameSource::start(
        provider,
        FrameSourceConfig::new(FrameSize::new(320, 180)),
        StopSignal::never(),
    )
    .unwrap();

    let ahead = source.clone();
    let late = tokio::spawn(async move { ahead.get_frame(40).await.map(|f| f.frame_index()) });
    let early = source.get_frame(10).await.unwrap();
    assert_eq!(early.frame_index(), Some(10));
    assert_eq!(late.await.unwrap().unwrap(), Some(40));
    let again = source.get_frame(10).await.unwrap();
    assert_eq!(again.data(), early.data());
}
