pub mod backends;
pub mod config;
pub mod core;
pub mod resize;
pub mod source;
pub mod stop;

pub use backends::mock::{MockBall, MockPlayer, MockScene};
pub use config::{Backend, Configuration};
pub use core::{
    DynFrameProvider, FrameError, FrameResult, FrameSize, FrameStream, FrameStreamProvider,
    RgbFrame, VideoMetadata,
};
pub use source::{FrameSource, FrameSourceConfig};
pub use stop::{StopHandle, StopSignal, stop_channel};
