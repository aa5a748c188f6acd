use std::env;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::str::FromStr;

#[cfg(feature = "backend-ffmpeg")]
use std::sync::OnceLock;

use crate::core::{DynFrameProvider, FrameError, FrameResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Mock,
    Ffmpeg,
}

impl FromStr for Backend {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mock" => Ok(Backend::Mock),
            "ffmpeg" => Ok(Backend::Ffmpeg),
            other => Err(FrameError::configuration(format!(
                "unknown backend '{other}'"
            ))),
        }
    }
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Mock => "mock",
            Backend::Ffmpeg => "ffmpeg",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn compiled_backends() -> Vec<Backend> {
    backends_for(github_ci_active())
}

/// Real decoders, plus the mock under CI. Outside CI the mock is only used
/// when asked for by name.
fn backends_for(ci: bool) -> Vec<Backend> {
    let mut backends = Vec::new();
    if ci {
        backends.push(Backend::Mock);
    }
    #[cfg(feature = "backend-ffmpeg")]
    {
        if ffmpeg_runtime_available() {
            backends.push(Backend::Ffmpeg);
        }
    }
    backends
}

#[cfg(feature = "backend-ffmpeg")]
fn ffmpeg_runtime_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| match ffmpeg_next::init() {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(%err, "ffmpeg backend disabled: failed to initialize libraries");
            false
        }
    })
}

#[derive(Debug, Clone)]
pub struct Configuration {
    pub backend: Backend,
    pub input: Option<PathBuf>,
    pub channel_capacity: Option<NonZeroUsize>,
}

impl Default for Configuration {
    fn default() -> Self {
        let backend = compiled_backends()
            .into_iter()
            .next()
            .unwrap_or(Backend::Mock);
        Self {
            backend,
            input: None,
            channel_capacity: None,
        }
    }
}

impl Configuration {
    pub fn from_env() -> FrameResult<Self> {
        let mut config = Configuration::default();
        if let Ok(backend) = env::var("RALLYCUT_BACKEND") {
            config.backend = Backend::from_str(&backend)?;
        }
        if let Ok(path) = env::var("RALLYCUT_INPUT") {
            config.input = Some(PathBuf::from(path));
        }
        if let Ok(capacity) = env::var("RALLYCUT_CHANNEL_CAPACITY") {
            config.channel_capacity = Some(parse_channel_capacity(&capacity)?);
        }
        Ok(config)
    }

    pub fn available_backends() -> Vec<Backend> {
        compiled_backends()
    }

    /// Whether `backend` can be used when requested explicitly.
    pub fn supports(backend: Backend) -> bool {
        match backend {
            Backend::Mock => true,
            Backend::Ffmpeg => compiled_backends().contains(&Backend::Ffmpeg),
        }
    }

    pub fn create_provider(&self) -> FrameResult<DynFrameProvider> {
        let channel_capacity = self.channel_capacity.map(NonZeroUsize::get);

        match self.backend {
            Backend::Mock => crate::backends::mock::boxed_mock(
                crate::backends::mock::MockScene::default(),
                channel_capacity,
            ),
            Backend::Ffmpeg => {
                #[cfg(feature = "backend-ffmpeg")]
                {
                    let path = self.input.clone().ok_or_else(|| {
                        FrameError::configuration("FFmpeg backend requires RALLYCUT_INPUT")
                    })?;
                    crate::backends::ffmpeg::boxed_ffmpeg(path, channel_capacity)
                }
                #[cfg(not(feature = "backend-ffmpeg"))]
                {
                    Err(FrameError::unsupported("ffmpeg"))
                }
            }
        }
    }
}

fn parse_channel_capacity(raw: &str) -> FrameResult<NonZeroUsize> {
    let parsed: usize = raw.parse().map_err(|_| {
        FrameError::configuration(format!(
            "failed to parse RALLYCUT_CHANNEL_CAPACITY='{raw}' as a positive integer"
        ))
    })?;
    NonZeroUsize::new(parsed).ok_or_else(|| {
        FrameError::configuration("RALLYCUT_CHANNEL_CAPACITY must be greater than zero")
    })
}

fn github_ci_active() -> bool {
    env::var("GITHUB_ACTIONS")
        .map(|value| !value.is_empty() && value != "false")
        .unwrap_or(false)
}
