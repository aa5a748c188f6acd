use std::path::Path;
use std::str::FromStr;
use std::time::Instant;

use rally_cut_decoder::{Backend, Configuration, FrameError, StopSignal};
use tracing::{info, warn};

use crate::error::RallyCutError;
use crate::pipeline::{self, PipelineConfig, PipelineSummary};
use crate::settings::EffectiveSettings;

#[derive(Clone)]
pub struct ExecutionPlan {
    pub config: Configuration,
    /// Set when the user picked the backend; disables fallback.
    pub backend_locked: bool,
    pub pipeline: PipelineConfig,
    pub stop: StopSignal,
}

impl ExecutionPlan {
    /// Decoder environment first, then the resolved settings on top.
    pub fn from_settings(
        settings: &EffectiveSettings,
        input: &Path,
        stop: StopSignal,
    ) -> Result<Self, RallyCutError> {
        let env_backend_present = std::env::var("RALLYCUT_BACKEND").is_ok();
        let mut config = Configuration::from_env()?;
        let mut backend_locked = env_backend_present;
        if let Some(name) = settings.decoder.backend.as_deref() {
            config.backend = parse_backend(name)?;
            backend_locked = true;
        }
        if config.channel_capacity.is_none() {
            config.channel_capacity = settings
                .decoder
                .channel_capacity
                .and_then(std::num::NonZeroUsize::new);
        }
        config.input = Some(input.to_path_buf());
        Ok(Self {
            config,
            backend_locked,
            pipeline: PipelineConfig::from_settings(settings, input),
            stop,
        })
    }
}

pub async fn run(plan: ExecutionPlan) -> Result<PipelineSummary, RallyCutError> {
    let ExecutionPlan {
        config,
        backend_locked,
        pipeline,
        stop,
    } = plan;

    let available = Configuration::available_backends();
    check_backend(config.backend, backend_locked, &available)?;
    if config.backend == Backend::Mock {
        warn!("mock backend selected; analysing a synthetic court instead of the input");
    }

    let mut attempt_config = config;
    let mut tried = Vec::new();

    loop {
        if !tried.contains(&attempt_config.backend) {
            tried.push(attempt_config.backend);
        }

        let provider_started = Instant::now();
        let provider = match attempt_config.create_provider() {
            Ok(provider) => {
                info!(
                    backend = attempt_config.backend.as_str(),
                    elapsed = ?provider_started.elapsed(),
                    "initialized decoder backend"
                );
                provider
            }
            Err(err) => {
                if !backend_locked {
                    if let Some(next_backend) = select_next_backend(&available, &tried) {
                        warn!(
                            failed = attempt_config.backend.as_str(),
                            reason = %err,
                            next = next_backend.as_str(),
                            "backend failed to initialize; trying next"
                        );
                        attempt_config.backend = next_backend;
                        continue;
                    }
                }
                return Err(err.into());
            }
        };

        match pipeline::run_pipeline(provider, &pipeline, stop.clone()).await {
            Ok(summary) => return Ok(summary),
            Err((err, analysed)) => {
                if analysed == 0 && !backend_locked && is_decoder_failure(&err) {
                    if let Some(next_backend) = select_next_backend(&available, &tried) {
                        warn!(
                            failed = attempt_config.backend.as_str(),
                            reason = %err,
                            next = next_backend.as_str(),
                            "backend failed to decode; trying next"
                        );
                        attempt_config.backend = next_backend;
                        continue;
                    }
                }
                return Err(err);
            }
        }
    }
}

/// An implicit choice must come from the real decoders; the mock backend is
/// only taken when named explicitly.
fn check_backend(
    backend: Backend,
    locked: bool,
    available: &[Backend],
) -> Result<(), RallyCutError> {
    if locked {
        if Configuration::supports(backend) {
            return Ok(());
        }
        return Err(FrameError::unsupported(backend.as_str()).into());
    }
    if available.is_empty() {
        return Err(FrameError::configuration(
            "no decoding backend available; rebuild with the \"backend-ffmpeg\" feature or pass --backend mock",
        )
        .into());
    }
    if !available.contains(&backend) {
        return Err(FrameError::unsupported(backend.as_str()).into());
    }
    Ok(())
}

/// Failures another backend could plausibly avoid.
fn is_decoder_failure(err: &RallyCutError) -> bool {
    matches!(
        err,
        RallyCutError::Frame(_) | RallyCutError::NoFrames | RallyCutError::UnknownLength
    )
}

pub fn display_available_backends() {
    let names: Vec<&'static str> = Configuration::available_backends()
        .iter()
        .map(Backend::as_str)
        .collect();
    if names.is_empty() {
        println!("available backends: (none compiled)");
    } else {
        println!("available backends: {}", names.join(", "));
    }
}

pub fn parse_backend(value: &str) -> Result<Backend, FrameError> {
    Backend::from_str(value)
}

fn select_next_backend(available: &[Backend], tried: &[Backend]) -> Option<Backend> {
    available
        .iter()
        .copied()
        .find(|backend| !tried.contains(backend))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_backend_skips_tried_ones() {
        let available = [Backend::Ffmpeg, Backend::Mock];
        assert_eq!(
            select_next_backend(&available, &[Backend::Ffmpeg]),
            Some(Backend::Mock)
        );
        assert_eq!(
            select_next_backend(&available, &[Backend::Ffmpeg, Backend::Mock]),
            None
        );
    }

    #[test]
    fn mock_needs_an_explicit_request() {
        assert!(matches!(
            check_backend(Backend::Mock, false, &[]),
            Err(RallyCutError::Frame(FrameError::Configuration { .. }))
        ));
        assert!(check_backend(Backend::Mock, true, &[]).is_ok());
        assert!(check_backend(Backend::Mock, false, &[Backend::Mock]).is_ok());
        assert!(check_backend(Backend::Ffmpeg, false, &[Backend::Mock]).is_err());
    }

    #[test]
    fn only_decoder_failures_trigger_fallback() {
        assert!(is_decoder_failure(&RallyCutError::NoFrames));
        assert!(is_decoder_failure(&RallyCutError::Frame(FrameError::not_found(3))));
        assert!(!is_decoder_failure(&RallyCutError::NoBackground { frame: 1 }));
    }
}
