use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use directories::{BaseDirs, ProjectDirs};
use rally_cut_decoder::source::{DEFAULT_CACHE_CAPACITY, DEFAULT_RESIZE_WORKERS};
use rally_cut_detector::{BackgroundConfig, DetectionParams};
use rally_cut_rally::{ArcParams, ClusterMode, ClusterParams, RallyParams};
use serde::Deserialize;
use thiserror::Error;

use crate::cli::{CliArgs, CliSources};

pub const DEFAULT_BACKUP_INTERVAL: u64 = 500;
const MIN_TARGET_HEIGHT: u32 = 36;
const PROJECT_CONFIG_FILE: &str = "rally-cut.toml";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    decoder: DecoderFileConfig,
    detection: DetectionFileConfig,
    background: Option<BackgroundConfig>,
    arcs: Option<ArcParams>,
    rally: RallyFileConfig,
    output: OutputFileConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DecoderFileConfig {
    backend: Option<String>,
    channel_capacity: Option<usize>,
    cache_capacity: Option<usize>,
    resize_workers: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DetectionFileConfig {
    target_height: Option<u32>,
    min_brightness: Option<u8>,
    min_player_area: Option<f64>,
    workers: Option<usize>,
    preview_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RallyFileConfig {
    #[serde(flatten)]
    params: RallyParams,
    cluster_mode: Option<ClusterMode>,
    clusters: Option<usize>,
    min_rallies: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OutputFileConfig {
    ball_log: Option<String>,
    rally_log: Option<String>,
    backup_interval: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct DecoderSettings {
    pub backend: Option<String>,
    pub channel_capacity: Option<usize>,
    pub cache_capacity: usize,
    pub resize_workers: usize,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub target_height: u32,
    pub params: DetectionParams,
    pub workers: usize,
    pub preview_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct OutputSettings {
    /// `None` means next to the input video.
    pub ball_log: Option<PathBuf>,
    pub rally_log: Option<PathBuf>,
    /// Frames recorded between two ball log backups.
    pub backup_interval: u64,
}

#[derive(Debug, Clone)]
pub struct EffectiveSettings {
    pub decoder: DecoderSettings,
    pub detection: DetectionSettings,
    pub background: BackgroundConfig,
    pub arcs: ArcParams,
    pub rally: RallyParams,
    pub cluster: ClusterParams,
    pub output: OutputSettings,
    pub skip_detection: bool,
    pub config_dir: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid value '{value}' for '{field}'{}", path.as_ref().map(|p| format!(" in {}", p.display())).unwrap_or_default())]
    InvalidValue {
        path: Option<PathBuf>,
        field: &'static str,
        value: String,
    },

    #[error("config file {} does not exist", path.display())]
    NotFound { path: PathBuf },
}

pub fn resolve_settings(
    cli: &CliArgs,
    sources: &CliSources,
) -> Result<EffectiveSettings, ConfigError> {
    let (file, config_path) = load_config(cli.config.as_deref())?;
    merge(cli, sources, file, config_path)
}

fn load_config(path_override: Option<&Path>) -> Result<(FileConfig, Option<PathBuf>), ConfigError> {
    if let Some(path) = path_override {
        let path = path.to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound { path });
        }
        return read_config(path);
    }

    if let Some(project_path) = project_config_path() {
        if project_path.exists() {
            return read_config(project_path);
        }
    }

    match default_config_path() {
        Some(default_path) if default_path.exists() => read_config(default_path),
        _ => Ok((FileConfig::default(), None)),
    }
}

fn read_config(path: PathBuf) -> Result<(FileConfig, Option<PathBuf>), ConfigError> {
    let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.clone(),
        source,
    })?;
    Ok((config, Some(path)))
}

fn merge(
    cli: &CliArgs,
    sources: &CliSources,
    file: FileConfig,
    config_path: Option<PathBuf>,
) -> Result<EffectiveSettings, ConfigError> {
    let config_dir = config_path
        .as_ref()
        .and_then(|path| path.parent().map(|dir| dir.to_path_buf()));
    let invalid = |field: &'static str, value: String| ConfigError::InvalidValue {
        path: config_path.clone(),
        field,
        value,
    };

    let FileConfig {
        decoder: file_decoder,
        detection: file_detection,
        background: file_background,
        arcs: file_arcs,
        rally: file_rally,
        output: file_output,
    } = file;

    let mut backend = normalize_string(cli.backend.clone());
    if backend.is_none() {
        backend = normalize_string(file_decoder.backend);
    }

    let channel_capacity = file_decoder.channel_capacity;
    if channel_capacity == Some(0) {
        return Err(invalid("decoder.channel_capacity", "0".to_string()));
    }
    let cache_capacity = file_decoder.cache_capacity.unwrap_or(DEFAULT_CACHE_CAPACITY);
    if cache_capacity == 0 {
        return Err(invalid("decoder.cache_capacity", "0".to_string()));
    }
    let resize_workers = file_decoder.resize_workers.unwrap_or(DEFAULT_RESIZE_WORKERS);
    if resize_workers == 0 {
        return Err(invalid("decoder.resize_workers", "0".to_string()));
    }

    let mut target_height = cli.target_height;
    if !sources.target_height_from_cli {
        if let Some(value) = file_detection.target_height {
            if value < MIN_TARGET_HEIGHT {
                return Err(invalid("detection.target_height", value.to_string()));
            }
            target_height = value;
        }
    }

    let mut workers = cli.workers;
    if !sources.workers_from_cli {
        if let Some(value) = file_detection.workers {
            workers = value;
        }
    }
    if workers == 0 {
        return Err(invalid("detection.workers", "0".to_string()));
    }

    let mut params = DetectionParams::default();
    if let Some(value) = file_detection.min_brightness {
        params.min_brightness = value;
    }
    if let Some(value) = file_detection.min_player_area {
        if !(value.is_finite() && value > 0.0) {
            return Err(invalid("detection.min_player_area", value.to_string()));
        }
        params.min_player_area = value;
    }

    let preview_dir = match cli.preview_dir.clone() {
        Some(dir) => Some(expand_pathbuf(dir)),
        None => normalize_string(file_detection.preview_dir)
            .and_then(|dir| resolve_path_from_config(dir, config_dir.as_deref())),
    };

    let background = file_background.unwrap_or_default();
    if background.patch_size % 2 == 0 {
        return Err(invalid(
            "background.patch_size",
            background.patch_size.to_string(),
        ));
    }

    let mut cluster = ClusterParams::default();
    if let Some(mode) = file_rally.cluster_mode {
        cluster.mode = mode;
    }
    if let Some(clusters) = file_rally.clusters {
        cluster.clusters = clusters;
    }
    if let Some(min_rallies) = file_rally.min_rallies {
        cluster.min_rallies = min_rallies;
    }
    if cluster.validate().is_err() {
        return Err(invalid("rally.clusters", cluster.clusters.to_string()));
    }

    let ball_log = match cli.ball_log.clone() {
        Some(path) => Some(expand_pathbuf(path)),
        None => normalize_string(file_output.ball_log)
            .and_then(|path| resolve_path_from_config(path, config_dir.as_deref())),
    };
    let rally_log = match cli.rally_log.clone() {
        Some(path) => Some(expand_pathbuf(path)),
        None => normalize_string(file_output.rally_log)
            .and_then(|path| resolve_path_from_config(path, config_dir.as_deref())),
    };
    let backup_interval = file_output.backup_interval.unwrap_or(DEFAULT_BACKUP_INTERVAL);
    if backup_interval == 0 {
        return Err(invalid("output.backup_interval", "0".to_string()));
    }

    Ok(EffectiveSettings {
        decoder: DecoderSettings {
            backend,
            channel_capacity,
            cache_capacity,
            resize_workers,
        },
        detection: DetectionSettings {
            target_height,
            params,
            workers,
            preview_dir,
        },
        background,
        arcs: file_arcs.unwrap_or_default(),
        rally: file_rally.params,
        cluster,
        output: OutputSettings {
            ball_log,
            rally_log,
            backup_interval,
        },
        skip_detection: cli.skip_detection,
        config_dir,
    })
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("rs", "rally-cut", "rally-cut")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

fn project_config_path() -> Option<PathBuf> {
    env::current_dir().ok().map(|dir| dir.join(PROJECT_CONFIG_FILE))
}

fn normalize_string(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn expand_pathbuf(path: PathBuf) -> PathBuf {
    match path.to_str() {
        Some(s) => expand_home_path(s),
        None => path,
    }
}

fn resolve_path_from_config(value: String, base: Option<&Path>) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let expanded = expand_home_path(trimmed);
    match base {
        Some(base) if !expanded.is_absolute() => Some(base.join(expanded)),
        _ => Some(expanded),
    }
}

fn expand_home_path(value: &str) -> PathBuf {
    if value == "~" {
        if let Some(base) = BaseDirs::new() {
            return base.home_dir().to_path_buf();
        }
    } else if let Some(stripped) = value.strip_prefix("~/") {
        if let Some(base) = BaseDirs::new() {
            return base.home_dir().join(stripped);
        }
    }
    PathBuf::from(value)
}
