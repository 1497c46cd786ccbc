use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::detection::BoxOrder;
use crate::detection::model::ModelOptions;
use crate::detection::postprocess::DecodeParams;
use crate::error::ConfigError;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_DB_PATH: &str = "bookshelf.db";
const DEFAULT_UPLOADS_DIR: &str = "uploads";
const DEFAULT_FRONTEND_DIR: &str = "frontend/build";
const DEFAULT_MODEL_PATH: &str = "models/yolov8n.rten";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_IOU: f32 = 0.45;
const DEFAULT_MAX_DETECTIONS: usize = 300;
const DEFAULT_TARGET_CLASS: &str = "book";
const DEFAULT_JPEG_QUALITY: u8 = 90;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Environment variable naming a TOML config file.
pub const CONFIG_ENV: &str = "SHELFSCAN_CONFIG";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    bind_addr: Option<String>,
    db_path: Option<PathBuf>,
    uploads_dir: Option<PathBuf>,
    frontend_dir: Option<PathBuf>,
    model: Option<ModelFile>,
    render: Option<RenderFile>,
    inference: Option<InferenceFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModelFile {
    path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    input_size: Option<u32>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    max_detections: Option<usize>,
    target_class: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RenderFile {
    font_path: Option<PathBuf>,
    jpeg_quality: Option<u8>,
    box_order: Option<BoxOrder>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct InferenceFile {
    workers: Option<usize>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub path: PathBuf,
    pub labels_path: Option<PathBuf>,
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
    pub target_class: String,
}

impl ModelSettings {
    pub fn options(&self) -> ModelOptions {
        ModelOptions {
            input_size: self.input_size,
            labels_path: self.labels_path.clone(),
            decode: DecodeParams {
                confidence_threshold: self.confidence_threshold,
                iou_threshold: self.iou_threshold,
                max_detections: self.max_detections,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub font_path: Option<PathBuf>,
    pub jpeg_quality: u8,
    pub box_order: BoxOrder,
}

#[derive(Debug, Clone)]
pub struct InferenceSettings {
    /// Maximum number of detections running at once.
    pub workers: usize,
    pub timeout: Duration,
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub db_path: PathBuf,
    pub uploads_dir: PathBuf,
    pub frontend_dir: PathBuf,
    pub model: ModelSettings,
    pub render: RenderSettings,
    pub inference: InferenceSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_file(SettingsFile::default())
    }
}

impl Settings {
    /// Defaults, then the TOML file (`path`, or `$SHELFSCAN_CONFIG`), then
    /// `SHELFSCAN_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let file = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => read_config_file(&path)?,
            None => SettingsFile::default(),
        };
        let mut settings = Self::from_file(file);
        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from TOML text on top of the defaults.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let file: SettingsFile = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        let settings = Self::from_file(file);
        settings.validate()?;
        Ok(settings)
    }

    fn from_file(file: SettingsFile) -> Self {
        let model = file.model.unwrap_or_default();
        let render = file.render.unwrap_or_default();
        let inference = file.inference.unwrap_or_default();
        let default_workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            bind_addr: file.bind_addr.unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            db_path: file.db_path.unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            uploads_dir: file.uploads_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOADS_DIR)),
            frontend_dir: file.frontend_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_FRONTEND_DIR)),
            model: ModelSettings {
                path: model.path.unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
                labels_path: model.labels_path,
                input_size: model.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                confidence_threshold: model.confidence_threshold.unwrap_or(DEFAULT_CONFIDENCE),
                iou_threshold: model.iou_threshold.unwrap_or(DEFAULT_IOU),
                max_detections: model.max_detections.unwrap_or(DEFAULT_MAX_DETECTIONS),
                target_class: model
                    .target_class
                    .unwrap_or_else(|| DEFAULT_TARGET_CLASS.to_string()),
            },
            render: RenderSettings {
                font_path: render.font_path,
                jpeg_quality: render.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
                box_order: render.box_order.unwrap_or_default(),
            },
            inference: InferenceSettings {
                workers: inference.workers.unwrap_or(default_workers),
                timeout: Duration::from_secs(inference.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            },
        }
    }

    fn apply_env<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = var("SHELFSCAN_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = var("SHELFSCAN_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = var("SHELFSCAN_UPLOADS_DIR") {
            self.uploads_dir = PathBuf::from(v);
        }
        if let Some(v) = var("SHELFSCAN_FRONTEND_DIR") {
            self.frontend_dir = PathBuf::from(v);
        }
        if let Some(v) = var("SHELFSCAN_MODEL_PATH") {
            self.model.path = PathBuf::from(v);
        }
        if let Some(v) = var("SHELFSCAN_LABELS_PATH") {
            self.model.labels_path = Some(PathBuf::from(v));
        }
        if let Some(v) = var("SHELFSCAN_CONFIDENCE") {
            self.model.confidence_threshold = parse_env("SHELFSCAN_CONFIDENCE", &v)?;
        }
        if let Some(v) = var("SHELFSCAN_FONT_PATH") {
            self.render.font_path = Some(PathBuf::from(v));
        }
        if let Some(v) = var("SHELFSCAN_WORKERS") {
            self.inference.workers = parse_env("SHELFSCAN_WORKERS", &v)?;
        }
        if let Some(v) = var("SHELFSCAN_TIMEOUT_SECS") {
            self.inference.timeout = Duration::from_secs(parse_env("SHELFSCAN_TIMEOUT_SECS", &v)?);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.model.confidence_threshold) {
            return Err(invalid("model.confidence_threshold", "must be within 0..=1"));
        }
        if !unit.contains(&self.model.iou_threshold) {
            return Err(invalid("model.iou_threshold", "must be within 0..=1"));
        }
        if self.model.input_size == 0 || self.model.input_size % 32 != 0 {
            return Err(invalid("model.input_size", "must be a positive multiple of 32"));
        }
        if self.model.max_detections == 0 {
            return Err(invalid("model.max_detections", "must be positive"));
        }
        if self.model.target_class.trim().is_empty() {
            return Err(invalid("model.target_class", "must not be empty"));
        }
        if !(1..=100).contains(&self.render.jpeg_quality) {
            return Err(invalid("render.jpeg_quality", "must be within 1..=100"));
        }
        if self.inference.workers == 0 {
            return Err(invalid("inference.workers", "must be positive"));
        }
        if self.inference.timeout.is_zero() {
            return Err(invalid("inference.timeout_secs", "must be positive"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<SettingsFile, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        message: format!("{value:?}: {e}"),
    })
}

fn invalid(key: &'static str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        message: message.to_string(),
    }
}
