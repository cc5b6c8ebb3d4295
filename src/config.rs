use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::camera::{DeviceSettings, RetryPolicy};
use crate::inference::{Category, ModelSpec, DEFAULT_SCORE_THRESHOLD};

const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_CAMERA_RETRIES: u32 = 3;
const DEFAULT_CAMERA_RETRY_DELAY_MS: u64 = 3000;
const DEFAULT_JPEG_QUALITY: u8 = 95;
const DEFAULT_TIME_LAPSE_FOLDER: &str = "./media/time_lapse";
const DEFAULT_SNAPSHOT_DIR: &str = "./snapshots";
const DEFAULT_DB_PATH: &str = "canopy.db";
const DEFAULT_API_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_MODEL_PATH: &str = "data_model/mobilenet_v2_1.0_224_inat_plant.onnx";
const DEFAULT_LABEL_PATH: &str = "data_model/inat_plant_labels.txt";
const DEFAULT_MODEL_INPUT: u32 = 224;

#[derive(Debug, Deserialize, Default)]
struct DashboardConfigFile {
    db_path: Option<String>,
    api: Option<ApiConfigFile>,
    camera: Option<CameraConfigFile>,
    media: Option<MediaConfigFile>,
    models: Option<Vec<ModelConfigFile>>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    retries: Option<u32>,
    retry_delay_ms: Option<u64>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct MediaConfigFile {
    time_lapse_folder: Option<PathBuf>,
    snapshot_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct ModelConfigFile {
    category: String,
    model_path: PathBuf,
    label_path: PathBuf,
    input_size: Option<u32>,
    threshold: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub db_path: String,
    pub api_addr: String,
    pub camera: CameraSettings,
    pub time_lapse_folder: PathBuf,
    pub snapshot_dir: PathBuf,
    pub models: Vec<ModelSpec>,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub retries: u32,
    pub retry_delay: Duration,
    pub jpeg_quality: u8,
}

impl CameraSettings {
    pub fn device_settings(&self) -> DeviceSettings {
        DeviceSettings {
            device: self.device.clone(),
            width: self.width,
            height: self.height,
            fps: self.fps,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retries,
            delay: self.retry_delay,
        }
    }
}

impl DashboardConfig {
    /// Defaults, then the file named by `CANOPY_CONFIG`, then environment
    /// overrides. Invalid values are an error.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CANOPY_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DashboardConfigFile) -> Result<Self> {
        let camera_file = file.camera.unwrap_or_default();
        let camera = CameraSettings {
            device: camera_file
                .device
                .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
            width: camera_file.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: camera_file.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
            fps: camera_file.fps.unwrap_or(DEFAULT_CAMERA_FPS),
            retries: camera_file.retries.unwrap_or(DEFAULT_CAMERA_RETRIES),
            retry_delay: Duration::from_millis(
                camera_file
                    .retry_delay_ms
                    .unwrap_or(DEFAULT_CAMERA_RETRY_DELAY_MS),
            ),
            jpeg_quality: camera_file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
        };
        let media = file.media.unwrap_or_default();
        let models = match file.models {
            Some(models) => models
                .into_iter()
                .map(|m| {
                    Ok(ModelSpec {
                        category: m.category.parse()?,
                        model_path: m.model_path,
                        label_path: m.label_path,
                        input_size: m.input_size.unwrap_or(DEFAULT_MODEL_INPUT),
                        threshold: m.threshold.unwrap_or(DEFAULT_SCORE_THRESHOLD),
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            None => vec![default_plant_model()],
        };
        Ok(Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            api_addr: file
                .api
                .and_then(|api| api.addr)
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            camera,
            time_lapse_folder: media
                .time_lapse_folder
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TIME_LAPSE_FOLDER)),
            snapshot_dir: media
                .snapshot_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_DIR)),
            models,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(device) = env_string("CAMERA_DEVICE") {
            self.camera.device = device;
        }
        if let Some(width) = env_parse("CAMERA_WIDTH")? {
            self.camera.width = width;
        }
        if let Some(height) = env_parse("CAMERA_HEIGHT")? {
            self.camera.height = height;
        }
        if let Some(fps) = env_parse("CAMERA_FPS")? {
            self.camera.fps = fps;
        }
        if let Some(retries) = env_parse("CAMERA_RETRIES")? {
            self.camera.retries = retries;
        }
        if let Some(delay_ms) = env_parse::<u64>("CAMERA_RETRY_DELAY_MS")? {
            self.camera.retry_delay = Duration::from_millis(delay_ms);
        }
        if let Some(quality) = env_parse::<i64>("JPEG_QUALITY")? {
            self.camera.jpeg_quality = u8::try_from(quality)
                .map_err(|_| anyhow!("JPEG_QUALITY must be between 0 and 100"))?;
        }
        if let Some(folder) = env_string("TIME_LAPSE_FOLDER") {
            self.time_lapse_folder = PathBuf::from(folder);
        }
        if let Some(dir) = env_string("SNAPSHOT_DIR") {
            self.snapshot_dir = PathBuf::from(dir);
        }
        if let Some(db_path) = env_string("CANOPY_DB_PATH") {
            self.db_path = db_path;
        }
        if let Some(addr) = env_string("CANOPY_API_ADDR") {
            self.api_addr = addr;
        }

        let model_path = env_string("CANOPY_MODEL_PATH");
        let label_path = env_string("CANOPY_LABEL_PATH");
        let input_size = env_parse::<u32>("CANOPY_MODEL_INPUT")?;
        let threshold = env_parse::<f32>("CANOPY_SCORE_THRESHOLD")?;
        if model_path.is_some() || label_path.is_some() || input_size.is_some() || threshold.is_some()
        {
            let idx = match self.models.iter().position(|m| m.category == Category::Plant) {
                Some(idx) => idx,
                None => {
                    self.models.push(default_plant_model());
                    self.models.len() - 1
                }
            };
            let plant = &mut self.models[idx];
            if let Some(path) = model_path {
                plant.model_path = PathBuf::from(path);
            }
            if let Some(path) = label_path {
                plant.label_path = PathBuf::from(path);
            }
            if let Some(size) = input_size {
                plant.input_size = size;
            }
            if let Some(threshold) = threshold {
                plant.threshold = threshold;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let camera = &self.camera;
        if camera.device.trim().is_empty() {
            return Err(anyhow!("camera device must not be empty"));
        }
        if camera.width == 0 || camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if camera.fps == 0 {
            return Err(anyhow!("camera fps must be greater than zero"));
        }
        if camera.retries == 0 {
            return Err(anyhow!("camera retries must be at least 1"));
        }
        if camera.jpeg_quality > 100 {
            return Err(anyhow!("jpeg quality must be between 0 and 100"));
        }
        self.api_addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow!("invalid api address '{}': {}", self.api_addr, e))?;
        for model in &self.models {
            if model.input_size == 0 {
                return Err(anyhow!("{} model input size must be greater than zero", model.category));
            }
            if !(0.0..=1.0).contains(&model.threshold) {
                return Err(anyhow!(
                    "{} model threshold must be between 0 and 1",
                    model.category
                ));
            }
        }
        let mut categories: Vec<Category> = self.models.iter().map(|m| m.category).collect();
        categories.sort();
        categories.dedup();
        if categories.len() != self.models.len() {
            return Err(anyhow!("each model category may be configured once"));
        }
        Ok(())
    }

    /// Cargo features this configuration needs but the build lacks. Without
    /// them the camera or models stay unavailable at runtime.
    pub fn missing_features(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !cfg!(feature = "camera-v4l2") && !self.camera.device.starts_with("stub://") {
            missing.push("camera-v4l2");
        }
        if !cfg!(feature = "backend-tract") && !self.models.is_empty() {
            missing.push("backend-tract");
        }
        missing
    }
}

fn default_plant_model() -> ModelSpec {
    ModelSpec {
        category: Category::Plant,
        model_path: PathBuf::from(DEFAULT_MODEL_PATH),
        label_path: PathBuf::from(DEFAULT_LABEL_PATH),
        input_size: DEFAULT_MODEL_INPUT,
        threshold: DEFAULT_SCORE_THRESHOLD,
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} has an invalid value '{}'", key, raw)),
        None => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<DashboardConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
