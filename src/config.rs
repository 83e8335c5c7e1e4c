use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::app::FarmerProfile;
use crate::behavior::{
    MotionThresholds, DEFAULT_LOW_ACTIVITY_BELOW, DEFAULT_RESTLESS_ABOVE, DEFAULT_SAMPLE_EVERY,
};
use crate::detect::{ANIMAL_LABELS, COCO_LABELS};
use crate::identity::HEALTHY_CONFIDENCE;
use crate::ingest::CameraConfig;
use crate::records::{AttendancePolicy, StorageBackend};

const DEFAULT_RECORDS_PATH: &str = "animal_records.csv";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_DETECTOR_BACKEND: &str = "stub";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE_FLOOR: f32 = 0.25;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";
const DEFAULT_CAMERA_FPS: u32 = 5;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;

/// Environment variables read by `HerdConfig::load`.
pub const ENV_KEYS: [&str; 9] = [
    "HERD_CONFIG",
    "HERD_RECORDS_PATH",
    "HERD_STORAGE_BACKEND",
    "HERD_API_ADDR",
    "HERD_CAMERA_DEVICE",
    "HERD_MODEL_PATH",
    "HERD_DETECTOR_BACKEND",
    "HERD_SAMPLE_EVERY",
    "HERD_FARM_LOCATION",
];

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct HerdConfigFile {
    records_path: Option<PathBuf>,
    storage: Option<StorageConfigFile>,
    api: Option<ApiConfigFile>,
    detector: Option<DetectorConfigFile>,
    analysis: Option<AnalysisConfigFile>,
    camera: Option<CameraConfigFile>,
    profile: Option<ProfileConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    backend: Option<StorageBackend>,
    attendance: Option<AttendancePolicy>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    confidence_floor: Option<f32>,
    iou_threshold: Option<f32>,
    species: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct AnalysisConfigFile {
    sample_every: Option<u32>,
    low_activity_below: Option<f64>,
    restless_above: Option<f64>,
    healthy_confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    enabled: Option<bool>,
    device: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ProfileConfigFile {
    name: Option<String>,
    farm: Option<String>,
    location: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HerdConfig {
    pub records_path: PathBuf,
    pub storage_backend: StorageBackend,
    pub attendance: AttendancePolicy,
    pub api_addr: String,
    pub detector: DetectorSettings,
    pub analysis: AnalysisConfig,
    pub camera: CameraSettings,
    pub profile: FarmerProfile,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// Registry name of the default backend ("stub" or "tract").
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
    pub confidence_floor: f32,
    pub iou_threshold: f32,
    /// Labels that are recorded; empty records every label.
    pub species: Vec<String>,
}

impl DetectorSettings {
    pub fn records_label(&self, label: &str) -> bool {
        self.species.is_empty() || self.species.iter().any(|s| s == label)
    }
}

/// Thresholds shared by image, video and camera analysis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisConfig {
    pub sample_every: u32,
    pub low_activity_below: f64,
    pub restless_above: f64,
    pub healthy_confidence: f32,
}

impl AnalysisConfig {
    pub fn thresholds(&self) -> MotionThresholds {
        MotionThresholds {
            low_activity_below: self.low_activity_below,
            restless_above: self.restless_above,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sample_every: DEFAULT_SAMPLE_EVERY,
            low_activity_below: DEFAULT_LOW_ACTIVITY_BELOW,
            restless_above: DEFAULT_RESTLESS_ABOVE,
            healthy_confidence: HEALTHY_CONFIDENCE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub enabled: bool,
    pub device: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl CameraSettings {
    pub fn source_config(&self) -> CameraConfig {
        CameraConfig {
            device: self.device.clone(),
            target_fps: self.target_fps,
            width: self.width,
            height: self.height,
        }
    }
}

impl Default for HerdConfig {
    fn default() -> Self {
        Self::from_file(HerdConfigFile::default())
    }
}

impl HerdConfig {
    /// Load from the file named by `HERD_CONFIG` (if any), then environment.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("HERD_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty());
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file, then apply environment overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => HerdConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: HerdConfigFile) -> Self {
        let storage = file.storage.unwrap_or_default();
        let api = file.api.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let analysis = file.analysis.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let profile = file.profile.unwrap_or_default();
        let unset = FarmerProfile::default();

        Self {
            records_path: file
                .records_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RECORDS_PATH)),
            storage_backend: storage.backend.unwrap_or_default(),
            attendance: storage.attendance.unwrap_or_default(),
            api_addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            detector: DetectorSettings {
                backend: detector
                    .backend
                    .unwrap_or_else(|| DEFAULT_DETECTOR_BACKEND.to_string()),
                model_path: detector.model_path,
                input_size: detector.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                confidence_floor: detector
                    .confidence_floor
                    .unwrap_or(DEFAULT_CONFIDENCE_FLOOR),
                iou_threshold: detector.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
                species: detector.species.unwrap_or_else(|| {
                    ANIMAL_LABELS.iter().map(|label| label.to_string()).collect()
                }),
            },
            analysis: AnalysisConfig {
                sample_every: analysis.sample_every.unwrap_or(DEFAULT_SAMPLE_EVERY),
                low_activity_below: analysis
                    .low_activity_below
                    .unwrap_or(DEFAULT_LOW_ACTIVITY_BELOW),
                restless_above: analysis.restless_above.unwrap_or(DEFAULT_RESTLESS_ABOVE),
                healthy_confidence: analysis.healthy_confidence.unwrap_or(HEALTHY_CONFIDENCE),
            },
            camera: CameraSettings {
                enabled: camera.enabled.unwrap_or(false),
                device: camera
                    .device
                    .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
            },
            profile: FarmerProfile {
                name: profile.name.unwrap_or(unset.name),
                farm: profile.farm.unwrap_or(unset.farm),
                location: profile.location.unwrap_or(unset.location),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env_value("HERD_RECORDS_PATH") {
            self.records_path = PathBuf::from(path);
        }
        if let Some(backend) = env_value("HERD_STORAGE_BACKEND") {
            self.storage_backend = backend
                .parse()
                .map_err(|_| anyhow!("HERD_STORAGE_BACKEND must be 'csv' or 'sqlite'"))?;
        }
        if let Some(addr) = env_value("HERD_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(device) = env_value("HERD_CAMERA_DEVICE") {
            self.camera.device = device;
        }
        if let Some(path) = env_value("HERD_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(backend) = env_value("HERD_DETECTOR_BACKEND") {
            self.detector.backend = backend;
        }
        if let Some(every) = env_value("HERD_SAMPLE_EVERY") {
            self.analysis.sample_every = every
                .parse()
                .map_err(|_| anyhow!("HERD_SAMPLE_EVERY must be a positive integer"))?;
        }
        if let Some(location) = env_value("HERD_FARM_LOCATION") {
            self.profile.location = location;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.detector.backend = self.detector.backend.trim().to_ascii_lowercase();
        self.detector.species = self
            .detector
            .species
            .iter()
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        if let Some(unknown) = self
            .detector
            .species
            .iter()
            .find(|s| !COCO_LABELS.contains(&s.as_str()))
        {
            return Err(anyhow!("detector.species: '{}' is not a detector label", unknown));
        }
        if self.detector.input_size == 0 || self.detector.input_size % 32 != 0 {
            return Err(anyhow!(
                "detector.input_size must be a positive multiple of 32 (got {})",
                self.detector.input_size
            ));
        }
        check_unit("detector.confidence_floor", self.detector.confidence_floor)?;
        check_unit("detector.iou_threshold", self.detector.iou_threshold)?;
        check_unit("analysis.healthy_confidence", self.analysis.healthy_confidence)?;

        if self.analysis.sample_every == 0 {
            return Err(anyhow!("analysis.sample_every must be at least 1"));
        }
        let low = self.analysis.low_activity_below;
        let high = self.analysis.restless_above;
        if !(low.is_finite() && high.is_finite()) || low < 0.0 || low > high {
            return Err(anyhow!(
                "analysis thresholds must satisfy 0 <= low_activity_below <= restless_above (got {} / {})",
                low,
                high
            ));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera resolution must be non-zero"));
        }
        if self.api_addr.trim().is_empty() {
            return Err(anyhow!("api.addr must not be empty"));
        }
        if self.records_path.as_os_str().is_empty() {
            return Err(anyhow!("records_path must not be empty"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<HerdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn check_unit(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must be within [0, 1] (got {})", name, value));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validated(file: HerdConfigFile) -> Result<HerdConfig> {
        let mut cfg = HerdConfig::from_file(file);
        cfg.validate()?;
        Ok(cfg)
    }

    #[test]
    fn defaults_are_canonical() -> Result<()> {
        let cfg = validated(HerdConfigFile::default())?;
        assert_eq!(cfg.records_path, PathBuf::from("animal_records.csv"));
        assert_eq!(cfg.storage_backend, StorageBackend::Csv);
        assert_eq!(cfg.attendance, AttendancePolicy::FirstSightingOnly);
        assert_eq!(cfg.api_addr, "127.0.0.1:8080");
        assert_eq!(cfg.detector.backend, "stub");
        assert_eq!(cfg.analysis, AnalysisConfig::default());
        assert_eq!(cfg.analysis.sample_every, 10);
        assert!(cfg.detector.records_label("cow"));
        assert!(!cfg.detector.records_label("person"));
        assert_eq!(cfg.profile.location, "Not Set");
        Ok(())
    }

    #[test]
    fn empty_species_list_records_everything() -> Result<()> {
        let cfg = validated(HerdConfigFile {
            detector: Some(DetectorConfigFile {
                species: Some(Vec::new()),
                ..Default::default()
            }),
            ..Default::default()
        })?;
        assert!(cfg.detector.records_label("person"));
        Ok(())
    }

    #[test]
    fn species_are_normalized_and_checked() {
        let cfg = validated(HerdConfigFile {
            detector: Some(DetectorConfigFile {
                species: Some(vec![" Cow ".to_string(), "SHEEP".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(cfg.detector.species, vec!["cow", "sheep"]);

        let err = validated(HerdConfigFile {
            detector: Some(DetectorConfigFile {
                species: Some(vec!["goat".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert!(err.is_err());
    }

    #[test]
    fn rejects_inverted_thresholds_and_zero_sampling() {
        let inverted = HerdConfigFile {
            analysis: Some(AnalysisConfigFile {
                low_activity_below: Some(50.0),
                restless_above: Some(40.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(validated(inverted).is_err());

        let zero = HerdConfigFile {
            analysis: Some(AnalysisConfigFile {
                sample_every: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(validated(zero).is_err());

        let confidence = HerdConfigFile {
            analysis: Some(AnalysisConfigFile {
                healthy_confidence: Some(1.5),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(validated(confidence).is_err());
    }

    #[test]
    fn toml_and_json_files_parse() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let toml_path = dir.path().join("herd.toml");
        std::fs::write(
            &toml_path,
            "records_path = \"pen.csv\"\n[storage]\nbackend = \"sqlite\"\nattendance = \"count_every_sighting\"\n[analysis]\nsample_every = 5\n",
        )?;
        let cfg = HerdConfig::from_file(read_config_file(&toml_path)?);
        assert_eq!(cfg.records_path, PathBuf::from("pen.csv"));
        assert_eq!(cfg.storage_backend, StorageBackend::Sqlite);
        assert_eq!(cfg.attendance, AttendancePolicy::CountEverySighting);
        assert_eq!(cfg.analysis.sample_every, 5);

        let json_path = dir.path().join("herd.json");
        std::fs::write(&json_path, r#"{"camera": {"enabled": true, "device": "stub://pen"}}"#)?;
        let cfg = HerdConfig::from_file(read_config_file(&json_path)?);
        assert!(cfg.camera.enabled);
        assert_eq!(cfg.camera.source_config().device, "stub://pen");

        std::fs::write(&json_path, r#"{"unknown_section": {}}"#)?;
        assert!(read_config_file(&json_path).is_err());
        Ok(())
    }
}
