//! Application state shared by the HTTP server, the camera loop and the CLI.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::behavior::BehaviorReport;
use crate::config::HerdConfig;
use crate::detect::{registry_from_settings, BackendRegistry};
use crate::ingest::{FileConfig, FileSource, FrameSource};
use crate::pipeline::{FrameSightings, Recorder, VideoSightings};
use crate::records::{open_store, RecordStore};
use crate::vet::{vet_map_link, UNSET_PROFILE_VALUE};

/// Farmer details shown on the dashboard; `location` drives the vet link.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FarmerProfile {
    pub name: String,
    pub farm: String,
    pub location: String,
}

impl Default for FarmerProfile {
    fn default() -> Self {
        Self {
            name: UNSET_PROFILE_VALUE.to_string(),
            farm: UNSET_PROFILE_VALUE.to_string(),
            location: UNSET_PROFILE_VALUE.to_string(),
        }
    }
}

impl FarmerProfile {
    /// Trim fields; blank fields go back to "Not Set".
    pub fn normalized(self) -> Self {
        let clean = |value: String| {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                UNSET_PROFILE_VALUE.to_string()
            } else {
                trimmed.to_string()
            }
        };
        Self {
            name: clean(self.name),
            farm: clean(self.farm),
            location: clean(self.location),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    #[default]
    English,
    Hindi,
}

/// Dashboard header strings for one language.
pub struct HeaderText {
    pub title: &'static str,
    pub subtitle: &'static str,
    pub animals: &'static str,
    pub find_vet: &'static str,
}

impl Language {
    /// `hi` selects Hindi; anything else is English.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "hi" | "hindi" => Language::Hindi,
            _ => Language::English,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Hindi => "hi",
        }
    }

    pub fn header(&self) -> HeaderText {
        match self {
            Language::English => HeaderText {
                title: "Livestock Health Dashboard",
                subtitle: "AI-assisted herd monitoring",
                animals: "Animals",
                find_vet: "Find nearest vet",
            },
            Language::Hindi => HeaderText {
                title: "पशु स्वास्थ्य डैशबोर्ड",
                subtitle: "एआई सहायता से पशु निगरानी",
                animals: "पशु",
                find_vet: "नज़दीकी पशु चिकित्सक खोजें",
            },
        }
    }
}

pub struct AppState {
    config: HerdConfig,
    store: Mutex<Box<dyn RecordStore + Send>>,
    detector: BackendRegistry,
    profile: RwLock<FarmerProfile>,
    camera_active: AtomicBool,
    recorder: Recorder,
}

impl AppState {
    /// Open the configured store and detector backends.
    pub fn open(config: HerdConfig) -> Result<Self> {
        let store = open_store(config.storage_backend, &config.records_path, config.attendance)
            .with_context(|| format!("open record store {}", config.records_path.display()))?;
        let detector = registry_from_settings(&config.detector)?;
        Ok(Self::new(config, store, detector))
    }

    pub fn new(
        config: HerdConfig,
        store: Box<dyn RecordStore + Send>,
        detector: BackendRegistry,
    ) -> Self {
        let recorder = Recorder::from_config(&config);
        let profile = config.profile.clone().normalized();
        Self {
            config,
            store: Mutex::new(store),
            detector,
            profile: RwLock::new(profile),
            camera_active: AtomicBool::new(false),
            recorder,
        }
    }

    pub fn config(&self) -> &HerdConfig {
        &self.config
    }

    pub fn detector(&self) -> &BackendRegistry {
        &self.detector
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    /// Run `f` with exclusive access to the record store.
    pub fn with_store<T>(&self, f: impl FnOnce(&mut dyn RecordStore) -> Result<T>) -> Result<T> {
        let mut guard = self
            .store
            .lock()
            .map_err(|_| anyhow!("record store lock poisoned"))?;
        f(&mut **guard)
    }

    pub fn profile(&self) -> Result<FarmerProfile> {
        self.profile
            .read()
            .map(|profile| profile.clone())
            .map_err(|_| anyhow!("profile lock poisoned"))
    }

    pub fn set_profile(&self, profile: FarmerProfile) -> Result<FarmerProfile> {
        let profile = profile.normalized();
        let mut guard = self
            .profile
            .write()
            .map_err(|_| anyhow!("profile lock poisoned"))?;
        *guard = profile.clone();
        log::info!("farmer profile updated (location: {})", profile.location);
        Ok(profile)
    }

    /// Map search for vets near the farmer's location.
    pub fn vet_link(&self) -> Result<String> {
        Ok(vet_map_link(&self.profile()?.location))
    }

    pub fn camera_active(&self) -> bool {
        self.camera_active.load(Ordering::SeqCst)
    }

    pub fn record_image(&self, bytes: &[u8]) -> Result<FrameSightings> {
        self.with_store(|store| self.recorder.record_image(bytes, &self.detector, store))
    }

    pub fn record_video_file(&self, path: &str) -> Result<VideoSightings> {
        let mut source = FileSource::new(FileConfig::new(path))?;
        self.with_store(|store| self.recorder.record_video(&mut source, &self.detector, store))
    }

    pub fn analyze_video_file(&self, path: &str) -> Result<BehaviorReport> {
        let mut source = FileSource::new(FileConfig::new(path))?;
        let location = self.profile()?.location;
        self.recorder.analyze_video(&mut source, None, &location)
    }

    /// Detect on the current camera frame until `running` is cleared or the
    /// source ends. Returns the number of frames processed.
    pub fn watch_camera(&self, source: &mut dyn FrameSource, running: &AtomicBool) -> Result<u64> {
        source
            .connect()
            .with_context(|| format!("open {}", source.describe()))?;
        self.camera_active.store(true, Ordering::SeqCst);
        let result = self.camera_loop(source, running);
        self.camera_active.store(false, Ordering::SeqCst);
        result
    }

    fn camera_loop(&self, source: &mut dyn FrameSource, running: &AtomicBool) -> Result<u64> {
        let fps = self.config.camera.target_fps;
        let period = (fps > 0).then(|| Duration::from_millis(1000 / u64::from(fps)));
        let mut processed = 0u64;

        while running.load(Ordering::SeqCst) {
            let started = Instant::now();
            let Some(frame) = source.next_frame()? else {
                log::info!("{} ended", source.describe());
                break;
            };
            match self.with_store(|store| self.recorder.record_frame(&frame, &self.detector, store))
            {
                Ok(sightings) if sightings.recorded_count() > 0 => log::info!(
                    "camera frame {}: {} animal(s) recorded",
                    frame.index,
                    sightings.recorded_count()
                ),
                Ok(_) => {}
                Err(err) => log::warn!("camera frame {} skipped: {:#}", frame.index, err),
            }
            processed += 1;
            if let Some(period) = period {
                if let Some(rest) = period.checked_sub(started.elapsed()) {
                    std::thread::sleep(rest);
                }
            }
        }
        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection, StubBackend};
    use crate::ingest::{CameraConfig, CameraSource};
    use crate::records::{AttendancePolicy, InMemoryRecordStore};

    fn state_with(detector: BackendRegistry) -> AppState {
        AppState::new(
            HerdConfig::default(),
            Box::new(InMemoryRecordStore::new(AttendancePolicy::FirstSightingOnly)),
            detector,
        )
    }

    #[test]
    fn profile_blanks_reset_to_not_set() -> Result<()> {
        let state = state_with(BackendRegistry::new());
        let saved = state.set_profile(FarmerProfile {
            name: "  Asha ".to_string(),
            farm: " ".to_string(),
            location: "Nashik".to_string(),
        })?;
        assert_eq!(saved.name, "Asha");
        assert_eq!(saved.farm, "Not Set");
        assert_eq!(state.profile()?, saved);
        assert_eq!(
            state.vet_link()?,
            "https://www.google.com/maps/search/Nashik"
        );
        Ok(())
    }

    #[test]
    fn language_codes() {
        assert_eq!(Language::from_code("hi"), Language::Hindi);
        assert_eq!(Language::from_code("HI"), Language::Hindi);
        assert_eq!(Language::from_code("fr"), Language::English);
        assert_ne!(Language::Hindi.header().title, Language::English.header().title);
    }

    #[test]
    fn camera_loop_stops_when_cleared() -> Result<()> {
        let cow = Detection::from_class(19, 0.9, BoundingBox::new(0.0, 0.0, 16.0, 16.0))?;
        let mut detector = BackendRegistry::new();
        detector.register(StubBackend::repeating(vec![cow]));
        let mut config = HerdConfig::default();
        config.camera.target_fps = 0;
        let state = AppState::new(
            config,
            Box::new(InMemoryRecordStore::new(AttendancePolicy::FirstSightingOnly)),
            detector,
        );

        // A source that clears the flag after three frames.
        struct Stopping<'a> {
            inner: CameraSource,
            running: &'a AtomicBool,
        }
        impl FrameSource for Stopping<'_> {
            fn next_frame(&mut self) -> Result<Option<crate::frame::Frame>> {
                let frame = self.inner.next_frame()?;
                if self.inner.frames_captured() >= 3 {
                    self.running.store(false, Ordering::SeqCst);
                }
                Ok(frame)
            }
            fn describe(&self) -> String {
                self.inner.describe()
            }
        }

        let running = AtomicBool::new(true);
        let mut source = Stopping {
            inner: CameraSource::new(CameraConfig {
                device: "stub://barn".to_string(),
                target_fps: 0,
                width: 32,
                height: 24,
            })?,
            running: &running,
        };
        let processed = state.watch_camera(&mut source, &running)?;
        assert_eq!(processed, 3);
        assert!(!state.camera_active());
        assert!(!state.with_store(|store| store.list())?.is_empty());
        Ok(())
    }
}
