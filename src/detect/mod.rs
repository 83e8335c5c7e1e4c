mod backend;
mod backends;
pub mod labels;
mod registry;
mod result;

use anyhow::{anyhow, Result};

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use labels::{display_species, label_for, ANIMAL_LABELS, COCO_LABELS};
pub use registry::{BackendRegistry, SharedBackend};
pub use result::{BoundingBox, Detection, DetectionResult};

use crate::config::DetectorSettings;

/// Build the registry described by the detector settings.
///
/// The stub backend is always registered; `tract` becomes the default when
/// selected and the crate was built with `backend-tract`.
pub fn registry_from_settings(settings: &DetectorSettings) -> Result<BackendRegistry> {
    let mut registry = BackendRegistry::new();
    registry.register(StubBackend::new());

    match settings.backend.as_str() {
        "stub" => {}
        "tract" => {
            #[cfg(feature = "backend-tract")]
            {
                let model_path = settings
                    .model_path
                    .as_ref()
                    .ok_or_else(|| anyhow!("detector backend 'tract' requires model_path"))?;
                let mut backend = TractBackend::new(model_path, settings.input_size)?
                    .with_thresholds(settings.confidence_floor, settings.iou_threshold);
                backend.warm_up()?;
                registry.register(backend);
                registry.set_default("tract")?;
            }
            #[cfg(not(feature = "backend-tract"))]
            {
                return Err(anyhow!(
                    "detector backend 'tract' requires the backend-tract feature"
                ));
            }
        }
        other => return Err(anyhow!("unknown detector backend '{}'", other)),
    }

    log::info!(
        "detector backends: {:?} (default {})",
        registry.list(),
        registry.default_name().unwrap_or("none")
    );
    Ok(registry)
}
