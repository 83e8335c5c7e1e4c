//! Animal identity and health classification.
//!
//! Identity is by image content, not by animal: the id is a prefix of the
//! SHA-256 of the JPEG-encoded crop. The same physical animal seen under
//! different light or pose yields a different id, so records fragment. Only
//! 8 hex chars (32 bits) are kept; two different crops sharing that prefix
//! collide silently and merge into one record.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use anyhow::{anyhow, bail, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Detector confidence at or above which an animal is reported healthy.
pub const HEALTHY_CONFIDENCE: f32 = 0.6;

const ID_HASH_CHARS: usize = 8;
const CROP_JPEG_QUALITY: u8 = 95;

/// Opaque animal identifier, `SPECIES_xxxxxxxx`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnimalId(String);

impl AnimalId {
    /// Parse an id supplied by a user (CLI argument, URL path).
    pub fn validate(raw: &str) -> Result<Self> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| {
            Regex::new(r"^[A-Z0-9][A-Z0-9 _]*_[0-9a-f]{8}$").expect("static animal id regex")
        });
        if !pattern.is_match(raw) {
            bail!("'{}' is not an animal id (expected SPECIES_xxxxxxxx)", raw);
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for AnimalId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for AnimalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the id for a detected crop: `UPPER(label) + "_" + hash prefix`.
///
/// Zero-area crops are rejected; callers are expected to skip them first.
pub fn derive_id(crop: &RgbImage, species_label: &str) -> Result<AnimalId> {
    if crop.width() == 0 || crop.height() == 0 {
        bail!("cannot derive an animal id from an empty crop");
    }
    let mut encoded = Vec::new();
    JpegEncoder::new_with_quality(&mut encoded, CROP_JPEG_QUALITY)
        .encode_image(crop)
        .context("encode crop as JPEG")?;
    let digest = hex::encode(Sha256::digest(&encoded));
    Ok(AnimalId(format!(
        "{}_{}",
        species_label.to_uppercase(),
        &digest[..ID_HASH_CHARS]
    )))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    #[serde(rename = "Needs Vet Support")]
    NeedsVetSupport,
}

impl HealthStatus {
    pub fn label(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "Healthy",
            HealthStatus::NeedsVetSupport => "Needs Vet Support",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for HealthStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "Healthy" => Ok(HealthStatus::Healthy),
            "Needs Vet Support" => Ok(HealthStatus::NeedsVetSupport),
            other => Err(anyhow!("unknown health status '{}'", other)),
        }
    }
}

/// Health from detector confidence with the default threshold.
pub fn classify_health(confidence: f32) -> HealthStatus {
    classify_health_with(confidence, HEALTHY_CONFIDENCE)
}

/// Pure threshold, inclusive on the healthy side. No smoothing across
/// sightings: one low-confidence detection flips the status.
pub fn classify_health_with(confidence: f32, healthy_at: f32) -> HealthStatus {
    if confidence >= healthy_at {
        HealthStatus::Healthy
    } else {
        HealthStatus::NeedsVetSupport
    }
}
