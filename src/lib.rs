//! Herd Monitor
//!
//! Livestock monitoring for small farms: detect animals in images, video files
//! or a live camera, keep one record per detected animal in a flat table, and
//! serve a dashboard with health badges and a "find nearest vet" link.
//!
//! # Architecture
//!
//! Two pieces of logic carry the crate; everything else is plumbing:
//!
//! 1. **Identity and upsert**: a detected crop is hashed into an `AnimalId`,
//!    detector confidence is thresholded into a `HealthStatus`, and the
//!    sighting is merged into the record store (insert once, refresh after).
//! 2. **Motion classifier**: sampled frames are reduced to a mean luma
//!    difference, banded into a `BehaviorCategory`, and turned into a vet
//!    referral and a disease hint.
//!
//! Health and behavior outputs are hints, not diagnoses. Identity is by image
//! content: the same animal photographed twice may get two ids.
//!
//! # Module Structure
//!
//! - `frame`: RGB frames, decode, crop, luma
//! - `detect`: detector backends (stub, ONNX via tract) and result types
//! - `identity`: animal ids and health classification
//! - `records`: record stores (CSV, SQLite, in-memory)
//! - `behavior`: motion scoring and behavior classification
//! - `ingest`: frame sources (memory, video files, cameras)
//! - `pipeline`: detections to records for images, videos and camera frames
//! - `vet`: map search links
//! - `config`, `app`, `api`, `cli`, `ui`: configuration, shared state and front ends

pub mod api;
pub mod app;
pub mod behavior;
pub mod cli;
pub mod config;
pub mod detect;
pub mod frame;
pub mod identity;
pub mod ingest;
pub mod pipeline;
pub mod records;
pub mod ui;
pub mod vet;

pub use app::{AppState, FarmerProfile, Language};
pub use behavior::{
    classify_behavior, infer_disease_hint, score_motion, suggest_vet_referral, BehaviorCategory,
    BehaviorReport, DiseaseHint, MotionAccumulator, MotionScore, MotionThresholds,
};
pub use config::{AnalysisConfig, HerdConfig};
pub use detect::{BackendRegistry, BoundingBox, Detection, DetectionResult, DetectorBackend};
pub use frame::Frame;
pub use identity::{classify_health, derive_id, AnimalId, HealthStatus, HEALTHY_CONFIDENCE};
pub use ingest::{CameraSource, FileSource, FrameSource, MemorySource};
pub use pipeline::{FrameSightings, Recorder, SightingOutcome, VideoSightings};
pub use records::{
    open_store, AnimalRecord, AttendancePolicy, CsvRecordStore, InMemoryRecordStore, RecordStore,
    Sighting, SqliteRecordStore, StorageBackend, UpsertOutcome,
};
pub use vet::vet_map_link;
