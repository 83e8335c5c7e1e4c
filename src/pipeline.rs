//! Sighting pipeline.
//!
//! Detections become records: filter by species, crop, derive the content
//! id, classify health from confidence and upsert. Video runs the same steps
//! on every Nth frame, where N is the motion sampling period, so detection
//! and behavior analysis look at the same frames.

use std::collections::BTreeSet;

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::behavior::{BehaviorReport, MotionAccumulator, MotionThresholds};
use crate::config::{DetectorSettings, HerdConfig};
use crate::detect::{display_species, BackendRegistry, BoundingBox};
use crate::frame::Frame;
use crate::identity::{classify_health_with, derive_id, AnimalId, HealthStatus};
use crate::ingest::FrameSource;
use crate::records::{RecordStore, Sighting, UpsertOutcome};

/// What happened to one detection.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SightingOutcome {
    Recorded {
        animal_id: AnimalId,
        species: String,
        confidence: f32,
        health: HealthStatus,
        outcome: UpsertOutcome,
        bbox: BoundingBox,
    },
    /// Label outside the configured species list.
    IgnoredSpecies { label: String, confidence: f32 },
    /// Box collapsed to zero pixels after clamping.
    EmptyRegion { label: String, bbox: BoundingBox },
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct FrameSightings {
    pub frame_index: u64,
    pub detections: usize,
    pub sightings: Vec<SightingOutcome>,
}

impl FrameSightings {
    pub fn recorded(&self) -> impl Iterator<Item = &SightingOutcome> {
        self.sightings
            .iter()
            .filter(|s| matches!(s, SightingOutcome::Recorded { .. }))
    }

    pub fn recorded_count(&self) -> usize {
        self.recorded().count()
    }

    pub fn skipped_count(&self) -> usize {
        self.sightings.len() - self.recorded_count()
    }
}

/// Summary of a video scan.
#[derive(Clone, Debug, Default, Serialize)]
pub struct VideoSightings {
    pub source: String,
    pub frames_read: u64,
    pub frames_processed: u64,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    /// Distinct ids recorded, sorted.
    pub animals: Vec<AnimalId>,
    /// Set when a read failed part-way; counts cover frames before it.
    pub stopped_early: Option<String>,
}

/// Applies detection results to a record store.
#[derive(Clone, Debug)]
pub struct Recorder {
    detector: DetectorSettings,
    healthy_confidence: f32,
    sample_every: u32,
    thresholds: MotionThresholds,
}

impl Recorder {
    pub fn from_config(cfg: &HerdConfig) -> Self {
        Self {
            detector: cfg.detector.clone(),
            healthy_confidence: cfg.analysis.healthy_confidence,
            sample_every: cfg.analysis.sample_every.max(1),
            thresholds: cfg.analysis.thresholds(),
        }
    }

    pub fn sample_every(&self) -> u32 {
        self.sample_every
    }

    /// Detect on one frame and upsert every usable sighting.
    pub fn record_frame(
        &self,
        frame: &Frame,
        detector: &BackendRegistry,
        store: &mut dyn RecordStore,
    ) -> Result<FrameSightings> {
        let result = detector
            .detect(frame)
            .with_context(|| format!("detect on frame {}", frame.index))?;
        let mut sightings = Vec::with_capacity(result.len());

        for detection in &result.detections {
            if !self.detector.records_label(&detection.label) {
                sightings.push(SightingOutcome::IgnoredSpecies {
                    label: detection.label.clone(),
                    confidence: detection.confidence,
                });
                continue;
            }
            let Some(crop) = frame.crop(&detection.bbox) else {
                log::warn!(
                    "frame {}: skipping zero-area {} box {:?}",
                    frame.index,
                    detection.label,
                    detection.bbox
                );
                sightings.push(SightingOutcome::EmptyRegion {
                    label: detection.label.clone(),
                    bbox: detection.bbox,
                });
                continue;
            };

            let animal_id = derive_id(&crop, &detection.label)?;
            let species = display_species(&detection.label);
            let health = classify_health_with(detection.confidence, self.healthy_confidence);
            let outcome = store.upsert(&Sighting::now(animal_id.clone(), species.clone(), health))?;
            log::debug!(
                "frame {}: {} {} conf={:.2} {} ({:?})",
                frame.index,
                animal_id,
                species,
                detection.confidence,
                health,
                outcome
            );
            sightings.push(SightingOutcome::Recorded {
                animal_id,
                species,
                confidence: detection.confidence,
                health,
                outcome,
                bbox: detection.bbox,
            });
        }

        Ok(FrameSightings {
            frame_index: frame.index,
            detections: result.len(),
            sightings,
        })
    }

    /// Decode an uploaded still image and record it.
    pub fn record_image(
        &self,
        bytes: &[u8],
        detector: &BackendRegistry,
        store: &mut dyn RecordStore,
    ) -> Result<FrameSightings> {
        let frame = Frame::decode(bytes)?;
        self.record_frame(&frame, detector, store)
    }

    /// Record sightings from every Nth frame of a finite source.
    pub fn record_video(
        &self,
        source: &mut dyn FrameSource,
        detector: &BackendRegistry,
        store: &mut dyn RecordStore,
    ) -> Result<VideoSightings> {
        let mut summary = VideoSightings {
            source: source.describe(),
            ..VideoSightings::default()
        };
        let mut animals = BTreeSet::new();
        let every = u64::from(self.sample_every);

        source
            .connect()
            .with_context(|| format!("open {}", summary.source))?;
        loop {
            let frame = match read_step(source, summary.frames_read)? {
                ScanStep::Frame(frame) => frame,
                ScanStep::End => break,
                ScanStep::Interrupted(reason) => {
                    summary.stopped_early = Some(reason);
                    break;
                }
            };
            summary.frames_read += 1;
            if summary.frames_read % every != 0 {
                continue;
            }
            let sightings = self.record_frame(&frame, detector, store)?;
            summary.frames_processed += 1;
            summary.skipped += sightings.skipped_count();
            for sighting in sightings.recorded() {
                if let SightingOutcome::Recorded {
                    animal_id, outcome, ..
                } = sighting
                {
                    match outcome {
                        UpsertOutcome::Inserted => summary.inserted += 1,
                        UpsertOutcome::Updated => summary.updated += 1,
                    }
                    animals.insert(animal_id.clone());
                }
            }
        }

        if summary.frames_read == 0 {
            bail!("{} contains no frames", summary.source);
        }
        summary.animals = animals.into_iter().collect();
        log::info!(
            "{}: {} frames read, {} processed, {} new / {} updated",
            summary.source,
            summary.frames_read,
            summary.frames_processed,
            summary.inserted,
            summary.updated
        );
        Ok(summary)
    }

    /// Motion analysis over a finite source.
    ///
    /// `detection_confidence` feeds the disease hint when the caller has one.
    pub fn analyze_video(
        &self,
        source: &mut dyn FrameSource,
        detection_confidence: Option<f32>,
        vet_location: &str,
    ) -> Result<BehaviorReport> {
        let name = source.describe();
        let mut acc = MotionAccumulator::new(self.sample_every);
        let mut stopped_early = None;

        source.connect().with_context(|| format!("open {}", name))?;
        loop {
            match read_step(source, acc.frames_seen())? {
                ScanStep::Frame(frame) => acc.push(&frame),
                ScanStep::End => break,
                ScanStep::Interrupted(reason) => {
                    stopped_early = Some(reason);
                    break;
                }
            }
        }
        if acc.frames_seen() == 0 {
            log::warn!("{}: no frames to analyze", name);
        }

        let mut report = BehaviorReport::from_accumulator(
            &acc,
            &self.thresholds,
            detection_confidence,
            vet_location,
        );
        report.stopped_early = stopped_early;
        log::info!(
            "{}: {} ({} of {} frames sampled, score {:?})",
            name,
            report.behavior,
            report.frames_sampled,
            report.frames_read,
            report.motion_score
        );
        Ok(report)
    }
}

enum ScanStep {
    Frame(Frame),
    End,
    Interrupted(String),
}

// A failure before any frame is the caller's error; later failures end the
// scan with what has been read.
fn read_step(source: &mut dyn FrameSource, frames_read: u64) -> Result<ScanStep> {
    match source.next_frame() {
        Ok(Some(frame)) => Ok(ScanStep::Frame(frame)),
        Ok(None) => Ok(ScanStep::End),
        Err(err) if frames_read == 0 => {
            Err(err.context(format!("read first frame from {}", source.describe())))
        }
        Err(err) => {
            log::warn!(
                "{}: read failed after frame {}: {:#}",
                source.describe(),
                frames_read,
                err
            );
            Ok(ScanStep::Interrupted(format!(
                "read failed after frame {}: {}",
                frames_read, err
            )))
        }
    }
}
