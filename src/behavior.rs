//! Motion-based behavior analysis.
//!
//! A frame-difference heuristic: sample every Nth frame, take the mean
//! absolute luma difference between consecutive samples, average those into
//! one score and band the score into a behavior category. Every function is
//! stateless with respect to animals; there is no per-animal baseline.

use std::fmt;

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::frame::Frame;

pub const DEFAULT_SAMPLE_EVERY: u32 = 10;
pub const DEFAULT_LOW_ACTIVITY_BELOW: f64 = 5.0;
pub const DEFAULT_RESTLESS_ABOVE: f64 = 40.0;

/// Confidence below which low activity is read as a possible fever.
pub const FEVER_HINT_CONFIDENCE: f32 = 0.5;

pub const HINT_DISCLAIMER: &str =
    "AI hint only, not a diagnosis. Early warning for the farmer; a veterinarian decides.";

/// Band edges for `classify_behavior`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionThresholds {
    pub low_activity_below: f64,
    pub restless_above: f64,
}

impl Default for MotionThresholds {
    fn default() -> Self {
        Self {
            low_activity_below: DEFAULT_LOW_ACTIVITY_BELOW,
            restless_above: DEFAULT_RESTLESS_ABOVE,
        }
    }
}

/// Scalar motion over a sequence, or `Unknown` when fewer than two sampled
/// frames could be compared.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MotionScore {
    Unknown,
    Score(f64),
}

impl MotionScore {
    pub fn value(&self) -> Option<f64> {
        match self {
            MotionScore::Unknown => None,
            MotionScore::Score(v) => Some(*v),
        }
    }
}

/// Incremental motion scoring for frames arriving one at a time.
#[derive(Debug)]
pub struct MotionAccumulator {
    sample_every: u64,
    frames_seen: u64,
    frames_sampled: u64,
    previous: Option<GrayImage>,
    diff_sum: f64,
    pairs: u64,
}

impl MotionAccumulator {
    /// `sample_every` of 0 is treated as 1.
    pub fn new(sample_every: u32) -> Self {
        Self {
            sample_every: u64::from(sample_every.max(1)),
            frames_seen: 0,
            frames_sampled: 0,
            previous: None,
            diff_sum: 0.0,
            pairs: 0,
        }
    }

    /// Feed the next frame. Only frames N, 2N, ... are sampled.
    pub fn push(&mut self, frame: &Frame) {
        self.frames_seen += 1;
        if self.frames_seen % self.sample_every != 0 {
            return;
        }
        self.frames_sampled += 1;
        let gray = frame.to_luma();
        if let Some(previous) = &self.previous {
            match mean_abs_diff(previous, &gray) {
                Some(diff) => {
                    self.diff_sum += diff;
                    self.pairs += 1;
                }
                None => log::debug!(
                    "motion: frame {} changed size, restarting comparison",
                    frame.index
                ),
            }
        }
        self.previous = Some(gray);
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn frames_sampled(&self) -> u64 {
        self.frames_sampled
    }

    pub fn score(&self) -> MotionScore {
        if self.pairs == 0 {
            MotionScore::Unknown
        } else {
            MotionScore::Score(self.diff_sum / self.pairs as f64)
        }
    }
}

/// Mean absolute per-pixel difference; `None` when sizes differ or are empty.
fn mean_abs_diff(a: &GrayImage, b: &GrayImage) -> Option<f64> {
    if a.dimensions() != b.dimensions() || a.as_raw().is_empty() {
        return None;
    }
    let total: u64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(x, y)| u64::from(x.abs_diff(*y)))
        .sum();
    Some(total as f64 / a.as_raw().len() as f64)
}

/// Score a finite frame sequence.
pub fn score_motion<'a, I>(frames: I, sample_every: u32) -> MotionScore
where
    I: IntoIterator<Item = &'a Frame>,
{
    let mut acc = MotionAccumulator::new(sample_every);
    for frame in frames {
        acc.push(frame);
    }
    acc.score()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorCategory {
    LowActivity,
    Normal,
    HighRestlessness,
    Unknown,
}

impl BehaviorCategory {
    pub fn label(&self) -> &'static str {
        match self {
            BehaviorCategory::LowActivity => "Low Activity",
            BehaviorCategory::Normal => "Normal Behavior",
            BehaviorCategory::HighRestlessness => "High Restlessness",
            BehaviorCategory::Unknown => "Unknown",
        }
    }

    pub fn explanation(&self) -> &'static str {
        match self {
            BehaviorCategory::LowActivity => {
                "Animal is moving very little. This can indicate weakness, illness, or tiredness."
            }
            BehaviorCategory::Normal => "Animal movement appears normal.",
            BehaviorCategory::HighRestlessness => {
                "Animal is moving too much. This can indicate stress, discomfort, or pain."
            }
            BehaviorCategory::Unknown => "Video could not be analyzed.",
        }
    }
}

impl fmt::Display for BehaviorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Band a score: `< low` low activity, `low..=high` normal, `> high` restless.
pub fn classify_behavior(score: MotionScore, thresholds: &MotionThresholds) -> BehaviorCategory {
    match score {
        MotionScore::Unknown => BehaviorCategory::Unknown,
        MotionScore::Score(v) if v < thresholds.low_activity_below => BehaviorCategory::LowActivity,
        MotionScore::Score(v) if v > thresholds.restless_above => BehaviorCategory::HighRestlessness,
        MotionScore::Score(_) => BehaviorCategory::Normal,
    }
}

/// Pure function of the category; distance from a threshold does not matter.
pub fn suggest_vet_referral(category: BehaviorCategory) -> bool {
    matches!(
        category,
        BehaviorCategory::LowActivity | BehaviorCategory::HighRestlessness
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiseaseHint {
    PossibleFeverOrInfection,
    PossiblePainOrDiscomfort,
    NoVisibleIndication,
}

impl DiseaseHint {
    pub fn text(&self) -> &'static str {
        match self {
            DiseaseHint::PossibleFeverOrInfection => "Possible fever or infection",
            DiseaseHint::PossiblePainOrDiscomfort => "Possible pain or discomfort",
            DiseaseHint::NoVisibleIndication => "No visible indication",
        }
    }
}

impl fmt::Display for DiseaseHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// Explanatory hint for farmers. Never presented without `HINT_DISCLAIMER`.
pub fn infer_disease_hint(confidence: f32, category: BehaviorCategory) -> DiseaseHint {
    match category {
        BehaviorCategory::LowActivity if confidence < FEVER_HINT_CONFIDENCE => {
            DiseaseHint::PossibleFeverOrInfection
        }
        BehaviorCategory::HighRestlessness => DiseaseHint::PossiblePainOrDiscomfort,
        _ => DiseaseHint::NoVisibleIndication,
    }
}

/// Everything the presentation layer shows for one analyzed video.
#[derive(Clone, Debug, Serialize)]
pub struct BehaviorReport {
    pub category: BehaviorCategory,
    pub behavior: String,
    pub explanation: String,
    pub motion_score: Option<f64>,
    pub frames_read: u64,
    pub frames_sampled: u64,
    pub vet_referral: bool,
    pub disease_hint: DiseaseHint,
    pub hint_text: String,
    pub disclaimer: String,
    pub vet_link: Option<String>,
    /// Set when the source failed mid-scan; the report covers frames read so far.
    pub stopped_early: Option<String>,
}

impl BehaviorReport {
    /// Build a report from a finished accumulator.
    ///
    /// `detection_confidence` is the detector reading for the animal when one
    /// exists; without one the fever hint treats confidence as low.
    pub fn from_accumulator(
        acc: &MotionAccumulator,
        thresholds: &MotionThresholds,
        detection_confidence: Option<f32>,
        vet_location: &str,
    ) -> Self {
        let score = acc.score();
        let category = classify_behavior(score, thresholds);
        let vet_referral = suggest_vet_referral(category);
        let hint = infer_disease_hint(detection_confidence.unwrap_or(0.0), category);
        Self {
            category,
            behavior: category.label().to_string(),
            explanation: category.explanation().to_string(),
            motion_score: score.value(),
            frames_read: acc.frames_seen(),
            frames_sampled: acc.frames_sampled(),
            vet_referral,
            disease_hint: hint,
            hint_text: hint.text().to_string(),
            disclaimer: HINT_DISCLAIMER.to_string(),
            vet_link: vet_referral.then(|| crate::vet::vet_map_link(vet_location)),
            stopped_early: None,
        }
    }
}
