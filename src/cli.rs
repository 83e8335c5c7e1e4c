//! `herd` command line.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::app::AppState;
use crate::behavior::BehaviorReport;
use crate::config::HerdConfig;
use crate::identity::AnimalId;
use crate::ingest::{FileConfig, FileSource};
use crate::pipeline::{FrameSightings, SightingOutcome, VideoSightings};
use crate::records::{AnimalRecord, LAST_SEEN_FORMAT};
use crate::ui::{Ui, UiMode};
use crate::vet::vet_map_link;

#[derive(Parser, Debug)]
#[command(name = "herd", author, version, about = "Livestock sightings and health hints")]
pub struct Cli {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "HERD_CONFIG", global = true)]
    pub config: Option<PathBuf>,
    /// Progress output style.
    #[arg(long, value_enum, default_value_t = UiMode::Auto, global = true)]
    pub ui: UiMode,
    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Detect animals in a JPEG/PNG image and record them.
    DetectImage { path: PathBuf },
    /// Detect animals in every Nth frame of a local video and record them.
    DetectVideo { path: String },
    /// Motion-based behavior analysis of a local video.
    Behavior {
        path: String,
        /// Detector confidence for the animal, used for the disease hint.
        #[arg(long)]
        confidence: Option<f32>,
    },
    /// List recorded animals.
    List {
        /// Only animals that need vet support.
        #[arg(long)]
        needs_vet: bool,
    },
    /// Change an animal's display name.
    Rename { id: String, name: String },
    /// Delete an animal record.
    Delete { id: String },
    /// Print a map search link for nearby veterinarians.
    VetLink {
        /// Location text; defaults to the configured farm location.
        location: Option<String>,
    },
}

pub fn run(cli: Cli) -> Result<()> {
    let ui = Ui::detect(cli.ui);
    let config = HerdConfig::load_from(cli.config.as_deref())?;

    match cli.command {
        Command::VetLink { location } => {
            let location = location.unwrap_or_else(|| config.profile.location.clone());
            println!("{}", vet_map_link(&location));
            Ok(())
        }
        Command::Behavior { path, confidence } => {
            if let Some(c) = confidence {
                if !(0.0..=1.0).contains(&c) {
                    bail!("--confidence must be within [0, 1]");
                }
            }
            let recorder = crate::pipeline::Recorder::from_config(&config);
            let mut source = FileSource::new(FileConfig::new(path))?;
            let stage = ui.stage("Analyzing motion");
            let report = match recorder.analyze_video(&mut source, confidence, &config.profile.location)
            {
                Ok(report) => report,
                Err(err) => {
                    stage.fail();
                    return Err(err);
                }
            };
            drop(stage);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
                ui.notice(&report.disclaimer);
            }
            Ok(())
        }
        Command::DetectImage { path } => {
            let state = open_state(&ui, config)?;
            let bytes = std::fs::read(&path)
                .with_context(|| format!("read image {}", path.display()))?;
            let sightings = {
                let _stage = ui.stage("Detecting animals");
                state.record_image(&bytes)?
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&sightings)?);
            } else {
                print_sightings(&sightings);
            }
            Ok(())
        }
        Command::DetectVideo { path } => {
            let state = open_state(&ui, config)?;
            let summary = {
                let _stage = ui.stage("Scanning video");
                state.record_video_file(&path)?
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_video(&summary);
            }
            Ok(())
        }
        Command::List { needs_vet } => {
            let state = open_state(&ui, config)?;
            let records = state.with_store(|store| {
                if needs_vet {
                    store.needs_vet()
                } else {
                    store.list()
                }
            })?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                print_records(&records);
                if needs_vet && !records.is_empty() {
                    println!("vet: {}", state.vet_link()?);
                }
            }
            Ok(())
        }
        Command::Rename { id, name } => {
            let id = AnimalId::validate(&id)?;
            let state = open_state(&ui, config)?;
            if !state.with_store(|store| store.rename(&id, &name))? {
                bail!("animal {} not found", id);
            }
            println!("renamed {} to {}", id, name.trim());
            Ok(())
        }
        Command::Delete { id } => {
            let id = AnimalId::validate(&id)?;
            let state = open_state(&ui, config)?;
            if !state.with_store(|store| store.delete(&id))? {
                bail!("animal {} not found", id);
            }
            println!("deleted {}", id);
            Ok(())
        }
    }
}

fn open_state(ui: &Ui, config: HerdConfig) -> Result<AppState> {
    let stage = ui.stage("Loading detector and records");
    match AppState::open(config) {
        Ok(state) => Ok(state),
        Err(err) => {
            stage.fail();
            Err(err)
        }
    }
}

fn print_sightings(sightings: &FrameSightings) {
    if sightings.sightings.is_empty() {
        println!("no animals detected");
        return;
    }
    for sighting in &sightings.sightings {
        match sighting {
            SightingOutcome::Recorded {
                animal_id,
                species,
                confidence,
                health,
                outcome,
                ..
            } => println!(
                "{:<22} {:<10} {:>5.2}  {:<18} {:?}",
                animal_id.as_str(),
                species,
                confidence,
                health.label(),
                outcome
            ),
            SightingOutcome::IgnoredSpecies { label, confidence } => {
                println!("(ignored {} {:.2})", label, confidence)
            }
            SightingOutcome::EmptyRegion { label, .. } => {
                println!("(skipped empty {} box)", label)
            }
        }
    }
}

fn print_video(summary: &VideoSightings) {
    println!(
        "{}: {} frames read, {} analyzed, {} new, {} updated, {} skipped",
        summary.source,
        summary.frames_read,
        summary.frames_processed,
        summary.inserted,
        summary.updated,
        summary.skipped
    );
    for id in &summary.animals {
        println!("  {}", id);
    }
    if let Some(reason) = &summary.stopped_early {
        println!("stopped early: {}", reason);
    }
}

fn print_records(records: &[AnimalRecord]) {
    if records.is_empty() {
        println!("no animals recorded");
        return;
    }
    for record in records {
        println!(
            "{:<22} {:<16} {:<10} {:>3}  {:<18} {}",
            record.animal_id.as_str(),
            record.display_name,
            record.animal_type,
            record.attendance,
            record.health_status.label(),
            record.last_seen.format(LAST_SEEN_FORMAT)
        );
    }
}

fn print_report(report: &BehaviorReport) {
    println!("behavior: {}", report.behavior);
    println!("{}", report.explanation);
    match report.motion_score {
        Some(score) => println!(
            "motion score: {:.2} ({} of {} frames sampled)",
            score, report.frames_sampled, report.frames_read
        ),
        None => println!(
            "motion score: unknown ({} of {} frames sampled)",
            report.frames_sampled, report.frames_read
        ),
    }
    println!("hint: {}", report.hint_text);
    if let Some(link) = &report.vet_link {
        println!("vet visit suggested: {}", link);
    }
    if let Some(reason) = &report.stopped_early {
        println!("stopped early: {}", reason);
    }
}
