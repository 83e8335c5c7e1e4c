use anyhow::Result;
use chrono::NaiveDate;

use herd_monitor::identity::{AnimalId, HealthStatus};
use herd_monitor::records::{
    open_store, AttendancePolicy, CsvRecordStore, RecordStore, Sighting, StorageBackend,
    UpsertOutcome,
};

fn sighting(id: &str, species: &str, health: HealthStatus, minute: u32) -> Sighting {
    Sighting {
        animal_id: AnimalId::validate(id).expect("valid id"),
        species: species.to_string(),
        health,
        seen_at: NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(8, minute, 0)
            .unwrap(),
    }
}

#[test]
fn fresh_table_has_header_only() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nested").join("animal_records.csv");
    let store = CsvRecordStore::open(&path, AttendancePolicy::default())?;
    assert!(store.list()?.is_empty());
    let contents = std::fs::read_to_string(&path)?;
    assert_eq!(
        contents.trim_end(),
        "animal_id,animal_type,display_name,attendance,health_status,last_seen"
    );
    Ok(())
}

#[test]
fn records_survive_reopen() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("animal_records.csv");
    {
        let mut store = CsvRecordStore::open(&path, AttendancePolicy::default())?;
        assert_eq!(
            store.upsert(&sighting("COW_abcd1234", "Cow", HealthStatus::Healthy, 0))?,
            UpsertOutcome::Inserted
        );
        store.upsert(&sighting("SHEEP_0011aabb", "Sheep", HealthStatus::NeedsVetSupport, 1))?;
        assert!(store.rename(&AnimalId::validate("COW_abcd1234")?, "Gauri, the \"calm\" one")?);
    }

    let contents = std::fs::read_to_string(&path)?;
    assert!(contents.contains("Needs Vet Support"));
    assert!(contents.contains("2024-06-01 08:01:00"));

    let store = CsvRecordStore::open(&path, AttendancePolicy::default())?;
    let records = store.list()?;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].display_name, "Gauri, the \"calm\" one");
    assert_eq!(records[0].animal_type, "Cow");
    assert_eq!(records[0].attendance, 1);
    assert_eq!(records[1].health_status, HealthStatus::NeedsVetSupport);
    assert_eq!(store.needs_vet()?.len(), 1);
    Ok(())
}

#[test]
fn repeat_sighting_refreshes_without_counting() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("animal_records.csv");
    let mut store = CsvRecordStore::open(&path, AttendancePolicy::FirstSightingOnly)?;
    store.upsert(&sighting("COW_abcd1234", "Cow", HealthStatus::Healthy, 0))?;
    let outcome = store.upsert(&sighting("COW_abcd1234", "Cow", HealthStatus::NeedsVetSupport, 30))?;
    assert_eq!(outcome, UpsertOutcome::Updated);

    let record = store
        .get(&AnimalId::validate("COW_abcd1234")?)?
        .expect("record");
    assert_eq!(record.attendance, 1);
    assert_eq!(record.health_status, HealthStatus::NeedsVetSupport);
    assert_eq!(record.last_seen.format("%H:%M").to_string(), "08:30");
    Ok(())
}

#[test]
fn counting_policy_increments_attendance() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("animal_records.csv");
    let mut store = CsvRecordStore::open(&path, AttendancePolicy::CountEverySighting)?;
    for minute in 0..3 {
        store.upsert(&sighting("HORSE_00ff00ff", "Horse", HealthStatus::Healthy, minute))?;
    }
    assert_eq!(store.list()?[0].attendance, 3);
    Ok(())
}

#[test]
fn delete_rewrites_the_table() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("animal_records.csv");
    let mut store = CsvRecordStore::open(&path, AttendancePolicy::default())?;
    store.upsert(&sighting("COW_abcd1234", "Cow", HealthStatus::Healthy, 0))?;
    store.upsert(&sighting("COW_1234abcd", "Cow", HealthStatus::Healthy, 1))?;

    assert!(store.delete(&AnimalId::validate("COW_abcd1234")?)?);
    assert!(!store.delete(&AnimalId::validate("COW_abcd1234")?)?);

    let reopened = CsvRecordStore::open(&path, AttendancePolicy::default())?;
    let ids: Vec<String> = reopened
        .list()?
        .into_iter()
        .map(|r| r.animal_id.to_string())
        .collect();
    assert_eq!(ids, vec!["COW_1234abcd"]);
    Ok(())
}

#[test]
fn second_handle_sees_edits_from_the_first() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("animal_records.csv");
    let mut daemon = CsvRecordStore::open(&path, AttendancePolicy::default())?;
    let mut cli = CsvRecordStore::open(&path, AttendancePolicy::default())?;

    daemon.upsert(&sighting("COW_11111111", "Cow", HealthStatus::Healthy, 0))?;
    assert!(cli.delete(&AnimalId::validate("COW_11111111")?)?);
    daemon.upsert(&sighting("GOAT_22222222", "Goat", HealthStatus::Healthy, 1))?;

    let contents = std::fs::read_to_string(&path)?;
    assert!(!contents.contains("COW_11111111"));
    assert!(contents.contains("GOAT_22222222"));

    assert!(cli.rename(&AnimalId::validate("GOAT_22222222")?, "Chhoti")?);
    daemon.upsert(&sighting("GOAT_22222222", "Goat", HealthStatus::NeedsVetSupport, 2))?;
    let goat = daemon
        .get(&AnimalId::validate("GOAT_22222222")?)?
        .expect("goat");
    assert_eq!(goat.display_name, "Chhoti");
    assert_eq!(goat.health_status, HealthStatus::NeedsVetSupport);
    Ok(())
}

#[test]
fn failed_write_leaves_no_phantom_record() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let farm = dir.path().join("farm");
    let path = farm.join("animal_records.csv");
    let mut store = CsvRecordStore::open(&path, AttendancePolicy::default())?;

    std::fs::remove_dir_all(&farm)?;
    assert!(store
        .upsert(&sighting("COW_33333333", "Cow", HealthStatus::Healthy, 0))
        .is_err());

    std::fs::create_dir_all(&farm)?;
    std::fs::write(
        &path,
        "animal_id,animal_type,display_name,attendance,health_status,last_seen\n",
    )?;
    assert!(store.get(&AnimalId::validate("COW_33333333")?)?.is_none());
    assert!(store.list()?.is_empty());
    Ok(())
}

#[test]
fn foreign_header_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("animal_records.csv");
    std::fs::write(&path, "id,kind\nCOW_abcd1234,Cow\n")?;
    assert!(CsvRecordStore::open(&path, AttendancePolicy::default()).is_err());
    Ok(())
}

#[test]
fn sqlite_backend_persists_across_opens() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("animals.db");
    {
        let mut store = open_store(StorageBackend::Sqlite, &path, AttendancePolicy::default())?;
        store.upsert(&sighting("COW_abcd1234", "Cow", HealthStatus::Healthy, 0))?;
        store.rename(&AnimalId::validate("COW_abcd1234")?, "Gauri")?;
    }
    let store = open_store(StorageBackend::Sqlite, &path, AttendancePolicy::default())?;
    let records = store.list()?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].display_name, "Gauri");
    Ok(())
}
