//! Animal record storage.
//!
//! One `AnimalRecord` per `AnimalId`. The CSV store re-reads the file and
//! writes the whole table back on every mutation; mutations take `&mut self`,
//! so callers sharing a store must serialize access (the service keeps it
//! behind a `Mutex`). Two processes mutating the same CSV file at the same
//! instant can still race; sequential edits from `herd` and `herdd` are seen
//! by each other.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Local, NaiveDateTime, SubsecRound};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::identity::{AnimalId, HealthStatus};

/// Column order of the record table.
pub const RECORD_COLUMNS: [&str; 6] = [
    "animal_id",
    "animal_type",
    "display_name",
    "attendance",
    "health_status",
    "last_seen",
];

pub const LAST_SEEN_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnimalRecord {
    pub animal_id: AnimalId,
    pub animal_type: String,
    pub display_name: String,
    pub attendance: u32,
    pub health_status: HealthStatus,
    #[serde(with = "last_seen_format")]
    pub last_seen: NaiveDateTime,
}

mod last_seen_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::LAST_SEEN_FORMAT;

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&value.format(LAST_SEEN_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(raw.trim(), LAST_SEEN_FORMAT).map_err(serde::de::Error::custom)
    }
}

/// One detection event mapped onto an animal id.
#[derive(Clone, Debug, PartialEq)]
pub struct Sighting {
    pub animal_id: AnimalId,
    pub species: String,
    pub health: HealthStatus,
    pub seen_at: NaiveDateTime,
}

impl Sighting {
    pub fn now(animal_id: AnimalId, species: impl Into<String>, health: HealthStatus) -> Self {
        Self {
            animal_id,
            species: species.into(),
            health,
            seen_at: now_local(),
        }
    }
}

/// Local wall-clock time at the precision stored in the table.
pub fn now_local() -> NaiveDateTime {
    Local::now().naive_local().trunc_subsecs(0)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// How re-sightings affect `attendance`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendancePolicy {
    /// Attendance is set to 1 on insert and never changes.
    #[default]
    FirstSightingOnly,
    /// Every re-sighting of an existing id adds one.
    CountEverySighting,
}

pub trait RecordStore {
    /// Insert a new record or refresh health and last-seen of an existing one.
    fn upsert(&mut self, sighting: &Sighting) -> Result<UpsertOutcome>;

    /// All records in insertion order.
    fn list(&self) -> Result<Vec<AnimalRecord>>;

    fn get(&self, id: &AnimalId) -> Result<Option<AnimalRecord>>;

    /// Returns false when the id was not present.
    fn delete(&mut self, id: &AnimalId) -> Result<bool>;

    /// Returns false when the id was not present.
    fn rename(&mut self, id: &AnimalId, new_name: &str) -> Result<bool>;

    /// Records whose status is not healthy.
    fn needs_vet(&self) -> Result<Vec<AnimalRecord>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|record| !record.health_status.is_healthy())
            .collect())
    }
}

fn checked_display_name(new_name: &str) -> Result<String> {
    let trimmed = new_name.trim();
    if trimmed.is_empty() {
        bail!("display name must not be empty");
    }
    Ok(trimmed.to_string())
}

// -------------------- Shared in-memory table --------------------

#[derive(Clone, Debug, Default)]
struct RecordTable {
    records: Vec<AnimalRecord>,
    policy: AttendancePolicy,
}

impl RecordTable {
    fn new(policy: AttendancePolicy) -> Self {
        Self {
            records: Vec::new(),
            policy,
        }
    }

    fn position(&self, id: &AnimalId) -> Option<usize> {
        self.records.iter().position(|r| &r.animal_id == id)
    }

    fn apply(&mut self, sighting: &Sighting) -> UpsertOutcome {
        if let Some(idx) = self.position(&sighting.animal_id) {
            let record = &mut self.records[idx];
            record.health_status = sighting.health;
            record.last_seen = sighting.seen_at;
            if self.policy == AttendancePolicy::CountEverySighting {
                record.attendance = record.attendance.saturating_add(1);
            }
            UpsertOutcome::Updated
        } else {
            self.records.push(AnimalRecord {
                animal_id: sighting.animal_id.clone(),
                animal_type: sighting.species.clone(),
                display_name: sighting.species.clone(),
                attendance: 1,
                health_status: sighting.health,
                last_seen: sighting.seen_at,
            });
            UpsertOutcome::Inserted
        }
    }

    fn remove(&mut self, id: &AnimalId) -> bool {
        let before = self.records.len();
        self.records.retain(|r| &r.animal_id != id);
        self.records.len() != before
    }

    fn rename(&mut self, id: &AnimalId, name: String) -> bool {
        match self.position(id) {
            Some(idx) => {
                self.records[idx].display_name = name;
                true
            }
            None => false,
        }
    }

    /// Load rows, keeping the first occurrence of any repeated id.
    fn load(&mut self, rows: Vec<AnimalRecord>) {
        for row in rows {
            if self.position(&row.animal_id).is_some() {
                log::warn!("records: duplicate animal_id {} ignored", row.animal_id);
                continue;
            }
            self.records.push(row);
        }
    }
}

// -------------------- CSV store --------------------

/// The flat-file record table.
///
/// Holds no rows between calls: reads go to the file, and each mutation
/// re-reads it, applies the change and writes the whole table back. Another
/// process editing the same file between two calls is therefore seen by the
/// next call, and a failed write leaves both file and store unchanged.
pub struct CsvRecordStore {
    path: PathBuf,
    policy: AttendancePolicy,
}

impl CsvRecordStore {
    /// Open the table, creating it with a header row if missing.
    pub fn open(path: impl AsRef<Path>, policy: AttendancePolicy) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
            policy,
        };
        if store.path.exists() {
            let table = store.load()?;
            log::info!(
                "records: loaded {} animals from {}",
                table.records.len(),
                store.path.display()
            );
        } else {
            if let Some(parent) = store.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
            store.persist(&RecordTable::new(policy))?;
            log::info!("records: created {}", store.path.display());
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<RecordTable> {
        let mut table = RecordTable::new(self.policy);
        table.load(read_csv(&self.path)?);
        Ok(table)
    }

    /// Rewrite the whole file through a temp file in the same directory.
    fn persist(&self, table: &RecordTable) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("create temp file in {}", dir.display()))?;
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(&mut tmp);
            writer.write_record(RECORD_COLUMNS)?;
            for record in &table.records {
                writer.serialize(record)?;
            }
            writer.flush()?;
        }
        tmp.persist(&self.path)
            .map_err(|e| anyhow!("failed to replace {}: {}", self.path.display(), e.error))?;
        Ok(())
    }
}

fn read_csv(path: &Path) -> Result<Vec<AnimalRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("open record table {}", path.display()))?;
    let headers = reader.headers()?.clone();
    let found: Vec<&str> = headers.iter().map(str::trim).collect();
    if found != RECORD_COLUMNS {
        return Err(anyhow!(
            "record table {} has columns {:?}, expected {:?}",
            path.display(),
            found,
            RECORD_COLUMNS
        ));
    }
    let mut rows = Vec::new();
    for (line, row) in reader.deserialize::<AnimalRecord>().enumerate() {
        let record =
            row.with_context(|| format!("{}: malformed row {}", path.display(), line + 2))?;
        rows.push(record);
    }
    Ok(rows)
}

impl RecordStore for CsvRecordStore {
    fn upsert(&mut self, sighting: &Sighting) -> Result<UpsertOutcome> {
        let mut table = self.load()?;
        let outcome = table.apply(sighting);
        self.persist(&table)?;
        Ok(outcome)
    }

    fn list(&self) -> Result<Vec<AnimalRecord>> {
        Ok(self.load()?.records)
    }

    fn get(&self, id: &AnimalId) -> Result<Option<AnimalRecord>> {
        let table = self.load()?;
        Ok(table.position(id).map(|idx| table.records[idx].clone()))
    }

    fn delete(&mut self, id: &AnimalId) -> Result<bool> {
        let mut table = self.load()?;
        let removed = table.remove(id);
        if removed {
            self.persist(&table)?;
        }
        Ok(removed)
    }

    fn rename(&mut self, id: &AnimalId, new_name: &str) -> Result<bool> {
        let name = checked_display_name(new_name)?;
        let mut table = self.load()?;
        let renamed = table.rename(id, name);
        if renamed {
            self.persist(&table)?;
        }
        Ok(renamed)
    }
}

// -------------------- In-memory store --------------------

#[derive(Clone, Debug, Default)]
pub struct InMemoryRecordStore {
    table: RecordTable,
}

impl InMemoryRecordStore {
    pub fn new(policy: AttendancePolicy) -> Self {
        Self {
            table: RecordTable::new(policy),
        }
    }
}

impl RecordStore for InMemoryRecordStore {
    fn upsert(&mut self, sighting: &Sighting) -> Result<UpsertOutcome> {
        Ok(self.table.apply(sighting))
    }

    fn list(&self) -> Result<Vec<AnimalRecord>> {
        Ok(self.table.records.clone())
    }

    fn get(&self, id: &AnimalId) -> Result<Option<AnimalRecord>> {
        Ok(self.table.position(id).map(|idx| self.table.records[idx].clone()))
    }

    fn delete(&mut self, id: &AnimalId) -> Result<bool> {
        Ok(self.table.remove(id))
    }

    fn rename(&mut self, id: &AnimalId, new_name: &str) -> Result<bool> {
        let name = checked_display_name(new_name)?;
        Ok(self.table.rename(id, name))
    }
}

// -------------------- SQLite store --------------------

/// Embedded store keyed by `animal_id`; same columns as the CSV table.
pub struct SqliteRecordStore {
    conn: Connection,
    policy: AttendancePolicy,
}

impl SqliteRecordStore {
    pub fn open(db_path: &str, policy: AttendancePolicy) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("open record database {}", db_path))?;
        let store = Self { conn, policy };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS animals (
              seq INTEGER PRIMARY KEY AUTOINCREMENT,
              animal_id TEXT NOT NULL UNIQUE,
              animal_type TEXT NOT NULL,
              display_name TEXT NOT NULL,
              attendance INTEGER NOT NULL,
              health_status TEXT NOT NULL,
              last_seen TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn query_records(&self, filter: Option<&AnimalId>) -> Result<Vec<AnimalRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT animal_id, animal_type, display_name, attendance, health_status, last_seen
            FROM animals
            WHERE ?1 IS NULL OR animal_id = ?1
            ORDER BY seq ASC
            "#,
        )?;
        let mut rows = stmt.query(params![filter.map(AnimalId::as_str)])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let health: String = row.get(4)?;
            let last_seen: String = row.get(5)?;
            out.push(AnimalRecord {
                animal_id: AnimalId::from(row.get::<_, String>(0)?),
                animal_type: row.get(1)?,
                display_name: row.get(2)?,
                attendance: row.get(3)?,
                health_status: health.parse()?,
                last_seen: NaiveDateTime::parse_from_str(&last_seen, LAST_SEEN_FORMAT)
                    .with_context(|| format!("corrupt last_seen '{}'", last_seen))?,
            });
        }
        Ok(out)
    }
}

impl RecordStore for SqliteRecordStore {
    fn upsert(&mut self, sighting: &Sighting) -> Result<UpsertOutcome> {
        let tx = self.conn.transaction()?;
        let exists = tx
            .query_row(
                "SELECT 1 FROM animals WHERE animal_id = ?1",
                params![sighting.animal_id.as_str()],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        let last_seen = sighting.seen_at.format(LAST_SEEN_FORMAT).to_string();
        let outcome = if exists {
            let increment = match self.policy {
                AttendancePolicy::FirstSightingOnly => 0,
                AttendancePolicy::CountEverySighting => 1,
            };
            tx.execute(
                r#"
                UPDATE animals
                SET health_status = ?2, last_seen = ?3, attendance = attendance + ?4
                WHERE animal_id = ?1
                "#,
                params![
                    sighting.animal_id.as_str(),
                    sighting.health.label(),
                    last_seen,
                    increment
                ],
            )?;
            UpsertOutcome::Updated
        } else {
            tx.execute(
                r#"
                INSERT INTO animals(animal_id, animal_type, display_name, attendance, health_status, last_seen)
                VALUES (?1, ?2, ?2, 1, ?3, ?4)
                "#,
                params![
                    sighting.animal_id.as_str(),
                    sighting.species,
                    sighting.health.label(),
                    last_seen
                ],
            )?;
            UpsertOutcome::Inserted
        };
        tx.commit()?;
        Ok(outcome)
    }

    fn list(&self) -> Result<Vec<AnimalRecord>> {
        self.query_records(None)
    }

    fn get(&self, id: &AnimalId) -> Result<Option<AnimalRecord>> {
        Ok(self.query_records(Some(id))?.into_iter().next())
    }

    fn delete(&mut self, id: &AnimalId) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM animals WHERE animal_id = ?1", params![id.as_str()])?;
        Ok(changed > 0)
    }

    fn rename(&mut self, id: &AnimalId, new_name: &str) -> Result<bool> {
        let name = checked_display_name(new_name)?;
        let changed = self.conn.execute(
            "UPDATE animals SET display_name = ?2 WHERE animal_id = ?1",
            params![id.as_str(), name],
        )?;
        Ok(changed > 0)
    }
}

// -------------------- Store selection --------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Csv,
    Sqlite,
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(StorageBackend::Csv),
            "sqlite" => Ok(StorageBackend::Sqlite),
            other => Err(anyhow!("unknown storage backend '{}'", other)),
        }
    }
}

/// Open the configured store.
pub fn open_store(
    backend: StorageBackend,
    path: &Path,
    policy: AttendancePolicy,
) -> Result<Box<dyn RecordStore + Send>> {
    match backend {
        StorageBackend::Csv => Ok(Box::new(CsvRecordStore::open(path, policy)?)),
        StorageBackend::Sqlite => {
            let db_path = path
                .to_str()
                .ok_or_else(|| anyhow!("database path {} is not UTF-8", path.display()))?;
            Ok(Box::new(SqliteRecordStore::open(db_path, policy)?))
        }
    }
}
