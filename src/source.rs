//! Adapters for reading unlock events and achievement catalogs.
//!
//! Two backends are provided: plain CSV files and a SQLite database laid out
//! the way the achievement crawler writes it.
use std::path::{Path, PathBuf};

use chrono::Utc;
use csv;
use failure;
use rusqlite::{params, Connection};
use serde::{Deserialize, Deserializer};

use super::data::{AchievementCatalogEntry, UnlockEvent};

/// Anything that yields unlock events.
pub trait EventSource {
    /// Unlock events of `game_id`, optionally restricted to one player,
    /// in the order they were recorded.
    fn unlock_events(
        &self,
        game_id: &str,
        player_id: Option<&str>,
    ) -> Result<Vec<UnlockEvent>, failure::Error>;
}

/// Anything that yields achievement display metadata.
pub trait CatalogSource {
    /// Catalog of `game_id`.
    fn catalog(&self, game_id: &str) -> Result<Vec<AchievementCatalogEntry>, failure::Error>;
}

#[derive(Debug, Deserialize)]
struct CatalogRecord {
    game_id: String,
    achievement_code: String,
    display_name: String,
    description: String,
    #[serde(deserialize_with = "deserialize_flag")]
    hidden: bool,
}

impl From<CatalogRecord> for AchievementCatalogEntry {
    fn from(record: CatalogRecord) -> Self {
        AchievementCatalogEntry {
            achievement_code: record.achievement_code,
            display_name: record.display_name,
            description: record.description,
            hidden: record.hidden,
        }
    }
}

fn deserialize_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = String::deserialize(deserializer)?;

    match value.trim().to_lowercase().as_str() {
        "1" | "true" => Ok(true),
        "" | "0" | "false" => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "invalid hidden flag: {}",
            other
        ))),
    }
}

/// Read every record of an unlock event CSV file with the header
/// `player_id,game_id,achievement_code,unlock_timestamp`.
pub fn read_unlock_events<P: AsRef<Path>>(path: P) -> Result<Vec<UnlockEvent>, failure::Error> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut events = Vec::new();

    for record in reader.deserialize() {
        events.push(record?);
    }

    Ok(events)
}

/// Read the entries of `game_id` from a catalog CSV file with the header
/// `game_id,achievement_code,display_name,description,hidden`.
pub fn read_catalog<P: AsRef<Path>>(
    path: P,
    game_id: &str,
) -> Result<Vec<AchievementCatalogEntry>, failure::Error> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut entries = Vec::new();

    for record in reader.deserialize() {
        let record: CatalogRecord = record?;

        if record.game_id == game_id {
            entries.push(record.into());
        }
    }

    Ok(entries)
}

/// CSV backed sources. Files are re-read on every call.
#[derive(Clone, Debug, Default)]
pub struct CsvSource {
    events_path: Option<PathBuf>,
    catalog_path: Option<PathBuf>,
}

impl CsvSource {
    /// Build a new source. Either file may be absent; asking for data
    /// from an absent file is an error.
    pub fn new(events_path: Option<PathBuf>, catalog_path: Option<PathBuf>) -> Self {
        CsvSource {
            events_path,
            catalog_path,
        }
    }
}

impl EventSource for CsvSource {
    fn unlock_events(
        &self,
        game_id: &str,
        player_id: Option<&str>,
    ) -> Result<Vec<UnlockEvent>, failure::Error> {
        let path = self
            .events_path
            .as_ref()
            .ok_or_else(|| format_err!("No unlock event file configured."))?;

        Ok(read_unlock_events(path)?
            .into_iter()
            .filter(|event| event.game_id() == game_id)
            .filter(|event| player_id.map_or(true, |x| event.player_id() == x))
            .collect())
    }
}

impl CatalogSource for CsvSource {
    fn catalog(&self, game_id: &str) -> Result<Vec<AchievementCatalogEntry>, failure::Error> {
        let path = self
            .catalog_path
            .as_ref()
            .ok_or_else(|| format_err!("No catalog file configured."))?;

        read_catalog(path, game_id)
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS achievement (
    steamid TEXT NOT NULL,
    appid TEXT NOT NULL,
    apiname TEXT NOT NULL,
    unlocked INTEGER NOT NULL,
    retrieved TEXT NOT NULL,
    PRIMARY KEY (steamid, appid, apiname)
);
CREATE TABLE IF NOT EXISTS achievement_description (
    appid TEXT NOT NULL,
    apiname TEXT NOT NULL,
    displayName TEXT NOT NULL,
    description TEXT NOT NULL,
    hidden BOOLEAN NOT NULL,
    retrieved TEXT NOT NULL,
    PRIMARY KEY (appid, apiname)
);
";

fn retrieved_now() -> String {
    Utc::now()
        .naive_utc()
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// SQLite database holding unlock events and catalogs.
#[derive(Debug)]
pub struct SqliteStore {
    connection: Connection,
}

impl SqliteStore {
    /// Open (creating if necessary) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, failure::Error> {
        SqliteStore::initialize(Connection::open(path)?)
    }

    /// A private in-memory database.
    pub fn in_memory() -> Result<Self, failure::Error> {
        SqliteStore::initialize(Connection::open_in_memory()?)
    }

    fn initialize(connection: Connection) -> Result<Self, failure::Error> {
        connection.execute_batch(SCHEMA)?;

        Ok(SqliteStore { connection })
    }

    /// Store unlock events. Rows already present for the same player,
    /// game and achievement are left untouched. Returns the number of
    /// rows inserted.
    pub fn save_unlock_events(&mut self, events: &[UnlockEvent]) -> Result<usize, failure::Error> {
        let retrieved = retrieved_now();
        let tx = self.connection.transaction()?;
        let mut num_inserted = 0;

        {
            let mut statement = tx.prepare(
                "INSERT OR IGNORE INTO achievement (steamid, appid, apiname, unlocked, retrieved)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;

            for event in events {
                num_inserted += statement.execute(params![
                    event.player_id(),
                    event.game_id(),
                    event.achievement_code(),
                    event.unlock_timestamp() as i64,
                    retrieved,
                ])?;
            }
        }

        tx.commit()?;

        debug!(
            num_events = events.len(),
            num_inserted, "Stored unlock events"
        );

        Ok(num_inserted)
    }

    /// Replace the catalog of `game_id` with `entries`.
    pub fn save_catalog(
        &mut self,
        game_id: &str,
        entries: &[AchievementCatalogEntry],
    ) -> Result<(), failure::Error> {
        let retrieved = retrieved_now();
        let tx = self.connection.transaction()?;

        tx.execute(
            "DELETE FROM achievement_description WHERE appid = ?1",
            params![game_id],
        )?;

        {
            let mut statement = tx.prepare(
                "INSERT OR REPLACE INTO achievement_description
                 (appid, apiname, displayName, description, hidden, retrieved)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;

            for entry in entries {
                statement.execute(params![
                    game_id,
                    entry.achievement_code,
                    entry.display_name,
                    entry.description,
                    entry.hidden,
                    retrieved,
                ])?;
            }
        }

        tx.commit()?;

        debug!(game_id, num_entries = entries.len(), "Stored catalog");

        Ok(())
    }
}

impl EventSource for SqliteStore {
    fn unlock_events(
        &self,
        game_id: &str,
        player_id: Option<&str>,
    ) -> Result<Vec<UnlockEvent>, failure::Error> {
        let mut statement = self.connection.prepare(
            "SELECT steamid, appid, apiname, unlocked FROM achievement
             WHERE appid = ?1 AND (?2 IS NULL OR steamid = ?2)
             ORDER BY rowid",
        )?;

        let rows = statement.query_map(params![game_id, player_id], |row| {
            let player_id: String = row.get(0)?;
            let game_id: String = row.get(1)?;
            let achievement_code: String = row.get(2)?;
            let unlocked: i64 = row.get(3)?;

            Ok(UnlockEvent::new(
                player_id,
                game_id,
                achievement_code,
                unlocked.max(0) as u64,
            ))
        })?;

        let mut events = Vec::new();
        for event in rows {
            events.push(event?);
        }

        Ok(events)
    }
}

impl CatalogSource for SqliteStore {
    fn catalog(&self, game_id: &str) -> Result<Vec<AchievementCatalogEntry>, failure::Error> {
        let mut statement = self.connection.prepare(
            "SELECT apiname, displayName, description, hidden FROM achievement_description
             WHERE appid = ?1
             ORDER BY rowid",
        )?;

        let rows = statement.query_map(params![game_id], |row| {
            Ok(AchievementCatalogEntry {
                achievement_code: row.get(0)?,
                display_name: row.get(1)?,
                description: row.get(2)?,
                hidden: row.get(3)?,
            })
        })?;

        let mut entries = Vec::new();
        for entry in rows {
            entries.push(entry?);
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn entry(code: &str, name: &str) -> AchievementCatalogEntry {
        AchievementCatalogEntry {
            achievement_code: code.to_owned(),
            display_name: name.to_owned(),
            description: format!("{} description", name),
            hidden: false,
        }
    }

    #[test]
    fn sqlite_events_round_trip_in_insertion_order() {
        let mut store = SqliteStore::in_memory().unwrap();
        let events = vec![
            UnlockEvent::new("p2", "440", "a1", 10),
            UnlockEvent::new("p1", "440", "a2", 0),
            UnlockEvent::new("p1", "730", "a1", 5),
        ];

        assert_eq!(store.save_unlock_events(&events).unwrap(), 3);

        assert_eq!(store.unlock_events("440", None).unwrap(), events[..2].to_vec());
        assert_eq!(
            store.unlock_events("440", Some("p1")).unwrap(),
            vec![events[1].clone()]
        );
    }

    #[test]
    fn sqlite_keeps_first_recorded_unlock() {
        let mut store = SqliteStore::in_memory().unwrap();

        store
            .save_unlock_events(&[UnlockEvent::new("p1", "440", "a1", 10)])
            .unwrap();
        let num_inserted = store
            .save_unlock_events(&[UnlockEvent::new("p1", "440", "a1", 99)])
            .unwrap();

        assert_eq!(num_inserted, 0);
        assert_eq!(
            store.unlock_events("440", None).unwrap(),
            vec![UnlockEvent::new("p1", "440", "a1", 10)]
        );
    }

    #[test]
    fn sqlite_catalog_is_replaced_per_game() {
        let mut store = SqliteStore::in_memory().unwrap();

        store
            .save_catalog("440", &[entry("a1", "First"), entry("a2", "Second")])
            .unwrap();
        store.save_catalog("730", &[entry("b1", "Other")]).unwrap();
        store.save_catalog("440", &[entry("a3", "Third")]).unwrap();

        assert_eq!(store.catalog("440").unwrap(), vec![entry("a3", "Third")]);
        assert_eq!(store.catalog("730").unwrap(), vec![entry("b1", "Other")]);
    }

    #[test]
    fn sqlite_store_persists_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("achievements.db");

        {
            let mut store = SqliteStore::open(&path).unwrap();
            store
                .save_unlock_events(&[UnlockEvent::new("p1", "440", "a1", 10)])
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.unlock_events("440", None).unwrap().len(), 1);
    }

    #[test]
    fn csv_source_filters_by_game_and_player() {
        let dir = tempfile::tempdir().unwrap();
        let events_path = dir.path().join("events.csv");
        let catalog_path = dir.path().join("catalog.csv");

        fs::write(
            &events_path,
            "player_id,game_id,achievement_code,unlock_timestamp\n\
             p1,440,a1,10\n\
             p2,440,a2,20\n\
             p1,730,a1,30\n",
        ).unwrap();
        fs::write(
            &catalog_path,
            "game_id,achievement_code,display_name,description,hidden\n\
             440,a1,First,Do it,0\n\
             440,a2,Second,Again,true\n\
             730,a1,Other,Elsewhere,1\n",
        ).unwrap();

        let source = CsvSource::new(Some(events_path), Some(catalog_path));

        assert_eq!(
            source.unlock_events("440", Some("p1")).unwrap(),
            vec![UnlockEvent::new("p1", "440", "a1", 10)]
        );
        assert_eq!(source.unlock_events("440", None).unwrap().len(), 2);

        let catalog = source.catalog("440").unwrap();
        assert_eq!(catalog.len(), 2);
        assert!(!catalog[0].hidden);
        assert!(catalog[1].hidden);
    }

    #[test]
    fn csv_source_without_files_errors() {
        let source = CsvSource::default();

        assert!(source.unlock_events("440", None).is_err());
        assert!(source.catalog("440").is_err());
    }
}
