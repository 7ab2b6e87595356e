//! Paths shared by the training and prediction commands.
use std::path::PathBuf;

use super::source::SqliteStore;
use super::store::ModelStore;

/// Default SQLite database holding unlock events and catalogs.
pub const DEFAULT_DB_PATH: &str = "achievements.db";
/// Default model artifact directory.
pub const DEFAULT_MODEL_DIR: &str = "models";

/// Storage locations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// SQLite database path.
    pub db_path: PathBuf,
    /// Model artifact directory.
    pub model_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
        }
    }
}

impl Config {
    /// Set the database path.
    pub fn db_path<P: Into<PathBuf>>(mut self, db_path: P) -> Self {
        self.db_path = db_path.into();
        self
    }

    /// Set the model directory.
    pub fn model_dir<P: Into<PathBuf>>(mut self, model_dir: P) -> Self {
        self.model_dir = model_dir.into();
        self
    }

    /// Model store rooted at the configured directory.
    pub fn model_store(&self) -> ModelStore {
        ModelStore::new(self.model_dir.clone())
    }

    /// Open the configured database.
    pub fn open_db(&self) -> Result<SqliteStore, failure::Error> {
        SqliteStore::open(&self.db_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();

        assert_eq!(config.db_path, PathBuf::from("achievements.db"));
        assert_eq!(config.model_store().dir(), PathBuf::from("models").as_path());
    }

    #[test]
    fn overrides() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default()
            .db_path(dir.path().join("test.db"))
            .model_dir(dir.path().join("models"));

        assert!(config.open_db().is_ok());
        assert!(dir.path().join("test.db").exists());
        assert_eq!(config.model_store().dir(), dir.path().join("models").as_path());
    }
}
