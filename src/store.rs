//! Append-only, per-game storage of trained models.
//!
//! Each artifact is a JSON file named `{game_id}_{YYYY-MM-DD_HH-MM-SS}`.
//! The most recent artifact is resolved by parsing the timestamp suffix.
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process;

use chrono::NaiveDateTime;

use serde_json;

use super::trainer::TrainedModel;
use super::StoreError;

/// Format of the timestamp embedded in artifact names.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Directory of model artifacts.
#[derive(Clone, Debug)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    /// Use `dir` as the artifact directory. It is created on first save.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        ModelStore { dir: dir.into() }
    }

    /// The artifact directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Artifact name for a game and creation time.
    pub fn artifact_name(game_id: &str, created_at: &NaiveDateTime) -> String {
        format!("{}_{}", game_id, created_at.format(TIMESTAMP_FORMAT))
    }

    /// Write `model` as a new artifact and return its path.
    ///
    /// Existing artifacts are never overwritten, even by a concurrent writer
    /// saving under the same name.
    pub fn save(&self, model: &TrainedModel) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.dir)?;

        let name = ModelStore::artifact_name(model.game_id(), &model.created_at());
        let path = self.dir.join(&name);

        // Readers only ever see complete artifacts.
        let temp_path = self
            .dir
            .join(format!(".{}.{}.tmp", name, process::id()));
        {
            let mut writer = BufWriter::new(File::create(&temp_path)?);
            serde_json::to_writer(&mut writer, model)?;
            writer.flush()?;
        }

        // Fails if the target exists.
        let linked = fs::hard_link(&temp_path, &path);
        fs::remove_file(&temp_path)?;

        match linked {
            Ok(()) => {}
            Err(ref err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::ArtifactExists {
                    path: path.display().to_string(),
                })
            }
            Err(err) => return Err(err.into()),
        }

        info!(path = %path.display(), "Saved model");

        Ok(path)
    }

    /// Creation times of every artifact for `game_id`, oldest first.
    pub fn list(&self, game_id: &str) -> Result<Vec<(NaiveDateTime, PathBuf)>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(ref err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let prefix = format!("{}_", game_id);
        let mut artifacts = Vec::new();

        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();

            let created_at = file_name
                .to_str()
                .and_then(|name| name.strip_prefix(prefix.as_str()))
                .and_then(|timestamp| {
                    NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()
                });

            if let Some(created_at) = created_at {
                artifacts.push((created_at, entry.path()));
            }
        }

        artifacts.sort();

        Ok(artifacts)
    }

    /// Load the most recent artifact for `game_id`.
    pub fn load_latest(&self, game_id: &str) -> Result<TrainedModel, StoreError> {
        let (created_at, path) =
            self.list(game_id)?
                .pop()
                .ok_or_else(|| StoreError::ModelNotFound {
                    game_id: game_id.to_owned(),
                })?;

        debug!(path = %path.display(), %created_at, "Loading model");

        let reader = BufReader::new(File::open(&path)?);

        Ok(serde_json::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::data::{TrainingData, UnlockEvent};
    use crate::models::{Architecture, Hyperparameters};
    use crate::scoring::{rank, ExcludePolicy, HistoryItem};
    use crate::trainer;
    use crate::OnlineRankingModel;

    fn train(game_id: &str) -> TrainedModel {
        train_with(game_id, Architecture::Recurrent)
    }

    fn train_with(game_id: &str, architecture: Architecture) -> TrainedModel {
        let events: Vec<_> = (0..10)
            .flat_map(|x| {
                let player_id = format!("p{}", x);
                vec![
                    UnlockEvent::new(player_id.as_str(), game_id, "a1", 1),
                    UnlockEvent::new(player_id.as_str(), game_id, "a2", 2),
                    UnlockEvent::new(player_id.as_str(), game_id, "a3", 3),
                ]
            })
            .collect();
        let data = TrainingData::from_events(&events);
        let hyper = Hyperparameters::new()
            .architecture(architecture)
            .embedding_dim(4)
            .num_epochs(1);

        trainer::fit(game_id, &data.sequences, &data.achievements, hyper).unwrap()
    }

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .and_then(|date| date.and_hms_opt(hour, 0, 0))
            .unwrap()
    }

    #[test]
    fn artifact_names_embed_game_and_timestamp() {
        assert_eq!(
            ModelStore::artifact_name("440", &at(1, 10)),
            "440_2024-01-01_10-00-00"
        );
    }

    #[test]
    fn missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path().join("models"));

        match store.load_latest("440") {
            Err(StoreError::ModelNotFound { game_id }) => assert_eq!(game_id, "440"),
            other => panic!("Unexpected result: {:?}", other.map(|x| x.game_id().to_owned())),
        }
    }

    #[test]
    fn load_latest_picks_most_recent_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());

        store.save(&train("440").with_created_at(at(2, 9))).unwrap();
        store.save(&train("440").with_created_at(at(1, 10))).unwrap();
        store.save(&train("4400").with_created_at(at(3, 9))).unwrap();
        fs::write(dir.path().join("440_not-a-timestamp"), b"{}").unwrap();

        let latest = store.load_latest("440").unwrap();

        assert_eq!(latest.game_id(), "440");
        assert_eq!(latest.created_at(), at(2, 9));
        assert_eq!(store.list("440").unwrap().len(), 2);
    }

    #[test]
    fn artifacts_are_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let model = train("440").with_created_at(at(1, 10));

        let path = store.save(&model).unwrap();
        let saved = fs::read(&path).unwrap();

        let other = train("440").with_created_at(at(1, 10));

        match store.save(&other) {
            Err(StoreError::ArtifactExists { .. }) => {}
            other => panic!("Unexpected result: {:?}", other),
        }

        assert_eq!(fs::read(&path).unwrap(), saved);

        // No temporary files are left behind.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn loaded_model_scores_like_saved_model() {
        for &architecture in &[Architecture::Recurrent, Architecture::Convolutional] {
            let dir = tempfile::tempdir().unwrap();
            let store = ModelStore::new(dir.path());
            let model = train_with("440", architecture);

            store.save(&model).unwrap();
            let loaded = store.load_latest("440").unwrap();

            assert_eq!(loaded.hyperparameters(), model.hyperparameters());
            assert_eq!(loaded.achievements(), model.achievements());
            assert_eq!(loaded.losses(), model.losses());

            let item_ids = [0, 1, 2, 3];
            let user = model.user_representation(&[1, 2]).unwrap();
            let loaded_user = loaded.user_representation(&[1, 2]).unwrap();

            let expected = model.predict(&user, &item_ids).unwrap();
            let actual = loaded.predict(&loaded_user, &item_ids).unwrap();

            for (x, y) in expected.iter().zip(actual.iter()) {
                assert!((x - y).abs() < 1e-4);
            }

            let history = vec![HistoryItem::new("a1", Some(1))];
            let ranked = rank(&loaded, &history, ExcludePolicy::DropAll).unwrap();
            let codes: Vec<&str> = ranked.iter().map(|(code, _)| code).collect();

            assert_eq!(ranked.len(), 2);
            assert!(!codes.contains(&"a1"));
        }
    }
}
