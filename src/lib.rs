#![deny(missing_docs)]
//! # achievement-sbr
//!
//! `achievement_sbr` recommends the achievement a player is most likely to
//! unlock next. Raw unlock events are encoded into dense identifiers, grouped
//! into one chronological sequence per player, and used to fit a sequence
//! model (recurrent or convolutional) with a negative-sampling ranking loss.
//! The trained model is persisted per game and later used to rank the
//! achievements a player does not hold yet.
//!
//! ## Example
//!
//! ```rust,no_run
//! # extern crate achievement_sbr;
//! use achievement_sbr::data::{TrainingData, UnlockEvent};
//! use achievement_sbr::models::{Architecture, Hyperparameters};
//! use achievement_sbr::scoring::{rank, ExcludePolicy, HistoryItem};
//! use achievement_sbr::store::ModelStore;
//! use achievement_sbr::trainer;
//!
//! let events = vec![
//!     UnlockEvent::new("p1", "440", "TUTORIAL", 10),
//!     UnlockEvent::new("p1", "440", "FIRST_WIN", 20),
//!     UnlockEvent::new("p2", "440", "TUTORIAL", 15),
//!     UnlockEvent::new("p2", "440", "FIRST_WIN", 16),
//!     UnlockEvent::new("p2", "440", "FLAWLESS", 90),
//! ];
//!
//! let data = TrainingData::from_events(&events);
//! let hyper = Hyperparameters::new()
//!     .architecture(Architecture::Recurrent)
//!     .embedding_dim(16)
//!     .num_epochs(5);
//!
//! let model = trainer::fit("440", &data.sequences, &data.achievements, hyper).unwrap();
//! let store = ModelStore::new("models");
//! store.save(&model).unwrap();
//!
//! let model = store.load_latest("440").unwrap();
//! let history = vec![HistoryItem::new("TUTORIAL", Some(10))];
//! let ranked = rank(&model, &history, ExcludePolicy::DropAll).unwrap();
//!
//! for (code, score) in ranked.iter() {
//!     println!("{}: {}", code, score);
//! }
//! ```
#[macro_use]
extern crate serde_derive;

#[macro_use]
extern crate itertools;

#[macro_use]
extern crate failure;

#[macro_use]
extern crate tracing;

extern crate chrono;
extern crate csv;
extern crate ndarray;
extern crate rand;
extern crate rayon;
extern crate rusqlite;
extern crate serde;
extern crate serde_json;
extern crate siphasher;

extern crate wyrm;

pub mod config;
pub mod data;
pub mod encoding;
pub mod evaluation;
pub mod models;
pub mod scoring;
pub mod source;
pub mod store;
pub mod trainer;

/// Alias for dense player indices.
pub type PlayerId = usize;
/// Alias for dense achievement indices. Index 0 is the padding sentinel.
pub type AchievementId = usize;
/// Alias for unlock timestamps, in seconds since the epoch. 0 means "not unlocked".
pub type Timestamp = u64;

/// The dense id reserved for padding and unknown entities.
pub const PADDING_ID: AchievementId = 0;

/// Identifier encoding error types.
#[derive(Debug, Fail, PartialEq, Eq)]
pub enum EncodingError {
    /// The raw identifier was not present when the map was built.
    #[fail(display = "Unknown identifier: {}", raw_id)]
    UnknownIdentifier {
        /// The offending raw identifier.
        raw_id: String,
    },
}

/// Model fitting error types.
#[derive(Debug, Fail, PartialEq, Eq)]
pub enum FittingError {
    /// Not enough achievements or usable sequences to learn from.
    #[fail(
        display = "Insufficient training data: {} achievements, {} usable sequences.",
        num_achievements, num_sequences
    )]
    InsufficientTrainingData {
        /// Number of distinct achievements in the corpus.
        num_achievements: usize,
        /// Number of sequences with at least one next-unlock pair.
        num_sequences: usize,
    },
    /// The sequences were built against a different achievement map.
    #[fail(
        display = "Sequences cover {} achievements but the achievement map has {}.",
        sequence_items, num_achievements
    )]
    IdentifierMapMismatch {
        /// Number of achievements in the map passed to `fit`.
        num_achievements: usize,
        /// Number of achievements the sequences were built against.
        sequence_items: usize,
    },
    /// A training pass diverged.
    #[fail(display = "Training loss became non-finite.")]
    NonFiniteLoss,
}

/// Prediction error types.
#[derive(Debug, Fail, PartialEq, Eq)]
pub enum PredictionError {
    /// Failed prediction due to numerical issues.
    #[fail(display = "Invalid prediction value: non-finite or not a number.")]
    InvalidPredictionValue,
    /// A history item is not part of the model's achievement universe.
    #[fail(display = "Achievement {} is unknown to the model.", code)]
    StaleCatalogMismatch {
        /// The offending achievement code.
        code: String,
    },
}

/// Model store error types.
#[derive(Debug, Fail)]
pub enum StoreError {
    /// No artifact exists for the game.
    #[fail(display = "No model found for game {}. Train a model first.", game_id)]
    ModelNotFound {
        /// The requested game.
        game_id: String,
    },
    /// An artifact with the same name was already written.
    #[fail(display = "Model artifact already exists: {}", path)]
    ArtifactExists {
        /// Path of the existing artifact.
        path: String,
    },
    /// Filesystem failure.
    #[fail(display = "Model store I/O error: {}", _0)]
    Io(#[cause] std::io::Error),
    /// The artifact could not be (de)serialized.
    #[fail(display = "Model serialization error: {}", _0)]
    Serialization(#[cause] serde_json::Error),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err)
    }
}

/// Trait describing models that can compute predictions given
/// a player's sequence of past unlocks.
pub trait OnlineRankingModel {
    /// The representation the model computes from past unlocks.
    type UserRepresentation: std::fmt::Debug;
    /// Number of achievements the model can score. Valid ids are
    /// `1..=num_items()`.
    fn num_items(&self) -> usize;
    /// Compute a player representation from past unlocks.
    fn user_representation(
        &self,
        item_ids: &[AchievementId],
    ) -> Result<Self::UserRepresentation, PredictionError>;
    /// Given a player representation, score `item_ids` according
    /// to how likely the player is to unlock them next.
    fn predict(
        &self,
        user: &Self::UserRepresentation,
        item_ids: &[AchievementId],
    ) -> Result<Vec<f32>, PredictionError>;
}
