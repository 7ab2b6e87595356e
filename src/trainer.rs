//! Fitting sequence models into persistable artifacts.
use chrono::{NaiveDateTime, Timelike, Utc};

use super::data::PlayerSequences;
use super::encoding::IdentifierMap;
use super::models::sequence_model::fit_sequence_model;
use super::models::{Hyperparameters, ImplicitUser, ModelParameters};
use super::{AchievementId, FittingError, OnlineRankingModel, PredictionError};

/// A fitted model for one game, bundled with the achievement identifier
/// map it was trained against.
#[derive(Debug, Serialize, Deserialize)]
pub struct TrainedModel {
    game_id: String,
    created_at: NaiveDateTime,
    hyper: Hyperparameters,
    params: ModelParameters,
    achievements: IdentifierMap,
    losses: Vec<f32>,
}

impl TrainedModel {
    /// The game this model was trained for.
    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    /// Creation time (UTC, whole seconds).
    pub fn created_at(&self) -> NaiveDateTime {
        self.created_at
    }

    /// Override the creation time, truncated to whole seconds.
    pub fn with_created_at(mut self, created_at: NaiveDateTime) -> Self {
        self.created_at = created_at.with_nanosecond(0).unwrap_or(created_at);
        self
    }

    /// Hyperparameters the model was trained with.
    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyper
    }

    /// The achievement identifier map of the training run.
    pub fn achievements(&self) -> &IdentifierMap {
        &self.achievements
    }

    /// Number of achievements the model ranks.
    pub fn num_items(&self) -> usize {
        self.params.num_items()
    }

    /// Mean per-position training loss of each pass.
    pub fn losses(&self) -> &[f32] {
        &self.losses
    }
}

impl OnlineRankingModel for TrainedModel {
    type UserRepresentation = ImplicitUser;

    fn num_items(&self) -> usize {
        TrainedModel::num_items(self)
    }

    fn user_representation(
        &self,
        item_ids: &[AchievementId],
    ) -> Result<Self::UserRepresentation, PredictionError> {
        self.params.user_representation(item_ids)
    }

    fn predict(
        &self,
        user: &Self::UserRepresentation,
        item_ids: &[AchievementId],
    ) -> Result<Vec<f32>, PredictionError> {
        self.params.predict(user, item_ids)
    }
}

/// Fit a model on the sequences of one training run.
///
/// Fails with `InsufficientTrainingData` when the game has fewer than two
/// achievements or no player has at least two unlocks, and with
/// `IdentifierMapMismatch` when `sequences` were not built against
/// `achievements`.
pub fn fit(
    game_id: &str,
    sequences: &PlayerSequences,
    achievements: &IdentifierMap,
    hyper: Hyperparameters,
) -> Result<TrainedModel, FittingError> {
    let num_items = achievements.len();

    if sequences.num_items() != num_items {
        return Err(FittingError::IdentifierMapMismatch {
            num_achievements: num_items,
            sequence_items: sequences.num_items(),
        });
    }

    let training_sequences = sequences.training_sequences();

    if num_items < 2 || training_sequences.is_empty() {
        return Err(FittingError::InsufficientTrainingData {
            num_achievements: num_items,
            num_sequences: training_sequences.len(),
        });
    }

    info!(
        game_id,
        num_achievements = num_items,
        num_sequences = training_sequences.len(),
        architecture = ?hyper.get_architecture(),
        loss = ?hyper.get_loss(),
        "Fitting sequence model"
    );

    let mut rng = hyper.rng();
    let max_sequence_length = sequences.capacity().max(num_items);
    let params = hyper.build_params(num_items, max_sequence_length, &mut rng);

    let losses = match params {
        ModelParameters::Recurrent(ref params) => {
            fit_sequence_model(&training_sequences, params, &hyper, &mut rng)?
        }
        ModelParameters::Convolutional(ref params) => {
            fit_sequence_model(&training_sequences, params, &hyper, &mut rng)?
        }
    };

    if let Some(loss) = losses.last() {
        info!(game_id, loss = *loss, "Finished fitting");
    }

    let now = Utc::now().naive_utc();

    Ok(TrainedModel {
        game_id: game_id.to_owned(),
        created_at: now.with_nanosecond(0).unwrap_or(now),
        hyper,
        params,
        achievements: achievements.clone(),
        losses,
    })
}
