//! Models module.
use rand::prng::XorShiftRng;
use rand::{Rng, SeedableRng};

use wyrm;
use wyrm::optim::Optimizers;

use super::{AchievementId, OnlineRankingModel, PredictionError};

pub mod cnn;
pub mod lstm;
pub(crate) mod sequence_model;

use self::sequence_model::SequenceModelParameters;

/// The user representation used by implicit sequence models.
#[derive(Clone, Debug)]
pub struct ImplicitUser {
    user_embedding: Vec<f32>,
}

/// The loss used for training the model.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Loss {
    /// Pairwise hinge loss against one uniformly sampled negative.
    Hinge,
    /// Pairwise hinge loss against the highest scoring of several
    /// sampled negatives.
    AdaptiveHinge,
}

/// Optimizer user to train the model.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Optimizer {
    /// Adagrad.
    Adagrad,
    /// Adam.
    Adam,
}

/// Sequence encoder turning a prefix of unlocks into a hidden state.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Architecture {
    /// LSTM over item embeddings.
    Recurrent,
    /// Causal convolution over item embeddings.
    Convolutional,
}

/// Hyperparameters describing a sequence model and its training.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Hyperparameters {
    architecture: Architecture,
    loss: Loss,
    optimizer: Optimizer,
    embedding_dim: usize,
    num_epochs: usize,
    batch_size: usize,
    l2_penalty: f32,
    learning_rate: f32,
    kernel_width: usize,
    num_negative_samples: usize,
    seed: u64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Hyperparameters::new()
    }
}

impl Hyperparameters {
    /// Build new hyperparameters with default settings.
    pub fn new() -> Self {
        Hyperparameters {
            architecture: Architecture::Recurrent,
            loss: Loss::AdaptiveHinge,
            optimizer: Optimizer::Adagrad,
            embedding_dim: 32,
            num_epochs: 10,
            batch_size: 256,
            l2_penalty: 0.0,
            learning_rate: 0.01,
            kernel_width: 3,
            num_negative_samples: 5,
            seed: 42,
        }
    }

    /// Set the sequence encoder.
    pub fn architecture(mut self, architecture: Architecture) -> Self {
        self.architecture = architecture;
        self
    }

    /// Set the loss function.
    pub fn loss(mut self, loss: Loss) -> Self {
        self.loss = loss;
        self
    }

    /// Set the optimizer type.
    pub fn optimizer(mut self, optimizer: Optimizer) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Set the embedding dimensionality.
    pub fn embedding_dim(mut self, embedding_dim: usize) -> Self {
        self.embedding_dim = embedding_dim;
        self
    }

    /// Set the number of passes over the data.
    pub fn num_epochs(mut self, num_epochs: usize) -> Self {
        self.num_epochs = num_epochs;
        self
    }

    /// Set the number of sequences per gradient step.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the L2 penalty.
    pub fn l2_penalty(mut self, l2_penalty: f32) -> Self {
        self.l2_penalty = l2_penalty;
        self
    }

    /// Set the learning rate.
    pub fn learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Set the width of the convolutional kernel.
    pub fn kernel_width(mut self, kernel_width: usize) -> Self {
        self.kernel_width = kernel_width;
        self
    }

    /// Set how many negatives the adaptive loss draws per position.
    pub fn num_negative_samples(mut self, num_negative_samples: usize) -> Self {
        self.num_negative_samples = num_negative_samples;
        self
    }

    /// Set the random seed controlling initialisation, shuffling and
    /// negative sampling.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// The sequence encoder.
    pub fn get_architecture(&self) -> Architecture {
        self.architecture
    }

    /// The loss function.
    pub fn get_loss(&self) -> Loss {
        self.loss
    }

    /// The number of passes over the data.
    pub fn get_num_epochs(&self) -> usize {
        self.num_epochs
    }

    /// The number of sequences per gradient step.
    pub fn get_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }

    /// The number of negatives drawn per position by the adaptive loss.
    pub fn get_num_negative_samples(&self) -> usize {
        self.num_negative_samples.max(1)
    }

    /// The random seed.
    pub fn get_seed(&self) -> u64 {
        self.seed
    }

    /// A random number generator seeded from `seed`.
    pub fn rng(&self) -> XorShiftRng {
        let mut seed = [0; 16];

        for (idx, byte) in seed.iter_mut().enumerate() {
            *byte = (self.seed.rotate_left(8 * idx as u32) & 0xff) as u8 ^ 0x5a;
        }

        XorShiftRng::from_seed(seed)
    }

    pub(crate) fn build_optimizer(&self) -> Optimizers {
        match self.optimizer {
            Optimizer::Adagrad => Optimizers::Adagrad(
                wyrm::optim::Adagrad::new()
                    .learning_rate(self.learning_rate)
                    .l2_penalty(self.l2_penalty),
            ),

            Optimizer::Adam => Optimizers::Adam(
                wyrm::optim::Adam::new()
                    .learning_rate(self.learning_rate)
                    .l2_penalty(self.l2_penalty),
            ),
        }
    }

    /// Initialise model parameters for `num_items` achievements and
    /// sequences of up to `max_sequence_length` unlocks.
    pub(crate) fn build_params<R: Rng>(
        &self,
        num_items: usize,
        max_sequence_length: usize,
        rng: &mut R,
    ) -> ModelParameters {
        match self.architecture {
            Architecture::Recurrent => ModelParameters::Recurrent(lstm::Parameters::new(
                num_items,
                max_sequence_length,
                self.embedding_dim,
                rng,
            )),
            Architecture::Convolutional => {
                ModelParameters::Convolutional(cnn::Parameters::new(
                    num_items,
                    max_sequence_length,
                    self.embedding_dim,
                    self.kernel_width.max(1),
                    rng,
                ))
            }
        }
    }
}

/// Fitted parameters of either sequence encoder.
#[derive(Debug, Serialize, Deserialize)]
pub enum ModelParameters {
    /// Recurrent parameters.
    Recurrent(lstm::Parameters),
    /// Convolutional parameters.
    Convolutional(cnn::Parameters),
}

impl ModelParameters {
    /// Number of achievements the model scores, excluding padding.
    pub fn num_items(&self) -> usize {
        match self {
            ModelParameters::Recurrent(params) => params.num_items(),
            ModelParameters::Convolutional(params) => params.num_items(),
        }
    }
}

impl OnlineRankingModel for ModelParameters {
    type UserRepresentation = ImplicitUser;

    fn num_items(&self) -> usize {
        ModelParameters::num_items(self)
    }

    fn user_representation(
        &self,
        item_ids: &[AchievementId],
    ) -> Result<Self::UserRepresentation, PredictionError> {
        match self {
            ModelParameters::Recurrent(params) => {
                sequence_model::user_representation(params, item_ids)
            }
            ModelParameters::Convolutional(params) => {
                sequence_model::user_representation(params, item_ids)
            }
        }
    }

    fn predict(
        &self,
        user: &Self::UserRepresentation,
        item_ids: &[AchievementId],
    ) -> Result<Vec<f32>, PredictionError> {
        match self {
            ModelParameters::Recurrent(params) => sequence_model::predict(params, user, item_ids),
            ModelParameters::Convolutional(params) => {
                sequence_model::predict(params, user, item_ids)
            }
        }
    }
}
