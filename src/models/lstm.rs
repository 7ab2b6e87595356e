//! Recurrent sequence encoder.
//!
//! The model estimates item embeddings, item biases (capturing achievement
//! popularity) and the weights of an LSTM layer. The representation of a
//! player after `t` unlocks is the LSTM hidden state after reading the
//! embeddings of those unlocks in order; the score of an achievement is the
//! dot product of that state with the achievement's embedding plus its bias.
use std::sync::Arc;

use rand::Rng;

use wyrm;
use wyrm::nn;
use wyrm::Arr;

use super::sequence_model::{embedding_init, score_item, SequenceGraph, SequenceModelParameters};

/// Parameters of the recurrent model.
#[derive(Debug, Serialize, Deserialize)]
pub struct Parameters {
    num_items: usize,
    max_sequence_length: usize,
    item_embedding: Arc<wyrm::HogwildParameter>,
    item_biases: Arc<wyrm::HogwildParameter>,
    lstm: nn::lstm::Parameters,
}

impl Parameters {
    pub(crate) fn new<R: Rng>(
        num_items: usize,
        max_sequence_length: usize,
        embedding_dim: usize,
        rng: &mut R,
    ) -> Self {
        let item_embedding = Arc::new(wyrm::HogwildParameter::new(embedding_init(
            num_items + 1,
            embedding_dim,
            rng,
        )));
        let item_biases = Arc::new(wyrm::HogwildParameter::new(Arr::zeros((num_items + 1, 1))));
        let lstm = nn::lstm::Parameters::new(embedding_dim, embedding_dim, rng);

        Parameters {
            num_items,
            max_sequence_length,
            item_embedding,
            item_biases,
            lstm,
        }
    }
}

impl SequenceModelParameters for Parameters {
    fn num_items(&self) -> usize {
        self.num_items
    }

    fn max_sequence_length(&self) -> usize {
        self.max_sequence_length
    }

    fn build(&self) -> SequenceGraph {
        SequenceGraph::new(
            &self.item_embedding,
            &self.item_biases,
            self.max_sequence_length,
            |input_embeddings| {
                let layer = self.lstm.build();
                layer.forward(input_embeddings)
            },
        )
    }

    fn predict_single(&self, user: &[f32], item_idx: usize) -> f32 {
        score_item(&self.item_embedding, &self.item_biases, user, item_idx)
    }
}
