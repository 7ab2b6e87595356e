//! Convolutional sequence encoder.
//!
//! Each position is encoded by a causal convolution over the embeddings of
//! the last `kernel_width` unlocks, with a residual connection to the
//! current embedding:
//! ```text
//! h_t = e_t + tanh(sum_k e_{t-k} W_k + b)
//! ```
//! Positions before the start of the sequence contribute nothing, so the
//! padding embedding is never read.
use std::sync::Arc;

use rand::Rng;

use wyrm;
use wyrm::{Arr, BoxedNode, Variable};

use super::sequence_model::{
    dense_init, embedding_init, score_item, SequenceGraph, SequenceModelParameters,
};

/// Parameters of the convolutional model.
#[derive(Debug, Serialize, Deserialize)]
pub struct Parameters {
    num_items: usize,
    max_sequence_length: usize,
    item_embedding: Arc<wyrm::HogwildParameter>,
    item_biases: Arc<wyrm::HogwildParameter>,
    kernels: Vec<Arc<wyrm::HogwildParameter>>,
    bias: Arc<wyrm::HogwildParameter>,
}

impl Parameters {
    pub(crate) fn new<R: Rng>(
        num_items: usize,
        max_sequence_length: usize,
        embedding_dim: usize,
        kernel_width: usize,
        rng: &mut R,
    ) -> Self {
        let item_embedding = Arc::new(wyrm::HogwildParameter::new(embedding_init(
            num_items + 1,
            embedding_dim,
            rng,
        )));
        let item_biases = Arc::new(wyrm::HogwildParameter::new(Arr::zeros((num_items + 1, 1))));
        let kernels = (0..kernel_width)
            .map(|_| {
                Arc::new(wyrm::HogwildParameter::new(dense_init(
                    embedding_dim,
                    embedding_dim,
                    rng,
                )))
            })
            .collect();
        let bias = Arc::new(wyrm::HogwildParameter::new(Arr::zeros((1, embedding_dim))));

        Parameters {
            num_items,
            max_sequence_length,
            item_embedding,
            item_biases,
            kernels,
            bias,
        }
    }

    fn encode(&self, input_embeddings: &[Variable<BoxedNode>]) -> Vec<Variable<BoxedNode>> {
        let kernels: Vec<_> = self
            .kernels
            .iter()
            .map(|kernel| wyrm::ParameterNode::shared(kernel.clone()))
            .collect();
        let bias = wyrm::ParameterNode::shared(self.bias.clone());

        input_embeddings
            .iter()
            .enumerate()
            .map(|(position, input)| {
                let mut activation = input.dot(&kernels[0]).boxed();

                for (offset, kernel) in kernels.iter().enumerate().skip(1) {
                    if offset > position {
                        break;
                    }

                    activation = (activation + input_embeddings[position - offset].dot(kernel)).boxed();
                }

                (input.clone() + (activation + bias.clone()).tanh()).boxed()
            })
            .collect()
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
            |input_embeddings| self.encode(input_embeddings),
        )
    }

    fn predict_single(&self, user: &[f32], item_idx: usize) -> f32 {
        score_item(&self.item_embedding, &self.item_biases, user, item_idx)
    }
}

#[cfg(test)]
mod tests {
    use super::super::sequence_model::{fit_sequence_model, predict, user_representation};
    use super::super::{Hyperparameters, Loss};
    use super::*;

    #[test]
    fn adaptive_fitting_reduces_loss() {
        let data: Vec<Vec<usize>> = (0..40)
            .map(|x| if x % 3 == 0 { vec![2, 1, 3] } else { vec![1, 2, 3, 4, 5] })
            .collect();
        let sequences: Vec<&[usize]> = data.iter().map(|x| x.as_slice()).collect();

        let hyper = Hyperparameters::new()
            .embedding_dim(8)
            .batch_size(8)
            .learning_rate(0.1)
            .loss(Loss::AdaptiveHinge)
            .num_epochs(25);
        let mut rng = hyper.rng();
        let params = Parameters::new(5, 5, 8, 3, &mut rng);

        let losses = fit_sequence_model(&sequences, &params, &hyper, &mut rng).unwrap();

        assert!(losses.iter().all(|x| x.is_finite()));
        assert!(losses.last().unwrap() < losses.first().unwrap());
    }

    #[test]
    fn kernel_wider_than_sequence() {
        let hyper = Hyperparameters::new().embedding_dim(4);
        let mut rng = hyper.rng();
        let params = Parameters::new(3, 3, 4, 8, &mut rng);

        let user = user_representation(&params, &[3]).unwrap();
        let scores = predict(&params, &user, &[1, 2, 3]).unwrap();

        assert_eq!(scores.len(), 3);
    }
}
