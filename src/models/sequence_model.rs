use std::sync::Arc;

use rand::distributions::{Distribution, Normal, Uniform};
use rand::prng::XorShiftRng;
use rand::Rng;

use ndarray::Axis;

use wyrm;
use wyrm::optim::Optimizer as Optim;
use wyrm::{Arr, BoxedNode, DataInput, Variable};

use super::{Hyperparameters, ImplicitUser, Loss};
use crate::{AchievementId, FittingError, PredictionError, PADDING_ID};

/// Embedding matrix whose padding row is zero.
pub fn embedding_init<T: Rng>(rows: usize, cols: usize, rng: &mut T) -> wyrm::Arr {
    let normal = Normal::new(0.0, 1.0 / cols as f64);
    Arr::from_shape_fn((rows, cols), |(row, _)| {
        if row == PADDING_ID {
            0.0
        } else {
            normal.sample(rng) as f32
        }
    })
}

pub fn dense_init<T: Rng>(rows: usize, cols: usize, rng: &mut T) -> wyrm::Arr {
    let normal = Normal::new(0.0, (2.0 / (rows + cols) as f64).sqrt());
    Arr::zeros((rows, cols)).map(|_| normal.sample(rng) as f32)
}

/// Score of a single item: dot product with its embedding plus its bias.
pub fn score_item(
    item_embedding: &wyrm::HogwildParameter,
    item_biases: &wyrm::HogwildParameter,
    user: &[f32],
    item_idx: usize,
) -> f32 {
    let embeddings = item_embedding.value();
    let biases = item_biases.value();

    let embedding = embeddings.subview(Axis(0), item_idx);
    let bias = biases[(item_idx, 0)];

    let dot = match embedding.as_slice() {
        Some(embedding) => wyrm::simd_dot(user, embedding),
        None => embedding.iter().zip(user).map(|(x, y)| x * y).sum(),
    };

    bias + dot
}

pub trait SequenceModelParameters {
    fn num_items(&self) -> usize;
    fn max_sequence_length(&self) -> usize;
    fn build(&self) -> SequenceGraph;
    fn predict_single(&self, user: &[f32], item_idx: usize) -> f32;
}

/// Computation graph unrolled over `max_sequence_length` positions.
///
/// Position `t` reads `inputs[t]`, produces `hidden_states[t]`, and is scored
/// against `outputs[t]` (the next unlock) and `negatives[t]`.
/// `summed_losses[t]` is the hinge loss summed over positions `0..=t`.
pub struct SequenceGraph {
    inputs: Vec<Variable<wyrm::IndexInputNode>>,
    outputs: Vec<Variable<wyrm::IndexInputNode>>,
    negatives: Vec<Variable<wyrm::IndexInputNode>>,
    hidden_states: Vec<Variable<BoxedNode>>,
    summed_losses: Vec<Variable<BoxedNode>>,
}

impl SequenceGraph {
    /// Unroll a graph, using `encoder` to turn the input embeddings into
    /// one hidden state per position.
    pub fn new<F>(
        item_embedding: &Arc<wyrm::HogwildParameter>,
        item_biases: &Arc<wyrm::HogwildParameter>,
        max_sequence_length: usize,
        encoder: F,
    ) -> Self
    where
        F: FnOnce(&[Variable<BoxedNode>]) -> Vec<Variable<BoxedNode>>,
    {
        let item_embeddings = wyrm::ParameterNode::shared(item_embedding.clone());
        let item_biases = wyrm::ParameterNode::shared(item_biases.clone());

        let inputs: Vec<_> = (0..max_sequence_length)
            .map(|_| wyrm::IndexInputNode::new(&vec![0; 1]))
            .collect();
        let outputs: Vec<_> = (0..max_sequence_length)
            .map(|_| wyrm::IndexInputNode::new(&vec![0; 1]))
            .collect();
        let negatives: Vec<_> = (0..max_sequence_length)
            .map(|_| wyrm::IndexInputNode::new(&vec![0; 1]))
            .collect();

        let input_embeddings: Vec<_> = inputs
            .iter()
            .map(|input| item_embeddings.index(input).boxed())
            .collect();
        let negative_embeddings: Vec<_> = negatives
            .iter()
            .map(|negative| item_embeddings.index(negative))
            .collect();
        let output_embeddings: Vec<_> = outputs
            .iter()
            .map(|output| item_embeddings.index(output))
            .collect();
        let output_biases: Vec<_> = outputs
            .iter()
            .map(|output| item_biases.index(output))
            .collect();
        let negative_biases: Vec<_> = negatives
            .iter()
            .map(|negative| item_biases.index(negative))
            .collect();

        let hidden_states = encoder(&input_embeddings);

        let positive_predictions: Vec<_> =
            izip!(hidden_states.iter(), output_embeddings.iter(), output_biases)
                .map(|(hidden_state, output_embedding, output_bias)| {
                    hidden_state.vector_dot(output_embedding) + output_bias
                })
                .collect();
        let negative_predictions: Vec<_> =
            izip!(hidden_states.iter(), negative_embeddings.iter(), negative_biases)
                .map(|(hidden_state, negative_embedding, negative_bias)| {
                    hidden_state.vector_dot(negative_embedding) + negative_bias
                })
                .collect();

        let losses: Vec<_> = positive_predictions
            .into_iter()
            .zip(negative_predictions.into_iter())
            .map(|(pos, neg)| (1.0 + neg - pos).relu().boxed())
            .collect();

        let mut summed_losses: Vec<Variable<BoxedNode>> = Vec::with_capacity(losses.len());

        for loss in losses {
            let summed = match summed_losses.last() {
                Some(previous) => (previous.clone() + loss).boxed(),
                None => loss,
            };
            summed_losses.push(summed);
        }

        SequenceGraph {
            inputs,
            outputs,
            negatives,
            hidden_states,
            summed_losses,
        }
    }
}

fn sample_negative(
    positive_idx: usize,
    negative_item_range: &Uniform<usize>,
    rng: &mut XorShiftRng,
) -> usize {
    loop {
        let negative_idx = negative_item_range.sample(rng);

        if negative_idx != positive_idx {
            return negative_idx;
        }
    }
}

/// Draw several negatives and keep the one the model currently ranks highest.
fn sample_adaptive_negative<T: SequenceModelParameters>(
    parameters: &T,
    hidden_state: &[f32],
    positive_idx: usize,
    num_samples: usize,
    negative_item_range: &Uniform<usize>,
    rng: &mut XorShiftRng,
) -> usize {
    let mut negative_idx = sample_negative(positive_idx, negative_item_range, rng);
    let mut negative_prediction = parameters.predict_single(hidden_state, negative_idx);

    for _ in 1..num_samples {
        let candidate_idx = sample_negative(positive_idx, negative_item_range, rng);
        let candidate_prediction = parameters.predict_single(hidden_state, candidate_idx);

        if candidate_prediction > negative_prediction {
            negative_idx = candidate_idx;
            negative_prediction = candidate_prediction;
        }
    }

    negative_idx
}

/// Fit the parameters on unpadded sequences, returning the mean
/// per-position loss of every pass.
pub fn fit_sequence_model<T: SequenceModelParameters>(
    sequences: &[&[AchievementId]],
    parameters: &T,
    hyper: &Hyperparameters,
    rng: &mut XorShiftRng,
) -> Result<Vec<f32>, FittingError> {
    let num_items = parameters.num_items();
    let max_sequence_length = parameters.max_sequence_length();

    let mut sequences: Vec<&[AchievementId]> = sequences
        .iter()
        .map(|item_ids| &item_ids[item_ids.len().saturating_sub(max_sequence_length)..])
        .filter(|item_ids| item_ids.len() >= 2)
        .collect();

    if num_items < 2 || sequences.is_empty() {
        return Err(FittingError::InsufficientTrainingData {
            num_achievements: num_items,
            num_sequences: sequences.len(),
        });
    }

    // Padding is never drawn as a negative.
    let negative_item_range = Uniform::new(1, num_items + 1);

    let mut model = parameters.build();
    let optimizer = hyper.build_optimizer();
    let model_parameters = match model.summed_losses.last() {
        Some(loss) => loss.parameters().to_vec(),
        None => Vec::new(),
    };

    let batch_size = hyper.get_batch_size();
    let loss_function = hyper.get_loss();
    let num_negative_samples = hyper.get_num_negative_samples();

    let mut epoch_losses = Vec::with_capacity(hyper.get_num_epochs());

    for epoch in 0..hyper.get_num_epochs() {
        rng.shuffle(&mut sequences);

        let mut loss_value = 0.0;
        let mut examples = 0;

        for batch in sequences.chunks(batch_size) {
            for &item_ids in batch {
                {
                    let SequenceGraph {
                        ref inputs,
                        ref outputs,
                        ref negatives,
                        ref hidden_states,
                        ..
                    } = model;

                    for (&input_idx, &output_idx, input, output, negative, hidden) in izip!(
                        item_ids,
                        item_ids.iter().skip(1),
                        inputs,
                        outputs,
                        negatives,
                        hidden_states
                    ) {
                        input.set_value(input_idx);

                        let negative_idx = match loss_function {
                            Loss::AdaptiveHinge => {
                                hidden.forward();
                                let hidden_state: Vec<f32> =
                                    hidden.value().iter().cloned().collect();

                                sample_adaptive_negative(
                                    parameters,
                                    &hidden_state,
                                    output_idx,
                                    num_negative_samples,
                                    &negative_item_range,
                                    rng,
                                )
                            }
                            Loss::Hinge => sample_negative(output_idx, &negative_item_range, rng),
                        };

                        output.set_value(output_idx);
                        negative.set_value(negative_idx);
                    }
                }

                // Get the loss at the end of the sequence.
                let loss_idx = item_ids.len() - 2;

                // Drop values cached while sampling negatives.
                if loss_function == Loss::AdaptiveHinge {
                    model.hidden_states[loss_idx].clear();
                }

                let loss = &mut model.summed_losses[loss_idx];
                loss.forward();
                loss_value += loss.value().scalar_sum();
                examples += loss_idx + 1;

                loss.backward(1.0 / (batch.len() * (loss_idx + 1)) as f32);
            }

            optimizer.step(&model_parameters);
        }

        let epoch_loss = loss_value / examples as f32;

        if !epoch_loss.is_finite() {
            return Err(FittingError::NonFiniteLoss);
        }

        debug!(epoch, loss = epoch_loss, "Finished training pass");
        epoch_losses.push(epoch_loss);
    }

    Ok(epoch_losses)
}

/// Run the unrolled graph over `item_ids` and return the final hidden state.
///
/// Only the most recent `max_sequence_length` items are read. An empty
/// history is represented by the padding embedding.
pub fn user_representation<T: SequenceModelParameters>(
    parameters: &T,
    item_ids: &[AchievementId],
) -> Result<ImplicitUser, PredictionError> {
    let model = parameters.build();

    let item_ids = &item_ids[item_ids.len().saturating_sub(parameters.max_sequence_length())..];

    for (&input_idx, input) in izip!(item_ids, &model.inputs) {
        input.set_value(input_idx);
    }

    // Select the hidden state after ingesting all the inputs.
    let hidden_state = model
        .hidden_states
        .get(item_ids.len().saturating_sub(1))
        .ok_or(PredictionError::InvalidPredictionValue)?;

    hidden_state.forward();

    let representation = hidden_state.value();

    Ok(ImplicitUser {
        user_embedding: representation.iter().cloned().collect(),
    })
}

pub fn predict<T: SequenceModelParameters>(
    parameters: &T,
    user: &ImplicitUser,
    item_ids: &[AchievementId],
) -> Result<Vec<f32>, PredictionError> {
    let user_slice = &user.user_embedding;

    item_ids
        .iter()
        .map(|&item_idx| {
            let prediction = parameters.predict_single(user_slice, item_idx);

            if prediction.is_finite() {
                Ok(prediction)
            } else {
                Err(PredictionError::InvalidPredictionValue)
            }
        })
        .collect()
}
