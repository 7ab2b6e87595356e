//! Holdout evaluation of next-unlock rankings.
use rayon::prelude::*;

use super::data::PlayerSequences;
use super::scoring::{rank_items, ExcludePolicy};
use super::{OnlineRankingModel, PredictionError};

/// Mean reciprocal rank of each player's final unlock, ranked from the
/// unlocks that precede it.
///
/// Players with fewer than two unlocks, or whose final unlock is outside
/// the model's universe, are skipped. Returns 0 if no player can be
/// evaluated.
pub fn mrr_score<T: OnlineRankingModel + Sync>(
    model: &T,
    test: &PlayerSequences,
) -> Result<f32, PredictionError> {
    let sequences: Vec<_> = test
        .iter()
        .map(|(_, seq)| seq.items())
        .filter(|item_ids| item_ids.len() >= 2)
        .collect();

    let reciprocal_ranks: Vec<Option<f32>> = sequences
        .par_iter()
        .map(|item_ids| {
            let (test_item, train_items) = match item_ids.split_last() {
                Some(x) => x,
                None => return Ok(None),
            };

            let ranked = rank_items(model, train_items, ExcludePolicy::DropAll)?;

            Ok(ranked
                .iter()
                .position(|&(item_id, _)| item_id == *test_item)
                .map(|rank| 1.0 / (rank + 1) as f32))
        })
        .collect::<Result<_, PredictionError>>()?;

    let reciprocal_ranks: Vec<f32> = reciprocal_ranks.into_iter().filter_map(|x| x).collect();

    if reciprocal_ranks.is_empty() {
        return Ok(0.0);
    }

    Ok(reciprocal_ranks.iter().sum::<f32>() / reciprocal_ranks.len() as f32)
}

#[cfg(test)]
mod tests {
    use rand::prng::XorShiftRng;
    use rand::SeedableRng;

    use super::*;
    use crate::data::{player_based_split, TrainingData, UnlockEvent};
    use crate::models::{Architecture, Hyperparameters};
    use crate::{trainer, AchievementId};

    /// Always prefers lower achievement ids.
    struct Popularity {
        num_items: usize,
    }

    impl OnlineRankingModel for Popularity {
        type UserRepresentation = ();

        fn num_items(&self) -> usize {
            self.num_items
        }

        fn user_representation(&self, _: &[AchievementId]) -> Result<(), PredictionError> {
            Ok(())
        }

        fn predict(&self, _: &(), item_ids: &[AchievementId]) -> Result<Vec<f32>, PredictionError> {
            Ok(item_ids.iter().map(|&x| -(x as f32)).collect())
        }
    }

    fn events() -> Vec<UnlockEvent> {
        let mut events = Vec::new();

        for player in 0..100 {
            let player_id = format!("p{}", player);
            let num_unlocks = 2 + player % 4;
            for (idx, code) in ["a1", "a2", "a3", "a4", "a5"]
                .iter()
                .take(num_unlocks)
                .enumerate()
            {
                events.push(UnlockEvent::new(
                    player_id.as_str(),
                    "g",
                    *code,
                    idx as u64 + 1,
                ));
            }
        }

        events
    }

    #[test]
    fn mrr_of_fixed_ranking() {
        let events = vec![
            // Final unlock ranks first among the remaining candidates.
            UnlockEvent::new("p1", "g", "a1", 1),
            UnlockEvent::new("p1", "g", "a2", 2),
            // Final unlock ranks second.
            UnlockEvent::new("p2", "g", "a1", 1),
            UnlockEvent::new("p2", "g", "a3", 2),
            // Too short to evaluate.
            UnlockEvent::new("p3", "g", "a1", 1),
        ];
        let data = TrainingData::from_events(&events);

        let mrr = mrr_score(&Popularity { num_items: 3 }, &data.sequences).unwrap();

        assert!((mrr - 0.75).abs() < 1e-6);
    }

    #[test]
    fn targets_outside_the_model_are_skipped() {
        let events = vec![
            UnlockEvent::new("p1", "g", "a1", 1),
            UnlockEvent::new("p1", "g", "a2", 2),
            // a3 is encoded as 3, past a model that only knows 2 items.
            UnlockEvent::new("p2", "g", "a1", 1),
            UnlockEvent::new("p2", "g", "a3", 2),
        ];
        let data = TrainingData::from_events(&events);

        let mrr = mrr_score(&Popularity { num_items: 2 }, &data.sequences).unwrap();

        assert!((mrr - 1.0).abs() < 1e-6);
    }

    #[test]
    fn mrr_without_evaluable_players_is_zero() {
        let data = TrainingData::from_events(&[UnlockEvent::new("p1", "g", "a1", 1)]);

        assert_eq!(
            mrr_score(&Popularity { num_items: 1 }, &data.sequences).unwrap(),
            0.0
        );
    }

    #[test]
    fn trained_model_scores_holdout_players() {
        let data = TrainingData::from_events(&events());
        let mut rng = XorShiftRng::from_seed([42; 16]);
        let (train, test) = player_based_split(&data.sequences, &mut rng, 0.2);

        let hyper = Hyperparameters::new()
            .architecture(Architecture::Recurrent)
            .embedding_dim(16)
            .learning_rate(0.1)
            .batch_size(16)
            .num_epochs(30);

        let model = trainer::fit("g", &train, &data.achievements, hyper).unwrap();
        let mrr = mrr_score(&model, &test).unwrap();

        assert!(test.len() > 0);
        assert!(mrr > 0.0 && mrr <= 1.0);
    }
}
