//! Ranking not-yet-unlocked achievements for a single player.
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use super::data::{AchievementCatalogEntry, PlayerSequence, UnlockEvent};
use super::trainer::TrainedModel;
use super::{AchievementId, OnlineRankingModel, PredictionError, Timestamp, PADDING_ID};

/// Which history items are removed from the candidate ranking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExcludePolicy {
    /// Exclude every history item except the most recent one. Used when
    /// the most recent unlock is the evaluation target.
    DropLast,
    /// Exclude every history item.
    DropAll,
}

/// One entry of a player's unlock history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    /// Achievement code.
    pub code: String,
    /// Unlock time, if known. `Some(0)` means the achievement is locked.
    pub timestamp: Option<Timestamp>,
}

impl HistoryItem {
    /// Build a new history item.
    pub fn new<S: Into<String>>(code: S, timestamp: Option<Timestamp>) -> Self {
        HistoryItem {
            code: code.into(),
            timestamp,
        }
    }
}

/// The history of `player_id` in `events`, in event order.
pub fn history_from_events(events: &[UnlockEvent], player_id: &str) -> Vec<HistoryItem> {
    events
        .iter()
        .filter(|event| event.player_id() == player_id)
        .map(|event| HistoryItem::new(event.achievement_code(), Some(event.unlock_timestamp())))
        .collect()
}

/// Achievement codes with their scores, best first.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RankedRecommendation {
    items: Vec<(String, f32)>,
    stale_codes: Vec<String>,
}

impl RankedRecommendation {
    /// Ranked `(achievement_code, score)` pairs.
    pub fn items(&self) -> &[(String, f32)] {
        &self.items
    }

    /// History codes that were dropped because the model does not know them.
    pub fn stale_codes(&self) -> &[String] {
        &self.stale_codes
    }

    /// Whether there is nothing to recommend.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of ranked achievements.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Iterate over `(achievement_code, score)` pairs, best first.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.items.iter().map(|&(ref code, score)| (code.as_str(), score))
    }

    /// Keep only the `n` best entries.
    pub fn truncate(&mut self, n: usize) {
        self.items.truncate(n);
    }
}

/// Score every achievement the model knows given the player's oldest first
/// `history`, drop the excluded ones and sort the rest by descending score,
/// ties broken by ascending id.
///
/// Only the most recent `model.num_items()` unlocks feed the representation,
/// but exclusion covers the whole history. Ids outside the model's universe
/// are ignored.
pub fn rank_items<T: OnlineRankingModel>(
    model: &T,
    history: &[AchievementId],
    exclude_policy: ExcludePolicy,
) -> Result<Vec<(AchievementId, f32)>, PredictionError> {
    let num_items = model.num_items();
    let history: Vec<AchievementId> = history
        .iter()
        .cloned()
        .filter(|&item_id| item_id != PADDING_ID && item_id <= num_items)
        .collect();

    let window = &history[history.len().saturating_sub(num_items)..];
    let user = model.user_representation(window)?;

    // Includes the padding slot so ids index the scores directly.
    let candidates: Vec<AchievementId> = (0..num_items + 1).collect();
    let scores = model.predict(&user, &candidates)?;

    let excluded: HashSet<AchievementId> = match exclude_policy {
        ExcludePolicy::DropLast => history[..history.len().saturating_sub(1)]
            .iter()
            .cloned()
            .collect(),
        ExcludePolicy::DropAll => history.iter().cloned().collect(),
    };

    let mut ranked: Vec<(AchievementId, f32)> = scores
        .into_iter()
        .enumerate()
        .skip(1)
        .filter(|&(item_id, _)| !excluded.contains(&item_id))
        .collect();

    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });

    Ok(ranked)
}

/// Rank the achievements a player is most likely to unlock next.
///
/// History codes unknown to the model are dropped and reported on the result
/// instead of failing the call. If every history item carries a timestamp
/// the history is ordered by it, otherwise input order is taken as
/// chronological.
pub fn rank(
    model: &TrainedModel,
    history: &[HistoryItem],
    exclude_policy: ExcludePolicy,
) -> Result<RankedRecommendation, PredictionError> {
    let achievements = model.achievements();
    let mut stale_codes = Vec::new();
    let mut unlocks = Vec::with_capacity(history.len());

    for item in history {
        if item.timestamp == Some(0) {
            continue;
        }

        match achievements.translate(&item.code) {
            Ok(item_id) => unlocks.push((item.timestamp, item_id)),
            Err(_) => {
                let err = PredictionError::StaleCatalogMismatch {
                    code: item.code.clone(),
                };
                warn!(game_id = model.game_id(), "{}", err);
                stale_codes.push(item.code.clone());
            }
        }
    }

    let unlocks: Vec<(Timestamp, AchievementId)> =
        if unlocks.iter().all(|&(timestamp, _)| timestamp.is_some()) {
            unlocks
                .into_iter()
                .map(|(timestamp, item_id)| (timestamp.unwrap_or(0), item_id))
                .collect()
        } else {
            unlocks
                .into_iter()
                .enumerate()
                .map(|(position, (_, item_id))| (position as Timestamp, item_id))
                .collect()
        };

    // Duplicate rows can make the history longer than the universe. The
    // full history is kept so every unlocked achievement is excluded.
    let capacity = unlocks.len().max(model.num_items());
    let sequence = PlayerSequence::from_unlocks(unlocks, capacity);
    let ranked = rank_items(model, sequence.items(), exclude_policy)?;

    let items = ranked
        .into_iter()
        .filter_map(|(item_id, score)| {
            achievements
                .raw_id(item_id)
                .map(|code| (code.to_owned(), score))
        })
        .collect();

    Ok(RankedRecommendation { items, stale_codes })
}

/// A ranked achievement joined with its catalog metadata.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DecoratedRecommendation {
    /// Achievement code.
    pub achievement_code: String,
    /// Model score.
    pub score: f32,
    /// Display name, if the catalog knows the achievement.
    pub display_name: Option<String>,
    /// Description, if the catalog knows the achievement.
    pub description: Option<String>,
    /// Hidden flag, if the catalog knows the achievement.
    pub hidden: Option<bool>,
}

/// Left-join ranked achievements with the catalog, keeping the ranking order.
pub fn decorate(
    ranked: &RankedRecommendation,
    catalog: &[AchievementCatalogEntry],
) -> Vec<DecoratedRecommendation> {
    let entries: HashMap<&str, &AchievementCatalogEntry> = catalog
        .iter()
        .map(|entry| (entry.achievement_code.as_str(), entry))
        .collect();

    ranked
        .iter()
        .map(|(code, score)| {
            let entry = entries.get(code);

            DecoratedRecommendation {
                achievement_code: code.to_owned(),
                score,
                display_name: entry.map(|x| x.display_name.clone()),
                description: entry.map(|x| x.description.clone()),
                hidden: entry.map(|x| x.hidden),
            }
        })
        .collect()
}
