//! Unlock events, catalog entries and per-player sequence construction.
use std::collections::{BTreeMap, HashSet};
use std::hash::Hasher;

use rand::Rng;

use siphasher::sip::SipHasher;

use super::encoding::IdentifierMap;
use super::{AchievementId, PlayerId, Timestamp, PADDING_ID};

/// A single achievement unlock as recorded by the event source.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnlockEvent {
    player_id: String,
    game_id: String,
    achievement_code: String,
    unlock_timestamp: Timestamp,
}

impl UnlockEvent {
    /// Build a new event.
    pub fn new<P, G, A>(player_id: P, game_id: G, achievement_code: A, unlock_timestamp: Timestamp) -> Self
    where
        P: Into<String>,
        G: Into<String>,
        A: Into<String>,
    {
        UnlockEvent {
            player_id: player_id.into(),
            game_id: game_id.into(),
            achievement_code: achievement_code.into(),
            unlock_timestamp,
        }
    }

    /// Raw player identifier.
    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    /// Raw game identifier.
    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    /// Raw achievement code.
    pub fn achievement_code(&self) -> &str {
        &self.achievement_code
    }

    /// Unlock time in seconds since the epoch; 0 if never unlocked.
    pub fn unlock_timestamp(&self) -> Timestamp {
        self.unlock_timestamp
    }

    /// Whether the unlock actually happened.
    pub fn is_unlocked(&self) -> bool {
        self.unlock_timestamp != 0
    }
}

/// Display metadata for one achievement of a game.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AchievementCatalogEntry {
    /// Achievement code, as used in unlock events.
    pub achievement_code: String,
    /// Human readable name.
    pub display_name: String,
    /// Human readable description.
    pub description: String,
    /// Whether the game hides the achievement until unlocked.
    pub hidden: bool,
}

/// Keep only the events of the first `num_players` distinct players,
/// in first-seen order.
pub fn take_players(events: Vec<UnlockEvent>, num_players: usize) -> Vec<UnlockEvent> {
    let mut seen = HashSet::new();

    events
        .into_iter()
        .filter(|event| {
            if seen.contains(event.player_id()) {
                true
            } else if seen.len() < num_players {
                seen.insert(event.player_id().to_owned());
                true
            } else {
                false
            }
        })
        .collect()
}

/// Chronological achievement sequence of one player, left-padded with
/// the padding id to a fixed capacity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlayerSequence {
    item_ids: Vec<AchievementId>,
    len: usize,
}

impl PlayerSequence {
    /// Build a sequence from `(timestamp, achievement)` pairs.
    ///
    /// Pairs are stably sorted by timestamp, so ties keep their input order.
    /// Only the most recent `capacity` unlocks are kept.
    pub fn from_unlocks(mut unlocks: Vec<(Timestamp, AchievementId)>, capacity: usize) -> Self {
        unlocks.sort_by_key(|&(timestamp, _)| timestamp);

        let body = &unlocks[unlocks.len().saturating_sub(capacity)..];
        let mut item_ids = vec![PADDING_ID; capacity - body.len()];
        item_ids.extend(body.iter().map(|&(_, item_id)| item_id));

        PlayerSequence {
            item_ids,
            len: body.len(),
        }
    }

    /// The full padded sequence.
    pub fn padded(&self) -> &[AchievementId] {
        &self.item_ids
    }

    /// The unlocked achievements, oldest first, without padding.
    pub fn items(&self) -> &[AchievementId] {
        &self.item_ids[self.item_ids.len() - self.len..]
    }

    /// Number of unlocks in the sequence.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the player has no qualifying unlocks.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Padded length.
    pub fn capacity(&self) -> usize {
        self.item_ids.len()
    }
}

/// One sequence per player of a single training run.
#[derive(Clone, Debug)]
pub struct PlayerSequences {
    num_items: usize,
    capacity: usize,
    sequences: BTreeMap<PlayerId, PlayerSequence>,
}

impl PlayerSequences {
    /// Number of distinct achievements (excluding padding).
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// Padded length of every sequence.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of players.
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    /// Whether there are no players at all.
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Sequence of a single player.
    pub fn get(&self, player_id: PlayerId) -> Option<&PlayerSequence> {
        self.sequences.get(&player_id)
    }

    /// Iterate over players in dense id order.
    pub fn iter(&self) -> impl Iterator<Item = (PlayerId, &PlayerSequence)> {
        self.sequences.iter().map(|(&player_id, seq)| (player_id, seq))
    }

    /// Unpadded sequences that carry at least one next-unlock pair,
    /// in player order.
    pub fn training_sequences(&self) -> Vec<&[AchievementId]> {
        self.sequences
            .values()
            .map(|seq| seq.items())
            .filter(|item_ids| item_ids.len() >= 2)
            .collect()
    }

    /// Split players into the ones matching `func` and the rest.
    pub fn split_by<F: Fn(PlayerId) -> bool>(&self, func: F) -> (Self, Self) {
        let (head, tail): (BTreeMap<_, _>, BTreeMap<_, _>) = self
            .sequences
            .iter()
            .map(|(&player_id, seq)| (player_id, seq.clone()))
            .partition(|&(player_id, _)| func(player_id));

        (
            PlayerSequences {
                num_items: self.num_items,
                capacity: self.capacity,
                sequences: head,
            },
            PlayerSequences {
                num_items: self.num_items,
                capacity: self.capacity,
                sequences: tail,
            },
        )
    }
}

/// Build one padded sequence per encoded player.
///
/// Events that were never unlocked or whose identifiers are missing from the
/// maps are dropped. Players without qualifying events get an all-padding
/// sequence.
pub fn build_sequences(
    events: &[UnlockEvent],
    players: &IdentifierMap,
    achievements: &IdentifierMap,
    capacity: usize,
) -> PlayerSequences {
    let mut grouped: Vec<Vec<(Timestamp, AchievementId)>> = vec![Vec::new(); players.len() + 1];
    let mut num_unknown = 0;
    let mut num_locked = 0;

    for event in events {
        if !event.is_unlocked() {
            num_locked += 1;
            continue;
        }

        match (
            players.translate(event.player_id()),
            achievements.translate(event.achievement_code()),
        ) {
            (Ok(player_id), Ok(item_id)) => {
                grouped[player_id].push((event.unlock_timestamp(), item_id))
            }
            _ => num_unknown += 1,
        }
    }

    if num_unknown > 0 || num_locked > 0 {
        debug!(num_unknown, num_locked, "Dropped events while building sequences");
    }

    let sequences = grouped
        .into_iter()
        .enumerate()
        .skip(1)
        .map(|(player_id, unlocks)| (player_id, PlayerSequence::from_unlocks(unlocks, capacity)))
        .collect();

    PlayerSequences {
        num_items: achievements.len(),
        capacity,
        sequences,
    }
}

/// Identifier maps and sequences produced from one interaction table.
#[derive(Clone, Debug)]
pub struct TrainingData {
    /// Player identifier map.
    pub players: IdentifierMap,
    /// Achievement identifier map.
    pub achievements: IdentifierMap,
    /// One sequence per player, capacity equal to the number of achievements.
    pub sequences: PlayerSequences,
}

impl TrainingData {
    /// Encode events and build sequences.
    pub fn from_events(events: &[UnlockEvent]) -> Self {
        let players = IdentifierMap::encode(events.iter().map(|x| x.player_id()));
        let achievements = IdentifierMap::encode(events.iter().map(|x| x.achievement_code()));
        let capacity = achievements.len();
        let sequences = build_sequences(events, &players, &achievements, capacity);

        info!(
            num_events = events.len(),
            num_players = players.len(),
            num_achievements = achievements.len(),
            "Encoded unlock events"
        );

        TrainingData {
            players,
            achievements,
            sequences,
        }
    }
}

/// Randomly split players into train and test sets.
///
/// Each player lands in the test set with probability `test_fraction`.
pub fn player_based_split<R: Rng>(
    sequences: &PlayerSequences,
    rng: &mut R,
    test_fraction: f32,
) -> (PlayerSequences, PlayerSequences) {
    let denominator = 100_000;
    let train_cutoff = (test_fraction * denominator as f32) as u64;

    let (key_0, key_1) = (rng.gen::<u64>(), rng.gen::<u64>());

    let is_train = |player_id: PlayerId| {
        let mut hasher = SipHasher::new_with_keys(key_0, key_1);
        hasher.write_usize(player_id);
        hasher.finish() % denominator >= train_cutoff
    };

    sequences.split_by(is_train)
}

#[cfg(test)]
mod tests {
    use rand::prng::XorShiftRng;
    use rand::SeedableRng;

    use super::*;

    fn build(events: &[UnlockEvent]) -> TrainingData {
        TrainingData::from_events(events)
    }

    #[test]
    fn locked_events_are_dropped() {
        let events = vec![
            UnlockEvent::new("p1", "g", "a1", 10),
            UnlockEvent::new("p1", "g", "a2", 20),
            UnlockEvent::new("p1", "g", "a3", 0),
        ];
        let data = build(&events);

        assert_eq!(data.achievements.len(), 3);

        let seq = data.sequences.get(1).unwrap();
        assert_eq!(seq.padded(), &[0, 1, 2]);
        assert_eq!(seq.items(), &[1, 2]);
    }

    #[test]
    fn sequences_are_sorted_by_timestamp() {
        let events = vec![
            UnlockEvent::new("p1", "g", "a1", 30),
            UnlockEvent::new("p1", "g", "a2", 10),
            UnlockEvent::new("p2", "g", "a3", 5),
            UnlockEvent::new("p1", "g", "a3", 20),
        ];
        let data = build(&events);

        assert_eq!(data.sequences.get(1).unwrap().items(), &[2, 3, 1]);
        assert_eq!(data.sequences.get(2).unwrap().padded(), &[0, 0, 3]);
    }

    #[test]
    fn timestamp_ties_keep_input_order() {
        let events = vec![
            UnlockEvent::new("p1", "g", "a1", 10),
            UnlockEvent::new("p1", "g", "a2", 5),
            UnlockEvent::new("p1", "g", "a3", 10),
            UnlockEvent::new("p1", "g", "a4", 10),
        ];
        let data = build(&events);

        assert_eq!(data.sequences.get(1).unwrap().items(), &[2, 1, 3, 4]);
    }

    #[test]
    fn overflow_keeps_most_recent_unlocks() {
        let seq = PlayerSequence::from_unlocks(vec![(1, 5), (4, 2), (2, 7), (3, 1)], 3);

        assert_eq!(seq.padded(), &[7, 1, 2]);
        assert_eq!(seq.len(), 3);
    }

    #[test]
    fn stripping_padding_reproduces_chronology() {
        let unlocks = vec![(50, 4), (10, 1), (40, 3), (20, 2), (30, 5)];
        let seq = PlayerSequence::from_unlocks(unlocks.clone(), 8);

        let stripped: Vec<_> = seq.padded().iter().cloned().filter(|&x| x != 0).collect();

        let mut expected = unlocks;
        expected.sort_by_key(|&(timestamp, _)| timestamp);
        let expected: Vec<_> = expected.into_iter().map(|(_, item)| item).collect();

        assert_eq!(stripped, expected);
        assert!(seq.padded()[..3].iter().all(|&x| x == 0));
    }

    #[test]
    fn players_without_unlocks_are_retained_but_not_trained_on() {
        let events = vec![
            UnlockEvent::new("p1", "g", "a1", 10),
            UnlockEvent::new("p1", "g", "a2", 20),
            UnlockEvent::new("p2", "g", "a1", 0),
            UnlockEvent::new("p3", "g", "a2", 7),
        ];
        let data = build(&events);

        assert_eq!(data.sequences.len(), 3);

        let empty = data.sequences.get(2).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.padded(), &[0, 0]);

        assert_eq!(data.sequences.training_sequences(), vec![&[1, 2][..]]);
    }

    #[test]
    fn unknown_identifiers_are_dropped() {
        let players = IdentifierMap::encode(vec!["p1"]);
        let achievements = IdentifierMap::encode(vec!["a1", "a2"]);
        let events = vec![
            UnlockEvent::new("p1", "g", "a1", 1),
            UnlockEvent::new("p1", "g", "zz", 2),
            UnlockEvent::new("p9", "g", "a2", 3),
        ];

        let sequences = build_sequences(&events, &players, &achievements, 2);

        assert_eq!(sequences.len(), 1);
        assert_eq!(sequences.get(1).unwrap().padded(), &[0, 1]);
    }

    #[test]
    fn take_players_keeps_first_seen() {
        let events = vec![
            UnlockEvent::new("p1", "g", "a1", 1),
            UnlockEvent::new("p2", "g", "a1", 1),
            UnlockEvent::new("p3", "g", "a1", 1),
            UnlockEvent::new("p1", "g", "a2", 2),
        ];

        let kept = take_players(events, 2);

        let players: Vec<_> = kept.iter().map(|x| x.player_id()).collect();
        assert_eq!(players, vec!["p1", "p2", "p1"]);
    }

    #[test]
    fn split_partitions_players() {
        let events: Vec<_> = (0..200)
            .map(|x| UnlockEvent::new(format!("p{}", x), "g", "a1", 1))
            .collect();
        let data = build(&events);

        let mut rng = XorShiftRng::from_seed([42; 16]);
        let (train, test) = player_based_split(&data.sequences, &mut rng, 0.2);

        assert_eq!(train.len() + test.len(), 200);
        assert!(test.len() > 10 && test.len() < 80);
        assert!(train.iter().all(|(player_id, _)| test.get(player_id).is_none()));
    }
}
