//! Dense encoding of raw player and achievement identifiers.
//!
//! Dense ids start at 1 and follow first-seen order; 0 is never assigned
//! because it is the padding sentinel of the sequence model.
use std::collections::HashMap;

use super::EncodingError;

/// Bidirectional mapping between raw identifiers and dense ids.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentifierMap {
    raw_ids: Vec<String>,
    dense_ids: HashMap<String, usize>,
}

impl IdentifierMap {
    /// Build a map over `raw_ids`, assigning dense ids in first-seen order.
    pub fn encode<I, S>(raw_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut map = IdentifierMap::default();

        for raw_id in raw_ids {
            let raw_id = raw_id.as_ref();

            if !map.dense_ids.contains_key(raw_id) {
                map.raw_ids.push(raw_id.to_owned());
                map.dense_ids.insert(raw_id.to_owned(), map.raw_ids.len());
            }
        }

        map
    }

    /// Translate a raw identifier into its dense id.
    pub fn translate(&self, raw_id: &str) -> Result<usize, EncodingError> {
        self.dense_ids
            .get(raw_id)
            .cloned()
            .ok_or_else(|| EncodingError::UnknownIdentifier {
                raw_id: raw_id.to_owned(),
            })
    }

    /// Translate a dense id back into the raw identifier.
    pub fn raw_id(&self, dense_id: usize) -> Option<&str> {
        if dense_id == 0 {
            return None;
        }

        self.raw_ids.get(dense_id - 1).map(|x| x.as_str())
    }

    /// Number of encoded identifiers. Dense ids span `1..=len()`.
    pub fn len(&self) -> usize {
        self.raw_ids.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.raw_ids.is_empty()
    }

    /// Iterate over `(dense_id, raw_id)` pairs in dense id order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.raw_ids
            .iter()
            .enumerate()
            .map(|(idx, raw_id)| (idx + 1, raw_id.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_ids_follow_first_seen_order() {
        let map = IdentifierMap::encode(vec!["b", "a", "b", "c", "a"]);

        assert_eq!(map.len(), 3);
        assert_eq!(map.translate("b"), Ok(1));
        assert_eq!(map.translate("a"), Ok(2));
        assert_eq!(map.translate("c"), Ok(3));
    }

    #[test]
    fn dense_ids_are_contiguous_from_one() {
        let raw: Vec<String> = (0..50).map(|x| format!("id_{}", x % 17)).collect();
        let map = IdentifierMap::encode(&raw);

        let mut dense: Vec<usize> = raw.iter().map(|x| map.translate(x).unwrap()).collect();
        dense.sort();
        dense.dedup();

        assert_eq!(dense, (1..=17).collect::<Vec<_>>());
    }

    #[test]
    fn unknown_identifiers_fail() {
        let map = IdentifierMap::encode(vec!["a"]);

        assert_eq!(
            map.translate("z"),
            Err(EncodingError::UnknownIdentifier {
                raw_id: "z".to_owned()
            })
        );
    }

    #[test]
    fn reverse_lookup() {
        let map = IdentifierMap::encode(vec!["x", "y"]);

        assert_eq!(map.raw_id(0), None);
        assert_eq!(map.raw_id(1), Some("x"));
        assert_eq!(map.raw_id(2), Some("y"));
        assert_eq!(map.raw_id(3), None);
        assert_eq!(
            map.iter().collect::<Vec<_>>(),
            vec![(1, "x"), (2, "y")]
        );
    }

    #[test]
    fn encoding_is_deterministic() {
        let raw = vec!["q", "w", "e", "q", "r"];

        assert_eq!(IdentifierMap::encode(&raw), IdentifierMap::encode(&raw));
    }
}
