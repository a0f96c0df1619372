//! Word-count tables and their reduction.
//!
//! A [`WordCountTable`] maps a word (byte-exact, case-sensitive) to its
//! cumulative match count. Workers build *local* tables for their chunk; the
//! driver folds them into one *global* table with [`merge`] / [`reduce`].
//!
//! Reduction is plain integer addition, so folding local tables in any order
//! produces the same global table.

use std::collections::{HashMap, hash_map};

/// Mapping from word to 64-bit match count.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct WordCountTable {
    counts: HashMap<String, u64>,
}

impl WordCountTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            counts: HashMap::with_capacity(capacity),
        }
    }

    /// Adds `count` to `word`, inserting it if absent.
    ///
    /// Counts saturate at [`u64::MAX`] rather than wrapping.
    pub fn add(&mut self, word: &str, count: u64) {
        // Avoids allocating a key for words already present, which is the
        // common case for a corpus sorted by word.
        if let Some(existing) = self.counts.get_mut(word) {
            *existing = existing.saturating_add(count);
        } else {
            self.counts.insert(word.to_owned(), count);
        }
    }

    pub fn get(&self, word: &str) -> Option<u64> {
        self.counts.get(word).copied()
    }

    /// Number of distinct words.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Sum of all counts in the table.
    pub fn total(&self) -> u64 {
        self.counts
            .values()
            .fold(0_u64, |acc, &count| acc.saturating_add(count))
    }

    pub fn iter(&self) -> hash_map::Iter<'_, String, u64> {
        self.counts.iter()
    }

    /// The `n` most frequent words, highest count first. Ties are broken by
    /// word so the output is deterministic.
    pub fn top(&self, n: usize) -> Vec<(&str, u64)> {
        let mut entries: Vec<_> = self
            .iter()
            .map(|(word, &count)| (word.as_str(), count))
            .collect();
        entries.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        entries.truncate(n);
        entries
    }

    /// Folds `other` into `self` by summing shared keys.
    pub fn absorb(&mut self, other: Self) {
        self.counts.reserve(other.counts.len());
        for (word, count) in other {
            self.counts
                .entry(word)
                .and_modify(|existing| *existing = existing.saturating_add(count))
                .or_insert(count);
        }
    }
}

impl From<HashMap<String, u64>> for WordCountTable {
    fn from(counts: HashMap<String, u64>) -> Self {
        Self { counts }
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for WordCountTable {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (word, count) in iter {
            let word = word.into();
            table.add(&word, count);
        }
        table
    }
}

impl IntoIterator for WordCountTable {
    type Item = (String, u64);
    type IntoIter = hash_map::IntoIter<String, u64>;

    fn into_iter(self) -> Self::IntoIter {
        self.counts.into_iter()
    }
}

/// Merges `source` into `target`, returning the accumulated table.
pub fn merge(mut target: WordCountTable, source: WordCountTable) -> WordCountTable {
    target.absorb(source);
    target
}

/// Folds any number of local tables into one global table.
pub fn reduce<I>(tables: I) -> WordCountTable
where
    I: IntoIterator<Item = WordCountTable>,
{
    tables.into_iter().fold(WordCountTable::new(), merge)
}
