//! Anagram pair and group types.

use serde::{Deserialize, Serialize};

/// Canonical anagram key of a word: its characters sorted by code point.
///
/// Total over all strings; the empty string maps to the empty key.
/// Applying it to its own output is the identity.
pub fn anagram_key(word: &str) -> String {
    let mut chars: Vec<char> = word.chars().collect();
    chars.sort_unstable();
    chars.into_iter().collect()
}

/// A `(key, word)` observation produced by Map.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AnagramPair {
    /// Sorted letters of `word`.
    pub key: String,
    /// The normalized token.
    pub word: String,
}

impl AnagramPair {
    /// Build the pair for a word.
    pub fn from_word(word: &str) -> Self {
        Self {
            key: anagram_key(word),
            word: word.to_string(),
        }
    }
}

/// An anagram class: a key and the distinct words observed for it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AnagramGroup {
    /// Shared anagram key.
    pub key: String,
    /// Distinct words, sorted lexicographically.
    pub words: Vec<String>,
}

impl AnagramGroup {
    /// Render the group as one result line: `key: { w1, w2 }`.
    pub fn render_line(&self) -> String {
        format!("{}: {{ {} }}", self.key, self.words.join(", "))
    }
}
