//! Pure per-stage transformations.
//!
//! ```text
//! normalize(document, stopwords) -> [word]         (Read)
//! map_to_pairs([word])           -> [(key, word)]  (Map)
//! reduce_groups([(key, word)])   -> [group]        (Reduce)
//! ```
//!
//! All three are total over string input and deterministic: the same input
//! always yields the same output, in the same order. Stage handlers rely on
//! this to make re-executed invocations overwrite objects with identical bytes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex_lite::Regex;

use crate::types::{AnagramGroup, AnagramPair};

/// Set of words excluded by [`normalize`].
pub type StopWords = BTreeSet<String>;

/// Characters removed before splitting.
const APOSTROPHES: [char; 2] = ['\'', '\u{2019}'];

fn separator() -> &'static Regex {
    static SEPARATOR: OnceLock<Regex> = OnceLock::new();
    SEPARATOR.get_or_init(|| Regex::new("[^a-z]+").expect("separator pattern is valid"))
}

/// Parse a stopword object: entries separated by commas and/or whitespace.
///
/// Entries are trimmed and lowercased; empty entries are dropped.
pub fn parse_stopwords(text: &str) -> StopWords {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Normalize a raw document into its filtered word sequence.
///
/// 1. Lowercase
/// 2. Remove apostrophes (`don't` -> `dont`)
/// 3. Treat every run of characters outside `a-z` as one separator
/// 4. Drop tokens of length <= 1 and stopwords
///
/// Order of occurrence is preserved and repeated words are kept.
///
/// # Example
///
/// ```rust
/// use anagram_pipeline::transform::{normalize, parse_stopwords};
///
/// let stopwords = parse_stopwords("the,and");
/// let words = normalize("The cat and the tac act", &stopwords);
/// assert_eq!(words, vec!["cat", "tac", "act"]);
/// ```
pub fn normalize(document: &str, stopwords: &StopWords) -> Vec<String> {
    let lowered: String = document
        .to_lowercase()
        .chars()
        .filter(|c| !APOSTROPHES.contains(c))
        .collect();

    separator()
        .split(&lowered)
        .filter(|token| token.len() > 1 && !stopwords.contains(*token))
        .map(str::to_string)
        .collect()
}

/// Pair every word with its anagram key, in input order.
pub fn map_to_pairs<S: AsRef<str>>(words: &[S]) -> Vec<AnagramPair> {
    words
        .iter()
        .map(|word| AnagramPair::from_word(word.as_ref()))
        .collect()
}

/// Group pairs into anagram classes.
///
/// Duplicate observations collapse, classes with fewer than two distinct
/// words are discarded, words are sorted within a group and groups are
/// sorted by key.
pub fn reduce_groups<I>(pairs: I) -> Vec<AnagramGroup>
where
    I: IntoIterator<Item = AnagramPair>,
{
    let mut classes: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for pair in pairs {
        classes.entry(pair.key).or_default().insert(pair.word);
    }

    classes
        .into_iter()
        .filter(|(_, words)| words.len() >= 2)
        .map(|(key, words)| AnagramGroup {
            key,
            words: words.into_iter().collect(),
        })
        .collect()
}

/// Render groups as result text, one line per group.
pub fn render_groups(groups: &[AnagramGroup]) -> String {
    let mut out = String::new();
    for group in groups {
        out.push_str(&group.render_line());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stopwords(words: &[&str]) -> StopWords {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_normalize_reference_sentence() {
        let words = normalize("The cat and the tac act", &stopwords(&["the", "and"]));
        assert_eq!(words, vec!["cat", "tac", "act"]);
    }

    #[test]
    fn test_normalize_strips_apostrophes_and_punctuation() {
        let words = normalize("Don't stop -- it's 42 o'clock!", &StopWords::new());
        assert_eq!(words, vec!["dont", "stop", "its", "oclock"]);
    }

    #[test]
    fn test_normalize_removes_every_apostrophe() {
        let words = normalize("rock'n'roll", &StopWords::new());
        assert_eq!(words, vec!["rocknroll"]);
    }

    #[test]
    fn test_normalize_drops_short_tokens() {
        let words = normalize("a I an x-ray", &StopWords::new());
        assert_eq!(words, vec!["an", "ray"]);
    }

    #[test]
    fn test_normalize_non_ascii_letters_separate() {
        let words = normalize("café naïve", &StopWords::new());
        assert_eq!(words, vec!["caf", "na", "ve"]);
    }

    #[test]
    fn test_normalize_empty_document() {
        assert!(normalize("", &StopWords::new()).is_empty());
        assert!(normalize("  ...  \n\t", &StopWords::new()).is_empty());
    }

    #[test]
    fn test_normalize_keeps_duplicates_in_order() {
        let words = normalize("tac cat tac", &StopWords::new());
        assert_eq!(words, vec!["tac", "cat", "tac"]);
    }

    #[test]
    fn test_parse_stopwords_formats() {
        let parsed = parse_stopwords("the,and, of\nA\t\n,,");
        assert_eq!(parsed, stopwords(&["a", "and", "of", "the"]));
    }

    #[test]
    fn test_map_to_pairs_order_and_keys() {
        let pairs = map_to_pairs(&["cat", "tac", "act"]);
        assert_eq!(pairs.len(), 3);
        assert!(pairs.iter().all(|p| p.key == "act"));
        assert_eq!(
            pairs.iter().map(|p| p.word.as_str()).collect::<Vec<_>>(),
            vec!["cat", "tac", "act"]
        );
    }

    #[test]
    fn test_map_to_pairs_empty_word() {
        let pairs = map_to_pairs(&[""]);
        assert_eq!(pairs, vec![AnagramPair { key: String::new(), word: String::new() }]);
    }

    #[test]
    fn test_reduce_groups_reference() {
        let pairs = map_to_pairs(&["cat", "tac", "act"]);
        let groups = reduce_groups(pairs);
        assert_eq!(
            groups,
            vec![AnagramGroup {
                key: "act".to_string(),
                words: vec!["act".into(), "cat".into(), "tac".into()],
            }]
        );
    }

    #[test]
    fn test_reduce_groups_drops_singletons_and_duplicates() {
        let pairs = map_to_pairs(&["listen", "listen", "dog", "silent", "god", "zebra", "enlist"]);
        let groups = reduce_groups(pairs);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, "dgo");
        assert_eq!(groups[0].words, vec!["dog", "god"]);
        assert_eq!(groups[1].key, "eilnst");
        assert_eq!(groups[1].words, vec!["enlist", "listen", "silent"]);
    }

    #[test]
    fn test_reduce_groups_same_word_twice_is_singleton() {
        let groups = reduce_groups(map_to_pairs(&["noon", "noon"]));
        assert!(groups.is_empty());
    }

    #[test]
    fn test_reduce_groups_independent_of_input_order() {
        let a = reduce_groups(map_to_pairs(&["god", "dog", "tac", "cat"]));
        let b = reduce_groups(map_to_pairs(&["cat", "dog", "tac", "god"]));
        assert_eq!(a, b);
    }

    #[test]
    fn test_render_groups() {
        let groups = reduce_groups(map_to_pairs(&["dog", "god", "cat", "act"]));
        assert_eq!(render_groups(&groups), "act: { act, cat }\ndgo: { dog, god }\n");
        assert_eq!(render_groups(&[]), "");
    }
}
