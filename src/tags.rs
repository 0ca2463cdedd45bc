//! Tag extraction for item descriptions.
//!
//! The stop-word and special-character lists are external text resources.
//! They are loaded exactly once at process start into a [`Lexicon`] that is
//! shared across all connections; nothing re-reads them per extraction.

use crate::error::Result;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// The shared stop-word set and special-character list.
pub struct Lexicon {
    stopwords: HashSet<String>,
    special_chars: Vec<String>,
}

impl Lexicon {
    /// Load both resource files. Stop-words are comma-separated, special
    /// characters whitespace-separated.
    pub fn load(
        stopwords_path: impl AsRef<Path>,
        special_chars_path: impl AsRef<Path>,
    ) -> Result<Self> {
        let stopwords = fs::read_to_string(stopwords_path)?;
        let special_chars = fs::read_to_string(special_chars_path)?;
        Ok(Self::from_parts(
            stopwords
                .split(',')
                .map(|word| word.trim().to_string())
                .filter(|word| !word.is_empty()),
            special_chars.split_whitespace().map(|s| s.to_string()),
        ))
    }

    /// Build a lexicon from in-memory word lists.
    pub fn from_parts<S, C>(stopwords: S, special_chars: C) -> Self
    where
        S: IntoIterator<Item = String>,
        C: IntoIterator<Item = String>,
    {
        Self {
            stopwords: stopwords
                .into_iter()
                .map(|word| word.to_lowercase())
                .collect(),
            special_chars: special_chars.into_iter().collect(),
        }
    }

    /// An empty lexicon: no stop-words, nothing stripped.
    pub fn empty() -> Self {
        Self::from_parts(std::iter::empty(), std::iter::empty())
    }

    fn is_stopword(&self, token: &str) -> bool {
        self.stopwords.contains(&token.to_lowercase())
    }

    /// Remove every occurrence of each listed special character. Exact
    /// substring removal, not a character-class strip.
    fn clean(&self, token: &str) -> String {
        let mut cleaned = token.to_string();
        for special in &self.special_chars {
            cleaned = cleaned.replace(special.as_str(), "");
        }
        cleaned
    }
}

/// Derive search tags from an item description.
///
/// Tokens are split on whitespace and hyphens. Stop-words are dropped by
/// lowercased comparison; survivors are stripped of special characters with
/// their case preserved. Duplicates are kept, and so is a token that
/// cleaning reduced to the empty string.
pub fn extract_tags(description: &str, lexicon: &Lexicon) -> Vec<String> {
    description
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|token| !token.is_empty())
        .filter(|token| !lexicon.is_stopword(token))
        .map(|token| lexicon.clean(token))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn lexicon() -> Lexicon {
        Lexicon::from_parts(
            ["the", "a", "for"].map(String::from),
            ["!", ",", "."].map(String::from),
        )
    }

    #[test]
    fn test_stopwords_dropped_case_insensitively() {
        let tags = extract_tags("The lamp for A desk", &lexicon());
        assert_eq!(tags, vec!["lamp", "desk"]);
    }

    #[test]
    fn test_special_characters_stripped_case_preserved() {
        let tags = extract_tags("Shiny! red, Lamp.", &lexicon());
        assert_eq!(tags, vec!["Shiny", "red", "Lamp"]);
    }

    #[test]
    fn test_hyphens_split_tokens() {
        let tags = extract_tags("solid-oak table", &lexicon());
        assert_eq!(tags, vec!["solid", "oak", "table"]);
    }

    #[test]
    fn test_duplicates_and_emptied_tokens_kept() {
        let tags = extract_tags("lamp lamp !!!", &lexicon());
        assert_eq!(tags, vec!["lamp", "lamp", ""]);
    }

    #[test]
    fn test_load_from_files() {
        let mut stopwords = NamedTempFile::new().unwrap();
        write!(stopwords, "the, a ,an").unwrap();
        let mut special_chars = NamedTempFile::new().unwrap();
        write!(special_chars, "! ? .").unwrap();

        let lexicon = Lexicon::load(stopwords.path(), special_chars.path()).unwrap();
        let tags = extract_tags("An old lamp?!", &lexicon);
        assert_eq!(tags, vec!["old", "lamp"]);
    }
}
