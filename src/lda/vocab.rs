use crate::{Error, Result, WordID};
use serde::{Deserialize, Serialize};

/// One row of a vocabulary table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularyEntry {
    pub word_id: WordID,
    pub word: String,
}

/// Maps word ids back to words. Ids are contiguous from zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vocabulary {
    words: Vec<String>,
}

impl Vocabulary {
    /// Builds a vocabulary from entries in any order. Fails unless the ids
    /// are exactly `0..entries.len()`.
    pub fn from_entries(mut entries: Vec<VocabularyEntry>) -> Result<Self> {
        entries.sort_unstable_by_key(|entry| entry.word_id);

        for (expected, entry) in entries.iter().enumerate() {
            if entry.word_id as usize != expected {
                return Err(Error::NonContiguousVocabulary {
                    expected: expected as WordID,
                    found: entry.word_id,
                });
            }
        }

        Ok(Self {
            words: entries.into_iter().map(|entry| entry.word).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn word(&self, word_id: WordID) -> Option<&str> {
        self.words.get(word_id as usize).map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for Vocabulary {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            words: iter.into_iter().map(Into::into).collect(),
        }
    }
}
