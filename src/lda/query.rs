use super::{AssignedDocument, LdaModel, Vocabulary};
use crate::{Count, Error, Result, TopicID, WordID};
use serde::{Deserialize, Serialize};
use std::{cmp::Reverse, collections::BTreeMap};

/// Counts of every word of the vocabulary for one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicWordCount {
    pub topic_id: TopicID,
    pub word_count: Vec<Count>,
}

/// Counts of every topic for one word.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordTopicCount {
    pub word_id: WordID,
    pub topic_count: Vec<Count>,
}

/// One of the most probable words of a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicDescription {
    pub topic_id: TopicID,
    /// 1 for the most probable word.
    pub rank: usize,
    pub word_id: WordID,
    pub word: Option<String>,
    /// Smoothed probability of the word under the topic.
    pub prob: f64,
}

/// How many occurrences of a word a document assigns to a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordTopicMapping {
    pub doc_id: i64,
    pub word_id: WordID,
    pub topic_id: TopicID,
    pub count: Count,
}

/// The model transposed to one row per topic.
pub fn topic_word_counts(model: &LdaModel) -> Vec<TopicWordCount> {
    (0..model.topic_num())
        .map(|topic| TopicWordCount {
            topic_id: topic as TopicID,
            word_count: (0..model.voc_size())
                .map(|word| model.word_topic_count(word as WordID, topic as TopicID))
                .collect(),
        })
        .collect()
}

/// The model as one row per word.
pub fn word_topic_counts(model: &LdaModel) -> Vec<WordTopicCount> {
    (0..model.voc_size())
        .map(|word| WordTopicCount {
            word_id: word as WordID,
            topic_count: model.word_topics(word as WordID).to_vec(),
        })
        .collect()
}

/// The `top_k` most probable words of every topic, ranked by
/// `(word_topic_count + beta) / (corpus_topic_count + voc_size * beta)`.
/// Ties are broken by ascending word id.
pub fn topic_description(
    model: &LdaModel,
    vocab: &Vocabulary,
    top_k: usize,
) -> Result<Vec<TopicDescription>> {
    if top_k == 0 {
        return Err(Error::invalid("top_k", "must be positive"));
    }
    if vocab.len() != model.voc_size() {
        return Err(Error::DimensionMismatch {
            what: "vocabulary",
            expected: model.voc_size(),
            found: vocab.len(),
        });
    }

    let beta = model.beta();
    let voc_beta = model.voc_size() as f64 * beta;
    let top_k = top_k.min(model.voc_size());
    let mut descriptions = Vec::with_capacity(model.topic_num() * top_k);
    let mut words: Vec<WordID> = (0..model.voc_size() as WordID).collect();

    for (topic, &corpus_count) in model.corpus_topic_count().iter().enumerate() {
        let topic = topic as TopicID;
        let norm = corpus_count as f64 + voc_beta;

        // The smoothing is the same for every word of a topic so the integer
        // counts give the exact same order as the probabilities.
        words.sort_unstable_by_key(|&word| (Reverse(model.word_topic_count(word, topic)), word));

        for (rank, &word) in words.iter().take(top_k).enumerate() {
            descriptions.push(TopicDescription {
                topic_id: topic,
                rank: rank + 1,
                word_id: word,
                word: vocab.word(word).map(String::from),
                prob: (model.word_topic_count(word, topic) as f64 + beta) / norm,
            });
        }
    }

    Ok(descriptions)
}

/// The distinct `(word, topic)` pairs of every document with their number
/// of occurrences, ordered by word then topic.
pub fn word_topic_mapping(documents: &[AssignedDocument]) -> Vec<WordTopicMapping> {
    let mut mapping = Vec::new();

    for document in documents {
        let mut pairs: BTreeMap<(WordID, TopicID), Count> = BTreeMap::new();

        for pair in document.occurrences() {
            *pairs.entry(pair).or_insert(0) += 1;
        }

        mapping.extend(
            pairs
                .into_iter()
                .map(|((word_id, topic_id), count)| WordTopicMapping {
                    doc_id: document.doc_id,
                    word_id,
                    topic_id,
                    count,
                }),
        );
    }

    mapping
}
