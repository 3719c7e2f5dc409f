//! Latent Dirichlet Allocation trained with a data-parallel collapsed Gibbs
//! sampler.
//!
//! Every epoch broadcasts the current `LdaModel` to the workers, resamples
//! the topic of every word occurrence of every document against a private
//! copy of that model, then rebuilds the authoritative model from the new
//! assignments with `CountAggregator`. Workers only see the counts of their
//! own partition move during an epoch which is the usual approximate
//! distributed collapsed Gibbs trade-off.

pub mod count;
pub mod perplexity;
pub mod progress;
pub mod query;
pub mod sampler;
mod serialization;
pub mod trainer;
pub mod vocab;

pub use count::CountAggregator;
pub use perplexity::{perplexity, PerplexityAggregator};
pub use progress::{SweepProgress, SweepSummary, WorkerProgress};
pub use query::{
    topic_description, topic_word_counts, word_topic_counts, word_topic_mapping,
    TopicDescription, TopicWordCount, WordTopicCount, WordTopicMapping,
};
pub use sampler::GibbsSampler;
pub use trainer::{LdaFit, LdaPredictor, LdaPredictorBuilder, LdaTrainer, LdaTrainerBuilder};
pub use vocab::Vocabulary;

use crate::{store, Count, Error, Result, TopicID, WordID};
use fnv::FnvHashSet;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A bag-of-words document: parallel arrays of unique word ids and their
/// number of occurrences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: i64,
    #[serde(alias = "words")]
    pub word_ids: Vec<WordID>,
    pub counts: Vec<Count>,
}

impl Document {
    pub fn new(doc_id: i64, word_ids: Vec<WordID>, counts: Vec<Count>) -> Self {
        Self {
            doc_id,
            word_ids,
            counts,
        }
    }

    /// Total number of word occurrences.
    pub fn word_count(&self) -> usize {
        self.counts.iter().map(|&c| c as usize).sum()
    }

    /// Checks that the arrays are parallel, that every word id is unique and
    /// inside the vocabulary, and that every count is positive.
    pub fn validate(&self, voc_size: usize) -> Result<()> {
        validate_bag(self.doc_id, &self.word_ids, &self.counts, voc_size)
    }
}

fn validate_bag(doc_id: i64, word_ids: &[WordID], counts: &[Count], voc_size: usize) -> Result<()> {
    if word_ids.len() != counts.len() {
        return Err(Error::InvalidDocument {
            doc_id,
            reason: format!(
                "{} word ids but {} counts",
                word_ids.len(),
                counts.len()
            ),
        });
    }

    if word_ids.is_empty() {
        return Err(Error::InvalidDocument {
            doc_id,
            reason: "document has no words".into(),
        });
    }

    let mut seen = FnvHashSet::with_capacity_and_hasher(word_ids.len(), Default::default());

    for (&word_id, &count) in word_ids.iter().zip(counts) {
        if word_id as usize >= voc_size {
            return Err(Error::WordOutOfVocabulary {
                doc_id,
                word_id,
                voc_size,
            });
        }

        if count == 0 {
            return Err(Error::InvalidDocument {
                doc_id,
                reason: format!("word {} has a count of zero", word_id),
            });
        }

        if !seen.insert(word_id) {
            return Err(Error::InvalidDocument {
                doc_id,
                reason: format!("word {} appears more than once", word_id),
            });
        }
    }

    Ok(())
}

/// A document together with the topic of each of its word occurrences.
/// Occurrences are ordered by expanding `word_ids[i]` `counts[i]` times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignedDocument {
    pub doc_id: i64,
    #[serde(rename = "wordcount")]
    pub word_count: usize,
    #[serde(rename = "words")]
    pub word_ids: Vec<WordID>,
    pub counts: Vec<Count>,
    /// Histogram of `topic_assignment`.
    pub topic_count: Vec<Count>,
    pub topic_assignment: Vec<TopicID>,
}

impl AssignedDocument {
    /// Assigns every word occurrence an independent, uniformly random topic.
    pub fn random<R: Rng + ?Sized>(document: Document, topic_num: usize, rng: &mut R) -> Self {
        let word_count = document.word_count();
        let mut topic_count = vec![0; topic_num];
        let topic_assignment = (0..word_count)
            .map(|_| {
                let topic = rng.gen_range(0..topic_num);
                topic_count[topic] += 1;
                topic as TopicID
            })
            .collect();

        Self {
            doc_id: document.doc_id,
            word_count,
            word_ids: document.word_ids,
            counts: document.counts,
            topic_count,
            topic_assignment,
        }
    }

    /// Iterates over `(word_id, topic_id)` for every word occurrence.
    pub fn occurrences(&self) -> impl Iterator<Item = (WordID, TopicID)> + '_ {
        self.word_ids
            .iter()
            .zip(&self.counts)
            .flat_map(|(&word_id, &count)| std::iter::repeat(word_id).take(count as usize))
            .zip(self.topic_assignment.iter().copied())
    }

    /// Whether `topic_count` is exactly the histogram of `topic_assignment`
    /// and both agree with the word counts.
    pub fn is_consistent(&self) -> bool {
        if self.topic_assignment.len() != self.word_count
            || self.counts.iter().map(|&c| c as usize).sum::<usize>() != self.word_count
        {
            return false;
        }

        let mut histogram = vec![0 as Count; self.topic_count.len()];
        for &topic in &self.topic_assignment {
            match histogram.get_mut(topic as usize) {
                Some(slot) => *slot += 1,
                None => return false,
            }
        }

        histogram == self.topic_count
    }

    /// Full validation of a result row loaded from a row store.
    pub fn validate(&self, voc_size: usize, topic_num: usize) -> Result<()> {
        validate_bag(self.doc_id, &self.word_ids, &self.counts, voc_size)?;

        if self.topic_count.len() != topic_num {
            return Err(Error::DimensionMismatch {
                what: "topic_count",
                expected: topic_num,
                found: self.topic_count.len(),
            });
        }

        if !self.is_consistent() {
            return Err(Error::InvalidDocument {
                doc_id: self.doc_id,
                reason: "topic_count is not the histogram of topic_assignment".into(),
            });
        }

        Ok(())
    }
}

/// Checks the hyperparameters shared by every LDA operation.
pub(crate) fn validate_hyperparameters(
    voc_size: usize,
    topic_num: usize,
    alpha: f64,
    beta: f64,
) -> Result<()> {
    if voc_size == 0 {
        return Err(Error::invalid("voc_size", "must be positive"));
    }
    if topic_num == 0 {
        return Err(Error::invalid("topic_num", "must be positive"));
    }
    if !(alpha > 0.0 && alpha.is_finite()) {
        return Err(Error::invalid("alpha", format!("must be positive, got {}", alpha)));
    }
    if !(beta > 0.0 && beta.is_finite()) {
        return Err(Error::invalid("beta", format!("must be positive, got {}", beta)));
    }
    if voc_size.checked_mul(topic_num).is_none() {
        return Err(Error::invalid("voc_size", "voc_size * topic_num overflows"));
    }

    Ok(())
}

/// A topic model: how many word occurrences are assigned to each topic, per
/// word and corpus-wide, along with the Dirichlet priors it was trained with.
#[derive(Debug, Clone, PartialEq)]
pub struct LdaModel {
    voc_size: usize,
    topic_num: usize,
    alpha: f64,
    beta: f64,
    /// `voc_size × topic_num`, row-major.
    word_topic_count: Vec<Count>,
    corpus_topic_count: Vec<Count>,
}

impl LdaModel {
    /// An empty model.
    pub fn zeros(voc_size: usize, topic_num: usize, alpha: f64, beta: f64) -> Result<Self> {
        validate_hyperparameters(voc_size, topic_num, alpha, beta)?;

        Ok(Self {
            voc_size,
            topic_num,
            alpha,
            beta,
            word_topic_count: vec![0; voc_size * topic_num],
            corpus_topic_count: vec![0; topic_num],
        })
    }

    /// Builds a model from a row-major word-topic matrix and the corpus
    /// totals. The totals must be the column sums of the matrix.
    pub fn from_counts(
        voc_size: usize,
        topic_num: usize,
        alpha: f64,
        beta: f64,
        word_topic_count: Vec<Count>,
        corpus_topic_count: Vec<Count>,
    ) -> Result<Self> {
        validate_hyperparameters(voc_size, topic_num, alpha, beta)?;

        if word_topic_count.len() != voc_size * topic_num {
            return Err(Error::DimensionMismatch {
                what: "word_topic_count",
                expected: voc_size * topic_num,
                found: word_topic_count.len(),
            });
        }
        if corpus_topic_count.len() != topic_num {
            return Err(Error::DimensionMismatch {
                what: "corpus_topic_count",
                expected: topic_num,
                found: corpus_topic_count.len(),
            });
        }

        let model = Self {
            voc_size,
            topic_num,
            alpha,
            beta,
            word_topic_count,
            corpus_topic_count,
        };

        if !model.is_consistent() {
            return Err(Error::invalid(
                "model",
                "corpus topic counts are not the column sums of the word topic counts",
            ));
        }

        Ok(model)
    }

    /// Decodes the flat encoding produced by `flatten`.
    pub fn unflatten(
        voc_size: usize,
        topic_num: usize,
        alpha: f64,
        beta: f64,
        mut flat: Vec<Count>,
    ) -> Result<Self> {
        validate_hyperparameters(voc_size, topic_num, alpha, beta)?;

        let expected = voc_size * topic_num + topic_num;
        if flat.len() != expected {
            return Err(Error::DimensionMismatch {
                what: "flattened model",
                expected,
                found: flat.len(),
            });
        }

        let corpus_topic_count = flat.split_off(voc_size * topic_num);

        Self::from_counts(voc_size, topic_num, alpha, beta, flat, corpus_topic_count)
    }

    /// The word-topic block (row-major) followed by the corpus-topic block.
    pub fn flatten(&self) -> Vec<Count> {
        let mut flat = Vec::with_capacity(self.word_topic_count.len() + self.topic_num);
        flat.extend_from_slice(&self.word_topic_count);
        flat.extend_from_slice(&self.corpus_topic_count);
        flat
    }

    pub fn voc_size(&self) -> usize {
        self.voc_size
    }

    pub fn topic_num(&self) -> usize {
        self.topic_num
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    /// Topic counts of a single word.
    pub fn word_topics(&self, word_id: WordID) -> &[Count] {
        let start = word_id as usize * self.topic_num;
        &self.word_topic_count[start..start + self.topic_num]
    }

    pub fn word_topic_count(&self, word_id: WordID, topic_id: TopicID) -> Count {
        self.word_topics(word_id)[topic_id as usize]
    }

    pub fn corpus_topic_count(&self) -> &[Count] {
        &self.corpus_topic_count
    }

    /// Total number of word occurrences in the model.
    pub fn total_count(&self) -> u64 {
        self.corpus_topic_count.iter().map(|&c| c as u64).sum()
    }

    /// Whether every corpus topic count is the sum of its column.
    pub fn is_consistent(&self) -> bool {
        let mut sums = vec![0u64; self.topic_num];

        for row in self.word_topic_count.chunks(self.topic_num) {
            for (sum, &count) in sums.iter_mut().zip(row) {
                *sum += count as u64;
            }
        }

        sums.iter()
            .zip(&self.corpus_topic_count)
            .all(|(&sum, &count)| sum == count as u64)
    }

    /// Mutable views over the word-topic matrix and the corpus totals, in that
    /// order.
    pub(crate) fn counts_mut(&mut self) -> (&mut [Count], &mut [Count]) {
        (&mut self.word_topic_count, &mut self.corpus_topic_count)
    }

    /// Adds the contribution of a document's assignment, failing if a count
    /// would exceed `ceiling`.
    pub fn add_document(&mut self, document: &AssignedDocument, ceiling: Count) -> Result<()> {
        for (word_id, topic_id) in document.occurrences() {
            let (word, topic) = self.cell(document.doc_id, word_id, topic_id)?;

            increment(
                &mut self.word_topic_count[word * self.topic_num + topic],
                ceiling,
                "word topic count",
            )?;
            increment(
                &mut self.corpus_topic_count[topic],
                ceiling,
                "corpus topic count",
            )?;
        }

        Ok(())
    }

    /// Takes back the contribution of a document previously added with
    /// `add_document`. Fails if a count would drop below zero.
    pub fn remove_document(&mut self, document: &AssignedDocument) -> Result<()> {
        let missing = || Error::InvalidDocument {
            doc_id: document.doc_id,
            reason: "assignment is not part of the model".to_string(),
        };

        for (word_id, topic_id) in document.occurrences() {
            let (word, topic) = self.cell(document.doc_id, word_id, topic_id)?;
            let word_topic = &mut self.word_topic_count[word * self.topic_num + topic];

            *word_topic = word_topic.checked_sub(1).ok_or_else(missing)?;
            self.corpus_topic_count[topic] = self.corpus_topic_count[topic]
                .checked_sub(1)
                .ok_or_else(missing)?;
        }

        Ok(())
    }

    fn cell(&self, doc_id: i64, word_id: WordID, topic_id: TopicID) -> Result<(usize, usize)> {
        let (word, topic) = (word_id as usize, topic_id as usize);

        if word >= self.voc_size {
            return Err(Error::WordOutOfVocabulary {
                doc_id,
                word_id,
                voc_size: self.voc_size,
            });
        }
        if topic >= self.topic_num {
            return Err(Error::InvalidDocument {
                doc_id,
                reason: format!("topic {} is out of range", topic),
            });
        }

        Ok((word, topic))
    }

    /// Writes the model as JSON. Fails if `path` already exists.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        store::write_json(path, self)
    }
}

/// Load a model from a JSON file written by `LdaModel::save`.
pub fn load<P: AsRef<Path>>(path: P) -> Result<LdaModel> {
    store::read_json(path)
}

pub(crate) fn increment(count: &mut Count, ceiling: Count, what: &'static str) -> Result<()> {
    if *count >= ceiling {
        return Err(Error::CountOverflow { what, ceiling });
    }
    *count += 1;
    Ok(())
}
