use super::{AssignedDocument, LdaModel};
use crate::{Aggregator, Error, ExecutionStrategy, Result};

/// Accumulates the log-likelihood of documents under a model together with
/// their word counts, and finalizes to `exp(-log_likelihood / num_words)`.
pub struct PerplexityAggregator<'a> {
    model: &'a LdaModel,
    /// `1 / (corpus_topic_count[k] + voc_size * beta)` for every topic.
    inv_topic_norm: Vec<f64>,
}

impl<'a> PerplexityAggregator<'a> {
    pub fn new(model: &'a LdaModel) -> Self {
        let voc_beta = model.voc_size() as f64 * model.beta();
        let inv_topic_norm = model
            .corpus_topic_count()
            .iter()
            .map(|&count| 1.0 / (count as f64 + voc_beta))
            .collect();

        Self {
            model,
            inv_topic_norm,
        }
    }

    /// Log-likelihood of a single document.
    pub fn log_likelihood(&self, document: &AssignedDocument) -> Result<f64> {
        let topic_num = self.model.topic_num();

        if document.topic_count.len() != topic_num {
            return Err(Error::DimensionMismatch {
                what: "topic_count",
                expected: topic_num,
                found: document.topic_count.len(),
            });
        }

        let alpha = self.model.alpha();
        let beta = self.model.beta();
        let doc_norm = document.word_count as f64 + topic_num as f64 * alpha;
        let mut log_likelihood = 0.0;

        for (&word_id, &count) in document.word_ids.iter().zip(&document.counts) {
            if word_id as usize >= self.model.voc_size() {
                return Err(Error::WordOutOfVocabulary {
                    doc_id: document.doc_id,
                    word_id,
                    voc_size: self.model.voc_size(),
                });
            }

            let word_prob: f64 = self
                .model
                .word_topics(word_id)
                .iter()
                .zip(&document.topic_count)
                .zip(&self.inv_topic_norm)
                .map(|((&word_topic, &doc_topic), &inv_norm)| {
                    (doc_topic as f64 + alpha) * (word_topic as f64 + beta) * inv_norm
                })
                .sum::<f64>()
                / doc_norm;

            log_likelihood += count as f64 * word_prob.ln();
        }

        Ok(log_likelihood)
    }
}

impl Aggregator for PerplexityAggregator<'_> {
    type Input = AssignedDocument;
    /// `(log_likelihood, num_words)`.
    type State = (f64, u64);
    type Output = f64;

    fn init(&self) -> Self::State {
        (0.0, 0)
    }

    fn transition(&self, (ll, n): Self::State, document: &AssignedDocument) -> Result<Self::State> {
        Ok((
            ll + self.log_likelihood(document)?,
            n + document.word_count as u64,
        ))
    }

    fn merge(&self, left: Self::State, right: Self::State) -> Result<Self::State> {
        Ok((left.0 + right.0, left.1 + right.1))
    }

    fn finalize(&self, (ll, n): Self::State) -> Result<f64> {
        if n == 0 {
            return Err(Error::EmptyInput("documents"));
        }

        Ok((-ll / n as f64).exp())
    }
}

/// Perplexity of `documents` (with their topic counts) under `model`. Lower
/// is better.
pub fn perplexity(
    model: &LdaModel,
    documents: &[AssignedDocument],
    execution: ExecutionStrategy,
) -> Result<f64> {
    execution.aggregate(&PerplexityAggregator::new(model), documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn toy_model() -> LdaModel {
        LdaModel::from_counts(3, 2, 1.0, 0.1, vec![2, 0, 0, 3, 1, 1], vec![3, 4]).unwrap()
    }

    fn toy_document() -> AssignedDocument {
        AssignedDocument {
            doc_id: 1,
            word_count: 2,
            word_ids: vec![0, 1],
            counts: vec![1, 1],
            topic_count: vec![1, 1],
            topic_assignment: vec![0, 1],
        }
    }

    #[test]
    fn test_perplexity_golden_value() {
        let model = toy_model();
        let documents = vec![toy_document()];

        let aggregator = PerplexityAggregator::new(&model);
        assert_approx_eq!(
            aggregator.log_likelihood(&documents[0]).unwrap(),
            -2.088425634236594,
            1e-12
        );

        let perplexity = perplexity(&model, &documents, ExecutionStrategy::SinglePass).unwrap();
        assert_approx_eq!(perplexity, 2.841161129742718, 1e-12);
    }

    #[test]
    fn test_perplexity_is_order_independent() {
        let model = toy_model();
        let mut documents = Vec::new();
        for i in 0..40 {
            let mut document = toy_document();
            document.doc_id = i;
            document.topic_count = vec![(i % 3) as u32, 2 - (i % 3) as u32];
            documents.push(document);
        }

        let single = perplexity(&model, &documents, ExecutionStrategy::SinglePass).unwrap();
        documents.reverse();
        let tree = perplexity(
            &model,
            &documents,
            ExecutionStrategy::MergeTree { num_partitions: 7 },
        )
        .unwrap();

        assert_approx_eq!(single, tree, 1e-9);
    }

    #[test]
    fn test_perplexity_rejects_empty_and_mismatched_input() {
        let model = toy_model();

        assert!(perplexity(&model, &[], ExecutionStrategy::SinglePass).is_err());

        let mut document = toy_document();
        document.topic_count = vec![2];
        assert!(perplexity(&model, &[document], ExecutionStrategy::SinglePass).is_err());
    }
}
