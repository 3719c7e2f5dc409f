use super::{increment, AssignedDocument, LdaModel};
use crate::{Aggregator, Count, Error, Result};

/// Rebuilds word-topic and corpus-topic counts from per-document topic
/// assignments. Partial states are merged by element-wise addition, checked
/// against an overflow ceiling.
#[derive(Debug, Clone)]
pub struct CountAggregator {
    voc_size: usize,
    topic_num: usize,
    alpha: f64,
    beta: f64,
    ceiling: Count,
}

/// Flattened partial counts: the word-topic block followed by the
/// corpus-topic block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountState(Vec<Count>);

impl CountState {
    pub fn as_slice(&self) -> &[Count] {
        &self.0
    }
}

impl CountAggregator {
    pub fn new(voc_size: usize, topic_num: usize, alpha: f64, beta: f64, ceiling: Count) -> Self {
        Self {
            voc_size,
            topic_num,
            alpha,
            beta,
            ceiling,
        }
    }

    fn corpus_offset(&self) -> usize {
        self.voc_size * self.topic_num
    }
}

impl Aggregator for CountAggregator {
    type Input = AssignedDocument;
    type State = CountState;
    type Output = LdaModel;

    fn init(&self) -> CountState {
        CountState(vec![0; self.corpus_offset() + self.topic_num])
    }

    fn transition(&self, mut state: CountState, document: &AssignedDocument) -> Result<CountState> {
        if document.word_ids.len() != document.counts.len() || !document.is_consistent() {
            return Err(Error::InvalidDocument {
                doc_id: document.doc_id,
                reason: "topic assignment does not match the word counts".into(),
            });
        }

        let corpus_offset = self.corpus_offset();

        for (word_id, topic_id) in document.occurrences() {
            let (word, topic) = (word_id as usize, topic_id as usize);

            if word >= self.voc_size {
                return Err(Error::WordOutOfVocabulary {
                    doc_id: document.doc_id,
                    word_id,
                    voc_size: self.voc_size,
                });
            }
            if topic >= self.topic_num {
                return Err(Error::InvalidDocument {
                    doc_id: document.doc_id,
                    reason: format!("topic {} is out of range", topic),
                });
            }

            increment(
                &mut state.0[word * self.topic_num + topic],
                self.ceiling,
                "word topic count",
            )?;
            increment(
                &mut state.0[corpus_offset + topic],
                self.ceiling,
                "corpus topic count",
            )?;
        }

        Ok(state)
    }

    fn merge(&self, mut left: CountState, right: CountState) -> Result<CountState> {
        if left.0.len() != right.0.len() {
            return Err(Error::DimensionMismatch {
                what: "count state",
                expected: left.0.len(),
                found: right.0.len(),
            });
        }

        for (l, r) in left.0.iter_mut().zip(right.0) {
            *l = l
                .checked_add(r)
                .filter(|&sum| sum <= self.ceiling)
                .ok_or(Error::CountOverflow {
                    what: "merged count",
                    ceiling: self.ceiling,
                })?;
        }

        Ok(left)
    }

    fn finalize(&self, state: CountState) -> Result<LdaModel> {
        LdaModel::unflatten(
            self.voc_size,
            self.topic_num,
            self.alpha,
            self.beta,
            state.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lda::Document, ExecutionStrategy};
    use rand::{rngs::StdRng, SeedableRng};

    fn documents(n: i64) -> Vec<AssignedDocument> {
        let mut rng = StdRng::seed_from_u64(11);

        (0..n)
            .map(|i| {
                let word_ids = (0..(1 + i as u32 % 6)).map(|w| (w * 7 + i as u32) % 10).collect();
                let counts = (0..(1 + i as u32 % 6)).map(|c| 1 + c % 3).collect();
                AssignedDocument::random(Document::new(i, word_ids, counts), 4, &mut rng)
            })
            .collect()
    }

    fn aggregator() -> CountAggregator {
        CountAggregator::new(10, 4, 0.1, 0.01, Count::MAX)
    }

    #[test]
    fn test_model_is_consistent() {
        let documents = documents(50);
        let model = ExecutionStrategy::SinglePass
            .aggregate(&aggregator(), &documents)
            .unwrap();

        assert!(model.is_consistent());
        assert_eq!(
            model.total_count() as usize,
            documents.iter().map(|d| d.word_count).sum::<usize>()
        );
    }

    #[test]
    fn test_merge_associativity() {
        let documents = documents(60);
        let agg = aggregator();
        let (a, rest) = documents.split_at(13);
        let (b, c) = rest.split_at(29);

        let fa = agg.fold(a).unwrap();
        let fb = agg.fold(b).unwrap();
        let fc = agg.fold(c).unwrap();
        let all = agg.fold(&documents).unwrap();

        let left = agg
            .merge(agg.merge(fa.clone(), fb.clone()).unwrap(), fc.clone())
            .unwrap();
        let right = agg
            .merge(fa.clone(), agg.merge(fb.clone(), fc.clone()).unwrap())
            .unwrap();
        let shuffled = agg.merge(agg.merge(fc, fa).unwrap(), fb).unwrap();

        assert_eq!(left, all);
        assert_eq!(right, all);
        assert_eq!(shuffled, all);
        assert_eq!(agg.merge(agg.init(), all.clone()).unwrap(), all);
    }

    #[test]
    fn test_partitioning_does_not_change_result() {
        let documents = documents(97);
        let single = ExecutionStrategy::SinglePass
            .aggregate(&aggregator(), &documents)
            .unwrap();

        for num_partitions in [0, 2, 5, 97, 200] {
            let tree = ExecutionStrategy::MergeTree { num_partitions }
                .aggregate(&aggregator(), &documents)
                .unwrap();
            assert_eq!(tree, single);
        }
    }

    #[test]
    fn test_overflow_is_fatal() {
        let documents = documents(30);
        let agg = CountAggregator::new(10, 4, 0.1, 0.01, 3);

        assert!(matches!(
            ExecutionStrategy::MergeTree { num_partitions: 4 }.aggregate(&agg, &documents),
            Err(Error::CountOverflow { ceiling: 3, .. })
        ));

        let agg = CountAggregator::new(1, 1, 0.1, 0.01, 10);
        let state = CountState(vec![6, 6]);
        assert!(agg.merge(state.clone(), state).is_err());
    }

    #[test]
    fn test_transition_rejects_invalid_rows() {
        let agg = aggregator();
        let mut document = documents(3).remove(2);

        document.topic_assignment[0] = 4;
        assert!(agg.transition(agg.init(), &document).is_err());

        document.topic_assignment.pop();
        assert!(agg.transition(agg.init(), &document).is_err());
    }

    #[test]
    fn test_transition_rejects_word_count_mismatch() {
        let agg = aggregator();
        // Three assigned occurrences for a single counted word would
        // otherwise be silently truncated to one.
        let document = AssignedDocument {
            doc_id: 9,
            word_count: 3,
            word_ids: vec![0],
            counts: vec![1],
            topic_count: vec![3, 0, 0, 0],
            topic_assignment: vec![0, 0, 0],
        };

        assert!(matches!(
            agg.transition(agg.init(), &document),
            Err(Error::InvalidDocument { doc_id: 9, .. })
        ));
    }
}
