use super::{progress::WorkerProgress, AssignedDocument, LdaModel};
use crate::TopicID;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Collapsed Gibbs sampler for one worker. Holds the scratch buffer used to
/// compute the topic weights so a partition can be sampled without
/// allocating per word occurrence.
pub struct GibbsSampler {
    weights: Vec<f64>,
}

impl GibbsSampler {
    pub fn new(topic_num: usize) -> Self {
        Self {
            weights: vec![0.0; topic_num],
        }
    }

    /// Resamples the topic of every word occurrence of `document`, `iter_num`
    /// times over. The model counts are updated in place so that each draw
    /// observes all the draws that preceded it.
    ///
    /// Returns the number of draws for which every topic weight was zero or
    /// not finite and a uniform draw was used instead.
    pub fn sample_document<R: Rng + ?Sized>(
        &mut self,
        model: &mut LdaModel,
        document: &mut AssignedDocument,
        iter_num: usize,
        rng: &mut R,
    ) -> usize {
        let topic_num = model.topic_num();
        let alpha = model.alpha();
        let beta = model.beta();
        let voc_beta = model.voc_size() as f64 * beta;

        debug_assert_eq!(document.topic_count.len(), topic_num);
        debug_assert_eq!(document.topic_assignment.len(), document.word_count);

        self.weights.resize(topic_num, 0.0);

        let (word_topic_count, corpus_topic_count) = model.counts_mut();
        let topic_count = &mut document.topic_count;
        let assignment = &mut document.topic_assignment;
        let mut num_degenerate = 0;

        for _ in 0..iter_num {
            let mut i = 0;

            for (&word_id, &count) in document.word_ids.iter().zip(&document.counts) {
                let row = word_id as usize * topic_num;
                let word_topics = &mut word_topic_count[row..row + topic_num];

                for _ in 0..count {
                    let old = assignment[i] as usize;

                    // Remove the occurrence so it does not vote for itself.
                    // Counts may lag behind the document under a relaxed
                    // view of the model, hence the saturation.
                    word_topics[old] = word_topics[old].saturating_sub(1);
                    corpus_topic_count[old] = corpus_topic_count[old].saturating_sub(1);
                    topic_count[old] = topic_count[old].saturating_sub(1);

                    for (k, weight) in self.weights.iter_mut().enumerate() {
                        let w = (topic_count[k] as f64 + alpha)
                            * (word_topics[k] as f64 + beta)
                            / (corpus_topic_count[k] as f64 + voc_beta);

                        *weight = if w > 0.0 && w.is_finite() { w } else { 0.0 };
                    }

                    let new = match draw(&self.weights, rng) {
                        Some(topic) => topic,
                        None => {
                            num_degenerate += 1;
                            rng.gen_range(0..topic_num)
                        }
                    };

                    word_topics[new] += 1;
                    corpus_topic_count[new] += 1;
                    topic_count[new] += 1;
                    assignment[i] = new as TopicID;

                    i += 1;
                }
            }
        }

        num_degenerate
    }

    /// Samples every document of a partition in order against the same
    /// model handle, for as many sweeps as the pass `progress` belongs to.
    pub fn sample_partition<R: Rng + ?Sized>(
        &mut self,
        model: &mut LdaModel,
        documents: &mut [AssignedDocument],
        rng: &mut R,
        progress: &mut WorkerProgress,
    ) {
        let iter_num = progress.num_sweeps();

        for document in documents.iter_mut() {
            let num_degenerate = self.sample_document(model, document, iter_num, rng);
            progress.record(document, num_degenerate);
        }
    }
}

/// Inverse-CDF draw from the categorical distribution proportional to
/// `weights`. Returns `None` when the weights cannot be normalized.
pub fn draw<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Option<usize> {
    let total: f64 = weights.iter().sum();

    if !(total > 0.0 && total.is_finite()) {
        return None;
    }

    let mut u = rng.gen::<f64>() * total;
    let mut last = 0;

    for (k, &weight) in weights.iter().enumerate() {
        if weight <= 0.0 {
            continue;
        }
        if u < weight {
            return Some(k);
        }
        u -= weight;
        last = k;
    }

    // Rounding can leave a sliver of mass past the last bucket.
    Some(last)
}

/// Deterministic generator for one worker of one epoch.
pub fn worker_rng(seed: u64, epoch: usize, partition: usize) -> StdRng {
    let stream = (epoch as u64)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .wrapping_add(partition as u64)
        .wrapping_mul(0xBF58_476D_1CE4_E5B9);

    StdRng::seed_from_u64(seed ^ stream)
}
