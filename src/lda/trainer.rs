use super::{
    perplexity::PerplexityAggregator,
    progress::SweepProgress,
    sampler::{worker_rng, GibbsSampler},
    validate_hyperparameters, AssignedDocument, CountAggregator, Document, LdaModel,
};
use crate::{
    Count, EpochController, EpochState, Error, ExecutionStrategy, Result, DEFAULT_COUNT_CEILING,
};
use derive_builder::Builder;

/// The result of a training run.
#[derive(Debug, Clone)]
pub struct LdaFit {
    pub model: LdaModel,
    pub documents: Vec<AssignedDocument>,
    /// `(epoch, perplexity)` for every evaluated epoch.
    pub perplexity: Vec<(usize, f64)>,
    /// Number of completed epochs.
    pub epochs: usize,
}

#[non_exhaustive]
#[derive(Builder, Clone, Debug)]
pub struct LdaTrainer {
    pub voc_size: usize,
    pub topic_num: usize,
    #[builder(default = "0.1")]
    pub alpha: f64,
    #[builder(default = "0.01")]
    pub beta: f64,
    /// Number of epochs.
    #[builder(default = "20")]
    pub iter_num: usize,
    #[builder(default = "0")]
    pub seed: u64,
    #[builder(default)]
    pub execution: ExecutionStrategy,
    #[builder(default = "DEFAULT_COUNT_CEILING")]
    pub count_ceiling: Count,
    /// Compute the training perplexity every this many epochs and after the
    /// last one. Zero disables evaluation.
    #[builder(default = "0")]
    pub evaluate_every: usize,
    /// Stop once the relative change of the training perplexity between two
    /// evaluations is below this. Zero disables early stopping.
    #[builder(default = "0.0")]
    pub perplexity_tol: f64,
}

impl LdaTrainer {
    pub fn builder() -> LdaTrainerBuilder {
        LdaTrainerBuilder::default()
    }

    fn validate(&self) -> Result<()> {
        validate_hyperparameters(self.voc_size, self.topic_num, self.alpha, self.beta)?;

        if self.count_ceiling == 0 {
            return Err(Error::invalid("count_ceiling", "must be positive"));
        }
        if !(self.perplexity_tol >= 0.0 && self.perplexity_tol.is_finite()) {
            return Err(Error::invalid(
                "perplexity_tol",
                format!("must be non-negative, got {}", self.perplexity_tol),
            ));
        }

        Ok(())
    }

    fn should_evaluate(&self, epoch: usize) -> bool {
        self.evaluate_every > 0 && (epoch % self.evaluate_every == 0 || epoch >= self.iter_num)
    }

    /// Train a model from scratch. Every document starts with a random topic
    /// assignment and the initial model is aggregated from those.
    pub fn train(&self, documents: Vec<Document>) -> Result<LdaFit> {
        let mut controller = EpochController::new("LDA");

        self.validate()?;
        validate_documents(&documents, self.voc_size)?;

        let unused = unused_word_ids(&documents, self.voc_size);
        if unused > 0 {
            log::warn!(
                "The {} highest word id(s) of voc_size={} never occur in the corpus",
                unused,
                self.voc_size
            );
        }

        log::info!(
            "Training LDA | {} documents | voc_size={} topic_num={} alpha={} beta={} iter_num={} | {:?}",
            documents.len(),
            self.voc_size,
            self.topic_num,
            self.alpha,
            self.beta,
            self.iter_num,
            self.execution
        );

        let mut rng = worker_rng(self.seed, 0, 0);
        let mut documents: Vec<AssignedDocument> = documents
            .into_iter()
            .map(|document| AssignedDocument::random(document, self.topic_num, &mut rng))
            .collect();

        let counter = CountAggregator::new(
            self.voc_size,
            self.topic_num,
            self.alpha,
            self.beta,
            self.count_ceiling,
        );
        let mut model = self.execution.aggregate(&counter, &documents)?;
        let mut history: Vec<(usize, f64)> = Vec::new();

        loop {
            match controller.state() {
                EpochState::Init => {
                    controller.transition(if self.iter_num > 0 {
                        EpochState::EStep
                    } else if self.evaluate_every > 0 {
                        EpochState::Eval
                    } else {
                        EpochState::Done
                    });
                }
                EpochState::EStep => {
                    let epoch = controller.epoch() + 1;
                    self.run_e_step(&model, &mut documents, epoch)?;
                    controller.transition(EpochState::Aggregate);
                }
                EpochState::Aggregate => {
                    // Rebuild the authoritative counts, repairing the drift
                    // between the workers' private copies.
                    model = self.execution.aggregate(&counter, &documents)?;
                    debug_assert!(model.is_consistent());

                    let epoch = controller.epoch() + 1;
                    controller.transition(if self.should_evaluate(epoch) {
                        EpochState::Eval
                    } else if epoch >= self.iter_num {
                        EpochState::Done
                    } else {
                        EpochState::EStep
                    });
                }
                EpochState::Eval => {
                    let epoch = controller.epoch();
                    let perplexity = self
                        .execution
                        .aggregate(&PerplexityAggregator::new(&model), &documents)?;

                    let converged = match history.last() {
                        Some(&(_, previous)) if self.perplexity_tol > 0.0 => {
                            ((previous - perplexity) / previous).abs() < self.perplexity_tol
                        }
                        _ => false,
                    };

                    log::info!(
                        "LDA epoch {}/{} | perplexity={:.4}{}",
                        epoch,
                        self.iter_num,
                        perplexity,
                        if converged { " | converged" } else { "" }
                    );

                    history.push((epoch, perplexity));

                    controller.transition(if converged || epoch >= self.iter_num {
                        EpochState::Done
                    } else {
                        EpochState::EStep
                    });
                }
                EpochState::Done => break,
            }
        }

        log::info!(
            "Finished LDA training after {} epoch(s) | {} words",
            controller.epoch(),
            model.total_count()
        );

        Ok(LdaFit {
            model,
            documents,
            perplexity: history,
            epochs: controller.epoch(),
        })
    }

    /// One sweep over every document. Each partition is sampled against a
    /// private copy of the broadcast model.
    fn run_e_step(
        &self,
        model: &LdaModel,
        documents: &mut [AssignedDocument],
        epoch: usize,
    ) -> Result<()> {
        let progress = SweepProgress::new(
            format!("E-step {}/{}", epoch, self.iter_num),
            documents.len(),
            1,
        );

        progress.start();

        self.execution
            .for_each_partition(documents, |partition_index, partition| {
                let mut local = model.clone();
                let mut rng = worker_rng(self.seed, epoch, partition_index);
                let mut worker = progress.worker();

                GibbsSampler::new(model.topic_num()).sample_partition(
                    &mut local,
                    partition,
                    &mut rng,
                    &mut worker,
                );
                worker.publish();

                Ok(())
            })?;

        let summary = progress.finish();
        if summary.degenerate > 0 {
            log::warn!(
                "E-step {}: {} of {} draw(s) had vanishing topic weights and were sampled uniformly",
                epoch,
                summary.degenerate,
                summary.draws
            );
        }

        Ok(())
    }
}

/// Assigns topics to unseen documents with a trained model. Every document
/// is sampled on its own against the trained counts, so neither the model
/// nor the result depends on the other documents of the batch or on the
/// execution strategy.
#[non_exhaustive]
#[derive(Builder, Clone, Debug)]
pub struct LdaPredictor {
    /// Number of Gibbs sweeps per document.
    #[builder(default = "20")]
    pub iter_num: usize,
    #[builder(default = "0")]
    pub seed: u64,
    #[builder(default)]
    pub execution: ExecutionStrategy,
    #[builder(default = "DEFAULT_COUNT_CEILING")]
    pub count_ceiling: Count,
}

impl Default for LdaPredictor {
    fn default() -> Self {
        Self {
            iter_num: 20,
            seed: 0,
            execution: ExecutionStrategy::default(),
            count_ceiling: DEFAULT_COUNT_CEILING,
        }
    }
}

impl LdaPredictor {
    pub fn builder() -> LdaPredictorBuilder {
        LdaPredictorBuilder::default()
    }

    pub fn predict(&self, model: &LdaModel, documents: Vec<Document>) -> Result<Vec<AssignedDocument>> {
        validate_documents(&documents, model.voc_size())?;

        log::info!(
            "Predicting topics | {} documents | iter_num={} | {:?}",
            documents.len(),
            self.iter_num,
            self.execution
        );

        let mut rng = worker_rng(self.seed, 0, 0);
        let mut documents: Vec<AssignedDocument> = documents
            .into_iter()
            .map(|document| AssignedDocument::random(document, model.topic_num(), &mut rng))
            .collect();

        let partition_size = self.execution.partition_size(documents.len());
        let progress = SweepProgress::new("Predict", documents.len(), self.iter_num);

        progress.start();

        self.execution
            .for_each_partition(&mut documents, |partition_index, partition| {
                let mut local = model.clone();
                let mut sampler = GibbsSampler::new(model.topic_num());
                let mut worker = progress.worker();

                for (i, document) in partition.iter_mut().enumerate() {
                    let mut rng = worker_rng(self.seed, 1, partition_index * partition_size + i);

                    // The document's own counts must be in the model before
                    // the sampler removes them occurrence by occurrence, and
                    // must leave it afterwards.
                    local.add_document(document, self.count_ceiling)?;
                    let num_degenerate =
                        sampler.sample_document(&mut local, document, self.iter_num, &mut rng);
                    local.remove_document(document)?;

                    worker.record(document, num_degenerate);
                }

                worker.publish();

                Ok(())
            })?;

        let summary = progress.finish();
        if summary.degenerate > 0 {
            log::warn!(
                "Predict: {} of {} draw(s) had vanishing topic weights and were sampled uniformly",
                summary.degenerate,
                summary.draws
            );
        }

        Ok(documents)
    }
}

fn validate_documents(documents: &[Document], voc_size: usize) -> Result<()> {
    if documents.is_empty() {
        return Err(Error::EmptyInput("documents"));
    }

    documents
        .iter()
        .try_for_each(|document| document.validate(voc_size))
}

/// Number of word ids past the largest one that occurs in `documents`.
fn unused_word_ids(documents: &[Document], voc_size: usize) -> usize {
    let highest = documents
        .iter()
        .flat_map(|document| document.word_ids.iter().copied())
        .max();

    match highest {
        Some(word_id) => voc_size.saturating_sub(word_id as usize + 1),
        None => voc_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lda::perplexity;

    /// Two clearly separated themes over a vocabulary of 8 words: words 0-3
    /// only co-occur with each other, as do words 4-7.
    fn corpus() -> Vec<Document> {
        (0..40)
            .map(|i| {
                let base = if i % 2 == 0 { 0 } else { 4 };
                Document::new(
                    i,
                    vec![base, base + 1, base + 2, base + 3],
                    vec![1 + (i as u32 % 3), 2, 1, 3],
                )
            })
            .collect()
    }

    fn trainer(topic_num: usize, iter_num: usize) -> LdaTrainer {
        LdaTrainer::builder()
            .voc_size(8)
            .topic_num(topic_num)
            .alpha(0.1)
            .beta(0.01)
            .iter_num(iter_num)
            .seed(7)
            .execution(ExecutionStrategy::MergeTree { num_partitions: 4 })
            .build()
            .unwrap()
    }

    #[test]
    fn test_train_invariants() {
        let fit = trainer(3, 5).train(corpus()).unwrap();

        assert_eq!(fit.epochs, 5);
        assert!(fit.model.is_consistent());
        assert_eq!(
            fit.model.total_count() as usize,
            fit.documents.iter().map(|d| d.word_count).sum::<usize>()
        );
        for document in &fit.documents {
            assert!(document.is_consistent());
            assert_eq!(document.topic_count.len(), 3);
        }
    }

    #[test]
    fn test_train_is_reproducible() {
        let a = trainer(2, 3).train(corpus()).unwrap();
        let b = trainer(2, 3).train(corpus()).unwrap();

        assert_eq!(a.model, b.model);
        assert_eq!(a.documents, b.documents);
    }

    #[test]
    fn test_single_topic() {
        let fit = trainer(1, 4).train(corpus()).unwrap();

        for document in &fit.documents {
            assert!(document.topic_assignment.iter().all(|&t| t == 0));
            assert_eq!(document.topic_count, vec![document.word_count as Count]);
        }
        assert_eq!(fit.model.corpus_topic_count()[0] as u64, fit.model.total_count());
    }

    #[test]
    fn test_zero_epochs_returns_initial_model() {
        let fit = trainer(2, 0).train(corpus()).unwrap();

        assert_eq!(fit.epochs, 0);
        assert!(fit.model.is_consistent());
        assert!(fit.perplexity.is_empty());
    }

    #[test]
    fn test_training_separates_themes() {
        let mut trainer = trainer(2, 50);
        trainer.execution = ExecutionStrategy::SinglePass;
        trainer.evaluate_every = 10;

        let fit = trainer.train(corpus()).unwrap();

        assert_eq!(
            fit.perplexity.iter().map(|(epoch, _)| *epoch).collect::<Vec<_>>(),
            vec![10, 20, 30, 40, 50]
        );

        // Every document ends up dominated by a single topic, and the two
        // themes end up on different topics.
        let dominant = |document: &AssignedDocument| {
            if document.topic_count[0] >= document.topic_count[1] {
                0
            } else {
                1
            }
        };
        let even = dominant(&fit.documents[0]);
        let odd = dominant(&fit.documents[1]);
        assert_ne!(even, odd);

        let initial = LdaTrainer {
            iter_num: 0,
            evaluate_every: 0,
            ..trainer.clone()
        }
        .train(corpus())
        .unwrap();
        let initial = perplexity(
            &initial.model,
            &initial.documents,
            ExecutionStrategy::SinglePass,
        )
        .unwrap();
        let (_, last) = *fit.perplexity.last().unwrap();
        assert!(last < initial, "{} >= {}", last, initial);
    }

    #[test]
    fn test_early_stopping() {
        let mut trainer = trainer(2, 200);
        trainer.evaluate_every = 1;
        trainer.perplexity_tol = 0.5;

        let fit = trainer.train(corpus()).unwrap();

        assert!(fit.epochs < 200);
        assert_eq!(fit.perplexity.len(), fit.epochs);
    }

    #[test]
    fn test_validation_happens_before_work() {
        assert!(matches!(
            trainer(2, 1).train(vec![]),
            Err(Error::EmptyInput(_))
        ));
        assert!(matches!(
            trainer(2, 1).train(vec![Document::new(0, vec![8], vec![1])]),
            Err(Error::WordOutOfVocabulary { word_id: 8, .. })
        ));

        let mut bad = trainer(2, 1);
        bad.alpha = 0.0;
        assert!(matches!(
            bad.train(corpus()),
            Err(Error::InvalidParameter { name: "alpha", .. })
        ));

        assert!(LdaTrainer::builder().topic_num(2).build().is_err());
    }

    #[test]
    fn test_overflow_aborts_training() {
        let mut trainer = trainer(2, 1);
        trainer.count_ceiling = 5;

        assert!(matches!(
            trainer.train(corpus()),
            Err(Error::CountOverflow { ceiling: 5, .. })
        ));
    }

    #[test]
    fn test_predict() {
        let fit = trainer(2, 30).train(corpus()).unwrap();
        let before = fit.model.clone();

        let predictor = LdaPredictor::builder()
            .iter_num(10)
            .seed(3)
            .build()
            .unwrap();
        let predicted = predictor
            .predict(
                &fit.model,
                vec![
                    Document::new(100, vec![0, 1, 2], vec![4, 4, 4]),
                    Document::new(101, vec![5, 6, 7], vec![4, 4, 4]),
                ],
            )
            .unwrap();

        assert_eq!(fit.model, before);
        assert_eq!(predicted.len(), 2);
        for document in &predicted {
            assert!(document.is_consistent());
            assert_eq!(document.word_count, 12);
        }

        assert!(predictor
            .predict(&fit.model, vec![Document::new(0, vec![9], vec![1])])
            .is_err());
    }

    #[test]
    fn test_predict_is_independent_of_partitioning() {
        // Total count of 2: any batch folded into a single model copy would
        // quickly reach the ceiling.
        let model = LdaModel::from_counts(2, 2, 0.1, 0.01, vec![1, 0, 0, 1], vec![1, 1]).unwrap();
        let documents: Vec<Document> = (0..20).map(|i| Document::new(i, vec![0], vec![1])).collect();

        let predict = |execution: ExecutionStrategy| {
            LdaPredictor {
                iter_num: 5,
                seed: 11,
                execution,
                count_ceiling: 10,
            }
            .predict(&model, documents.clone())
            .unwrap()
        };

        let single = predict(ExecutionStrategy::SinglePass);
        assert_eq!(single.len(), 20);
        for num_partitions in [3, 20] {
            assert_eq!(predict(ExecutionStrategy::MergeTree { num_partitions }), single);
        }
        for document in &single {
            assert!(document.is_consistent());
        }
    }

    #[test]
    fn test_unused_word_ids() {
        assert_eq!(unused_word_ids(&corpus(), 8), 0);
        assert_eq!(unused_word_ids(&corpus(), 10), 2);
        assert_eq!(unused_word_ids(&[Document::new(0, vec![], vec![])], 4), 4);

        // Trailing ids that never occur only warn.
        let mut trainer = trainer(2, 1);
        trainer.voc_size = 10;
        assert!(trainer.train(corpus()).unwrap().model.is_consistent());
    }
}
