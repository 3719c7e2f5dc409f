use topicmix::{
    gmm::{self, GmmTrainer},
    lda::{self, LdaPredictor, LdaTrainer},
    store, Error, ExecutionStrategy, Result,
};

mod flags {
    xflags::xflags! {
        cmd topicmix {
            /// Train an LDA topic model on a corpus.
            cmd lda-train {
                // --- Data ---
                /// Documents, one JSON object per line.
                required -i, --input input: String
                /// Output model filepath.
                required -o, --output output: String
                /// Output filepath for the per-document topic assignments.
                optional --results results: String

                // --- Model ---
                /// Number of distinct word ids.
                required --voc-size voc_size: usize
                /// Number of topics.
                required -k, --topic-num topic_num: usize
                /// Document-topic Dirichlet prior.
                optional --alpha alpha: f64
                /// Topic-word Dirichlet prior.
                optional --beta beta: f64

                // --- Training ---
                /// Number of epochs.
                optional --iter-num iter_num: usize
                /// Seed of the random topic assignments.
                optional --seed seed: u64
                /// Report the training perplexity every N epochs.
                optional --evaluate-every evaluate_every: usize
                /// Stop when the relative perplexity change falls below this.
                optional --perplexity-tol perplexity_tol: f64
                /// Largest allowed count in the model.
                optional --count-ceiling count_ceiling: u32

                // --- Execution ---
                /// Number of partitions. Defaults to a multiple of the
                /// number of threads.
                optional --partitions partitions: usize
                /// Process every row on the calling thread.
                optional --single-pass
            }

            /// Assign topics to new documents with a trained model.
            cmd lda-predict {
                /// Model filepath.
                required -m, --model model: String
                /// Documents, one JSON object per line.
                required -i, --input input: String
                /// Output filepath for the per-document topic assignments.
                required -o, --output output: String
                /// Output filepath for the word/topic mapping.
                optional --mapping mapping: String
                /// Number of Gibbs sweeps per document.
                optional --iter-num iter_num: usize
                /// Seed of the random topic assignments.
                optional --seed seed: u64
                /// Number of partitions.
                optional --partitions partitions: usize
                /// Process every row on the calling thread.
                optional --single-pass
            }

            /// Compute the perplexity of topic assignments under a model.
            cmd lda-perplexity {
                /// Model filepath.
                required -m, --model model: String
                /// Per-document topic assignments, one JSON object per line.
                required -i, --input input: String
                /// Number of partitions.
                optional --partitions partitions: usize
                /// Process every row on the calling thread.
                optional --single-pass
            }

            /// Describe every topic by its most probable words.
            cmd lda-topics {
                /// Model filepath.
                required -m, --model model: String
                /// Vocabulary, one {"word_id", "word"} object per line.
                required --vocab vocab: String
                /// Output filepath.
                required -o, --output output: String
                /// Number of words per topic.
                optional --top-k top_k: usize
            }

            /// Export the count tables of a model.
            cmd lda-counts {
                /// Model filepath.
                required -m, --model model: String
                /// Output filepath.
                required -o, --output output: String
                /// One row per word instead of one row per topic.
                optional --by-word
            }

            /// Fit a Gaussian mixture with EM.
            cmd gmm-train {
                /// Points, one JSON array per line.
                required -i, --input input: String
                /// Initial model filepath.
                required --init init: String
                /// Output model filepath.
                required -o, --output output: String
                /// Output filepath for the cluster of every point.
                optional --labels labels: String
                /// Maximum number of EM iterations.
                optional --max-num-iterations max_num_iterations: usize
                /// Stop once the log-likelihood improves by less than this.
                optional --tolerance tolerance: f64
                /// Added to the diagonal of the covariance.
                optional --reg-covar reg_covar: f64
                /// Number of partitions.
                optional --partitions partitions: usize
                /// Process every row on the calling thread.
                optional --single-pass
            }
        }
    }
}

fn execution(single_pass: bool, partitions: Option<usize>) -> ExecutionStrategy {
    match (single_pass, partitions) {
        (true, _) => ExecutionStrategy::SinglePass,
        (false, Some(num_partitions)) => ExecutionStrategy::MergeTree { num_partitions },
        (false, None) => ExecutionStrategy::default(),
    }
}

fn config_error<E: std::fmt::Display>(e: E) -> Error {
    Error::Config(e.to_string())
}

/// Train an LDA model and write it along with the topic assignments.
fn lda_train(flags: &flags::LdaTrain) -> Result<()> {
    store::check_output(&flags.output)?;
    if let Some(results) = &flags.results {
        store::check_output(results)?;
    }

    let mut builder = LdaTrainer::builder();
    builder
        .voc_size(flags.voc_size)
        .topic_num(flags.topic_num)
        .execution(execution(flags.single_pass, flags.partitions));

    if let Some(alpha) = flags.alpha {
        builder.alpha(alpha);
    }
    if let Some(beta) = flags.beta {
        builder.beta(beta);
    }
    if let Some(iter_num) = flags.iter_num {
        builder.iter_num(iter_num);
    }
    if let Some(seed) = flags.seed {
        builder.seed(seed);
    }
    if let Some(evaluate_every) = flags.evaluate_every {
        builder.evaluate_every(evaluate_every);
    }
    if let Some(perplexity_tol) = flags.perplexity_tol {
        builder.perplexity_tol(perplexity_tol);
    }
    if let Some(count_ceiling) = flags.count_ceiling {
        builder.count_ceiling(count_ceiling);
    }

    let trainer = builder.build().map_err(config_error)?;
    let documents = store::read_documents(&flags.input)?;

    log::info!("Loaded {} documents from {:?}", documents.len(), flags.input);

    let fit = trainer.train(documents)?;

    fit.model.save(&flags.output)?;
    log::info!("Wrote model to {:?}", flags.output);

    if let Some(results) = &flags.results {
        store::write_jsonl(results, &fit.documents)?;
        log::info!("Wrote {} results to {:?}", fit.documents.len(), results);
    }

    Ok(())
}

/// Predict the topics of new documents.
fn lda_predict(flags: &flags::LdaPredict) -> Result<()> {
    store::check_output(&flags.output)?;
    if let Some(mapping) = &flags.mapping {
        store::check_output(mapping)?;
    }

    let mut builder = LdaPredictor::builder();
    builder.execution(execution(flags.single_pass, flags.partitions));

    if let Some(iter_num) = flags.iter_num {
        builder.iter_num(iter_num);
    }
    if let Some(seed) = flags.seed {
        builder.seed(seed);
    }

    let predictor = builder.build().map_err(config_error)?;
    let model = lda::load(&flags.model)?;
    let documents = store::read_documents(&flags.input)?;
    let predicted = predictor.predict(&model, documents)?;

    store::write_jsonl(&flags.output, &predicted)?;
    log::info!("Wrote {} results to {:?}", predicted.len(), flags.output);

    if let Some(mapping) = &flags.mapping {
        store::write_jsonl(mapping, &lda::word_topic_mapping(&predicted))?;
    }

    Ok(())
}

fn lda_perplexity(flags: &flags::LdaPerplexity) -> Result<()> {
    let model = lda::load(&flags.model)?;
    let documents = store::read_results(&flags.input)?;

    for document in &documents {
        document.validate(model.voc_size(), model.topic_num())?;
    }

    let perplexity = lda::perplexity(
        &model,
        &documents,
        execution(flags.single_pass, flags.partitions),
    )?;

    println!("{}", perplexity);

    Ok(())
}

fn lda_topics(flags: &flags::LdaTopics) -> Result<()> {
    store::check_output(&flags.output)?;

    let model = lda::load(&flags.model)?;
    let vocab = store::read_vocabulary(&flags.vocab)?;
    let description = lda::topic_description(&model, &vocab, flags.top_k.unwrap_or(15))?;

    store::write_jsonl(&flags.output, &description)
}

fn lda_counts(flags: &flags::LdaCounts) -> Result<()> {
    store::check_output(&flags.output)?;

    let model = lda::load(&flags.model)?;

    if flags.by_word {
        store::write_jsonl(&flags.output, &lda::word_topic_counts(&model))
    } else {
        store::write_jsonl(&flags.output, &lda::topic_word_counts(&model))
    }
}

/// Fit a Gaussian mixture starting from a user-supplied model.
fn gmm_train(flags: &flags::GmmTrain) -> Result<()> {
    store::check_output(&flags.output)?;
    if let Some(labels) = &flags.labels {
        store::check_output(labels)?;
    }

    let execution = execution(flags.single_pass, flags.partitions);
    let mut builder = GmmTrainer::builder();
    builder.execution(execution);

    if let Some(max_num_iterations) = flags.max_num_iterations {
        builder.max_num_iterations(max_num_iterations);
    }
    if let Some(tolerance) = flags.tolerance {
        builder.tolerance(tolerance);
    }
    if let Some(reg_covar) = flags.reg_covar {
        builder.reg_covar(reg_covar);
    }

    let trainer = builder.build().map_err(config_error)?;
    let initial = gmm::load(&flags.init)?;
    let points = store::read_points(&flags.input)?;

    log::info!("Loaded {} points from {:?}", points.len(), flags.input);

    let fit = trainer.train(&points, initial)?;

    log::info!(
        "GMM finished after {} iterations | converged={}",
        fit.iterations,
        fit.converged
    );

    fit.model.save(&flags.output)?;

    if let Some(labels) = &flags.labels {
        store::write_jsonl(labels, &gmm::predict(&fit.model, &points, execution)?)?;
    }

    Ok(())
}

fn main() {
    env_logger::init();

    let result = match flags::Topicmix::from_env_or_exit().subcommand {
        flags::TopicmixCmd::LdaTrain(flags) => lda_train(&flags),
        flags::TopicmixCmd::LdaPredict(flags) => lda_predict(&flags),
        flags::TopicmixCmd::LdaPerplexity(flags) => lda_perplexity(&flags),
        flags::TopicmixCmd::LdaTopics(flags) => lda_topics(&flags),
        flags::TopicmixCmd::LdaCounts(flags) => lda_counts(&flags),
        flags::TopicmixCmd::GmmTrain(flags) => gmm_train(&flags),
    };

    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
