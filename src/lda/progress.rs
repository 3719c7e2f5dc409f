use super::AssignedDocument;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering::Relaxed},
        Arc,
    },
    time::{Duration, Instant},
};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Shared progress of one pass of the Gibbs sampler over a set of documents.
/// Every worker accumulates into its own `WorkerProgress` and publishes once
/// when its partition is sampled.
#[derive(Clone)]
pub struct SweepProgress {
    shared: Arc<Counters>,
}

struct Counters {
    desc: String,
    start: Instant,
    num_documents: usize,
    num_sweeps: usize,
    documents: AtomicUsize,
    draws: AtomicUsize,
    degenerate: AtomicUsize,
    finished: AtomicBool,
}

/// Per-worker counters, published by `WorkerProgress::publish`.
pub struct WorkerProgress {
    shared: Arc<Counters>,
    documents: usize,
    draws: usize,
    degenerate: usize,
}

/// Totals of a finished pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub documents: usize,
    pub draws: usize,
    /// Draws whose topic weights all vanished and fell back to uniform.
    pub degenerate: usize,
}

impl SweepProgress {
    pub fn new(desc: impl Into<String>, num_documents: usize, num_sweeps: usize) -> Self {
        Self {
            shared: Arc::new(Counters {
                desc: desc.into(),
                start: Instant::now(),
                num_documents,
                num_sweeps,
                documents: AtomicUsize::new(0),
                draws: AtomicUsize::new(0),
                degenerate: AtomicUsize::new(0),
                finished: AtomicBool::new(false),
            }),
        }
    }

    /// Logs the number of sampled documents and the draw rate at debug level
    /// until the pass is finished.
    pub fn start(&self) {
        let shared = self.shared.clone();

        std::thread::spawn(move || loop {
            std::thread::sleep(REPORT_INTERVAL);

            if shared.finished.load(Relaxed) {
                break;
            }

            let documents = shared.documents.load(Relaxed);
            if documents == 0 {
                continue;
            }

            log::debug!(
                "{} | {}/{} documents | {:.0} draws/s",
                shared.desc,
                documents,
                shared.num_documents,
                shared.draws.load(Relaxed) as f64 / shared.start.elapsed().as_secs_f64()
            );
        });
    }

    pub fn worker(&self) -> WorkerProgress {
        WorkerProgress {
            shared: self.shared.clone(),
            documents: 0,
            draws: 0,
            degenerate: 0,
        }
    }

    /// Stops the reporter and returns the published totals.
    pub fn finish(&self) -> SweepSummary {
        self.shared.finished.store(true, Relaxed);

        let summary = SweepSummary {
            documents: self.shared.documents.load(Relaxed),
            draws: self.shared.draws.load(Relaxed),
            degenerate: self.shared.degenerate.load(Relaxed),
        };

        log::debug!(
            "FINISHED {} | {} documents | {} draws | {:.2}s",
            self.shared.desc,
            summary.documents,
            summary.draws,
            self.shared.start.elapsed().as_secs_f64()
        );

        summary
    }
}

impl WorkerProgress {
    pub fn num_sweeps(&self) -> usize {
        self.shared.num_sweeps
    }

    /// Records a document that went through every sweep, `degenerate` of
    /// whose draws fell back to uniform.
    pub fn record(&mut self, document: &AssignedDocument, degenerate: usize) {
        self.documents += 1;
        self.draws += document.word_count * self.shared.num_sweeps;
        self.degenerate += degenerate;
    }

    pub fn publish(self) {
        self.shared.documents.fetch_add(self.documents, Relaxed);
        self.shared.draws.fetch_add(self.draws, Relaxed);
        self.shared.degenerate.fetch_add(self.degenerate, Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lda::Document;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_workers_publish_totals() {
        let mut rng = StdRng::seed_from_u64(0);
        let document = AssignedDocument::random(Document::new(0, vec![1, 2], vec![2, 1]), 2, &mut rng);
        let progress = SweepProgress::new("test", 3, 4);

        let mut a = progress.worker();
        let mut b = progress.worker();
        a.record(&document, 0);
        a.record(&document, 2);
        b.record(&document, 1);
        a.publish();
        b.publish();

        assert_eq!(
            progress.finish(),
            SweepSummary {
                documents: 3,
                draws: 3 * 3 * 4,
                degenerate: 3,
            }
        );
    }

    #[test]
    fn test_unpublished_work_is_not_counted() {
        let progress = SweepProgress::new("test", 1, 1);
        let _worker = progress.worker();

        assert_eq!(progress.finish().documents, 0);
    }
}
