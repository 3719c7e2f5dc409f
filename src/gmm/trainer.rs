use super::{
    CovarianceAggregator, GaussianKernel, GmmModel, LogLikelihoodAggregator,
    WeightMeanAggregator,
};
use crate::{EpochController, EpochState, Error, ExecutionStrategy, Result};
use derive_builder::Builder;

/// The result of an EM run. Not converging within `max_num_iterations` is
/// reported through `converged`, not as an error.
#[derive(Debug, Clone)]
pub struct GmmFit {
    pub model: GmmModel,
    pub iterations: usize,
    pub converged: bool,
    /// Log-likelihood of the points after every iteration.
    pub log_likelihood: Vec<f64>,
}

#[non_exhaustive]
#[derive(Builder, Clone, Debug)]
pub struct GmmTrainer {
    #[builder(default = "100")]
    pub max_num_iterations: usize,
    /// Stop once the log-likelihood improves by less than this.
    #[builder(default = "1e-3")]
    pub tolerance: f64,
    #[builder(default)]
    pub execution: ExecutionStrategy,
    /// Added to the diagonal of the covariance after every M-step.
    #[builder(default = "0.0")]
    pub reg_covar: f64,
}

impl Default for GmmTrainer {
    fn default() -> Self {
        Self {
            max_num_iterations: 100,
            tolerance: 1e-3,
            execution: ExecutionStrategy::default(),
            reg_covar: 0.0,
        }
    }
}

impl GmmTrainer {
    pub fn builder() -> GmmTrainerBuilder {
        GmmTrainerBuilder::default()
    }

    fn validate(&self, points: &[Vec<f64>], initial: &GmmModel) -> Result<()> {
        if self.max_num_iterations < 1 {
            return Err(Error::invalid("max_num_iterations", "must be at least 1"));
        }
        if !(self.tolerance > 0.0 && self.tolerance.is_finite()) {
            return Err(Error::invalid(
                "tolerance",
                format!("must be positive, got {}", self.tolerance),
            ));
        }
        if !(self.reg_covar >= 0.0 && self.reg_covar.is_finite()) {
            return Err(Error::invalid(
                "reg_covar",
                format!("must be non-negative, got {}", self.reg_covar),
            ));
        }

        initial.validate()?;

        if points.is_empty() {
            return Err(Error::EmptyInput("points"));
        }
        if let Some(point) = points.iter().find(|point| point.len() != initial.dim()) {
            return Err(Error::DimensionMismatch {
                what: "point",
                expected: initial.dim(),
                found: point.len(),
            });
        }

        Ok(())
    }

    /// Runs EM from `initial` until the log-likelihood stops improving by
    /// more than `tolerance` or `max_num_iterations` is reached.
    pub fn train(&self, points: &[Vec<f64>], initial: GmmModel) -> Result<GmmFit> {
        let mut controller = EpochController::new("GMM");

        self.validate(points, &initial)?;

        log::info!(
            "Training GMM | {} points | k={} dim={} | max_num_iterations={} tolerance={} | {:?}",
            points.len(),
            initial.num_clusters(),
            initial.dim(),
            self.max_num_iterations,
            self.tolerance,
            self.execution
        );

        let mut model = initial;
        let mut kernel = GaussianKernel::new(&model)?;
        let mut previous_ll = self
            .execution
            .aggregate(&LogLikelihoodAggregator::new(&kernel), points)?;
        let mut history = Vec::new();
        let mut converged = false;
        let mut weights_and_means = None;

        log::info!("GMM initial log-likelihood={:.6}", previous_ll);

        loop {
            match controller.state() {
                EpochState::Init => controller.transition(EpochState::EStep),
                EpochState::EStep => {
                    weights_and_means = Some(
                        self.execution
                            .aggregate(&WeightMeanAggregator::new(&kernel, &model), points)?,
                    );
                    controller.transition(EpochState::Aggregate);
                }
                EpochState::Aggregate => {
                    let (weights, means) = weights_and_means
                        .take()
                        .ok_or(Error::EmptyInput("responsibilities"))?;
                    let covariance = self.execution.aggregate(
                        &CovarianceAggregator::new(&kernel, &means, self.reg_covar),
                        points,
                    )?;

                    // The new model replaces the previous one wholesale.
                    model = GmmModel {
                        weights,
                        means,
                        covariance,
                    };
                    kernel = GaussianKernel::new(&model)?;

                    controller.transition(EpochState::Eval);
                }
                EpochState::Eval => {
                    let ll = self
                        .execution
                        .aggregate(&LogLikelihoodAggregator::new(&kernel), points)?;
                    let iteration = controller.epoch();

                    converged = (ll - previous_ll).abs() < self.tolerance;
                    history.push(ll);
                    previous_ll = ll;

                    log::info!(
                        "GMM iteration {}/{} | log-likelihood={:.6}{}",
                        iteration,
                        self.max_num_iterations,
                        ll,
                        if converged { " | converged" } else { "" }
                    );

                    controller.transition(
                        if converged || iteration >= self.max_num_iterations {
                            EpochState::Done
                        } else {
                            EpochState::EStep
                        },
                    );
                }
                EpochState::Done => break,
            }
        }

        if !converged {
            log::warn!(
                "GMM did not converge after {} iterations",
                controller.epoch()
            );
        }

        Ok(GmmFit {
            model,
            iterations: controller.epoch(),
            converged,
            log_likelihood: history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn identity(dim: usize) -> Vec<Vec<f64>> {
        (0..dim)
            .map(|i| (0..dim).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
            .collect()
    }

    /// Five points around each of `centers`: the center itself and the four
    /// corners of a unit square around it.
    fn blobs(centers: &[[f64; 2]]) -> Vec<Vec<f64>> {
        centers
            .iter()
            .flat_map(|&[x, y]| {
                [
                    [0.0, 0.0],
                    [-0.5, -0.5],
                    [0.5, -0.5],
                    [-0.5, 0.5],
                    [0.5, 0.5],
                ]
                .into_iter()
                .map(move |[dx, dy]| vec![x + dx, y + dy])
            })
            .collect()
    }

    #[test]
    fn test_single_cluster_one_epoch_is_sample_moments() {
        let points = vec![
            vec![0.0, 0.0],
            vec![2.0, 0.0],
            vec![0.0, 2.0],
            vec![2.0, 2.0],
            vec![1.0, 1.0],
            vec![1.0, 4.0],
        ];
        let initial = GmmModel::new(vec![1.0], vec![vec![-3.0, 5.0]], identity(2)).unwrap();

        let trainer = GmmTrainer::builder()
            .max_num_iterations(1)
            .build()
            .unwrap();
        let fit = trainer.train(&points, initial).unwrap();

        assert_eq!(fit.iterations, 1);
        assert_eq!(fit.log_likelihood.len(), 1);
        assert_eq!(fit.model.weights, vec![1.0]);

        // Mean (1, 1.5), biased covariance around it.
        assert_approx_eq!(fit.model.means[0][0], 1.0, 1e-12);
        assert_approx_eq!(fit.model.means[0][1], 1.5, 1e-12);

        let n = points.len() as f64;
        let (mut xx, mut xy, mut yy) = (0.0, 0.0, 0.0);
        for point in &points {
            let (dx, dy) = (point[0] - 1.0, point[1] - 1.5);
            xx += dx * dx;
            xy += dx * dy;
            yy += dy * dy;
        }
        assert_approx_eq!(fit.model.covariance[0][0], xx / n, 1e-12);
        assert_approx_eq!(fit.model.covariance[0][1], xy / n, 1e-12);
        assert_approx_eq!(fit.model.covariance[1][0], xy / n, 1e-12);
        assert_approx_eq!(fit.model.covariance[1][1], yy / n, 1e-12);
    }

    #[test]
    fn test_two_clusters() {
        let points = blobs(&[[0.0, 0.0], [10.0, 10.0]]);
        let initial = GmmModel::new(
            vec![0.3, 0.7],
            vec![vec![1.0, 1.0], vec![9.0, 8.0]],
            identity(2),
        )
        .unwrap();

        for execution in [
            ExecutionStrategy::SinglePass,
            ExecutionStrategy::MergeTree { num_partitions: 3 },
        ] {
            let trainer = GmmTrainer::builder()
                .tolerance(1e-9)
                .execution(execution)
                .build()
                .unwrap();
            let fit = trainer.train(&points, initial.clone()).unwrap();

            assert!(fit.converged);
            assert!(fit.iterations < 100);

            for (k, center) in [[0.0, 0.0], [10.0, 10.0]].iter().enumerate() {
                assert_approx_eq!(fit.model.weights[k], 0.5, 1e-9);
                assert_approx_eq!(fit.model.means[k][0], center[0], 1e-9);
                assert_approx_eq!(fit.model.means[k][1], center[1], 1e-9);
            }
            assert_approx_eq!(fit.model.covariance[0][0], 0.2, 1e-9);
            assert_approx_eq!(fit.model.covariance[0][1], 0.0, 1e-9);
            assert_approx_eq!(fit.model.covariance[1][1], 0.2, 1e-9);

            // EM never decreases the likelihood.
            for pair in fit.log_likelihood.windows(2) {
                assert!(pair[1] >= pair[0] - 1e-9);
            }

            assert_eq!(
                crate::gmm::predict(&fit.model, &points, execution).unwrap(),
                vec![0, 0, 0, 0, 0, 1, 1, 1, 1, 1]
            );
        }
    }

    #[test]
    fn test_non_convergence_is_reported() {
        let points = blobs(&[[0.0, 0.0], [4.0, 0.0], [0.0, 4.0]]);
        let initial = GmmModel::new(
            vec![0.5, 0.5],
            vec![vec![-1.0, 0.0], vec![1.0, 1.0]],
            identity(2),
        )
        .unwrap();

        let trainer = GmmTrainer::builder()
            .max_num_iterations(2)
            .tolerance(1e-12)
            .build()
            .unwrap();
        let fit = trainer.train(&points, initial).unwrap();

        assert!(!fit.converged);
        assert_eq!(fit.iterations, 2);
        assert_eq!(fit.log_likelihood.len(), 2);
    }

    #[test]
    fn test_validation() {
        let points = blobs(&[[0.0, 0.0]]);
        let initial = GmmModel::new(vec![1.0], vec![vec![0.0, 0.0]], identity(2)).unwrap();

        let mut trainer = GmmTrainer::default();
        trainer.max_num_iterations = 0;
        assert!(matches!(
            trainer.train(&points, initial.clone()),
            Err(Error::InvalidParameter {
                name: "max_num_iterations",
                ..
            })
        ));

        let mut trainer = GmmTrainer::default();
        trainer.tolerance = 0.0;
        assert!(trainer.train(&points, initial.clone()).is_err());

        let trainer = GmmTrainer::default();
        assert!(matches!(
            trainer.train(&[], initial.clone()),
            Err(Error::EmptyInput(_))
        ));
        assert!(matches!(
            trainer.train(&[vec![1.0]], initial),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_degenerate_points_need_regularization() {
        // Every point on the line y = x: the covariance becomes singular.
        let points: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64, i as f64]).collect();
        let initial = GmmModel::new(vec![1.0], vec![vec![0.0, 0.0]], identity(2)).unwrap();

        let trainer = GmmTrainer::default();
        assert!(matches!(
            trainer.train(&points, initial.clone()),
            Err(Error::SingularCovariance)
        ));

        let mut trainer = GmmTrainer::default();
        trainer.reg_covar = 1e-3;
        let fit = trainer.train(&points, initial).unwrap();
        assert!(fit.model.covariance[0][0] > fit.model.covariance[0][1]);
    }
}
