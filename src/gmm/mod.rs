//! Gaussian mixture with a covariance matrix shared by every cluster, fitted
//! with data-parallel expectation-maximization.
//!
//! The E-step is a pure function of a point and the current model. The
//! M-step is expressed as aggregators over the points so that partial
//! statistics can be merged in any order.

pub mod estep;
pub mod mstep;
pub mod trainer;

pub use estep::GaussianKernel;
pub use mstep::{CovarianceAggregator, LogLikelihoodAggregator, WeightMeanAggregator};
pub use trainer::{GmmFit, GmmTrainer, GmmTrainerBuilder};

use crate::{
    store, utils::parallelism::MaybeParallelIterator, Error, ExecutionStrategy, Result,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GmmModel {
    /// Mixing weight of every cluster. Sums to one.
    pub weights: Vec<f64>,
    /// `k × dim`.
    pub means: Vec<Vec<f64>>,
    /// `dim × dim`, shared by every cluster.
    pub covariance: Vec<Vec<f64>>,
}

impl GmmModel {
    pub fn new(weights: Vec<f64>, means: Vec<Vec<f64>>, covariance: Vec<Vec<f64>>) -> Result<Self> {
        let model = Self {
            weights,
            means,
            covariance,
        };
        model.validate()?;
        Ok(model)
    }

    pub fn num_clusters(&self) -> usize {
        self.weights.len()
    }

    pub fn dim(&self) -> usize {
        self.covariance.len()
    }

    pub fn validate(&self) -> Result<()> {
        let k = self.num_clusters();
        let dim = self.dim();

        if k == 0 {
            return Err(Error::invalid("k", "must be positive"));
        }
        if dim == 0 {
            return Err(Error::invalid("dim", "must be positive"));
        }
        if self.means.len() != k {
            return Err(Error::DimensionMismatch {
                what: "means",
                expected: k,
                found: self.means.len(),
            });
        }
        if let Some(mean) = self.means.iter().find(|mean| mean.len() != dim) {
            return Err(Error::DimensionMismatch {
                what: "mean",
                expected: dim,
                found: mean.len(),
            });
        }
        if let Some(row) = self.covariance.iter().find(|row| row.len() != dim) {
            return Err(Error::DimensionMismatch {
                what: "covariance row",
                expected: dim,
                found: row.len(),
            });
        }
        if self
            .weights
            .iter()
            .any(|&weight| !(weight >= 0.0 && weight.is_finite()))
        {
            return Err(Error::invalid("weights", "must be non-negative"));
        }

        let total: f64 = self.weights.iter().sum();
        if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(Error::invalid(
                "weights",
                format!("must sum to 1, got {}", total),
            ));
        }

        for i in 0..dim {
            for j in 0..i {
                let (a, b) = (self.covariance[i][j], self.covariance[j][i]);
                if (a - b).abs() > 1e-9 * a.abs().max(b.abs()).max(1.0) {
                    return Err(Error::invalid("covariance", "must be symmetric"));
                }
            }
        }

        Ok(())
    }

    /// Posterior probability of every cluster for `point`.
    pub fn responsibilities(&self, point: &[f64]) -> Result<Vec<f64>> {
        GaussianKernel::new(self)?.responsibilities(point)
    }

    /// Writes the model as JSON. Fails if `path` already exists.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        store::write_json(path, self)
    }
}

/// Load and validate a model from a JSON file.
pub fn load<P: AsRef<Path>>(path: P) -> Result<GmmModel> {
    let model: GmmModel = store::read_json(path)?;
    model.validate()?;
    Ok(model)
}

/// Hard assignment of every point to its most responsible cluster.
pub fn predict(
    model: &GmmModel,
    points: &[Vec<f64>],
    execution: ExecutionStrategy,
) -> Result<Vec<usize>> {
    let kernel = GaussianKernel::new(model)?;
    let partition_size = execution.partition_size(points.len());

    let labels = points
        .chunks(partition_size)
        .collect::<Vec<_>>()
        .into_maybe_par_iter(execution.is_parallel())
        .map(|partition| {
            partition
                .iter()
                .map(|point| kernel.most_likely(point))
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(labels.into_iter().flatten().collect())
}
