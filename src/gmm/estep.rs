use super::GmmModel;
use crate::{utils::log_sum_exp, Error, Result};
use nalgebra::{DMatrix, DVector};

/// The current model prepared for density evaluation: the shared covariance
/// is factorized once per epoch and every point is then scored in log space.
#[derive(Debug, Clone)]
pub struct GaussianKernel {
    log_weights: Vec<f64>,
    means: Vec<DVector<f64>>,
    precision: DMatrix<f64>,
    /// `-(dim * ln(2π) + ln|Σ|) / 2`.
    log_norm: f64,
}

impl GaussianKernel {
    pub fn new(model: &GmmModel) -> Result<Self> {
        model.validate()?;

        let dim = model.dim();
        let covariance = DMatrix::from_fn(dim, dim, |i, j| model.covariance[i][j]);
        let cholesky = covariance.cholesky().ok_or(Error::SingularCovariance)?;
        let diagonal = cholesky.l().diagonal();

        // A factorization that only succeeds through rounding is singular.
        let (min, max) = (diagonal.min(), diagonal.max());
        if min * min <= max * max * f64::EPSILON * dim as f64 {
            return Err(Error::SingularCovariance);
        }

        let log_det = 2.0 * diagonal.iter().map(|v| v.ln()).sum::<f64>();

        Ok(Self {
            log_weights: model.weights.iter().map(|w| w.ln()).collect(),
            means: model
                .means
                .iter()
                .map(|mean| DVector::from_column_slice(mean))
                .collect(),
            precision: cholesky.inverse(),
            log_norm: -0.5 * (dim as f64 * (2.0 * std::f64::consts::PI).ln() + log_det),
        })
    }

    pub fn num_clusters(&self) -> usize {
        self.means.len()
    }

    pub fn dim(&self) -> usize {
        self.precision.nrows()
    }

    pub(crate) fn vector(&self, point: &[f64]) -> Result<DVector<f64>> {
        if point.len() != self.dim() {
            return Err(Error::DimensionMismatch {
                what: "point",
                expected: self.dim(),
                found: point.len(),
            });
        }

        Ok(DVector::from_column_slice(point))
    }

    /// `ln N(x; mean[cluster], Σ)`.
    fn log_density(&self, cluster: usize, x: &DVector<f64>) -> f64 {
        let diff = x - &self.means[cluster];
        self.log_norm - 0.5 * diff.dot(&(&self.precision * &diff))
    }

    /// `ln(weight[k]) + ln N(x; mean[k], Σ)` for every cluster.
    pub fn log_joint(&self, point: &[f64]) -> Result<Vec<f64>> {
        let x = self.vector(point)?;

        Ok(self
            .log_weights
            .iter()
            .enumerate()
            .map(|(k, log_weight)| log_weight + self.log_density(k, &x))
            .collect())
    }

    /// `ln(sum_k weight[k] * N(x; mean[k], Σ))`, failing when it is not
    /// finite since no cluster can then claim the point.
    fn log_evidence(&self, point: &[f64], log_joint: &[f64]) -> Result<f64> {
        let log_evidence = log_sum_exp(log_joint);

        if !log_evidence.is_finite() {
            return Err(Error::VanishingDensity(point.to_vec()));
        }

        Ok(log_evidence)
    }

    /// Normalized posterior of every cluster. Densities that underflow in
    /// linear space are still resolved in log space.
    pub fn responsibilities(&self, point: &[f64]) -> Result<Vec<f64>> {
        let log_joint = self.log_joint(point)?;
        let log_evidence = self.log_evidence(point, &log_joint)?;

        Ok(log_joint
            .iter()
            .map(|log_p| (log_p - log_evidence).exp())
            .collect())
    }

    pub fn log_likelihood(&self, point: &[f64]) -> Result<f64> {
        let log_joint = self.log_joint(point)?;
        self.log_evidence(point, &log_joint)
    }

    /// The cluster with the highest responsibility, lowest index on ties.
    pub fn most_likely(&self, point: &[f64]) -> Result<usize> {
        let log_joint = self.log_joint(point)?;
        self.log_evidence(point, &log_joint)?;

        Ok(log_joint
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (k, &log_p)| {
                if log_p > best.1 {
                    (k, log_p)
                } else {
                    best
                }
            })
            .0)
    }
}
