use super::{GaussianKernel, GmmModel};
use crate::{Aggregator, Error, Result};
use nalgebra::{DMatrix, DVector};

/// Responsibility mass and responsibility-weighted sum of the points of every
/// cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightMeanState {
    pub mass: Vec<f64>,
    pub weighted_sum: Vec<DVector<f64>>,
    pub num_points: u64,
}

/// Mixing weights and means re-estimated from the responsibilities under the
/// current model. A cluster without any responsibility mass keeps its
/// previous mean.
pub struct WeightMeanAggregator<'a> {
    kernel: &'a GaussianKernel,
    previous: &'a GmmModel,
}

impl<'a> WeightMeanAggregator<'a> {
    pub fn new(kernel: &'a GaussianKernel, previous: &'a GmmModel) -> Self {
        Self { kernel, previous }
    }
}

impl Aggregator for WeightMeanAggregator<'_> {
    type Input = Vec<f64>;
    type State = WeightMeanState;
    /// `(weights, means)`.
    type Output = (Vec<f64>, Vec<Vec<f64>>);

    fn init(&self) -> WeightMeanState {
        let k = self.kernel.num_clusters();

        WeightMeanState {
            mass: vec![0.0; k],
            weighted_sum: vec![DVector::zeros(self.kernel.dim()); k],
            num_points: 0,
        }
    }

    fn transition(&self, mut state: WeightMeanState, point: &Vec<f64>) -> Result<WeightMeanState> {
        let x = self.kernel.vector(point)?;
        let responsibilities = self.kernel.responsibilities(point)?;

        for (k, r) in responsibilities.into_iter().enumerate() {
            state.mass[k] += r;
            state.weighted_sum[k].axpy(r, &x, 1.0);
        }
        state.num_points += 1;

        Ok(state)
    }

    fn merge(&self, mut left: WeightMeanState, right: WeightMeanState) -> Result<WeightMeanState> {
        for (l, r) in left.mass.iter_mut().zip(right.mass) {
            *l += r;
        }
        for (l, r) in left.weighted_sum.iter_mut().zip(right.weighted_sum) {
            *l += r;
        }
        left.num_points += right.num_points;

        Ok(left)
    }

    fn finalize(&self, state: WeightMeanState) -> Result<Self::Output> {
        if state.num_points == 0 {
            return Err(Error::EmptyInput("points"));
        }

        let n = state.num_points as f64;
        let weights = state.mass.iter().map(|mass| mass / n).collect();
        let means = state
            .mass
            .iter()
            .zip(&state.weighted_sum)
            .zip(&self.previous.means)
            .map(|((&mass, sum), previous)| {
                if mass > 0.0 {
                    (sum / mass).iter().copied().collect()
                } else {
                    previous.clone()
                }
            })
            .collect();

        Ok((weights, means))
    }
}

/// The shared covariance re-estimated around the new means: the
/// responsibility-weighted scatter of every point around every cluster mean,
/// normalized by the total responsibility mass.
pub struct CovarianceAggregator<'a> {
    kernel: &'a GaussianKernel,
    means: Vec<DVector<f64>>,
    reg_covar: f64,
}

impl<'a> CovarianceAggregator<'a> {
    pub fn new(kernel: &'a GaussianKernel, means: &[Vec<f64>], reg_covar: f64) -> Self {
        Self {
            kernel,
            means: means
                .iter()
                .map(|mean| DVector::from_column_slice(mean))
                .collect(),
            reg_covar,
        }
    }
}

impl Aggregator for CovarianceAggregator<'_> {
    type Input = Vec<f64>;
    /// `(scatter, mass)`.
    type State = (DMatrix<f64>, f64);
    type Output = Vec<Vec<f64>>;

    fn init(&self) -> Self::State {
        let dim = self.kernel.dim();
        (DMatrix::zeros(dim, dim), 0.0)
    }

    fn transition(&self, (mut scatter, mut mass): Self::State, point: &Vec<f64>) -> Result<Self::State> {
        let x = self.kernel.vector(point)?;
        let responsibilities = self.kernel.responsibilities(point)?;

        for (r, mean) in responsibilities.into_iter().zip(&self.means) {
            if r == 0.0 {
                continue;
            }
            let diff = &x - mean;
            scatter.ger(r, &diff, &diff, 1.0);
            mass += r;
        }

        Ok((scatter, mass))
    }

    fn merge(&self, left: Self::State, right: Self::State) -> Result<Self::State> {
        Ok((left.0 + right.0, left.1 + right.1))
    }

    fn finalize(&self, (scatter, mass): Self::State) -> Result<Self::Output> {
        if mass <= 0.0 {
            return Err(Error::EmptyInput("points"));
        }

        let dim = scatter.nrows();
        let mut covariance = scatter / mass;

        // Rounding leaves the two triangles slightly apart.
        covariance = (&covariance + covariance.transpose()) * 0.5;

        for i in 0..dim {
            covariance[(i, i)] += self.reg_covar;
        }

        Ok((0..dim)
            .map(|i| covariance.row(i).iter().copied().collect())
            .collect())
    }
}

/// Total log-likelihood of the points under the model.
pub struct LogLikelihoodAggregator<'a> {
    kernel: &'a GaussianKernel,
}

impl<'a> LogLikelihoodAggregator<'a> {
    pub fn new(kernel: &'a GaussianKernel) -> Self {
        Self { kernel }
    }
}

impl Aggregator for LogLikelihoodAggregator<'_> {
    type Input = Vec<f64>;
    /// `(log_likelihood, num_points)`.
    type State = (f64, u64);
    type Output = f64;

    fn init(&self) -> Self::State {
        (0.0, 0)
    }

    fn transition(&self, (ll, n): Self::State, point: &Vec<f64>) -> Result<Self::State> {
        Ok((ll + self.kernel.log_likelihood(point)?, n + 1))
    }

    fn merge(&self, left: Self::State, right: Self::State) -> Result<Self::State> {
        Ok((left.0 + right.0, left.1 + right.1))
    }

    fn finalize(&self, (ll, n): Self::State) -> Result<f64> {
        if n == 0 {
            return Err(Error::EmptyInput("points"));
        }

        Ok(ll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExecutionStrategy;
    use assert_approx_eq::assert_approx_eq;

    fn points() -> Vec<Vec<f64>> {
        vec![
            vec![0.0, 0.0],
            vec![2.0, 0.0],
            vec![0.0, 2.0],
            vec![2.0, 2.0],
            vec![1.0, 1.0],
            vec![1.0, 3.0],
        ]
    }

    fn model() -> GmmModel {
        GmmModel::new(
            vec![0.5, 0.5],
            vec![vec![0.0, 0.0], vec![2.0, 2.0]],
            vec![vec![1.0, 0.2], vec![0.2, 1.0]],
        )
        .unwrap()
    }

    #[test]
    fn test_weight_mean_sums() {
        let model = model();
        let kernel = GaussianKernel::new(&model).unwrap();
        let aggregator = WeightMeanAggregator::new(&kernel, &model);

        let state = aggregator.fold(&points()).unwrap();
        assert_eq!(state.num_points, 6);
        assert_approx_eq!(state.mass.iter().sum::<f64>(), 6.0, 1e-12);

        let (weights, means) = aggregator.finalize(state).unwrap();
        assert_approx_eq!(weights.iter().sum::<f64>(), 1.0, 1e-12);
        assert_eq!(means.len(), 2);
        assert!(means[0][0] < means[1][0]);
    }

    #[test]
    fn test_strategies_agree() {
        let model = model();
        let kernel = GaussianKernel::new(&model).unwrap();
        let points = points();

        let (weights, means) = ExecutionStrategy::SinglePass
            .aggregate(&WeightMeanAggregator::new(&kernel, &model), &points)
            .unwrap();
        let (tree_weights, tree_means) = ExecutionStrategy::MergeTree { num_partitions: 4 }
            .aggregate(&WeightMeanAggregator::new(&kernel, &model), &points)
            .unwrap();

        for k in 0..2 {
            assert_approx_eq!(weights[k], tree_weights[k], 1e-12);
            for d in 0..2 {
                assert_approx_eq!(means[k][d], tree_means[k][d], 1e-12);
            }
        }

        let covariance = ExecutionStrategy::SinglePass
            .aggregate(&CovarianceAggregator::new(&kernel, &means, 0.0), &points)
            .unwrap();
        let tree_covariance = ExecutionStrategy::MergeTree { num_partitions: 3 }
            .aggregate(&CovarianceAggregator::new(&kernel, &means, 0.0), &points)
            .unwrap();

        for i in 0..2 {
            for j in 0..2 {
                assert_approx_eq!(covariance[i][j], tree_covariance[i][j], 1e-12);
            }
        }
        assert_eq!(covariance[0][1], covariance[1][0]);

        let ll = ExecutionStrategy::SinglePass
            .aggregate(&LogLikelihoodAggregator::new(&kernel), &points)
            .unwrap();
        let tree_ll = ExecutionStrategy::MergeTree { num_partitions: 5 }
            .aggregate(&LogLikelihoodAggregator::new(&kernel), &points)
            .unwrap();
        assert_approx_eq!(ll, tree_ll, 1e-9);
    }

    #[test]
    fn test_zero_mass_cluster_keeps_mean() {
        let model = GmmModel::new(
            vec![1.0, 0.0],
            vec![vec![0.0, 0.0], vec![7.0, -7.0]],
            vec![vec![1.0, 0.0], vec![0.0, 1.0]],
        )
        .unwrap();
        let kernel = GaussianKernel::new(&model).unwrap();

        let (weights, means) = ExecutionStrategy::SinglePass
            .aggregate(&WeightMeanAggregator::new(&kernel, &model), &points())
            .unwrap();

        assert_eq!(weights[1], 0.0);
        assert_eq!(means[1], vec![7.0, -7.0]);
        assert_approx_eq!(means[0][0], 1.0, 1e-12);
        assert_approx_eq!(means[0][1], 8.0 / 6.0, 1e-12);
    }

    #[test]
    fn test_reg_covar() {
        let model = GmmModel::new(vec![1.0], vec![vec![1.0]], vec![vec![1.0]]).unwrap();
        let kernel = GaussianKernel::new(&model).unwrap();
        let points = vec![vec![0.0], vec![2.0]];

        let aggregator = CovarianceAggregator::new(&kernel, &[vec![1.0]], 0.5);
        let covariance = aggregator
            .finalize(aggregator.fold(&points).unwrap())
            .unwrap();

        assert_approx_eq!(covariance[0][0], 1.5, 1e-12);
    }

    #[test]
    fn test_empty_points() {
        let model = model();
        let kernel = GaussianKernel::new(&model).unwrap();

        assert!(ExecutionStrategy::SinglePass
            .aggregate(&LogLikelihoodAggregator::new(&kernel), &[])
            .is_err());
        assert!(ExecutionStrategy::SinglePass
            .aggregate(&WeightMeanAggregator::new(&kernel, &model), &[])
            .is_err());
    }
}
