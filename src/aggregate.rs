use crate::{utils::parallelism::MaybeParallelIterator, Result};
use rayon::current_num_threads;

/// Partitions per thread when the number of partitions is derived.
const PARTITIONS_PER_THREAD: usize = 4;

/// An aggregate over rows expressed as a transition function, an associative
/// and commutative merge of partial states, and a finalizer. Any partition of
/// the rows and any merge-tree shape must yield the same final state.
pub trait Aggregator: Sync {
    type Input: Sync;
    type State: Send;
    type Output;

    /// The identity element of `merge`.
    fn init(&self) -> Self::State;

    /// Folds one row into a partial state.
    fn transition(&self, state: Self::State, input: &Self::Input) -> Result<Self::State>;

    /// Combines two partial states.
    fn merge(&self, left: Self::State, right: Self::State) -> Result<Self::State>;

    fn finalize(&self, state: Self::State) -> Result<Self::Output>;

    /// Sequentially folds a partition of rows, starting from `init`.
    fn fold<'a, I>(&self, inputs: I) -> Result<Self::State>
    where
        I: IntoIterator<Item = &'a Self::Input>,
        Self::Input: 'a,
    {
        inputs
            .into_iter()
            .try_fold(self.init(), |state, input| self.transition(state, input))
    }
}

/// How rows are split across workers and how partial states are combined.
/// Resolved once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// One partition processed on the calling thread.
    SinglePass,
    /// Rows are split into `num_partitions` disjoint partitions processed on
    /// the rayon pool and merged with a tree reduction. Zero derives the
    /// number of partitions from the number of threads.
    MergeTree { num_partitions: usize },
}

impl Default for ExecutionStrategy {
    fn default() -> Self {
        ExecutionStrategy::MergeTree { num_partitions: 0 }
    }
}

impl ExecutionStrategy {
    pub fn is_parallel(&self) -> bool {
        matches!(self, ExecutionStrategy::MergeTree { .. })
    }

    /// The number of rows in every partition but the last one.
    pub fn partition_size(&self, num_rows: usize) -> usize {
        match *self {
            ExecutionStrategy::SinglePass => num_rows.max(1),
            ExecutionStrategy::MergeTree { num_partitions: 0 } => {
                (num_rows / (current_num_threads() * PARTITIONS_PER_THREAD)).max(1)
            }
            ExecutionStrategy::MergeTree { num_partitions } => {
                num_rows.div_ceil(num_partitions).max(1)
            }
        }
    }

    /// Folds every partition independently and merges the partial states.
    pub fn reduce<A: Aggregator>(&self, aggregator: &A, rows: &[A::Input]) -> Result<A::State> {
        let partition_size = self.partition_size(rows.len());

        rows.chunks(partition_size)
            .collect::<Vec<_>>()
            .into_maybe_par_iter(self.is_parallel())
            .map(|partition| aggregator.fold(partition))
            .reduce(
                || Ok(aggregator.init()),
                |left, right| aggregator.merge(left?, right?),
            )
    }

    /// Runs `aggregator` over `rows` and finalizes the merged state.
    pub fn aggregate<A: Aggregator>(&self, aggregator: &A, rows: &[A::Input]) -> Result<A::Output> {
        let state = self.reduce(aggregator, rows)?;
        aggregator.finalize(state)
    }

    /// Hands every partition of `rows` to `f` together with its index. The
    /// partitions are disjoint so workers never share mutable state.
    pub fn for_each_partition<T, F>(&self, rows: &mut [T], f: F) -> Result<()>
    where
        T: Send,
        F: Fn(usize, &mut [T]) -> Result<()> + Sync + Send,
    {
        let partition_size = self.partition_size(rows.len());

        rows.chunks_mut(partition_size)
            .enumerate()
            .collect::<Vec<_>>()
            .into_maybe_par_iter(self.is_parallel())
            .map(|(index, partition)| f(index, partition))
            .reduce(|| Ok(()), |left, right| left.and(right))
    }
}
