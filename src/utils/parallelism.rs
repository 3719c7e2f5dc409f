//! Serial or parallel iteration chosen at runtime. The decision is made once
//! per run from the `ExecutionStrategy` rather than at every call site.

use rayon::iter::{IntoParallelIterator, ParallelIterator};
use rayon_cond::CondIterator;

pub use rayon::current_num_threads;

/// Converts a collection into an iterator that runs on the rayon pool when
/// `parallel` is true and on the calling thread otherwise.
pub trait MaybeParallelIterator<P, S>
where
    P: ParallelIterator,
    S: Iterator<Item = P::Item>,
{
    fn into_maybe_par_iter(self, parallel: bool) -> CondIterator<P, S>;
}

impl<P, S, I> MaybeParallelIterator<P, S> for I
where
    I: IntoParallelIterator<Iter = P, Item = P::Item> + IntoIterator<IntoIter = S, Item = S::Item>,
    P: ParallelIterator,
    S: Iterator<Item = P::Item>,
{
    fn into_maybe_par_iter(self, parallel: bool) -> CondIterator<P, S> {
        CondIterator::new(self, parallel)
    }
}
