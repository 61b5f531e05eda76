pub mod density;

pub use density::DensitySolver;

/// Evaluate `f` for every particle index, in parallel with the `parallel`
/// feature. Each call reads only shared snapshots; results are written back
/// by the caller.
pub(crate) fn per_particle<T, F>(count: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        (0..count).into_par_iter().map(f).collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        (0..count).map(f).collect()
    }
}
