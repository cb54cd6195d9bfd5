//! Worker pool sizing for the parallel source-parsing pass.

use anyhow::{Context, Result};
use tracing::info;

/// Default worker count: half the cores, at least one.
pub fn default_workers() -> usize {
    std::cmp::max(1, num_cpus::get() / 2)
}

/// Initialize the global rayon thread pool. `None` picks `default_workers()`.
pub fn init_thread_pool(workers: Option<usize>) -> Result<usize> {
    let workers = workers.filter(|w| *w > 0).unwrap_or_else(default_workers);

    rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build_global()
        .context("global thread pool already initialized")?;

    info!(workers, cores = num_cpus::get(), "initialized thread pool");
    Ok(workers)
}
