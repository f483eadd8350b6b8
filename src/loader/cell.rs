//! Configure-once holder for a process-wide loader.

use anyhow::Result;
use once_cell::sync::OnceCell;
use tracing::debug;

use super::{ImageLoader, OrderPolicy};
use crate::config::LoaderConfig;

/// Owns at most one [`ImageLoader`].
///
/// The first `configure` call builds the loader; later calls return it unchanged and ignore
/// their arguments. The cell lives wherever the application keeps its shared services.
#[derive(Default)]
pub struct LoaderCell {
    inner: OnceCell<ImageLoader>,
}

impl LoaderCell {
    pub const fn new() -> Self {
        Self {
            inner: OnceCell::new(),
        }
    }

    pub fn configure(&self, workers: usize, policy: OrderPolicy) -> Result<&ImageLoader> {
        self.configure_with(LoaderConfig::new(workers, policy))
    }

    pub fn configure_with(&self, config: LoaderConfig) -> Result<&ImageLoader> {
        if let Some(existing) = self.inner.get() {
            debug!(
                requested_workers = config.workers,
                requested_policy = %config.policy,
                "Image loader already configured, ignoring new settings"
            );
            return Ok(existing);
        }
        self.inner.get_or_try_init(|| ImageLoader::new(config))
    }

    pub fn get(&self) -> Option<&ImageLoader> {
        self.inner.get()
    }
}
