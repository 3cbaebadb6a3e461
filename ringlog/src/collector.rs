//! The sample source seam.

use crate::error::CollectorError;
use crate::sample::SampleBatch;

/// Produces one [`SampleBatch`] per call.
///
/// Implementations block until the device answers. The driver runs every
/// call on a helper thread and gives up after its collect timeout, so a
/// collector does not need to enforce one itself, though it should when the
/// underlying transport supports it.
pub trait Collector: Send + Sync {
    /// Polls the device once.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError`] if the device could not be reached or its
    /// answer could not be turned into a batch.
    fn fetch(&self) -> Result<SampleBatch, CollectorError>;
}

impl<F> Collector for F
where
    F: Fn() -> Result<SampleBatch, CollectorError> + Send + Sync,
{
    fn fetch(&self) -> Result<SampleBatch, CollectorError> {
        self()
    }
}
