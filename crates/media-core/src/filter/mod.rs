//! Audio filter chain
//!
//! Filters register process-wide like codecs. When a pipeline starts it
//! asks every registered filter for an instance; the update call receives
//! the encode-side and decode-side parameters together, since a filter
//! may bridge both directions (an echo canceller correlates them).
//! Frames pass through the chain in list order on encode and in reverse
//! order on decode.

pub mod vumeter;

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::warn;

use crate::Result;

/// Per-direction parameters handed to filter update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterParams {
    /// DSP sample rate in Hz
    pub clock_rate: u32,

    /// Channel count
    pub channels: u8,

    /// Samples per frame across all channels
    pub frame_samples: usize,
}

/// A filter instance processing one call's audio
pub trait AudioFilter: Send {
    /// Filter name, for logs
    fn name(&self) -> &str;

    /// Process one frame on the encode path, in place
    fn encode(&mut self, _samples: &mut [i16]) -> Result<()> {
        Ok(())
    }

    /// Process one frame on the decode path, in place
    fn decode(&mut self, _samples: &mut [i16]) -> Result<()> {
        Ok(())
    }
}

/// A registered filter kind, instantiated per call
pub trait AudioFilterDriver: Send + Sync {
    /// Filter name
    fn name(&self) -> &str;

    /// Create an instance for a call. Both directions' parameters arrive
    /// in one call; either may be absent when that direction has no codec.
    fn update(
        &self,
        encode: Option<&FilterParams>,
        decode: Option<&FilterParams>,
    ) -> Result<Box<dyn AudioFilter>>;
}

static FILTERS: Lazy<RwLock<Vec<Arc<dyn AudioFilterDriver>>>> = Lazy::new(|| RwLock::new(Vec::new()));

/// Append a filter to the registry; init/module-load time only
pub fn register_filter(driver: Arc<dyn AudioFilterDriver>) {
    FILTERS.write().push(driver);
}

/// All registered filters in registration order
pub fn filters() -> Vec<Arc<dyn AudioFilterDriver>> {
    FILTERS.read().clone()
}

/// Remove every registered filter (used between tests)
pub fn clear_filters() {
    FILTERS.write().clear();
}

/// Build the filter chain for a starting pipeline. A filter that fails
/// to instantiate is skipped with a warning rather than failing the call.
pub fn build_chain(
    encode: Option<&FilterParams>,
    decode: Option<&FilterParams>,
) -> Vec<Box<dyn AudioFilter>> {
    let mut chain = Vec::new();
    for driver in FILTERS.read().iter() {
        match driver.update(encode, decode) {
            Ok(instance) => chain.push(instance),
            Err(e) => warn!(filter = driver.name(), "filter update failed: {}", e),
        }
    }
    chain
}
