//! Volume meter filter
//!
//! Tracks the peak level of each direction; readable from the owning
//! side at any time through a shared handle.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use super::{AudioFilter, AudioFilterDriver, FilterParams};
use crate::Result;

/// Shared level readout, one per direction
#[derive(Default)]
pub struct VuLevels {
    /// Peak absolute sample on the encode path
    pub tx_peak: AtomicI32,

    /// Peak absolute sample on the decode path
    pub rx_peak: AtomicI32,
}

/// Volume meter filter driver
pub struct VuMeterDriver {
    levels: Arc<VuLevels>,
}

impl VuMeterDriver {
    /// Create the driver together with its readout handle
    pub fn new() -> (Self, Arc<VuLevels>) {
        let levels = Arc::new(VuLevels::default());
        (
            Self {
                levels: Arc::clone(&levels),
            },
            levels,
        )
    }
}

impl AudioFilterDriver for VuMeterDriver {
    fn name(&self) -> &str {
        "vumeter"
    }

    fn update(
        &self,
        _encode: Option<&FilterParams>,
        _decode: Option<&FilterParams>,
    ) -> Result<Box<dyn AudioFilter>> {
        Ok(Box::new(VuMeter {
            levels: Arc::clone(&self.levels),
        }))
    }
}

struct VuMeter {
    levels: Arc<VuLevels>,
}

fn peak(samples: &[i16]) -> i32 {
    samples
        .iter()
        .map(|s| (*s as i32).abs())
        .max()
        .unwrap_or(0)
}

impl AudioFilter for VuMeter {
    fn name(&self) -> &str {
        "vumeter"
    }

    fn encode(&mut self, samples: &mut [i16]) -> Result<()> {
        self.levels.tx_peak.store(peak(samples), Ordering::Relaxed);
        Ok(())
    }

    fn decode(&mut self, samples: &mut [i16]) -> Result<()> {
        self.levels.rx_peak.store(peak(samples), Ordering::Relaxed);
        Ok(())
    }
}
