//! Audio capture and playback drivers
//!
//! A driver claims or spawns its own thread and moves raw PCM through a
//! callback: sources push captured frames, players pull frames to play.
//! The handle returned by `open` owns that thread; dropping it joins the
//! thread, so no callback runs after the handle is gone.

mod test_dev;

#[cfg(feature = "device-cpal")]
mod cpal_dev;

pub use test_dev::{NullPlayerDriver, ToneSourceDriver};

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error::Error;
use crate::types::AudioParams;
use crate::Result;

/// Capture callback: receives one frame of interleaved S16LE bytes.
/// Called on the driver's thread.
pub type SourceReadFn = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Fatal-error callback for a source
pub type SourceErrorFn = Arc<dyn Fn(String) + Send + Sync>;

/// Playback callback: fills one frame of interleaved S16LE bytes.
/// Returns `false` when the frame is silence. Called on the driver's
/// thread.
pub type PlayerWriteFn = Arc<dyn Fn(&mut [u8]) -> bool + Send + Sync>;

/// A running capture or playback stream. Dropping stops the stream and
/// joins its thread.
pub trait AudioStreamHandle: Send {}

/// A capture driver
pub trait AudioSourceDriver: Send + Sync {
    /// Driver name used in configuration
    fn name(&self) -> &str;

    /// Open a capture stream on the given device
    fn open_source(
        &self,
        params: &AudioParams,
        device: &str,
        read: SourceReadFn,
        error: SourceErrorFn,
    ) -> Result<Box<dyn AudioStreamHandle>>;
}

/// A playback driver
pub trait AudioPlayerDriver: Send + Sync {
    /// Driver name used in configuration
    fn name(&self) -> &str;

    /// Open a playback stream on the given device
    fn open_player(
        &self,
        params: &AudioParams,
        device: &str,
        write: PlayerWriteFn,
    ) -> Result<Box<dyn AudioStreamHandle>>;
}

static SOURCES: Lazy<RwLock<Vec<Arc<dyn AudioSourceDriver>>>> = Lazy::new(|| RwLock::new(Vec::new()));
static PLAYERS: Lazy<RwLock<Vec<Arc<dyn AudioPlayerDriver>>>> = Lazy::new(|| RwLock::new(Vec::new()));

/// Register a capture driver; init/module-load time only
pub fn register_source_driver(driver: Arc<dyn AudioSourceDriver>) {
    SOURCES.write().push(driver);
}

/// Register a playback driver; init/module-load time only
pub fn register_player_driver(driver: Arc<dyn AudioPlayerDriver>) {
    PLAYERS.write().push(driver);
}

/// Find a capture driver by name; an empty name takes the first one
pub fn find_source_driver(name: &str) -> Result<Arc<dyn AudioSourceDriver>> {
    let drivers = SOURCES.read();
    let found = if name.is_empty() {
        drivers.first()
    } else {
        drivers.iter().find(|d| d.name() == name)
    };
    found
        .cloned()
        .ok_or_else(|| Error::NotFound(format!("audio source driver '{}'", name)))
}

/// Find a playback driver by name; an empty name takes the first one
pub fn find_player_driver(name: &str) -> Result<Arc<dyn AudioPlayerDriver>> {
    let drivers = PLAYERS.read();
    let found = if name.is_empty() {
        drivers.first()
    } else {
        drivers.iter().find(|d| d.name() == name)
    };
    found
        .cloned()
        .ok_or_else(|| Error::NotFound(format!("audio player driver '{}'", name)))
}

/// Register the built-in drivers: the tone test source and the
/// discarding player, plus the cpal backend when the feature is enabled.
pub fn register_default_drivers() {
    {
        let mut sources = SOURCES.write();
        if sources.iter().any(|d| d.name() == "tone") {
            return;
        }
        sources.push(Arc::new(ToneSourceDriver::default()));
    }
    PLAYERS.write().push(Arc::new(NullPlayerDriver));

    #[cfg(feature = "device-cpal")]
    {
        SOURCES.write().push(Arc::new(cpal_dev::CpalSourceDriver));
        PLAYERS.write().push(Arc::new(cpal_dev::CpalPlayerDriver));
    }
}
