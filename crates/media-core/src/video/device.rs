//! Video capture and display drivers
//!
//! A source driver spawns its own thread and pushes raw frames; a
//! display accepts decoded frames from the receive path. The built-in
//! test drivers generate a moving pattern and discard output frames.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::Error;
use crate::types::{VideoFrame, VideoParams, VidSize};
use crate::Result;

/// Frame callback invoked from the source's thread
pub type VideoFrameFn = Arc<dyn Fn(VideoFrame) + Send + Sync>;

/// Fatal-error callback for a source
pub type VideoErrorFn = Arc<dyn Fn(String) + Send + Sync>;

/// A running capture stream; dropping joins its thread
pub trait VideoStreamHandle: Send {}

/// A video capture driver
pub trait VideoSourceDriver: Send + Sync {
    /// Driver name used in configuration
    fn name(&self) -> &str;

    /// Open a capture stream at the negotiated size and rate
    fn open_source(
        &self,
        params: &VideoParams,
        device: &str,
        frame: VideoFrameFn,
        error: VideoErrorFn,
    ) -> Result<Box<dyn VideoStreamHandle>>;
}

/// An open display accepting decoded frames
pub trait VideoDisplay: Send {
    /// Show one frame for the given peer
    fn display(&mut self, peer: &str, frame: &VideoFrame) -> Result<()>;
}

/// A video display driver
pub trait VideoDisplayDriver: Send + Sync {
    /// Driver name used in configuration
    fn name(&self) -> &str;

    /// Open a display window/device
    fn open_display(&self, device: &str) -> Result<Box<dyn VideoDisplay>>;
}

static SOURCES: Lazy<RwLock<Vec<Arc<dyn VideoSourceDriver>>>> = Lazy::new(|| RwLock::new(Vec::new()));
static DISPLAYS: Lazy<RwLock<Vec<Arc<dyn VideoDisplayDriver>>>> =
    Lazy::new(|| RwLock::new(Vec::new()));

/// Register a capture driver; init/module-load time only
pub fn register_video_source_driver(driver: Arc<dyn VideoSourceDriver>) {
    SOURCES.write().push(driver);
}

/// Register a display driver; init/module-load time only
pub fn register_video_display_driver(driver: Arc<dyn VideoDisplayDriver>) {
    DISPLAYS.write().push(driver);
}

/// Find a capture driver; an empty name takes the first one
pub fn find_video_source_driver(name: &str) -> Result<Arc<dyn VideoSourceDriver>> {
    let drivers = SOURCES.read();
    let found = if name.is_empty() {
        drivers.first()
    } else {
        drivers.iter().find(|d| d.name() == name)
    };
    found
        .cloned()
        .ok_or_else(|| Error::NotFound(format!("video source driver '{}'", name)))
}

/// Find a display driver; an empty name takes the first one
pub fn find_video_display_driver(name: &str) -> Result<Arc<dyn VideoDisplayDriver>> {
    let drivers = DISPLAYS.read();
    let found = if name.is_empty() {
        drivers.first()
    } else {
        drivers.iter().find(|d| d.name() == name)
    };
    found
        .cloned()
        .ok_or_else(|| Error::NotFound(format!("video display driver '{}'", name)))
}

/// Register the built-in test drivers
pub fn register_default_video_drivers() {
    {
        let mut sources = SOURCES.write();
        if sources.iter().any(|d| d.name() == "pattern") {
            return;
        }
        sources.push(Arc::new(PatternSourceDriver));
    }
    DISPLAYS.write().push(Arc::new(NullDisplayDriver::default()));
}

struct ThreadHandle {
    run: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl VideoStreamHandle for ThreadHandle {}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        self.run.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Capture driver producing a moving luma gradient
pub struct PatternSourceDriver;

impl VideoSourceDriver for PatternSourceDriver {
    fn name(&self) -> &str {
        "pattern"
    }

    fn open_source(
        &self,
        params: &VideoParams,
        device: &str,
        frame_cb: VideoFrameFn,
        _error: VideoErrorFn,
    ) -> Result<Box<dyn VideoStreamHandle>> {
        let run = Arc::new(AtomicBool::new(true));
        let running = Arc::clone(&run);
        let params = *params;
        debug!(device, fps = params.fps, "pattern video source starting");

        let thread = std::thread::spawn(move || {
            let interval = Duration::from_millis(1000 / params.fps.max(1) as u64);
            let mut tick = 0u8;
            let mut next = Instant::now();

            while running.load(Ordering::Relaxed) {
                let mut frame = VideoFrame::filled(params.size, 0x10, 0x80, 0x80);
                for (i, y) in frame.planes[0].iter_mut().enumerate() {
                    *y = (i as u8).wrapping_add(tick);
                }
                tick = tick.wrapping_add(7);

                frame_cb(frame);

                next += interval;
                let now = Instant::now();
                if next > now {
                    std::thread::sleep(next - now);
                } else {
                    next = now;
                }
            }
        });

        Ok(Box::new(ThreadHandle {
            run,
            thread: Some(thread),
        }))
    }
}

/// Display driver that counts and discards frames
#[derive(Default)]
pub struct NullDisplayDriver {
    displayed: Arc<AtomicU32>,
}

impl NullDisplayDriver {
    /// Handle counting every frame any display from this driver shows
    pub fn counter(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.displayed)
    }
}

impl VideoDisplayDriver for NullDisplayDriver {
    fn name(&self) -> &str {
        "null"
    }

    fn open_display(&self, _device: &str) -> Result<Box<dyn VideoDisplay>> {
        Ok(Box::new(NullDisplay {
            displayed: Arc::clone(&self.displayed),
            size: None,
        }))
    }
}

struct NullDisplay {
    displayed: Arc<AtomicU32>,
    size: Option<VidSize>,
}

impl VideoDisplay for NullDisplay {
    fn display(&mut self, _peer: &str, frame: &VideoFrame) -> Result<()> {
        if self.size != Some(frame.size) {
            debug!(w = frame.size.w, h = frame.size.h, "display size changed");
            self.size = Some(frame.size);
        }
        self.displayed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_pattern_source_produces_frames() {
        let driver = PatternSourceDriver;
        let params = VideoParams {
            size: VidSize::new(32, 16),
            fps: 30,
            ..Default::default()
        };

        let frames = Arc::new(Mutex::new(0u32));
        let sink = Arc::clone(&frames);
        let handle = driver
            .open_source(
                &params,
                "",
                Arc::new(move |frame: VideoFrame| {
                    assert_eq!(frame.size.w, 32);
                    assert_eq!(frame.planes.len(), 3);
                    *sink.lock() += 1;
                }),
                Arc::new(|_| {}),
            )
            .unwrap();

        std::thread::sleep(Duration::from_millis(150));
        drop(handle);
        assert!(*frames.lock() >= 2);
    }

    #[test]
    fn test_null_display_counts() {
        let driver = NullDisplayDriver::default();
        let counter = driver.counter();
        let mut display = driver.open_display("").unwrap();

        let frame = VideoFrame::filled(VidSize::new(16, 16), 0, 0x80, 0x80);
        display.display("peer", &frame).unwrap();
        display.display("peer", &frame).unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 2);
    }
}
