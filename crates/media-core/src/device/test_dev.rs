//! Built-in device drivers for tests and headless operation
//!
//! The tone source synthesizes a sine wave (or silence) on its own
//! thread at the frame interval; the null player pulls frames at the
//! same cadence and discards them.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::debug;

use super::{
    AudioPlayerDriver, AudioSourceDriver, AudioStreamHandle, PlayerWriteFn, SourceErrorFn,
    SourceReadFn,
};
use crate::types::AudioParams;
use crate::Result;

/// Capture driver producing a steady tone
pub struct ToneSourceDriver {
    /// Tone frequency; 0 produces silence
    pub frequency: f32,
}

impl Default for ToneSourceDriver {
    fn default() -> Self {
        Self { frequency: 440.0 }
    }
}

struct ThreadHandle {
    run: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl AudioStreamHandle for ThreadHandle {}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        self.run.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl AudioSourceDriver for ToneSourceDriver {
    fn name(&self) -> &str {
        "tone"
    }

    fn open_source(
        &self,
        params: &AudioParams,
        device: &str,
        read: SourceReadFn,
        _error: SourceErrorFn,
    ) -> Result<Box<dyn AudioStreamHandle>> {
        let run = Arc::new(AtomicBool::new(true));
        let running = Arc::clone(&run);

        let params = *params;
        let frequency = self.frequency;
        debug!(device, rate = params.clock_rate, "tone source starting");

        let thread = std::thread::spawn(move || {
            let frame_bytes = params.frame_bytes();
            let interval = Duration::from_millis(params.ptime as u64);
            let mut frame = vec![0u8; frame_bytes];
            let mut phase = 0f32;
            let step = TAU * frequency / params.clock_rate as f32;
            let mut next = Instant::now();

            while running.load(Ordering::Relaxed) {
                if frequency > 0.0 {
                    for chunk in frame.chunks_exact_mut(2 * params.channels as usize) {
                        let sample = ((phase.sin() * 8000.0) as i16).to_le_bytes();
                        for pair in chunk.chunks_exact_mut(2) {
                            pair.copy_from_slice(&sample);
                        }
                        phase = (phase + step) % TAU;
                    }
                }

                read(&frame);

                next += interval;
                let now = Instant::now();
                if next > now {
                    std::thread::sleep(next - now);
                } else {
                    // fell behind; resynchronize
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

/// Playback driver that pulls and discards frames
pub struct NullPlayerDriver;

impl AudioPlayerDriver for NullPlayerDriver {
    fn name(&self) -> &str {
        "null"
    }

    fn open_player(
        &self,
        params: &AudioParams,
        device: &str,
        write: PlayerWriteFn,
    ) -> Result<Box<dyn AudioStreamHandle>> {
        let run = Arc::new(AtomicBool::new(true));
        let running = Arc::clone(&run);

        let params = *params;
        debug!(device, rate = params.clock_rate, "null player starting");

        let thread = std::thread::spawn(move || {
            let frame_bytes = params.frame_bytes();
            let interval = Duration::from_millis(params.ptime as u64);
            let mut frame = vec![0u8; frame_bytes];
            let mut next = Instant::now();

            while running.load(Ordering::Relaxed) {
                let _valid = write(&mut frame);

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
