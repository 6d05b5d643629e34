//! cpal-backed capture and playback drivers (feature `device-cpal`)
//!
//! cpal streams are not `Send`, so each stream lives on a dedicated
//! thread that builds it, keeps it alive and tears it down when the
//! handle is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{info, warn};

use super::{
    AudioPlayerDriver, AudioSourceDriver, AudioStreamHandle, PlayerWriteFn, SourceErrorFn,
    SourceReadFn,
};
use crate::error::Error;
use crate::types::AudioParams;
use crate::Result;

struct CpalHandle {
    run: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl AudioStreamHandle for CpalHandle {}

impl Drop for CpalHandle {
    fn drop(&mut self) {
        self.run.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn find_device(name: &str, input: bool) -> Result<cpal::Device> {
    let host = cpal::default_host();

    if name.is_empty() {
        let device = if input {
            host.default_input_device()
        } else {
            host.default_output_device()
        };
        return device.ok_or_else(|| Error::Device("no default audio device".into()));
    }

    let mut devices = if input {
        host.input_devices()
            .map_err(|e| Error::Device(e.to_string()))?
    } else {
        host.output_devices()
            .map_err(|e| Error::Device(e.to_string()))?
    };
    devices
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
        .ok_or_else(|| Error::Device(format!("audio device '{}' not found", name)))
}

fn stream_config(params: &AudioParams) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels: params.channels as u16,
        sample_rate: cpal::SampleRate(params.clock_rate),
        buffer_size: cpal::BufferSize::Fixed(params.frame_samples_per_channel() as u32),
    }
}

/// Capture driver backed by the system's default audio host
pub struct CpalSourceDriver;

impl AudioSourceDriver for CpalSourceDriver {
    fn name(&self) -> &str {
        "cpal"
    }

    fn open_source(
        &self,
        params: &AudioParams,
        device: &str,
        read: SourceReadFn,
        error: SourceErrorFn,
    ) -> Result<Box<dyn AudioStreamHandle>> {
        let run = Arc::new(AtomicBool::new(true));
        let running = Arc::clone(&run);
        let params = *params;
        let device_name = device.to_string();

        let thread = std::thread::spawn(move || {
            let device = match find_device(&device_name, true) {
                Ok(d) => d,
                Err(e) => {
                    error(e.to_string());
                    return;
                }
            };
            let config = stream_config(&params);
            let err_fn = {
                let error = Arc::clone(&error);
                move |e: cpal::StreamError| error(e.to_string())
            };

            let frame_bytes = params.frame_bytes();
            let mut pending: Vec<u8> = Vec::with_capacity(frame_bytes * 2);

            let stream = device.build_input_stream(
                &config,
                move |data: &[i16], _info: &cpal::InputCallbackInfo| {
                    // regroup driver buffers into exact engine frames
                    for sample in data {
                        pending.extend_from_slice(&sample.to_le_bytes());
                    }
                    while pending.len() >= frame_bytes {
                        let frame: Vec<u8> = pending.drain(..frame_bytes).collect();
                        read(&frame);
                    }
                },
                err_fn,
                None,
            );

            match stream {
                Ok(stream) => {
                    if let Err(e) = stream.play() {
                        error(e.to_string());
                        return;
                    }
                    info!("cpal capture stream running");
                    while running.load(Ordering::Relaxed) {
                        std::thread::sleep(Duration::from_millis(20));
                    }
                }
                Err(e) => error(e.to_string()),
            }
        });

        Ok(Box::new(CpalHandle {
            run,
            thread: Some(thread),
        }))
    }
}

/// Playback driver backed by the system's default audio host
pub struct CpalPlayerDriver;

impl AudioPlayerDriver for CpalPlayerDriver {
    fn name(&self) -> &str {
        "cpal"
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
        let device_name = device.to_string();

        let thread = std::thread::spawn(move || {
            let device = match find_device(&device_name, false) {
                Ok(d) => d,
                Err(e) => {
                    warn!("cpal player: {}", e);
                    return;
                }
            };
            let config = stream_config(&params);

            let mut frame = vec![0u8; params.frame_bytes()];
            let stream = device.build_output_stream(
                &config,
                move |data: &mut [i16], _info: &cpal::OutputCallbackInfo| {
                    let mut filled = 0;
                    while filled < data.len() {
                        write(&mut frame);
                        for (sample, chunk) in data[filled..]
                            .iter_mut()
                            .zip(frame.chunks_exact(2))
                            .take(frame.len() / 2)
                        {
                            *sample = i16::from_le_bytes([chunk[0], chunk[1]]);
                            filled += 1;
                        }
                    }
                },
                |e| warn!("cpal playback error: {}", e),
                None,
            );

            match stream {
                Ok(stream) => {
                    if stream.play().is_err() {
                        return;
                    }
                    info!("cpal playback stream running");
                    while running.load(Ordering::Relaxed) {
                        std::thread::sleep(Duration::from_millis(20));
                    }
                }
                Err(e) => warn!("cpal player open failed: {}", e),
            }
        });

        Ok(Box::new(CpalHandle {
            run,
            thread: Some(thread),
        }))
    }
}
