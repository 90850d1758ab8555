//! Microphone capture on a dedicated OS thread.
//!
//! Two capture paths share one contract: read blocks of normalized samples,
//! encode them with the codec layer, and deliver the resulting chunks on a
//! bounded channel. The preferred path asks ALSA for a small period so
//! chunks leave at low latency; when the device will not negotiate one, a
//! plain block-reading fallback takes over with the same external behavior.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use alsa::pcm::PCM;
use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::alsa_device::{self, AlsaParams};
use super::{AudioChunk, codec};
use crate::error::Error;

/// Period requested for the low-latency path: 20 ms at 16 kHz.
const LOW_LATENCY_PERIOD: usize = 320;
/// Negotiated periods above this are too sluggish for the preferred path.
const LOW_LATENCY_MAX_PERIOD: usize = 1024;

/// One way of turning live microphone samples into wire chunks.
trait AudioCapture: Send {
    /// Drive the device until `running` clears or the channel closes.
    fn run(&mut self, tx: &mpsc::Sender<AudioChunk>, running: &AtomicBool) -> Result<()>;
}

/// Preferred path: one chunk per small ALSA period.
struct LowLatencyCapture {
    device: String,
    sample_rate: u32,
}

impl AudioCapture for LowLatencyCapture {
    fn run(&mut self, tx: &mpsc::Sender<AudioChunk>, running: &AtomicBool) -> Result<()> {
        let (pcm, params) = alsa_device::open_capture(
            &self.device,
            self.sample_rate,
            1,
            Some(LOW_LATENCY_PERIOD),
        )?;
        log::info!(
            "Capture started (low-latency): period={} frames",
            params.period_size
        );
        capture_loop(&pcm, &params, params.period_size, tx, running)
    }
}

/// Fallback path: synchronous block processing with a larger buffer.
struct BlockCapture {
    device: String,
    sample_rate: u32,
    block_frames: usize,
}

impl AudioCapture for BlockCapture {
    fn run(&mut self, tx: &mpsc::Sender<AudioChunk>, running: &AtomicBool) -> Result<()> {
        let (pcm, params) = alsa_device::open_capture(&self.device, self.sample_rate, 1, None)?;
        log::info!(
            "Capture started (block fallback): block={} frames",
            self.block_frames
        );
        capture_loop(&pcm, &params, self.block_frames, tx, running)
    }
}

fn capture_loop(
    pcm: &PCM,
    params: &AlsaParams,
    frames_per_chunk: usize,
    tx: &mpsc::Sender<AudioChunk>,
    running: &AtomicBool,
) -> Result<()> {
    let io = pcm.io_f32()?;
    let ch = params.channels as usize;
    let mut read_buf = vec![0f32; params.period_size * ch];
    let mut accum: Vec<f32> = Vec::with_capacity(frames_per_chunk * 2);

    while running.load(Ordering::Relaxed) {
        match io.readi(&mut read_buf) {
            Ok(frames) => {
                if ch == 1 {
                    accum.extend_from_slice(&read_buf[..frames]);
                } else {
                    // Mix interleaved channels down to mono
                    for f in 0..frames {
                        let sum: f32 = read_buf[f * ch..(f + 1) * ch].iter().sum();
                        accum.push(sum / ch as f32);
                    }
                }

                while accum.len() >= frames_per_chunk {
                    let block: Vec<f32> = accum.drain(..frames_per_chunk).collect();
                    let chunk = AudioChunk::from(codec::encode_samples(&block));
                    match tx.try_send(chunk) {
                        Ok(()) => {}
                        // Bounded-latency policy: drop rather than queue up
                        Err(TrySendError::Full(_)) => {
                            log::debug!("Capture chunk dropped, channel full");
                        }
                        Err(TrySendError::Closed(_)) => return Ok(()),
                    }
                }
            }
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                pcm.prepare()
                    .with_context(|| "Failed to recover PCM capture")?;
            }
        }
    }

    log::info!("Capture stopped");
    Ok(())
}

/// Probe the capture device without starting a thread. Used at context
/// acquisition so a missing or refused microphone fails the connection
/// attempt instead of dying silently inside the capture thread.
pub fn probe(device: &str, sample_rate: u32) -> crate::error::Result<()> {
    alsa_device::open_capture(device, sample_rate, 1, Some(LOW_LATENCY_PERIOD))
        .or_else(|_| alsa_device::open_capture(device, sample_rate, 1, None))
        .map(|_| ())
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))
}

/// Select the capture path by asking the device what it will negotiate.
fn select_capture_path(
    device: &str,
    sample_rate: u32,
    block_frames: usize,
) -> crate::error::Result<Box<dyn AudioCapture>> {
    match alsa_device::open_capture(device, sample_rate, 1, Some(LOW_LATENCY_PERIOD)) {
        Ok((_, params)) if params.period_size <= LOW_LATENCY_MAX_PERIOD => {
            Ok(Box::new(LowLatencyCapture {
                device: device.to_string(),
                sample_rate,
            }))
        }
        Ok(_) => Ok(Box::new(BlockCapture {
            device: device.to_string(),
            sample_rate,
            block_frames,
        })),
        Err(first) => {
            // Some devices reject the small-period request outright; retry
            // with default sizing before declaring the device unavailable.
            match alsa_device::open_capture(device, sample_rate, 1, None) {
                Ok(_) => Ok(Box::new(BlockCapture {
                    device: device.to_string(),
                    sample_rate,
                    block_frames,
                })),
                Err(_) => Err(Error::DeviceUnavailable(first.to_string())),
            }
        }
    }
}

/// A running capture thread. Stops on drop.
pub struct CaptureContext {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureContext {
    /// Pick a capture path, then start the thread that feeds `tx`.
    pub fn start(
        device: &str,
        sample_rate: u32,
        block_frames: usize,
        tx: mpsc::Sender<AudioChunk>,
    ) -> crate::error::Result<Self> {
        let mut path = select_capture_path(device, sample_rate, block_frames)?;

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let handle = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                if let Err(e) = path.run(&tx, &thread_running) {
                    log::error!("Capture thread error: {}", e);
                }
            })
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    /// Signal the thread to stop and wait for it to finish.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for CaptureContext {
    fn drop(&mut self) {
        self.stop();
    }
}
