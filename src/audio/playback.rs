//! Speaker playback with gapless segment scheduling.
//!
//! The playback thread owns the ALSA handle and a monotonic clock. The
//! session manager computes when each decoded segment should begin using
//! `GaplessScheduler` and queues it here; the thread sleeps until the
//! scheduled start, writes the samples, and reports completion once the
//! clock passes the segment end. A generation-stamped halt gate gives the
//! manager a synchronous hard stop for barge-in that cannot swallow
//! segments scheduled after the interruption.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use alsa::pcm::PCM;
use anyhow::Result;
use tokio::sync::mpsc::UnboundedSender;

use super::alsa_device::{self, AlsaParams};
use super::codec::PlaybackBuffer;
use crate::error::Error;

/// How close to the playback cursor "now" must be for a completed segment
/// to count as the end of the turn, in seconds.
pub const COMPLETION_TOLERANCE: f64 = 0.1;

/// Frames written per block so the halt flag is observed every ~20 ms.
const WRITE_BLOCK_FRAMES: usize = 480;

/// A decoded buffer with its scheduled start on the playback clock.
#[derive(Debug, Clone)]
pub struct PlaybackSegment {
    pub buffer: PlaybackBuffer,
    /// Start time in seconds on the playback clock.
    pub start: f64,
    /// Identifies the source so stale completions can be ignored.
    pub source_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// A segment finished playing (not emitted for halted segments).
    Finished { source_id: u64 },
}

/// The playback cursor: the earliest time the next segment may begin.
///
/// Segments of one turn never overlap; each scheduled segment advances the
/// cursor by its own duration, so back-to-back payloads play gaplessly even
/// when they arrive faster than real time.
#[derive(Debug, Default)]
pub struct GaplessScheduler {
    next_start: f64,
}

impl GaplessScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick the start time for a segment of the given duration and advance
    /// the cursor past it.
    pub fn schedule(&mut self, now: f64, duration: f64) -> f64 {
        let start = now.max(self.next_start);
        self.next_start = start + duration;
        start
    }

    /// Reset the cursor so the next segment starts at "now". Used on
    /// interruption.
    pub fn reset(&mut self) {
        self.next_start = 0.0;
    }

    pub fn next_start(&self) -> f64 {
        self.next_start
    }

    /// Whether playback has caught up with everything scheduled so far.
    pub fn caught_up(&self, now: f64) -> bool {
        now >= self.next_start - COMPLETION_TOLERANCE
    }
}

/// Barge-in coordination between the scheduling side and the playback
/// thread. An interruption bumps the generation and raises the halt flag:
/// the in-flight write bails out at the next block boundary, and segments
/// stamped with an older generation are discarded when the thread dequeues
/// them. Segments scheduled after the interruption carry the new generation
/// and play normally.
struct HaltGate {
    halt: AtomicBool,
    generation: AtomicU64,
}

impl HaltGate {
    fn new() -> Self {
        Self {
            halt: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    fn interrupt(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.halt.store(true, Ordering::SeqCst);
    }

    fn halted(&self) -> bool {
        self.halt.load(Ordering::SeqCst)
    }

    /// Consume the halt flag. Returns whether it was raised.
    fn clear_halt(&self) -> bool {
        self.halt.swap(false, Ordering::SeqCst)
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn admits(&self, generation: u64) -> bool {
        generation == self.generation.load(Ordering::SeqCst)
    }
}

/// A segment plus the gate generation it was scheduled under.
struct QueuedSegment {
    segment: PlaybackSegment,
    generation: u64,
}

/// A running playback thread plus its clock. Stops on drop.
pub struct PlaybackContext {
    started: Instant,
    running: Arc<AtomicBool>,
    gate: Arc<HaltGate>,
    seg_tx: std_mpsc::Sender<QueuedSegment>,
    handle: Option<JoinHandle<()>>,
}

impl PlaybackContext {
    pub fn start(
        device: &str,
        sample_rate: u32,
        event_tx: UnboundedSender<PlaybackEvent>,
    ) -> crate::error::Result<Self> {
        // Validate the device on the caller's thread so acquisition failure
        // surfaces as a connection failure, then hand it to the thread.
        alsa_device::open_playback(device, sample_rate, 1, None)
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

        let started = Instant::now();
        let running = Arc::new(AtomicBool::new(true));
        let gate = Arc::new(HaltGate::new());
        let (seg_tx, seg_rx) = std_mpsc::channel::<QueuedSegment>();

        let handle = {
            let device = device.to_string();
            let running = running.clone();
            let gate = gate.clone();
            thread::Builder::new()
                .name("audio-play".into())
                .spawn(move || {
                    if let Err(e) = playback_thread(
                        &device,
                        sample_rate,
                        seg_rx,
                        event_tx,
                        started,
                        &running,
                        &gate,
                    ) {
                        log::error!("Playback thread error: {}", e);
                    }
                })
                .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
        };

        Ok(Self {
            started,
            running,
            gate,
            seg_tx,
            handle: Some(handle),
        })
    }

    /// Seconds elapsed on the playback clock.
    pub fn now(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Queue a segment. The thread waits until its scheduled start.
    pub fn schedule(&self, segment: PlaybackSegment) {
        let queued = QueuedSegment {
            segment,
            generation: self.gate.generation(),
        };
        if self.seg_tx.send(queued).is_err() {
            log::warn!("Playback segment dropped, thread gone");
        }
    }

    /// Hard stop: the in-flight write bails out at the next block boundary
    /// and everything queued before this call is discarded on dequeue.
    /// Segments scheduled afterwards are unaffected. Idempotent.
    pub fn halt(&self) {
        self.gate.interrupt();
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.gate.interrupt();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for PlaybackContext {
    fn drop(&mut self) {
        self.stop();
    }
}

fn playback_thread(
    device: &str,
    sample_rate: u32,
    seg_rx: std_mpsc::Receiver<QueuedSegment>,
    event_tx: UnboundedSender<PlaybackEvent>,
    started: Instant,
    running: &AtomicBool,
    gate: &HaltGate,
) -> Result<()> {
    let (pcm, params) = alsa_device::open_playback(device, sample_rate, 1, None)?;
    if params.sample_rate != sample_rate {
        log::warn!(
            "Playback rate negotiated to {} (wanted {})",
            params.sample_rate,
            sample_rate,
        );
    }

    while running.load(Ordering::Relaxed) {
        if gate.clear_halt() {
            let _ = pcm.drop();
            let _ = pcm.prepare();
            continue;
        }

        match seg_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(queued) => {
                // Stamped before the last interruption: superseded
                if !gate.admits(queued.generation) {
                    log::debug!("Discarding superseded playback segment");
                    continue;
                }
                if play_segment(&pcm, &params, &queued.segment, started, gate)? {
                    let _ = event_tx.send(PlaybackEvent::Finished {
                        source_id: queued.segment.source_id,
                    });
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    log::info!("Playback stopped");
    Ok(())
}

/// Sleep until `deadline` seconds on the playback clock, watching the gate.
/// Returns `false` when halted first.
fn wait_until(deadline: f64, started: Instant, gate: &HaltGate) -> bool {
    loop {
        let now = started.elapsed().as_secs_f64();
        if now >= deadline {
            return true;
        }
        if gate.halted() {
            return false;
        }
        let wait = (deadline - now).min(0.01);
        thread::sleep(Duration::from_secs_f64(wait));
    }
}

/// Play one segment at its scheduled time. Returns `false` when playback was
/// halted before the segment completed.
fn play_segment(
    pcm: &PCM,
    params: &AlsaParams,
    segment: &PlaybackSegment,
    started: Instant,
    gate: &HaltGate,
) -> Result<bool> {
    if !wait_until(segment.start, started, gate) {
        return Ok(false);
    }

    let io = pcm.io_f32()?;
    let device_ch = params.channels as usize;
    let buffer_ch = segment.buffer.channels as usize;

    // Expand mono buffers for devices that negotiated more channels
    let samples: Vec<f32> = if buffer_ch == device_ch {
        segment.buffer.samples.clone()
    } else if buffer_ch == 1 {
        let mut out = Vec::with_capacity(segment.buffer.samples.len() * device_ch);
        for &s in &segment.buffer.samples {
            for _ in 0..device_ch {
                out.push(s);
            }
        }
        out
    } else {
        log::warn!(
            "Unsupported channel layout: buffer={}, device={}",
            buffer_ch,
            device_ch,
        );
        return Ok(true);
    };

    for block in samples.chunks(WRITE_BLOCK_FRAMES * device_ch) {
        if gate.halted() {
            return Ok(false);
        }

        // Retry loop handles short writes and XRUN recovery
        let total_frames = block.len() / device_ch;
        let mut frames_written = 0;
        while frames_written < total_frames {
            let offset = frames_written * device_ch;
            match io.writei(&block[offset..]) {
                Ok(n) => frames_written += n,
                Err(e) => {
                    log::warn!("ALSA playback error: {}, recovering...", e);
                    if let Err(e2) = pcm.prepare() {
                        log::error!("Failed to recover PCM playback: {}", e2);
                        return Ok(false);
                    }
                }
            }
        }
    }

    // The last writei returns once the samples sit in the ALSA ring buffer,
    // up to a full device buffer ahead of audible playout. Hold the
    // completion until the clock reaches the segment end so the turn only
    // closes when the audio has actually played out.
    Ok(wait_until(
        segment.start + segment.buffer.duration(),
        started,
        gate,
    ))
}
