//! audio - device I/O adapter and wire codec
//!
//! Bridges ALSA capture/playback devices and the pure codec layer. Real-time
//! I/O runs on dedicated std threads (NOT tokio tasks) to avoid contention
//! with async network tasks; the session manager talks to this module only
//! through channels and the `DeviceAdapter` trait, and treats the thread
//! boundary as ordered, non-overlapping chunk delivery.

mod alsa_device;
mod capture;
pub mod codec;
mod playback;

use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedSender;

pub use codec::PlaybackBuffer;
pub use playback::{COMPLETION_TOLERANCE, GaplessScheduler, PlaybackEvent, PlaybackSegment};

use crate::config::Config;
use crate::error::Result;

/// One encoded, time-ordered unit of outbound audio. Ownership moves from
/// the capture thread to the session manager, which forwards and discards it.
pub type AudioChunk = bytes::Bytes;

/// The session manager's view of the audio devices. Exactly one playback
/// context, one capture context, and one active playback source exist at a
/// time, all owned through this trait.
pub trait DeviceAdapter: Send {
    /// Lazily create the playback and capture contexts. Idempotent; safe to
    /// call repeatedly, never creates duplicates.
    fn acquire(&mut self) -> Result<()>;

    /// Close both contexts and clear references. Safe to call when none
    /// exist.
    fn release(&mut self);

    /// Start delivering encoded microphone chunks on `tx`.
    fn start_capture(&mut self, tx: mpsc::Sender<AudioChunk>) -> Result<()>;

    /// Queue a segment for playback at its scheduled start time.
    fn schedule(&mut self, segment: PlaybackSegment) -> Result<()>;

    /// Hard-stop in-flight playback and discard segments queued so far;
    /// segments scheduled after this call play normally. Idempotent.
    fn halt_playback(&mut self);

    /// Seconds on the playback clock.
    fn now(&self) -> f64;
}

/// The real adapter over ALSA devices.
pub struct AlsaAdapter {
    capture_device: String,
    playback_device: String,
    capture_sample_rate: u32,
    playback_sample_rate: u32,
    chunk_frames: usize,
    event_tx: UnboundedSender<PlaybackEvent>,
    playback: Option<playback::PlaybackContext>,
    capture: Option<capture::CaptureContext>,
}

impl AlsaAdapter {
    /// Completion events for scheduled segments arrive on the channel behind
    /// `event_tx`; the session manager owns the receiving end.
    pub fn new(config: &Config, event_tx: UnboundedSender<PlaybackEvent>) -> Self {
        Self {
            capture_device: config.capture_device.to_string(),
            playback_device: config.playback_device.to_string(),
            capture_sample_rate: config.capture_sample_rate,
            playback_sample_rate: config.playback_sample_rate,
            chunk_frames: config.chunk_frames,
            event_tx,
            playback: None,
            capture: None,
        }
    }
}

impl DeviceAdapter for AlsaAdapter {
    fn acquire(&mut self) -> Result<()> {
        if self.playback.is_none() {
            self.playback = Some(playback::PlaybackContext::start(
                &self.playback_device,
                self.playback_sample_rate,
                self.event_tx.clone(),
            )?);
        }
        // The capture thread starts later, on the connection's open event,
        // but a missing microphone must fail the connect right here.
        if self.capture.is_none() {
            capture::probe(&self.capture_device, self.capture_sample_rate)?;
        }
        Ok(())
    }

    fn release(&mut self) {
        if let Some(mut c) = self.capture.take() {
            c.stop();
        }
        if let Some(mut p) = self.playback.take() {
            p.stop();
        }
    }

    fn start_capture(&mut self, tx: mpsc::Sender<AudioChunk>) -> Result<()> {
        if self.capture.is_some() {
            return Ok(());
        }
        self.capture = Some(capture::CaptureContext::start(
            &self.capture_device,
            self.capture_sample_rate,
            self.chunk_frames,
            tx,
        )?);
        Ok(())
    }

    fn schedule(&mut self, segment: PlaybackSegment) -> Result<()> {
        match &self.playback {
            Some(p) => {
                p.schedule(segment);
                Ok(())
            }
            None => Err(crate::error::Error::DeviceUnavailable(
                "playback context not acquired".into(),
            )),
        }
    }

    fn halt_playback(&mut self) {
        if let Some(p) = &self.playback {
            p.halt();
        }
    }

    fn now(&self) -> f64 {
        self.playback.as_ref().map(|p| p.now()).unwrap_or(0.0)
    }
}
