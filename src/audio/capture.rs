//! Microphone capture.
//!
//! Uses a dedicated std::thread (NOT a tokio task) for the blocking ALSA reads,
//! the same way the playback side does.

use std::thread::{self, JoinHandle};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::{alsa_device, join_device_thread, release_device_thread};
use crate::error::{Result, SessionError};

/// Frames buffered between the capture thread and the session driver.
const FRAME_QUEUE_DEPTH: usize = 32;

/// One fixed-length block of mono samples, tagged with the rate the device granted.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 * 1000.0 / self.sample_rate as f64
    }
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// ALSA capture device name (e.g. "default", "plughw:0,0")
    pub device: String,
    /// Length of one emitted frame in ms
    pub frame_ms: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "default".to_string(),
            frame_ms: 64,
        }
    }
}

/// Exclusive owner of the microphone for one session.
#[async_trait]
pub trait AudioCaptureSource: Send + Sync {
    /// Acquire the device and start emitting frames.
    ///
    /// Returns only after the device is open, so a permission or device
    /// failure is reported here rather than through the frame stream.
    async fn start(&mut self, cancel: CancellationToken) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Release the device and wait for it to close. Calling it again is a no-op.
    async fn stop(&mut self);
}

/// Number of mono samples in one frame at `rate`.
pub fn frame_len(rate: u32, frame_ms: u32) -> usize {
    ((rate as u64 * frame_ms as u64) / 1000).max(1) as usize
}

/// Average interleaved i16 channels into normalized mono samples.
pub fn mix_to_mono(interleaved: &[i16], channels: usize, out: &mut Vec<f32>) {
    if channels <= 1 {
        out.extend(interleaved.iter().map(|&s| (s as f32 / i16::MAX as f32).clamp(-1.0, 1.0)));
        return;
    }
    for frame in interleaved.chunks_exact(channels) {
        let sum: i32 = frame.iter().map(|&s| s as i32).sum();
        let avg = sum as f32 / channels as f32;
        out.push((avg / i16::MAX as f32).clamp(-1.0, 1.0));
    }
}

pub struct AlsaCapture {
    config: CaptureConfig,
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

impl AlsaCapture {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            cancel: None,
            handle: None,
        }
    }
}

#[async_trait]
impl AudioCaptureSource for AlsaCapture {
    async fn start(&mut self, cancel: CancellationToken) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.handle.is_some() {
            return Err(SessionError::device("capture already started"));
        }

        let (frame_tx, frame_rx) = mpsc::channel::<AudioFrame>(FRAME_QUEUE_DEPTH);
        let (ready_tx, ready_rx) = oneshot::channel::<std::result::Result<u32, String>>();
        let config = self.config.clone();
        let thread_cancel = cancel.clone();

        let handle = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || capture_thread(&config, frame_tx, ready_tx, &thread_cancel))
            .map_err(|e| SessionError::device(format!("failed to spawn capture thread: {}", e)))?;

        match ready_rx.await {
            Ok(Ok(rate)) => {
                log::debug!("Microphone granted {} Hz", rate);
                self.cancel = Some(cancel);
                self.handle = Some(handle);
                Ok(frame_rx)
            }
            Ok(Err(e)) => {
                join_device_thread(handle, "Microphone").await;
                Err(SessionError::device(e))
            }
            Err(_) => {
                join_device_thread(handle, "Microphone").await;
                Err(SessionError::device("capture thread exited before reporting"))
            }
        }
    }

    async fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(h) = self.handle.take() {
            join_device_thread(h, "Microphone").await;
            log::info!("Microphone released");
        }
    }
}

impl Drop for AlsaCapture {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(h) = self.handle.take() {
            release_device_thread(h, "Microphone");
        }
    }
}

fn capture_thread(
    config: &CaptureConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
    ready_tx: oneshot::Sender<std::result::Result<u32, String>>,
    cancel: &CancellationToken,
) {
    // 1. Open ALSA capture device, keep whatever rate it grants
    let (pcm, params) = match alsa_device::open_capture(&config.device) {
        Ok(opened) => opened,
        Err(e) => {
            log::error!("Microphone unavailable: {:#}", e);
            let _ = ready_tx.send(Err(format!("{:#}", e)));
            return;
        }
    };
    let io = match pcm.io_i16() {
        Ok(io) => io,
        Err(e) => {
            let _ = ready_tx.send(Err(format!("capture io: {}", e)));
            return;
        }
    };

    let rate = params.sample_rate;
    let channels = params.channels.max(1) as usize;
    let samples_per_frame = frame_len(rate, config.frame_ms);

    if ready_tx.send(Ok(rate)).is_err() {
        return;
    }

    let mut read_buf = vec![0i16; params.period_size.max(1) * channels];
    let mut accum: Vec<f32> = Vec::with_capacity(samples_per_frame * 2);

    log::info!(
        "Recording started: rate={}, ch={}, period={}, frame_samples={}",
        rate,
        channels,
        params.period_size,
        samples_per_frame,
    );

    while !cancel.is_cancelled() {
        match io.readi(&mut read_buf) {
            Ok(frames) => {
                mix_to_mono(&read_buf[..frames * channels], channels, &mut accum);

                while accum.len() >= samples_per_frame {
                    let samples: Vec<f32> = accum.drain(..samples_per_frame).collect();
                    match frame_tx.try_send(AudioFrame::new(samples, rate)) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            log::warn!("Capture queue full, dropping frame");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            log::info!("Capture receiver dropped");
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                if let Err(e2) = pcm.prepare() {
                    log::error!("Failed to recover PCM capture: {}", e2);
                    break;
                }
            }
        }
    }

    log::info!("Recording stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_len_follows_granted_rate() {
        assert_eq!(frame_len(48000, 64), 3072);
        assert_eq!(frame_len(16000, 64), 1024);
        assert_eq!(frame_len(44100, 20), 882);
        assert_eq!(frame_len(8000, 0), 1);
    }

    #[test]
    fn stereo_is_averaged() {
        let mut out = Vec::new();
        mix_to_mono(&[i16::MAX, 0, -i16::MAX, -i16::MAX], 2, &mut out);
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.5).abs() < 1e-4);
        assert!((out[1] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn frame_duration() {
        let frame = AudioFrame::new(vec![0.0; 480], 48000);
        assert!((frame.duration_ms() - 10.0).abs() < 1e-9);
    }
}
