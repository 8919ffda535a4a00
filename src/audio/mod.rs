//! audio - Microphone capture, PCM16 wire codec, and scheduled playback
//!
//! Uses ALSA for audio I/O on dedicated OS threads. The session core only sees
//! the [`AudioCaptureSource`] and [`AudioSink`] traits, so it runs unchanged
//! against fake devices in tests.

mod alsa_device;
pub mod alsa_sink;
pub mod capture;
pub mod pcm;
pub mod playback;

use std::thread::JoinHandle;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use alsa_sink::AlsaSink;
pub use capture::{AlsaCapture, AudioCaptureSource, AudioFrame, CaptureConfig};
pub use pcm::{PcmError, WireAudioChunk};
pub use playback::{
    AudioSink, PlaybackConfig, PlaybackHandle, PlaybackId, PlaybackItem, PlaybackScheduler,
    spawn_playback,
};

use crate::error::Result;

/// Hands out the microphone and speaker for one session.
#[async_trait]
pub trait AudioBackend: Send + Sync {
    fn capture(&self) -> Box<dyn AudioCaptureSource>;

    async fn open_output(
        &self,
        finished: mpsc::UnboundedSender<PlaybackId>,
        cancel: CancellationToken,
    ) -> Result<Box<dyn AudioSink>>;
}

/// ALSA devices named in the configuration.
pub struct AlsaBackend {
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
}

#[async_trait]
impl AudioBackend for AlsaBackend {
    fn capture(&self) -> Box<dyn AudioCaptureSource> {
        Box::new(AlsaCapture::new(self.capture.clone()))
    }

    async fn open_output(
        &self,
        finished: mpsc::UnboundedSender<PlaybackId>,
        cancel: CancellationToken,
    ) -> Result<Box<dyn AudioSink>> {
        let sink = AlsaSink::open(self.playback.clone(), finished, cancel).await?;
        Ok(Box::new(sink))
    }
}

fn join_logged(handle: JoinHandle<()>, device: &str) {
    if handle.join().is_err() {
        log::error!("{} thread panicked", device);
    }
}

/// Wait for a device thread to exit, joining it on the blocking pool.
pub(crate) async fn join_device_thread(handle: JoinHandle<()>, device: &'static str) {
    if tokio::task::spawn_blocking(move || join_logged(handle, device)).await.is_err() {
        log::error!("Could not join the {} thread", device);
    }
}

/// Join a device thread from sync code without stalling a runtime worker.
///
/// Inside a runtime the join is handed to the blocking pool and not awaited.
pub(crate) fn release_device_thread(handle: JoinHandle<()>, device: &'static str) {
    match tokio::runtime::Handle::try_current() {
        Ok(rt) => {
            rt.spawn_blocking(move || {
                join_logged(handle, device);
                log::info!("{} released", device);
            });
        }
        Err(_) => {
            join_logged(handle, device);
            log::info!("{} released", device);
        }
    }
}
