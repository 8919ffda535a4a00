//! ALSA output for the playback scheduler.
//!
//! A dedicated OS thread keeps the device fed: scheduled buffers are written
//! when the write head reaches their start frame, silence otherwise. The
//! write head (in frames) is the output clock the scheduler reads.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::playback::{AudioSink, PlaybackConfig, PlaybackId};
use super::{alsa_device, join_device_thread, pcm, release_device_thread};
use crate::error::{Result, SessionError};

enum SinkCommand {
    Play {
        id: PlaybackId,
        start_frame: u64,
        samples: Vec<i16>,
    },
    Stop(Vec<PlaybackId>),
    Close,
}

struct Pending {
    id: PlaybackId,
    start_frame: u64,
    samples: Vec<i16>,
    offset: usize,
}

pub struct AlsaSink {
    tx: std_mpsc::Sender<SinkCommand>,
    frames_written: Arc<AtomicU64>,
    sample_rate: u32,
    channels: u32,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl AlsaSink {
    /// Open the output device on its own thread.
    ///
    /// Resolves once the device is configured, so failures come back here.
    pub async fn open(
        config: PlaybackConfig,
        finished: mpsc::UnboundedSender<PlaybackId>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let (tx, rx) = std_mpsc::channel::<SinkCommand>();
        let (ready_tx, ready_rx) = oneshot::channel::<std::result::Result<(u32, u32), String>>();
        let frames_written = Arc::new(AtomicU64::new(0));

        let handle = {
            let frames_written = frames_written.clone();
            let cancel = cancel.clone();
            thread::Builder::new()
                .name("audio-play".into())
                .spawn(move || play_thread(&config, rx, ready_tx, finished, &frames_written, &cancel))
                .map_err(|e| SessionError::device(format!("failed to spawn playback thread: {}", e)))?
        };

        match ready_rx.await {
            Ok(Ok((sample_rate, channels))) => Ok(Self {
                tx,
                frames_written,
                sample_rate,
                channels,
                cancel,
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                join_device_thread(handle, "Speaker").await;
                Err(SessionError::device(e))
            }
            Err(_) => {
                join_device_thread(handle, "Speaker").await;
                Err(SessionError::device("playback thread exited before reporting"))
            }
        }
    }
}

impl AudioSink for AlsaSink {
    fn now(&self) -> Duration {
        let frames = self.frames_written.load(Ordering::Relaxed);
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }

    fn schedule(
        &mut self,
        id: PlaybackId,
        samples: Vec<f32>,
        sample_rate: u32,
        start: Duration,
    ) -> Result<()> {
        let resampled = pcm::resample_linear(&samples, sample_rate, self.sample_rate);
        let interleaved = pcm::interleave_mono(&resampled, self.channels as usize);
        let start_frame = (start.as_secs_f64() * self.sample_rate as f64).round() as u64;
        self.tx
            .send(SinkCommand::Play {
                id,
                start_frame,
                samples: pcm::to_i16_samples(&interleaved),
            })
            .map_err(|_| SessionError::device("playback thread is gone"))
    }

    fn stop(&mut self, ids: &[PlaybackId]) {
        let _ = self.tx.send(SinkCommand::Stop(ids.to_vec()));
    }

    fn close(&mut self) {
        let _ = self.tx.send(SinkCommand::Close);
        self.cancel.cancel();
        if let Some(h) = self.handle.take() {
            // the thread exits after the period it is writing
            release_device_thread(h, "Speaker");
        }
    }
}

impl Drop for AlsaSink {
    fn drop(&mut self) {
        self.close();
    }
}

fn play_thread(
    config: &PlaybackConfig,
    rx: std_mpsc::Receiver<SinkCommand>,
    ready_tx: oneshot::Sender<std::result::Result<(u32, u32), String>>,
    finished: mpsc::UnboundedSender<PlaybackId>,
    frames_written: &AtomicU64,
    cancel: &CancellationToken,
) {
    // 1. Open ALSA playback device with configurable sample rate, channels, and period size
    let period_size_opt = if config.period_size > 0 {
        Some(config.period_size)
    } else {
        None
    };
    let (pcm, params) = match alsa_device::open_playback(
        &config.device,
        config.sample_rate,
        config.channels,
        period_size_opt,
    ) {
        Ok(opened) => opened,
        Err(e) => {
            log::error!("Speaker unavailable: {:#}", e);
            let _ = ready_tx.send(Err(format!("{:#}", e)));
            return;
        }
    };
    let io = match pcm.io_i16() {
        Ok(io) => io,
        Err(e) => {
            let _ = ready_tx.send(Err(format!("playback io: {}", e)));
            return;
        }
    };

    let channels = params.channels.max(1) as usize;
    let period = params.period_size.max(1);
    if ready_tx.send(Ok((params.sample_rate, params.channels))).is_err() {
        return;
    }

    log::info!(
        "Playback started: rate={}, ch={}, period={}",
        params.sample_rate,
        channels,
        period,
    );

    let silence = vec![0i16; period * channels];
    let mut queue: VecDeque<Pending> = VecDeque::new();
    let mut position: u64 = 0;

    'outer: while !cancel.is_cancelled() {
        loop {
            match rx.try_recv() {
                Ok(SinkCommand::Play { id, start_frame, samples }) => {
                    queue.push_back(Pending { id, start_frame, samples, offset: 0 });
                }
                Ok(SinkCommand::Stop(ids)) => {
                    queue.retain(|p| !ids.contains(&p.id));
                }
                Ok(SinkCommand::Close) | Err(std_mpsc::TryRecvError::Disconnected) => break 'outer,
                Err(std_mpsc::TryRecvError::Empty) => break,
            }
        }

        // Pick what to write for the next period
        let (chunk, done): (&[i16], Option<PlaybackId>) = match queue.front_mut() {
            Some(item) if item.start_frame <= position => {
                let remaining = &item.samples[item.offset..];
                let take = remaining.len().min(period * channels);
                let chunk = &item.samples[item.offset..item.offset + take];
                item.offset += take;
                let done = if item.offset >= item.samples.len() { Some(item.id) } else { None };
                (chunk, done)
            }
            Some(item) => {
                let gap = ((item.start_frame - position) as usize).min(period);
                (&silence[..gap * channels], None)
            }
            None => (&silence[..], None),
        };

        let total_frames = chunk.len() / channels;
        let mut frames_done = 0;
        while frames_done < total_frames {
            match io.writei(&chunk[frames_done * channels..]) {
                Ok(n) => frames_done += n,
                Err(e) => {
                    log::warn!("ALSA playback error: {}, recovering...", e);
                    if let Err(e2) = pcm.prepare() {
                        log::error!("Failed to recover PCM playback: {}", e2);
                        break 'outer;
                    }
                }
            }
        }
        position += total_frames as u64;
        frames_written.store(position, Ordering::Relaxed);

        if let Some(id) = done {
            queue.pop_front();
            let _ = finished.send(id);
        }
    }

    log::info!("Playback stopped");
}
