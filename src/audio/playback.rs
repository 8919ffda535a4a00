//! Gap-free playback scheduling for remote audio.
//!
//! Buffers arrive in bursts. Each one is placed at `max(next_start, now)` on the
//! output clock and `next_start` advances by its duration, so consecutive
//! buffers play back-to-back and a scheduler that fell behind snaps to "now"
//! instead of scheduling into the past.
//!
//! A flush stops every in-flight buffer and bumps the generation. Producers tag
//! each decode with the generation they saw when the chunk arrived; anything
//! tagged with an older generation is dropped.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

pub type PlaybackId = u64;

/// A buffer that has been handed to the output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackItem {
    pub id: PlaybackId,
    pub generation: u64,
    pub start: Duration,
    pub duration: Duration,
}

impl PlaybackItem {
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }
}

/// Output device seen by the scheduler.
///
/// Implementations report finished buffers by sending their id on the
/// channel they were built with.
pub trait AudioSink: Send {
    /// Current position of the output clock.
    fn now(&self) -> Duration;

    /// Queue `samples` (mono, `sample_rate`) to start at `start` on the output clock.
    fn schedule(
        &mut self,
        id: PlaybackId,
        samples: Vec<f32>,
        sample_rate: u32,
        start: Duration,
    ) -> Result<()>;

    /// Stop the given buffers immediately, whether or not they started.
    fn stop(&mut self, ids: &[PlaybackId]);

    /// Release the device.
    fn close(&mut self);
}

impl<S: AudioSink + ?Sized> AudioSink for Box<S> {
    fn now(&self) -> Duration {
        (**self).now()
    }

    fn schedule(
        &mut self,
        id: PlaybackId,
        samples: Vec<f32>,
        sample_rate: u32,
        start: Duration,
    ) -> Result<()> {
        (**self).schedule(id, samples, sample_rate, start)
    }

    fn stop(&mut self, ids: &[PlaybackId]) {
        (**self).stop(ids)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// ALSA playback device name
    pub device: String,
    /// Desired ALSA playback sample rate
    pub sample_rate: u32,
    /// Desired ALSA playback channel count
    pub channels: u32,
    /// Desired ALSA playback period size (0 = let ALSA decide)
    pub period_size: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            device: "default".to_string(),
            sample_rate: 24000,
            channels: 1,
            period_size: 480,
        }
    }
}

pub struct PlaybackScheduler<S: AudioSink> {
    sink: S,
    next_start: Duration,
    generation: u64,
    in_flight: HashSet<PlaybackId>,
    next_id: PlaybackId,
    closed: bool,
}

impl<S: AudioSink> PlaybackScheduler<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            next_start: Duration::ZERO,
            generation: 0,
            in_flight: HashSet::new(),
            next_id: 0,
            closed: false,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn next_start(&self) -> Duration {
        self.next_start
    }

    /// Schedule a decoded buffer captured under `generation`.
    ///
    /// Returns `None` when the buffer was dropped: stale generation, empty
    /// buffer, closed scheduler, or a sink that refused it.
    pub fn enqueue(
        &mut self,
        generation: u64,
        samples: Vec<f32>,
        sample_rate: u32,
    ) -> Option<PlaybackItem> {
        if self.closed {
            return None;
        }
        if generation != self.generation {
            log::debug!(
                "Dropping stale audio buffer (generation {} < {})",
                generation,
                self.generation
            );
            return None;
        }
        if samples.is_empty() || sample_rate == 0 {
            return None;
        }

        let duration = Duration::from_secs_f64(samples.len() as f64 / sample_rate as f64);
        let start = self.next_start.max(self.sink.now());
        let id = self.next_id;
        self.next_id += 1;

        if let Err(e) = self.sink.schedule(id, samples, sample_rate, start) {
            log::warn!("Output refused buffer {}: {}", id, e);
            return None;
        }

        self.in_flight.insert(id);
        self.next_start = start + duration;
        Some(PlaybackItem {
            id,
            generation,
            start,
            duration,
        })
    }

    /// Playback completion callback.
    pub fn on_finished(&mut self, id: PlaybackId) {
        self.in_flight.remove(&id);
    }

    /// Stop everything in flight and start a new generation.
    ///
    /// Returns the number of buffers that were stopped.
    pub fn flush(&mut self) -> usize {
        let ids: Vec<PlaybackId> = self.in_flight.drain().collect();
        if !ids.is_empty() {
            self.sink.stop(&ids);
        }
        self.next_start = Duration::ZERO;
        self.generation += 1;
        ids.len()
    }

    /// Flush and release the output device. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        let stopped = self.flush();
        self.sink.close();
        self.closed = true;
        log::info!("Playback closed, {} buffer(s) cancelled", stopped);
    }
}

enum PlaybackCommand {
    Enqueue {
        generation: u64,
        samples: Vec<f32>,
        sample_rate: u32,
    },
    Flush,
    Close(oneshot::Sender<()>),
}

/// Cloneable front of the playback task.
#[derive(Clone)]
pub struct PlaybackHandle {
    tx: mpsc::UnboundedSender<PlaybackCommand>,
    generation: Arc<AtomicU64>,
}

impl PlaybackHandle {
    /// Generation to tag a decode with, read when its chunk arrives.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn enqueue(&self, generation: u64, samples: Vec<f32>, sample_rate: u32) {
        let _ = self.tx.send(PlaybackCommand::Enqueue {
            generation,
            samples,
            sample_rate,
        });
    }

    /// Invalidate everything captured so far and stop what is playing.
    ///
    /// The generation is bumped before the command is queued, so a decode
    /// started after this call always carries the new value.
    pub fn flush(&self) -> u64 {
        let next = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.tx.send(PlaybackCommand::Flush);
        next
    }

    /// Flush, release the device and wait for the task to acknowledge.
    pub async fn close(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(PlaybackCommand::Close(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

/// Run a scheduler on its own task and return a handle to it.
///
/// `finished` is the receiving end of the channel the sink reports
/// completions on.
pub fn spawn_playback<S>(
    sink: S,
    mut finished: mpsc::UnboundedReceiver<PlaybackId>,
    cancel: CancellationToken,
) -> (PlaybackHandle, JoinHandle<()>)
where
    S: AudioSink + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<PlaybackCommand>();
    let handle = PlaybackHandle {
        tx,
        generation: Arc::new(AtomicU64::new(0)),
    };

    let task = tokio::spawn(async move {
        let mut scheduler = PlaybackScheduler::new(sink);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                cmd = rx.recv() => match cmd {
                    Some(PlaybackCommand::Enqueue { generation, samples, sample_rate }) => {
                        if let Some(item) = scheduler.enqueue(generation, samples, sample_rate) {
                            log::debug!(
                                "Scheduled buffer {} at {:?} for {:?}",
                                item.id,
                                item.start,
                                item.duration
                            );
                        }
                    }
                    Some(PlaybackCommand::Flush) => {
                        let stopped = scheduler.flush();
                        log::info!("Playback flushed, {} buffer(s) stopped", stopped);
                    }
                    Some(PlaybackCommand::Close(done)) => {
                        scheduler.close();
                        let _ = done.send(());
                        return;
                    }
                    None => break,
                },
                Some(id) = finished.recv() => scheduler.on_finished(id),
            }
        }
        scheduler.close();
    });

    (handle, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub enum SinkCall {
        Schedule { id: PlaybackId, len: usize, start: Duration },
        Stop(Vec<PlaybackId>),
        Close,
    }

    /// Sink with a hand-driven clock that records every call.
    #[derive(Clone, Default)]
    pub struct RecordingSink {
        pub now: Arc<Mutex<Duration>>,
        pub calls: Arc<Mutex<Vec<SinkCall>>>,
    }

    impl RecordingSink {
        pub fn set_now(&self, now: Duration) {
            *self.now.lock().unwrap() = now;
        }

        pub fn calls(&self) -> Vec<SinkCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl AudioSink for RecordingSink {
        fn now(&self) -> Duration {
            *self.now.lock().unwrap()
        }

        fn schedule(
            &mut self,
            id: PlaybackId,
            samples: Vec<f32>,
            _rate: u32,
            start: Duration,
        ) -> Result<()> {
            self.calls.lock().unwrap().push(SinkCall::Schedule {
                id,
                len: samples.len(),
                start,
            });
            Ok(())
        }

        fn stop(&mut self, ids: &[PlaybackId]) {
            let mut ids = ids.to_vec();
            ids.sort_unstable();
            self.calls.lock().unwrap().push(SinkCall::Stop(ids));
        }

        fn close(&mut self) {
            self.calls.lock().unwrap().push(SinkCall::Close);
        }
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn burst_is_scheduled_back_to_back() {
        let sink = RecordingSink::default();
        sink.set_now(ms(100));
        let mut sched = PlaybackScheduler::new(sink);

        // 240 samples at 24kHz = 10ms each
        let a = sched.enqueue(0, vec![0.0; 240], 24000).unwrap();
        let b = sched.enqueue(0, vec![0.0; 480], 24000).unwrap();
        let c = sched.enqueue(0, vec![0.0; 240], 24000).unwrap();

        assert_eq!(a.start, ms(100));
        assert_eq!(b.start, a.end());
        assert_eq!(c.start, b.end());
        assert_eq!(c.end(), ms(140));
        assert_eq!(sched.in_flight(), 3);
    }

    #[test]
    fn falling_behind_snaps_to_now() {
        let sink = RecordingSink::default();
        let mut sched = PlaybackScheduler::new(sink.clone());

        let a = sched.enqueue(0, vec![0.0; 240], 24000).unwrap();
        assert_eq!(a.start, Duration::ZERO);

        // Clock has moved well past the end of `a`
        sink.set_now(ms(500));
        let b = sched.enqueue(0, vec![0.0; 240], 24000).unwrap();
        assert_eq!(b.start, ms(500));
        assert!(b.start >= a.end());
    }

    #[test]
    fn starts_never_decrease_without_flush() {
        let sink = RecordingSink::default();
        let mut sched = PlaybackScheduler::new(sink.clone());
        let mut prev: Option<PlaybackItem> = None;
        for (i, len) in [100usize, 2400, 17, 960, 1, 4800].iter().enumerate() {
            sink.set_now(ms(i as u64 * 3));
            let item = sched.enqueue(0, vec![0.0; *len], 24000).unwrap();
            if let Some(p) = prev {
                assert!(item.start >= p.end());
            }
            prev = Some(item);
        }
    }

    #[test]
    fn flush_stops_in_flight_and_drops_stale_generation() {
        let sink = RecordingSink::default();
        sink.set_now(ms(10));
        let mut sched = PlaybackScheduler::new(sink.clone());

        let captured = sched.generation();
        let a = sched.enqueue(captured, vec![0.0; 240], 24000).unwrap();
        let b = sched.enqueue(captured, vec![0.0; 240], 24000).unwrap();
        sched.on_finished(a.id);

        assert_eq!(sched.flush(), 1);
        assert_eq!(sched.next_start(), Duration::ZERO);
        assert_eq!(sched.in_flight(), 0);

        // Decode that started before the flush
        assert!(sched.enqueue(captured, vec![0.0; 240], 24000).is_none());

        sink.set_now(ms(20));
        let c = sched.enqueue(sched.generation(), vec![0.0; 240], 24000).unwrap();
        assert_eq!(c.start, ms(20));

        let calls = sink.calls();
        assert!(calls.contains(&SinkCall::Stop(vec![b.id])));
        assert_eq!(
            calls.iter().filter(|c| matches!(c, SinkCall::Schedule { .. })).count(),
            3
        );
    }

    #[test]
    fn empty_flush_does_not_touch_sink() {
        let sink = RecordingSink::default();
        let mut sched = PlaybackScheduler::new(sink.clone());
        assert_eq!(sched.flush(), 0);
        assert_eq!(sched.generation(), 1);
        assert!(sink.calls().is_empty());
    }

    #[test]
    fn close_is_idempotent() {
        let sink = RecordingSink::default();
        let mut sched = PlaybackScheduler::new(sink.clone());
        sched.enqueue(0, vec![0.0; 240], 24000).unwrap();
        sched.close();
        sched.close();
        let calls = sink.calls();
        assert_eq!(calls.iter().filter(|c| **c == SinkCall::Close).count(), 1);
        assert!(sched.enqueue(sched.generation(), vec![0.0; 240], 24000).is_none());
    }

    #[tokio::test]
    async fn handle_flush_races_with_inflight_decode() {
        let sink = RecordingSink::default();
        let (_finished_tx, finished_rx) = mpsc::unbounded_channel();
        let (handle, task) = spawn_playback(sink.clone(), finished_rx, CancellationToken::new());

        // A decode captured its generation, then a flush lands before it is queued.
        let stale = handle.generation();
        handle.enqueue(stale, vec![0.0; 240], 24000);
        let fresh = handle.flush();
        handle.enqueue(stale, vec![0.0; 240], 24000);
        handle.enqueue(fresh, vec![0.0; 120], 24000);
        handle.close().await;
        task.await.unwrap();

        let scheduled: Vec<usize> = sink
            .calls()
            .iter()
            .filter_map(|c| match c {
                SinkCall::Schedule { len, .. } => Some(*len),
                _ => None,
            })
            .collect();
        assert_eq!(scheduled, vec![240, 120]);
        assert!(sink.calls().contains(&SinkCall::Stop(vec![0])));
        assert_eq!(sink.calls().last(), Some(&SinkCall::Close));
    }
}
