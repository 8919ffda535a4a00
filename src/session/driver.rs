use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::SessionState;
use crate::audio::{AudioCaptureSource, AudioFrame, PlaybackHandle, pcm};
use crate::bridge::CommandBridge;
use crate::error::{Result, SessionError};
use crate::protocol::{InlineAudio, Outbound, ToolCall, ToolResponse, TransportEvent, VisualFrame};
use crate::tools::{STOP_SPEAKING, ToolRegistry};

pub const ANNOUNCE_TOOL: &str = "announce_batch_completion";

/// Requests from the session handle to its driver.
#[derive(Debug)]
pub enum SessionCommand {
    Announce(String),
}

/// Publish a state change, warning about transitions the lifecycle forbids.
pub(crate) fn set_state(state: &watch::Sender<SessionState>, next: SessionState) {
    state.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        if !current.can_transition_to(next) {
            log::warn!("Unexpected session transition {} -> {}", current, next);
        }
        log::info!("Session state: {} -> {}", current, next);
        *current = next;
        true
    });
}

/// Rate from a `audio/pcm;rate=N` mime type.
pub fn rate_from_mime(mime: &str) -> Option<u32> {
    mime.split(';')
        .filter_map(|p| p.trim().strip_prefix("rate="))
        .find_map(|r| r.trim().parse().ok())
}

fn mix_channels(mut channels: Vec<Vec<f32>>) -> Vec<f32> {
    if channels.len() <= 1 {
        return channels.pop().unwrap_or_default();
    }
    let n = channels.len() as f32;
    let len = channels[0].len();
    (0..len)
        .map(|i| channels.iter().map(|c| c[i]).sum::<f32>() / n)
        .collect()
}

/// Everything one active session owns. Runs as a single task; all inbound
/// events are handled in arrival order here.
///
/// Nothing in the driver awaits the transport outside its `select!`: replies
/// wait in `pending` until the outbound queue has room, so cancellation and
/// inbound events are always polled.
pub(crate) struct Driver {
    pub transport: mpsc::Sender<Outbound>,
    pub pending: VecDeque<Outbound>,
    pub events: mpsc::Receiver<TransportEvent>,
    pub frames: mpsc::Receiver<AudioFrame>,
    pub commands: mpsc::UnboundedReceiver<SessionCommand>,
    pub visual: mpsc::UnboundedReceiver<VisualFrame>,
    pub capture: Box<dyn AudioCaptureSource>,
    pub playback: PlaybackHandle,
    pub registry: Arc<ToolRegistry>,
    pub bridge: Arc<dyn CommandBridge>,
    pub cancel: CancellationToken,
    pub state: Arc<watch::Sender<SessionState>>,
    pub outcome: Arc<Mutex<Option<SessionError>>>,
    pub output_rate: u32,
    pub output_channels: usize,
    pub batches: JoinSet<Vec<ToolResponse>>,
    /// Set by stop_speaking; the rest of the current model turn is dropped.
    pub muted_turn: bool,
    pub capture_open: bool,
    pub torn_down: bool,
}

impl Driver {
    pub async fn run(mut self) {
        let transport = self.transport.clone();
        let result = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Ok(()),
                event = self.events.recv() => match event {
                    Some(event) => {
                        if let Some(end) = self.on_event(event) {
                            break end;
                        }
                    }
                    None => break Err(SessionError::transport("transport task ended")),
                },
                Some(cmd) = self.commands.recv() => self.on_command(cmd),
                Some(done) = self.batches.join_next(), if !self.batches.is_empty() => {
                    self.on_batch_done(done);
                }
                Some(frame) = self.visual.recv() => self.pending.push_back(Outbound::Image(frame)),
                permit = transport.reserve(), if !self.pending.is_empty() => match permit {
                    Ok(permit) => {
                        if let Some(item) = self.pending.pop_front() {
                            permit.send(item);
                        }
                    }
                    Err(_) => {
                        log::warn!("Transport gone, {} outbound message(s) dropped", self.pending.len());
                        self.pending.clear();
                    }
                },
                frame = self.frames.recv(), if self.capture_open => match frame {
                    Some(frame) => self.on_frame(frame),
                    None => break Err(SessionError::device("microphone stopped delivering audio")),
                },
            }
        };
        drop(transport);

        if let Err(e) = &result {
            log::error!("Session ended: {}", e);
        }
        self.teardown().await;
        finish(&self.state, &self.outcome, result);
    }

    /// `Some` ends the session with that result.
    fn on_event(&mut self, event: TransportEvent) -> Option<Result<()>> {
        match event {
            TransportEvent::Open => log::debug!("Duplicate open signal ignored"),
            TransportEvent::Audio(audio) => self.on_audio(audio),
            TransportEvent::Text(text) => log::info!("Model: {}", text),
            TransportEvent::ToolCalls(calls) => self.on_tool_calls(calls),
            TransportEvent::ToolCallCancellation(ids) => {
                log::info!("Server cancelled tool call(s): {:?}", ids);
            }
            TransportEvent::Interrupted => {
                let generation = self.playback.flush();
                self.muted_turn = false;
                log::info!("Barge-in, playback flushed (generation {})", generation);
            }
            TransportEvent::TurnComplete => {
                self.muted_turn = false;
                log::debug!("Turn complete");
            }
            TransportEvent::GoAway => log::warn!("Server is about to close the connection"),
            TransportEvent::Closed(reason) => {
                let reason = reason.unwrap_or_else(|| "no reason given".to_string());
                return Some(Err(SessionError::transport(format!("closed by server: {}", reason))));
            }
            TransportEvent::Error(e) => return Some(Err(SessionError::transport(e))),
        }
        None
    }

    fn on_audio(&mut self, audio: InlineAudio) {
        if self.muted_turn {
            log::debug!("Dropping audio from a stopped turn");
            return;
        }
        // captured at receipt; a flush after this point makes the chunk stale
        let generation = self.playback.generation();
        let rate = rate_from_mime(&audio.mime_type).unwrap_or(self.output_rate);
        match pcm::decode_base64(&audio.data, self.output_channels) {
            Ok(channels) => self.playback.enqueue(generation, mix_channels(channels), rate),
            Err(e) => log::warn!("Dropping undecodable audio chunk: {}", e),
        }
    }

    fn on_tool_calls(&mut self, calls: Vec<ToolCall>) {
        if calls.iter().any(|c| c.name == STOP_SPEAKING) {
            let generation = self.playback.flush();
            self.muted_turn = true;
            log::info!("stop_speaking: playback flushed (generation {})", generation);
        }
        let registry = self.registry.clone();
        self.batches.spawn(async move { registry.dispatch(&calls).await });
    }

    fn on_batch_done(&mut self, done: std::result::Result<Vec<ToolResponse>, JoinError>) {
        match done {
            Ok(responses) if responses.is_empty() => {}
            Ok(responses) => {
                log::debug!("Sending {} tool response(s)", responses.len());
                self.pending.push_back(Outbound::ToolResponses(responses));
            }
            Err(e) => log::error!("Tool batch did not complete: {}", e),
        }
    }

    fn on_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Announce(text) => {
                if *self.state.borrow() != SessionState::Active {
                    log::debug!("Announcement dropped, session not active");
                    return;
                }
                let response = ToolResponse::new(
                    format!("announce-{}", Uuid::new_v4()),
                    ANNOUNCE_TOOL,
                    json!({
                        "announcement": text,
                        "snapshot": self.bridge.snapshot().to_payload(),
                    }),
                );
                self.pending.push_back(Outbound::ToolResponses(vec![response]));
            }
        }
    }

    fn on_frame(&mut self, frame: AudioFrame) {
        let chunk = pcm::encode(&frame.samples, frame.sample_rate);
        match self.transport.try_send(Outbound::Audio(chunk)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::debug!("Outbound queue full, dropping a microphone frame");
            }
            // the transport reports its own end through the event stream
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        set_state(&self.state, SessionState::Closing);

        self.capture.stop().await;
        self.capture_open = false;
        self.playback.close().await;
        if !self.pending.is_empty() {
            log::debug!("{} outbound message(s) discarded at teardown", self.pending.len());
            self.pending.clear();
        }
        // a full queue still closes: the transport sees its sender dropped
        if self.transport.try_send(Outbound::Close).is_err() {
            log::debug!("Transport queue full or closed, dropping the sender instead");
        }
        self.batches.abort_all();
        self.cancel.cancel();
    }
}

/// Record the terminal result, then publish `Closed`.
pub(crate) fn finish(
    state: &watch::Sender<SessionState>,
    outcome: &Mutex<Option<SessionError>>,
    result: Result<()>,
) {
    if let Ok(mut slot) = outcome.lock() {
        *slot = result.err();
    }
    set_state(state, SessionState::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_is_read_from_mime() {
        assert_eq!(rate_from_mime("audio/pcm;rate=24000"), Some(24000));
        assert_eq!(rate_from_mime("audio/pcm; rate=16000"), Some(16000));
        assert_eq!(rate_from_mime("audio/pcm"), None);
        assert_eq!(rate_from_mime("audio/pcm;rate=fast"), None);
    }

    #[test]
    fn channels_are_averaged() {
        assert_eq!(mix_channels(vec![vec![0.5, 1.0]]), vec![0.5, 1.0]);
        assert_eq!(mix_channels(vec![vec![0.5, 1.0], vec![-0.5, 0.0]]), vec![0.0, 0.5]);
        assert!(mix_channels(Vec::new()).is_empty());
    }

    #[test]
    fn finish_publishes_closed_after_outcome() {
        let (tx, rx) = watch::channel(SessionState::Closing);
        let outcome = Mutex::new(None);
        finish(&tx, &outcome, Err(SessionError::transport("reset")));
        assert_eq!(*rx.borrow(), SessionState::Closed);
        assert!(matches!(&*outcome.lock().unwrap(), Some(SessionError::Transport(_))));
    }
}
