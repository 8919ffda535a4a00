//! session - One live conversation with the remote model
//!
//! [`LiveSession`] is a cheap handle; the work happens in a driver task that
//! owns the transport, the microphone and the playback scheduler for as long
//! as the session is active.

mod driver;
mod state;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub use driver::{ANNOUNCE_TOOL, SessionCommand, rate_from_mime};
pub use state::SessionState;

use crate::audio::{AudioBackend, spawn_playback};
use crate::bridge::CommandBridge;
use crate::config::Config;
use crate::error::{Result, SessionError};
use crate::net_link::{LiveConnector, LiveTransport};
use crate::protocol::{Outbound, SessionSetup, ToolResponse, TransportEvent};
use crate::tools::{GET_SYSTEM_STATE, ToolRegistry};
use driver::{Driver, finish, set_state};

pub const INITIAL_CONTEXT_ID: &str = "initial_context";

/// How long to wait for the server to acknowledge the setup message.
const OPEN_TIMEOUT: Duration = Duration::from_secs(15);

/// Per-session parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model: String,
    pub system_instruction: String,
    pub voice: Option<String>,
    /// Rate assumed for inbound audio whose mime type carries none.
    pub output_sample_rate: u32,
    pub output_channels: usize,
    pub docs: Arc<str>,
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        Self {
            model: config.model.to_string(),
            system_instruction: config.system_instruction.to_string(),
            voice: Some(config.voice.to_string()).filter(|v| !v.is_empty()),
            output_sample_rate: config.output_sample_rate,
            output_channels: config.output_channels as usize,
            docs: Arc::from(config.docs_content),
        }
    }
}

struct Control {
    cancel: CancellationToken,
    commands: mpsc::UnboundedSender<SessionCommand>,
}

pub struct LiveSession {
    config: SessionConfig,
    connector: Arc<dyn LiveConnector>,
    audio: Arc<dyn AudioBackend>,
    bridge: Arc<dyn CommandBridge>,
    state: Arc<watch::Sender<SessionState>>,
    outcome: Arc<Mutex<Option<SessionError>>>,
    control: Mutex<Option<Control>>,
}

impl LiveSession {
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn LiveConnector>,
        audio: Arc<dyn AudioBackend>,
        bridge: Arc<dyn CommandBridge>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            config,
            connector,
            audio,
            bridge,
            state: Arc::new(state),
            outcome: Arc::new(Mutex::new(None)),
            control: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Connect, acquire the microphone and speaker, and hand the session to
    /// its driver task.
    ///
    /// A no-op while a session is already connecting, active or closing.
    /// Microphone or speaker failures are returned as
    /// [`SessionError::Device`]; the session is `Closed` afterwards.
    pub async fn start(&self) -> Result<()> {
        let cancel = CancellationToken::new();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        {
            let Ok(mut control) = self.control.lock() else {
                return Err(SessionError::Closed);
            };
            let current = self.state();
            if !current.can_start() {
                log::debug!("start() ignored, session is {}", current);
                return Ok(());
            }
            if let Ok(mut outcome) = self.outcome.lock() {
                *outcome = None;
            }
            set_state(&self.state, SessionState::Connecting);
            *control = Some(Control {
                cancel: cancel.clone(),
                commands: cmd_tx,
            });
        }

        match self.establish(cancel.clone(), cmd_rx).await {
            Ok(driver) => {
                tokio::spawn(driver.run());
                Ok(())
            }
            Err(e) => {
                cancel.cancel();
                // stop() during connect is not a failure
                let result = match &e {
                    SessionError::Closed => Ok(()),
                    other => {
                        log::error!("Session failed to start: {}", other);
                        Err(other.clone())
                    }
                };
                finish(&self.state, &self.outcome, result);
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        cancel: CancellationToken,
        commands: mpsc::UnboundedReceiver<SessionCommand>,
    ) -> Result<Driver> {
        let (visual_tx, visual_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(ToolRegistry::standard(
            self.bridge.clone(),
            visual_tx,
            self.config.docs.clone(),
        ));
        let setup = SessionSetup {
            model: self.config.model.clone(),
            system_instruction: self.config.system_instruction.clone(),
            tools: registry.declarations(),
            voice: self.config.voice.clone(),
        };

        let LiveTransport { tx, mut events } = tokio::select! {
            _ = cancel.cancelled() => return Err(SessionError::Closed),
            t = self.connector.connect(setup) => t?,
        };

        let opened = tokio::select! {
            _ = cancel.cancelled() => Err(SessionError::Closed),
            r = tokio::time::timeout(OPEN_TIMEOUT, wait_open(&mut events)) => match r {
                Ok(r) => r,
                Err(_) => Err(SessionError::transport("timed out waiting for setup acknowledgement")),
            },
        };
        if let Err(e) = opened {
            let _ = tx.try_send(Outbound::Close);
            return Err(e);
        }

        // microphone first: without it there is no session
        let mut capture = self.audio.capture();
        let frames = match capture.start(cancel.child_token()).await {
            Ok(frames) => frames,
            Err(e) => {
                let _ = tx.try_send(Outbound::Close);
                return Err(e);
            }
        };

        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let sink = match self.audio.open_output(finished_tx, cancel.child_token()).await {
            Ok(sink) => sink,
            Err(e) => {
                capture.stop().await;
                let _ = tx.try_send(Outbound::Close);
                return Err(e);
            }
        };
        let (playback, _playback_task) = spawn_playback(sink, finished_rx, cancel.child_token());

        set_state(&self.state, SessionState::Active);

        // first thing the driver sends
        let initial = ToolResponse::new(
            INITIAL_CONTEXT_ID,
            GET_SYSTEM_STATE,
            self.bridge.snapshot().to_payload(),
        );

        Ok(Driver {
            transport: tx,
            pending: VecDeque::from([Outbound::ToolResponses(vec![initial])]),
            events,
            frames,
            commands,
            visual: visual_rx,
            capture,
            playback,
            registry,
            bridge: self.bridge.clone(),
            cancel,
            state: self.state.clone(),
            outcome: self.outcome.clone(),
            output_rate: self.config.output_sample_rate,
            output_channels: self.config.output_channels.max(1),
            batches: JoinSet::new(),
            muted_turn: false,
            capture_open: true,
            torn_down: false,
        })
    }

    /// Tear the session down and wait until it is `Closed`.
    ///
    /// Safe to call in any state and any number of times.
    pub async fn stop(&self) {
        let control = self.control.lock().ok().and_then(|mut c| c.take());
        let Some(control) = control else {
            return;
        };
        control.cancel.cancel();
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| !s.is_running()).await;
    }

    /// Wait for the session to end. `Ok` after an explicit stop, the failure
    /// otherwise. Returns at once if the session never started.
    pub async fn wait_closed(&self) -> Result<()> {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| !s.is_running()).await;
        match self.outcome.lock() {
            Ok(outcome) => outcome.clone().map_or(Ok(()), Err),
            Err(_) => Ok(()),
        }
    }

    /// Tell the model a bulk operation finished so it can say so aloud.
    ///
    /// Dropped when no session is active. Returns whether it was queued.
    pub fn announce(&self, text: impl Into<String>) -> bool {
        if self.state() != SessionState::Active {
            log::debug!("No active session, announcement dropped");
            return false;
        }
        let Ok(control) = self.control.lock() else {
            return false;
        };
        match control.as_ref() {
            Some(c) => c.commands.send(SessionCommand::Announce(text.into())).is_ok(),
            None => false,
        }
    }
}

async fn wait_open(events: &mut mpsc::Receiver<TransportEvent>) -> Result<()> {
    loop {
        match events.recv().await {
            Some(TransportEvent::Open) => return Ok(()),
            Some(TransportEvent::Closed(reason)) => {
                return Err(SessionError::transport(format!(
                    "closed during setup: {}",
                    reason.unwrap_or_default()
                )));
            }
            Some(TransportEvent::Error(e)) => return Err(SessionError::transport(e)),
            Some(other) => log::debug!("Ignoring {:?} before setup completed", other),
            None => return Err(SessionError::transport("connection lost during setup")),
        }
    }
}
