use std::sync::Arc;

use tokio::signal;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

use voice_live_rs::audio::AlsaBackend;
use voice_live_rs::bridge::{GuiEvent, UdpCommandBridge};
use voice_live_rs::config::{API_KEY_ENV, Config};
use voice_live_rs::net_link::WsConnector;
use voice_live_rs::session::{LiveSession, SessionConfig};
use voice_live_rs::{Result, SessionError};

const MAX_RETRY_DELAY: u64 = 60;

/// Exponential backoff between reconnects.
struct Retry {
    delay: u64,
    at: Option<Instant>,
}

impl Retry {
    fn new() -> Self {
        Self { delay: 1, at: None }
    }

    fn schedule(&mut self) {
        log::warn!("Retrying in {}s...", self.delay);
        self.at = Some(Instant::now() + Duration::from_secs(self.delay));
        self.delay = std::cmp::min(self.delay * 2, MAX_RETRY_DELAY);
    }

    fn reset(&mut self) {
        self.delay = 1;
        self.at = None;
    }
}

/// Decide what happens after a session ended or failed to start.
/// Returns whether the session should still be running.
fn after_session(result: Result<()>, retry: &mut Retry) -> bool {
    match result {
        Ok(()) => {
            log::info!("Session stopped");
            false
        }
        Err(e) if e.is_retryable() => {
            log::warn!("Session lost: {}", e);
            retry.schedule();
            true
        }
        Err(SessionError::Device(e)) => {
            log::error!("Audio device unavailable, not retrying: {}", e);
            false
        }
        Err(e) => {
            log::error!("Session failed: {}", e);
            false
        }
    }
}

async fn start_session(session: &LiveSession, retry: &mut Retry) -> bool {
    match session.start().await {
        Ok(()) => {
            retry.reset();
            true
        }
        Err(e) => after_session(Err(e), retry),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置
    let config = Config::new().map_err(anyhow::Error::msg)?;
    log::info!("{} {} starting", env!("APP_NAME"), env!("APP_VERSION"));
    if config.api_key.is_empty() {
        log::warn!("No API key configured; set {} or [live].api_key", API_KEY_ENV);
    }

    // GUI进程通道
    let (tx_gui_event, mut rx_gui_event) = mpsc::channel::<GuiEvent>(100);

    // 启动GUI桥，与GUI进程通信
    let gui_bridge = Arc::new(UdpCommandBridge::new(&config, tx_gui_event).await?);
    let gui_bridge_clone = gui_bridge.clone();
    tokio::spawn(async move {
        if let Err(e) = gui_bridge_clone.run().await {
            log::error!("GuiBridge error: {}", e);
        }
    });

    let audio = Arc::new(AlsaBackend {
        capture: config.capture_config(),
        playback: config.playback_config(),
    });
    let connector = Arc::new(WsConnector::new(config.ws_url, config.api_key.clone()));
    let session = Arc::new(LiveSession::new(
        SessionConfig::from(&config),
        connector,
        audio,
        gui_bridge.clone(),
    ));

    // 会话状态变化通知GUI
    let mut state_rx = session.subscribe();
    let status_bridge = gui_bridge.clone();
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = *state_rx.borrow_and_update();
            if let Err(e) = status_bridge.send_status(state.as_str()).await {
                log::warn!("Failed to send status to GUI: {}", e);
            }
        }
    });

    let mut retry = Retry::new();
    let mut want_running = start_session(&session, &mut retry).await;

    loop {
        let running = session.state().is_running();
        tokio::select! {
            // 监听 Ctrl+C 信号
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                session.stop().await;
                break;
            }

            Some(event) = rx_gui_event.recv() => match event {
                GuiEvent::StartSession => {
                    retry.reset();
                    want_running = start_session(&session, &mut retry).await;
                }
                GuiEvent::StopSession => {
                    want_running = false;
                    retry.reset();
                    session.stop().await;
                }
                GuiEvent::BatchComplete(text) => {
                    if !session.announce(text) {
                        log::info!("Batch complete, but no active session to announce it");
                    }
                }
            },

            result = session.wait_closed(), if running => {
                want_running = want_running && after_session(result, &mut retry);
            }

            _ = tokio::time::sleep_until(retry.at.unwrap_or_else(Instant::now)), if want_running && retry.at.is_some() => {
                retry.at = None;
                want_running = start_session(&session, &mut retry).await;
            }
        }
    }
    Ok(())
}
