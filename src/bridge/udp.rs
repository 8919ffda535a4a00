use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};

use super::{CommandBridge, ContextSnapshot, UiCommand};
use crate::config::Config;
use crate::protocol::VisualFrame;

/// Things the GUI asks of the core, as opposed to state it reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuiEvent {
    BatchComplete(String),
    StartSession,
    StopSession,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum SessionAction {
    Start,
    Stop,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum GuiMessage {
    State(ContextSnapshot),
    Frames { frames: Vec<VisualFrame> },
    BatchComplete { text: String },
    Session { action: SessionAction },
}

/// GUI进程和Core进程通过本地UDP通信，端口在配置中指定
///
/// The GUI pushes `state` and `frames` messages whenever they change; the
/// latest of each is cached here and served to the session on demand.
pub struct UdpCommandBridge {
    socket: Arc<UdpSocket>,
    target_addr: String,
    tx: mpsc::Sender<GuiEvent>,
    buffer_size: usize,
    snapshot: watch::Sender<ContextSnapshot>,
    frames: watch::Sender<Vec<VisualFrame>>,
}

impl UdpCommandBridge {
    pub async fn new(config: &Config, tx: mpsc::Sender<GuiEvent>) -> anyhow::Result<Self> {
        Self::bind(
            &config.gui_local_addr(),
            &config.gui_remote_addr(),
            config.gui_buffer_size,
            tx,
        )
        .await
    }

    pub async fn bind(
        local_addr: &str,
        target_addr: &str,
        buffer_size: usize,
        tx: mpsc::Sender<GuiEvent>,
    ) -> anyhow::Result<Self> {
        // 绑定本地UDP端口
        let socket = UdpSocket::bind(local_addr).await?;
        let (snapshot, _) = watch::channel(ContextSnapshot::default());
        let (frames, _) = watch::channel(Vec::new());

        Ok(Self {
            socket: Arc::new(socket),
            target_addr: target_addr.to_string(),
            tx,
            buffer_size,
            snapshot,
            frames,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            // 通过UDP socket接收消息
            let (len, _) = self.socket.recv_from(&mut buf).await?;
            if len == 0 {
                continue;
            }
            let Ok(msg) = std::str::from_utf8(&buf[..len]) else {
                log::warn!("Dropping non-UTF-8 datagram from GUI ({} bytes)", len);
                continue;
            };
            if let Some(event) = self.handle_message(msg) {
                if let Err(e) = self.tx.send(event).await {
                    log::error!("Failed to send GUI event: {}", e);
                    break;
                }
            }
        }
        Ok(())
    }

    /// Apply one GUI message; returns an event when the core has to act on it.
    pub fn handle_message(&self, msg: &str) -> Option<GuiEvent> {
        let parsed: GuiMessage = match serde_json::from_str(msg) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("Unrecognized GUI message ({}): {}", e, msg);
                return None;
            }
        };
        match parsed {
            GuiMessage::State(snapshot) => {
                log::debug!("GUI state: {} queued, lang={}", snapshot.queue_size, snapshot.language);
                self.snapshot.send_replace(snapshot);
                None
            }
            GuiMessage::Frames { frames } => {
                log::debug!("GUI pushed {} visual frame(s)", frames.len());
                self.frames.send_replace(frames);
                None
            }
            GuiMessage::BatchComplete { text } => Some(GuiEvent::BatchComplete(text)),
            GuiMessage::Session { action: SessionAction::Start } => Some(GuiEvent::StartSession),
            GuiMessage::Session { action: SessionAction::Stop } => Some(GuiEvent::StopSession),
        }
    }

    pub async fn send_message(&self, msg: &str) -> anyhow::Result<()> {
        self.socket
            .send_to(msg.as_bytes(), &self.target_addr)
            .await?;
        Ok(())
    }

    /// Tell the GUI what the session is doing (shown as a status indicator).
    pub async fn send_status(&self, state: &str) -> anyhow::Result<()> {
        let msg = serde_json::json!({ "type": "session_state", "state": state });
        self.send_message(&msg.to_string()).await
    }
}

#[async_trait]
impl CommandBridge for UdpCommandBridge {
    async fn dispatch(&self, command: UiCommand) -> Result<String, String> {
        let mut msg = serde_json::to_value(&command).map_err(|e| e.to_string())?;
        if let Value::Object(map) = &mut msg {
            map.insert("type".to_string(), Value::String("command".to_string()));
        }
        self.send_message(&msg.to_string())
            .await
            .map_err(|e| format!("GUI unreachable: {}", e))?;
        Ok(command.acknowledgement())
    }

    fn snapshot(&self) -> ContextSnapshot {
        self.snapshot.borrow().clone()
    }

    fn visual_context(&self) -> Vec<VisualFrame> {
        self.frames.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::ScrollDirection;

    async fn pair() -> (UdpCommandBridge, UdpSocket, mpsc::Receiver<GuiEvent>) {
        let gui = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let gui_addr = gui.local_addr().unwrap().to_string();
        let (tx, rx) = mpsc::channel(8);
        let bridge = UdpCommandBridge::bind("127.0.0.1:0", &gui_addr, 4096, tx).await.unwrap();
        (bridge, gui, rx)
    }

    #[tokio::test]
    async fn state_messages_update_the_snapshot() {
        let (bridge, _gui, _rx) = pair().await;
        assert_eq!(bridge.snapshot().queue_size, 0);
        let event = bridge.handle_message(r#"{"type":"state","language":"ja","queueSize":3}"#);
        assert!(event.is_none());
        let snap = bridge.snapshot();
        assert_eq!(snap.language, "ja");
        assert_eq!(snap.queue_size, 3);
    }

    #[tokio::test]
    async fn control_messages_become_events() {
        let (bridge, _gui, _rx) = pair().await;
        assert_eq!(
            bridge.handle_message(r#"{"type":"batch_complete","text":"4 images done"}"#),
            Some(GuiEvent::BatchComplete("4 images done".into()))
        );
        assert_eq!(
            bridge.handle_message(r#"{"type":"session","action":"stop"}"#),
            Some(GuiEvent::StopSession)
        );
        assert!(bridge.handle_message(r#"{"type":"nonsense"}"#).is_none());

        bridge.handle_message(r#"{"type":"frames","frames":[{"mimeType":"image/jpeg","data":"AA=="}]}"#);
        assert_eq!(bridge.visual_context().len(), 1);
    }

    #[tokio::test]
    async fn dispatch_sends_tagged_command() {
        let (bridge, gui, _rx) = pair().await;
        let ack = bridge
            .dispatch(UiCommand::ScrollViewport { scroll_action: ScrollDirection::Down })
            .await
            .unwrap();
        assert!(ack.contains("Down"));

        let mut buf = vec![0u8; 1024];
        let (len, _) = gui.recv_from(&mut buf).await.unwrap();
        let v: Value = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(v["type"], "command");
        assert_eq!(v["command"], "scroll_viewport");
        assert_eq!(v["scrollAction"], "DOWN");
    }

    #[tokio::test]
    async fn run_forwards_events() {
        let (bridge, gui, mut rx) = pair().await;
        let bridge = Arc::new(bridge);
        let addr = bridge.local_addr().unwrap();
        let runner = bridge.clone();
        let task = tokio::spawn(async move { runner.run().await });

        gui.send_to(br#"{"type":"session","action":"start"}"#, addr).await.unwrap();
        assert_eq!(rx.recv().await, Some(GuiEvent::StartSession));
        task.abort();
    }
}
