use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;
use uuid::Uuid;

use crate::error::{Result, SessionError};
use crate::protocol::{self, Outbound, SessionSetup, TransportEvent};

const OUTBOUND_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 256;

/// One open connection: what to send, and what came back.
pub struct LiveTransport {
    pub tx: mpsc::Sender<Outbound>,
    pub events: mpsc::Receiver<TransportEvent>,
}

impl LiveTransport {
    /// Build a transport from raw channel ends; used by in-process connectors.
    pub fn new(tx: mpsc::Sender<Outbound>, events: mpsc::Receiver<TransportEvent>) -> Self {
        Self { tx, events }
    }
}

/// Opens connections to the remote model. The connection does not reconnect
/// on its own; losing it ends the session.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    async fn connect(&self, setup: SessionSetup) -> Result<LiveTransport>;
}

/// WebSocket connector speaking the Live protocol.
pub struct WsConnector {
    ws_url: String,
    api_key: String,
}

impl WsConnector {
    pub fn new(ws_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            api_key: api_key.into(),
        }
    }

    fn endpoint(&self) -> Result<Url> {
        let mut url = Url::parse(&self.ws_url)
            .map_err(|e| SessionError::Config(format!("bad ws_url {}: {}", self.ws_url, e)))?;
        if !self.api_key.is_empty() {
            url.query_pairs_mut().append_pair("key", &self.api_key);
        }
        Ok(url)
    }
}

#[async_trait]
impl LiveConnector for WsConnector {
    async fn connect(&self, setup: SessionSetup) -> Result<LiveTransport> {
        let url = self.endpoint()?;
        let conn_id = Uuid::new_v4();

        log::info!("[{}] Connecting to {}...", conn_id, self.ws_url);
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| SessionError::transport(format!("connect failed: {}", e)))?;
        log::info!("[{}] Connected!", conn_id);

        let (mut write, mut read) = ws_stream.split();

        // 连接建立后先发送 setup 消息
        let setup_json = protocol::setup_message(&setup)?;
        log::debug!("[{}] Sending setup for {}", conn_id, setup.model);
        write
            .send(Message::Text(setup_json.into()))
            .await
            .map_err(|e| SessionError::transport(e.to_string()))?;

        let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(OUTBOUND_CAPACITY);
        let (ev_tx, ev_rx) = mpsc::channel::<TransportEvent>(EVENT_CAPACITY);

        tokio::spawn(async move {
            // 主循环，处理读取和写入
            loop {
                tokio::select! {
                    msg = read.next() => {
                        let decoded = match msg {
                            Some(Ok(Message::Text(text))) => decode_frame(text.as_str()),
                            // the server sends JSON in binary frames too
                            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                                Ok(text) => decode_frame(text),
                                Err(_) => Err(SessionError::protocol(format!(
                                    "non-UTF-8 binary frame ({} bytes)",
                                    data.len()
                                ))),
                            },
                            Some(Ok(Message::Close(frame))) => {
                                log::info!("[{}] Server closed connection: {:?}", conn_id, frame);
                                let reason = frame.map(|f| f.reason.as_str().to_string()).filter(|r| !r.is_empty());
                                let _ = ev_tx.send(TransportEvent::Closed(reason)).await;
                                break;
                            }
                            Some(Ok(_)) => Ok(Vec::new()),
                            Some(Err(e)) => {
                                log::error!("[{}] WebSocket error: {}", conn_id, e);
                                let _ = ev_tx.send(TransportEvent::Error(e.to_string())).await;
                                break;
                            }
                            None => {
                                let _ = ev_tx.send(TransportEvent::Closed(None)).await;
                                break;
                            }
                        };
                        let events = match decoded {
                            Ok(events) => events,
                            Err(e) => {
                                // a frame we cannot read may have carried tool calls
                                log::error!("[{}] {}", conn_id, e);
                                let _ = ev_tx.send(TransportEvent::Error(e.to_string())).await;
                                let _ = write.close().await;
                                break;
                            }
                        };
                        for event in events {
                            if ev_tx.send(event).await.is_err() {
                                // session is gone
                                let _ = write.close().await;
                                return;
                            }
                        }
                    }
                    cmd = out_rx.recv() => {
                        let item = match cmd {
                            Some(Outbound::Close) | None => {
                                log::info!("[{}] Closing connection", conn_id);
                                let _ = write.close().await;
                                break;
                            }
                            Some(item) => item,
                        };
                        let text = match protocol::encode_outbound(&item) {
                            Ok(Some(text)) => text,
                            Ok(None) => continue,
                            Err(e) => {
                                log::error!("[{}] Failed to encode outbound message: {}", conn_id, e);
                                continue;
                            }
                        };
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            log::error!("[{}] Send failed: {}", conn_id, e);
                            let _ = ev_tx.send(TransportEvent::Error(e.to_string())).await;
                            break;
                        }
                    }
                }
            }
            log::debug!("[{}] Transport task finished", conn_id);
        });

        Ok(LiveTransport::new(out_tx, ev_rx))
    }
}

fn decode_frame(text: &str) -> Result<Vec<TransportEvent>> {
    protocol::parse_server_message(text)
}
