//! Live streaming protocol messages.
//!
//! Client → server: `setup`, `realtimeInput`, `toolResponse`.
//! Server → client: `setupComplete`, `serverContent`, `toolCall`,
//! `toolCallCancellation`, `goAway`.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::audio::WireAudioChunk;
use crate::error::{Result, SessionError};

/// A remote request to run a local tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }
}

/// The answer to one [`ToolCall`], matched by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

impl ToolResponse {
    pub fn new(id: impl Into<String>, name: impl Into<String>, response: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            response,
        }
    }

    pub fn ok(call: &ToolCall, message: impl Into<String>) -> Self {
        Self::new(&call.id, &call.name, json!({ "result": message.into() }))
    }

    pub fn error(call: &ToolCall, error: impl Into<String>) -> Self {
        Self::new(&call.id, &call.name, json!({ "error": error.into() }))
    }

    pub fn is_error(&self) -> bool {
        self.response.get("error").is_some()
    }
}

/// One still image pushed to the model outside of a tool response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualFrame {
    pub mime_type: String,
    /// base64 image bytes
    pub data: String,
}

/// Base64 audio as it arrived from the server, before decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineAudio {
    pub mime_type: String,
    pub data: String,
}

/// Everything the transport reports to the session, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open,
    Audio(InlineAudio),
    Text(String),
    ToolCalls(Vec<ToolCall>),
    ToolCallCancellation(Vec<String>),
    Interrupted,
    TurnComplete,
    GoAway,
    Closed(Option<String>),
    Error(String),
}

/// Everything the session asks the transport to send.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Audio(WireAudioChunk),
    ToolResponses(Vec<ToolResponse>),
    Image(VisualFrame),
    Close,
}

/// Connection parameters sent in the setup message.
#[derive(Debug, Clone)]
pub struct SessionSetup {
    pub model: String,
    pub system_instruction: String,
    pub tools: Vec<Value>,
    pub voice: Option<String>,
}

// ======================== Client messages ========================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum ClientMessage<'a> {
    Setup(Setup<'a>),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponseMessage<'a>),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup<'a> {
    model: &'a str,
    generation_config: Value,
    system_instruction: Content,
    tools: Vec<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput {
    media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaChunk {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolResponseMessage<'a> {
    function_responses: &'a [ToolResponse],
}

pub fn setup_message(setup: &SessionSetup) -> Result<String> {
    let mut generation_config = json!({ "responseModalities": ["AUDIO"] });
    if let Some(voice) = &setup.voice {
        generation_config["speechConfig"] = json!({
            "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice } }
        });
    }
    let msg = ClientMessage::Setup(Setup {
        model: &setup.model,
        generation_config,
        system_instruction: Content {
            parts: vec![Part {
                text: Some(setup.system_instruction.clone()),
                inline_data: None,
            }],
        },
        tools: vec![json!({ "functionDeclarations": setup.tools })],
    });
    Ok(serde_json::to_string(&msg)?)
}

/// Serialize one outbound item. `Close` has no wire form.
pub fn encode_outbound(item: &Outbound) -> Result<Option<String>> {
    let msg = match item {
        Outbound::Audio(chunk) => ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: chunk.mime_type(),
                data: chunk.data.clone(),
            }],
        }),
        Outbound::Image(frame) => ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: frame.mime_type.clone(),
                data: frame.data.clone(),
            }],
        }),
        Outbound::ToolResponses(responses) => ClientMessage::ToolResponse(ToolResponseMessage {
            function_responses: responses,
        }),
        Outbound::Close => return Ok(None),
    };
    Ok(Some(serde_json::to_string(&msg)?))
}

// ======================== Server messages ========================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<Value>,
    server_content: Option<ServerContent>,
    tool_call: Option<ToolCallMessage>,
    tool_call_cancellation: Option<ToolCallCancellation>,
    go_away: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<Content>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallMessage {
    #[serde(default)]
    function_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCallCancellation {
    #[serde(default)]
    ids: Vec<String>,
}

/// Translate one server frame into session events, preserving the order of
/// the parts inside it. An interruption is reported before any audio in the
/// same frame.
pub fn parse_server_message(raw: &str) -> Result<Vec<TransportEvent>> {
    let msg: ServerMessage = serde_json::from_str(raw)
        .map_err(|e| SessionError::protocol(format!("unreadable server frame: {}", e)))?;

    let mut events = Vec::new();
    if msg.setup_complete.is_some() {
        events.push(TransportEvent::Open);
    }
    if let Some(content) = msg.server_content {
        if content.interrupted {
            events.push(TransportEvent::Interrupted);
        }
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(inline) = part.inline_data {
                    if inline.mime_type.starts_with("audio/") {
                        events.push(TransportEvent::Audio(InlineAudio {
                            mime_type: inline.mime_type,
                            data: inline.data,
                        }));
                    }
                }
                if let Some(text) = part.text {
                    events.push(TransportEvent::Text(text));
                }
            }
        }
        if content.turn_complete {
            events.push(TransportEvent::TurnComplete);
        }
    }
    if let Some(call) = msg.tool_call {
        if !call.function_calls.is_empty() {
            events.push(TransportEvent::ToolCalls(call.function_calls));
        }
    }
    if let Some(cancel) = msg.tool_call_cancellation {
        events.push(TransportEvent::ToolCallCancellation(cancel.ids));
    }
    if msg.go_away.is_some() {
        events.push(TransportEvent::GoAway);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_carries_tools_and_voice() {
        let setup = SessionSetup {
            model: "models/live".into(),
            system_instruction: "be brief".into(),
            tools: vec![json!({ "name": "stop_speaking" })],
            voice: Some("Kore".into()),
        };
        let v: Value = serde_json::from_str(&setup_message(&setup).unwrap()).unwrap();
        assert_eq!(v["setup"]["model"], "models/live");
        assert_eq!(v["setup"]["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            v["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
        assert_eq!(v["setup"]["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(v["setup"]["tools"][0]["functionDeclarations"][0]["name"], "stop_speaking");
    }

    #[test]
    fn audio_is_tagged_with_its_rate() {
        let chunk = WireAudioChunk { data: "AAA=".into(), sample_rate: 44100 };
        let text = encode_outbound(&Outbound::Audio(chunk)).unwrap().unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["realtimeInput"]["mediaChunks"][0]["mimeType"], "audio/pcm;rate=44100");
        assert_eq!(v["realtimeInput"]["mediaChunks"][0]["data"], "AAA=");
        assert!(encode_outbound(&Outbound::Close).unwrap().is_none());
    }

    #[test]
    fn tool_responses_batch() {
        let call = ToolCall::new("a", "scroll_viewport", json!({}));
        let out = Outbound::ToolResponses(vec![ToolResponse::ok(&call, "done")]);
        let v: Value = serde_json::from_str(&encode_outbound(&out).unwrap().unwrap()).unwrap();
        let r = &v["toolResponse"]["functionResponses"][0];
        assert_eq!(r["id"], "a");
        assert_eq!(r["name"], "scroll_viewport");
        assert_eq!(r["response"]["result"], "done");
    }

    #[test]
    fn server_frames_become_ordered_events() {
        assert_eq!(parse_server_message(r#"{"setupComplete":{}}"#).unwrap(), vec![TransportEvent::Open]);

        let events = parse_server_message(
            r#"{"serverContent":{"interrupted":true,"modelTurn":{"parts":[
                {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAA="}},
                {"inlineData":{"mimeType":"image/png","data":"xx"}},
                {"text":"hi"}
            ]},"turnComplete":true}}"#,
        )
        .unwrap();
        assert_eq!(
            events,
            vec![
                TransportEvent::Interrupted,
                TransportEvent::Audio(InlineAudio {
                    mime_type: "audio/pcm;rate=24000".into(),
                    data: "AAA=".into()
                }),
                TransportEvent::Text("hi".into()),
                TransportEvent::TurnComplete,
            ]
        );
    }

    #[test]
    fn tool_call_batches() {
        let events = parse_server_message(
            r#"{"toolCall":{"functionCalls":[
                {"id":"a","name":"scroll_viewport","args":{"direction":"DOWN"}},
                {"id":"b","name":"get_system_state"}
            ]}}"#,
        )
        .unwrap();
        match &events[..] {
            [TransportEvent::ToolCalls(calls)] => {
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[0].args["direction"], "DOWN");
                assert_eq!(calls[1].args, Value::Null);
            }
            other => panic!("unexpected events: {:?}", other),
        }

        let events = parse_server_message(r#"{"toolCallCancellation":{"ids":["a"]}}"#).unwrap();
        assert_eq!(events, vec![TransportEvent::ToolCallCancellation(vec!["a".into()])]);
    }

    #[test]
    fn garbage_is_a_protocol_error() {
        assert!(matches!(parse_server_message("not json"), Err(SessionError::Protocol(_))));
        assert!(parse_server_message("{}").unwrap().is_empty());
    }
}
