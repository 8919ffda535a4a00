use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use super::args;
use super::registry::{ToolHandler, ToolOutcome};
use super::schema;
use crate::bridge::{CommandBridge, UiCommand};
use crate::protocol::VisualFrame;

pub const GET_SYSTEM_STATE: &str = "get_system_state";
pub const STOP_SPEAKING: &str = "stop_speaking";
pub const REQUEST_VISUAL_CONTEXT: &str = "request_visual_context";
pub const READ_DOCS_CONTENT: &str = "read_docs_content";

type Parser = fn(Value) -> Result<UiCommand, String>;

/// A tool that turns its arguments into one [`UiCommand`] and forwards it.
pub struct CommandTool {
    name: &'static str,
    description: &'static str,
    schema: Value,
    parse: Parser,
    bridge: Arc<dyn CommandBridge>,
}

impl CommandTool {
    pub fn new(
        name: &'static str,
        description: &'static str,
        schema: Value,
        parse: Parser,
        bridge: Arc<dyn CommandBridge>,
    ) -> Self {
        Self {
            name,
            description,
            schema,
            parse,
            bridge,
        }
    }
}

#[async_trait]
impl ToolHandler for CommandTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn input_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn call(&self, args: Value) -> Result<ToolOutcome, String> {
        let command = (self.parse)(args)?;
        let ack = self.bridge.dispatch(command).await?;
        Ok(ToolOutcome::Respond(json!({ "result": ack })))
    }
}

pub struct SystemStateTool {
    bridge: Arc<dyn CommandBridge>,
}

#[async_trait]
impl ToolHandler for SystemStateTool {
    fn name(&self) -> &str {
        GET_SYSTEM_STATE
    }

    fn description(&self) -> &str {
        "Read the current interface state: language, open dialogs, the pending prompt and the image queue."
    }

    fn input_schema(&self) -> Value {
        schema::empty()
    }

    async fn call(&self, _args: Value) -> Result<ToolOutcome, String> {
        Ok(ToolOutcome::Respond(self.bridge.snapshot().to_payload()))
    }
}

pub struct DocsTool {
    docs: Arc<str>,
}

#[async_trait]
impl ToolHandler for DocsTool {
    fn name(&self) -> &str {
        READ_DOCS_CONTENT
    }

    fn description(&self) -> &str {
        "Read the user guide before answering questions about how the application works."
    }

    fn input_schema(&self) -> Value {
        schema::empty()
    }

    async fn call(&self, _args: Value) -> Result<ToolOutcome, String> {
        Ok(ToolOutcome::Respond(json!({ "result": &*self.docs })))
    }
}

/// Playback is cut by the session before the batch reaches the registry;
/// this only produces the response.
pub struct StopSpeakingTool;

#[async_trait]
impl ToolHandler for StopSpeakingTool {
    fn name(&self) -> &str {
        STOP_SPEAKING
    }

    fn description(&self) -> &str {
        "Stop talking immediately when the user asks you to be quiet or interrupts."
    }

    fn input_schema(&self) -> Value {
        schema::empty()
    }

    async fn call(&self, _args: Value) -> Result<ToolOutcome, String> {
        Ok(ToolOutcome::Respond(json!({ "result": "Stopped speaking." })))
    }
}

/// Pushes the queued images to the model as realtime input frames.
pub struct VisualContextTool {
    bridge: Arc<dyn CommandBridge>,
    frames: mpsc::UnboundedSender<VisualFrame>,
}

#[async_trait]
impl ToolHandler for VisualContextTool {
    fn name(&self) -> &str {
        REQUEST_VISUAL_CONTEXT
    }

    fn description(&self) -> &str {
        "Look at the images currently in the queue. The images arrive as separate input after this call."
    }

    fn input_schema(&self) -> Value {
        schema::empty()
    }

    async fn call(&self, _args: Value) -> Result<ToolOutcome, String> {
        let frames = self.bridge.visual_context();
        if frames.is_empty() {
            // nothing will arrive on the side channel, so answer now
            return Ok(ToolOutcome::Respond(json!({ "result": "There are no images to show." })));
        }
        log::info!("Sending {} visual frame(s)", frames.len());
        for frame in frames {
            self.frames
                .send(frame)
                .map_err(|_| "session is closing".to_string())?;
        }
        Ok(ToolOutcome::Deferred)
    }
}

/// Every tool the model is offered.
pub fn standard_tools(
    bridge: Arc<dyn CommandBridge>,
    frames: mpsc::UnboundedSender<VisualFrame>,
    docs: Arc<str>,
) -> Vec<Box<dyn ToolHandler>> {
    let settings = schema::output_settings();
    let with_settings = |extra: &[(&'static str, Value)]| {
        let mut props = settings.clone();
        props.extend(extra.iter().cloned());
        schema::object(&props, &[])
    };
    let index = || schema::string("1-based position of the item in the queue");

    let command = |name: &'static str,
                   description: &'static str,
                   params: Value,
                   parse: Parser|
     -> Box<dyn ToolHandler> {
        Box::new(CommandTool::new(name, description, params, parse, bridge.clone()))
    };

    vec![
        Box::new(SystemStateTool { bridge: bridge.clone() }) as Box<dyn ToolHandler>,
        command(
            "scroll_viewport",
            "Scroll the main view.",
            schema::object(
                &[("direction", schema::string_enum("Where to scroll", &["UP", "DOWN", "TOP", "BOTTOM"]))],
                &["direction"],
            ),
            args::scroll_viewport,
        ),
        command(
            "update_dashboard",
            "Change output settings for one queued item, or for the dashboard defaults when no targetIndex is given.",
            with_settings(&[("targetIndex", index())]),
            args::update_dashboard,
        ),
        command(
            "update_native_input",
            "Fill in the text-to-image generator without starting it.",
            with_settings(&[]),
            args::update_native_input,
        ),
        command(
            "trigger_native_generation",
            "Start text-to-image generation, optionally with new settings.",
            with_settings(&[]),
            args::trigger_native_generation,
        ),
        command(
            "perform_item_action",
            "Act on one queued image.",
            schema::object(
                &[
                    (
                        "action",
                        schema::string_enum(
                            "What to do with the item",
                            &["REMOVE", "EDIT", "DOWNLOAD", "REMASTER", "CREATE_VARIANTS", "SHARE"],
                        ),
                    ),
                    ("targetIndex", index()),
                ],
                &["action", "targetIndex"],
            ),
            args::perform_item_action,
        ),
        command(
            "apply_settings_globally",
            "Copy the dashboard settings to every queued item.",
            schema::empty(),
            args::apply_settings_globally,
        ),
        command(
            "start_processing_queue",
            "Start remastering every pending item in the queue.",
            schema::empty(),
            args::start_processing_queue,
        ),
        command(
            "analyze_images",
            "Ask the application to analyze the queued images and suggest prompts.",
            schema::empty(),
            args::analyze_images,
        ),
        Box::new(VisualContextTool { bridge: bridge.clone(), frames }) as Box<dyn ToolHandler>,
        command(
            "manage_ui_state",
            "Open or close dialogs, change the interface language or toggle the theme.",
            schema::object(
                &[
                    (
                        "action",
                        schema::string_enum(
                            "UI action",
                            &[
                                "OPEN_SETTINGS",
                                "CLOSE_SETTINGS",
                                "OPEN_HELP",
                                "CLOSE_HELP",
                                "OPEN_HISTORY",
                                "CLOSE_HISTORY",
                                "OPEN_GALLERY",
                                "CLOSE_GALLERY",
                                "OPEN_NATIVE_GENERATION",
                                "CLOSE_NATIVE_GENERATION",
                                "OPEN_COMPOSITE",
                                "CLOSE_COMPOSITE",
                                "CLOSE_ALL_MODALS",
                                "CHANGE_LANG",
                                "TOGGLE_THEME",
                            ],
                        ),
                    ),
                    ("value", schema::string("Language code for CHANGE_LANG")),
                ],
                &["action"],
            ),
            args::manage_ui_state,
        ),
        command(
            "manage_queue_actions",
            "Clear the queue or download every finished image as a zip.",
            schema::object(
                &[("action", schema::string_enum("Queue action", &["CLEAR_ALL", "DOWNLOAD_ZIP"]))],
                &["action"],
            ),
            args::manage_queue_actions,
        ),
        Box::new(DocsTool { docs }) as Box<dyn ToolHandler>,
        Box::new(StopSpeakingTool) as Box<dyn ToolHandler>,
        command(
            "set_composite_config",
            "Configure the composite view that combines several images.",
            schema::object(
                &[
                    ("prompt", schema::string("Prompt for the composite")),
                    ("layout", schema::string("Layout name such as grid or collage")),
                    ("aspectRatio", schema::string("Aspect ratio of the composite")),
                    ("resolution", schema::string("Output resolution of the composite")),
                ],
                &[],
            ),
            args::set_composite_config,
        ),
    ]
}
