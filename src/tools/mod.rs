//! tools - The functions the remote model may call, and their dispatch

pub mod args;
pub mod handlers;
pub mod registry;
pub mod schema;

use std::sync::Arc;

use tokio::sync::mpsc;

pub use handlers::{GET_SYSTEM_STATE, READ_DOCS_CONTENT, REQUEST_VISUAL_CONTEXT, STOP_SPEAKING};
pub use registry::{ToolHandler, ToolOutcome, ToolRegistry};

use crate::bridge::CommandBridge;
use crate::protocol::VisualFrame;

impl ToolRegistry {
    /// The full tool set, wired to `bridge`. Images requested by the model are
    /// pushed to `frames` instead of being returned.
    pub fn standard(
        bridge: Arc<dyn CommandBridge>,
        frames: mpsc::UnboundedSender<VisualFrame>,
        docs: Arc<str>,
    ) -> Self {
        let mut registry = Self::new();
        for tool in handlers::standard_tools(bridge, frames, docs) {
            registry.register(tool);
        }
        registry
    }
}
