//! The boundary to the UI collaborator (queue, gallery, dashboard).
//!
//! The session never touches UI state directly: it sends [`UiCommand`]s and
//! reads [`ContextSnapshot`]s through a [`CommandBridge`].

pub mod command;
pub mod snapshot;
pub mod udp;

use async_trait::async_trait;

pub use command::{
    ItemAction, OutputSettings, QueueAction, ScrollDirection, UiCommand, UiStateAction,
};
pub use snapshot::{ContextSnapshot, QueueItemSummary};
pub use udp::{GuiEvent, UdpCommandBridge};

use crate::protocol::VisualFrame;

#[async_trait]
pub trait CommandBridge: Send + Sync {
    /// Execute one command. `Ok` carries a confirmation for the model.
    async fn dispatch(&self, command: UiCommand) -> Result<String, String>;

    /// Current UI state.
    fn snapshot(&self) -> ContextSnapshot;

    /// Images the model may look at when it asks for visual context.
    fn visual_context(&self) -> Vec<VisualFrame>;
}
