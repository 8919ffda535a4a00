//! Real-time voice session core for the remaster studio.
//!
//! A [`session::LiveSession`] keeps one bidirectional stream open to the
//! remote model, streams the microphone up, plays the model's speech back
//! without gaps, and runs the model's tool calls against the UI through a
//! [`bridge::CommandBridge`].

pub mod audio;
pub mod bridge;
pub mod config;
pub mod error;
pub mod net_link;
pub mod protocol;
pub mod session;
pub mod tools;

pub use error::{Result, SessionError};
