use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde_json::{Value, json};

use crate::protocol::{ToolCall, ToolResponse};

/// What a handler produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    /// Send this payload back as the call's response.
    Respond(Value),
    /// The answer travels another way; no response is sent for this call.
    Deferred,
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> Value;
    async fn call(&self, args: Value) -> Result<ToolOutcome, String>;
}

/// Static table of tools the model may call.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn ToolHandler>>,
    // registration order, so declarations are stable across runs
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own name, replacing any earlier one.
    pub fn register(&mut self, tool: Box<dyn ToolHandler>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Function declarations for the setup message.
    pub fn declarations(&self) -> Vec<Value> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| {
                let schema = t.input_schema();
                let mut decl = json!({
                    "name": t.name(),
                    "description": t.description(),
                });
                if !schema.is_null() {
                    decl["parameters"] = schema;
                }
                decl
            })
            .collect()
    }

    /// Run one call. `None` means the handler deferred its answer.
    pub async fn call_one(&self, call: &ToolCall) -> Option<ToolResponse> {
        let Some(tool) = self.tools.get(&call.name) else {
            log::warn!("Unknown tool requested: {} (id={})", call.name, call.id);
            return Some(ToolResponse::ok(call, "ok"));
        };

        log::info!("Tool call: {} id={} args={}", call.name, call.id, call.args);
        let result = AssertUnwindSafe(tool.call(call.args.clone()))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(ToolOutcome::Respond(payload))) => {
                Some(ToolResponse::new(&call.id, &call.name, payload))
            }
            Ok(Ok(ToolOutcome::Deferred)) => None,
            Ok(Err(e)) => {
                log::warn!("Tool {} failed: {}", call.name, e);
                Some(ToolResponse::error(call, e))
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                log::error!("Tool {} panicked: {}", call.name, msg);
                Some(ToolResponse::error(call, format!("tool panicked: {}", msg)))
            }
        }
    }

    /// Run a batch in order. Every call gets exactly one response unless its
    /// handler deferred.
    pub async fn dispatch(&self, batch: &[ToolCall]) -> Vec<ToolResponse> {
        let mut responses = Vec::with_capacity(batch.len());
        for call in batch {
            if let Some(resp) = self.call_one(call).await {
                responses.push(resp);
            }
        }
        responses
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
