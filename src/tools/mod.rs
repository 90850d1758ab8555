//! Callable tools offered to the remote session.
//!
//! The remote side invokes these by name over the tool-call protocol; every
//! dispatched request gets exactly one response, whatever the outcome. The
//! registry is rebuilt from the live application list on every connect and
//! never cached across a change, because the remote session is configured
//! with the declarations exactly once at connect time.

pub mod builtin;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::host::{AppContext, HostBridge};

pub use builtin::{EditRequest, EditSink};

/// Wire schema for one callable tool (a function declaration).
#[derive(Serialize, Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// OBJECT-typed parameter schema
    pub parameters: Value,
}

#[async_trait]
pub trait SessionTool: Send + Sync {
    fn name(&self) -> &str;

    fn declaration(&self) -> ToolSpec;

    /// Execute the tool. Errors are caught by the dispatcher and reported
    /// back in the response payload instead of propagating.
    async fn call(&self, args: Value) -> Result<Value, String>;
}

/// The per-connection tool set, in declaration order.
pub struct ToolRegistry {
    tools: Vec<Box<dyn SessionTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn register(&mut self, tool: Box<dyn SessionTool>) {
        log::info!("Registered session tool: {}", tool.name());
        self.tools.push(tool);
    }

    /// Build the tool set for one connection: context switching over the
    /// given application snapshot, plus the file-edit tool when the extended
    /// mode is active.
    pub fn for_session(
        apps: &[AppContext],
        edit_mode: bool,
        host: Arc<dyn HostBridge>,
        edit_sink: Option<Arc<dyn EditSink>>,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(builtin::SwitchContextTool::new(
            apps.to_vec(),
            host.clone(),
        )));
        if edit_mode {
            registry.register(Box::new(builtin::EditFileTool::new(host, edit_sink)));
        }
        registry
    }

    /// The declaration list sent in the connection setup.
    pub fn declarations(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.declaration()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&dyn SessionTool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }
}
