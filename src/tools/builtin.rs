//! The built-in session tools: desktop context switching and, in the
//! extended mode, file-edit requests.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::host::{HostBridge, LogEntry};

use super::{SessionTool, ToolSpec};

pub const SWITCH_CONTEXT_TOOL: &str = "switchContext";
pub const EDIT_FILE_TOOL: &str = "edit_file";

/// Switches the active desktop window to a named application.
///
/// Holds the application snapshot taken at connect time; matching is
/// case-insensitive substring so spoken names like "spotify" or "the
/// terminal" resolve. An unmatched name is a successful call with a
/// not-found result, not an error.
pub struct SwitchContextTool {
    apps: Vec<crate::host::AppContext>,
    host: Arc<dyn HostBridge>,
}

impl SwitchContextTool {
    pub fn new(apps: Vec<crate::host::AppContext>, host: Arc<dyn HostBridge>) -> Self {
        Self { apps, host }
    }
}

#[async_trait]
impl SessionTool for SwitchContextTool {
    fn name(&self) -> &str {
        SWITCH_CONTEXT_TOOL
    }

    fn declaration(&self) -> ToolSpec {
        let names: Vec<&str> = self.apps.iter().map(|a| a.name.as_str()).collect();
        ToolSpec {
            name: SWITCH_CONTEXT_TOOL.to_string(),
            description: format!(
                "Switches the user's active application window. Available apps: {}",
                names.join(", "),
            ),
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "appName": {
                        "type": "STRING",
                        "description": "The name of the application to switch to.",
                    },
                },
                "required": ["appName"],
            }),
        }
    }

    async fn call(&self, args: Value) -> Result<Value, String> {
        let query = args
            .get("appName")
            .and_then(Value::as_str)
            .ok_or("missing required argument: appName")?;

        self.host
            .on_log(LogEntry::remote(format!("Switching to {}", query)));

        let needle = query.to_lowercase();
        match self
            .apps
            .iter()
            .find(|a| a.name.to_lowercase().contains(&needle))
        {
            Some(app) => {
                self.host
                    .switch_context(&app.id)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(json!({ "result": format!("Switched to {}", app.name) }))
            }
            None => Ok(json!({ "result": format!("Could not find app named {}", query) })),
        }
    }
}

/// A fully-specified edit request produced by the remote session.
#[derive(Debug, Clone)]
pub struct EditRequest {
    /// Absolute path of the file to modify
    pub path: String,
    /// Single first-person sentence describing the change
    pub instruction: String,
    /// The code snippet to merge, with unchanged regions elided
    pub edit: String,
}

/// Receives validated edit requests for downstream application. The tool
/// acknowledges a request as received either way; applying it is the
/// sink's concern.
pub trait EditSink: Send + Sync {
    fn submit(&self, request: EditRequest);
}

/// Accepts spoken file-edit requests. Only registered when the extended
/// mode was active at connect time.
pub struct EditFileTool {
    host: Arc<dyn HostBridge>,
    sink: Option<Arc<dyn EditSink>>,
}

impl EditFileTool {
    pub fn new(host: Arc<dyn HostBridge>, sink: Option<Arc<dyn EditSink>>) -> Self {
        Self { host, sink }
    }
}

#[async_trait]
impl SessionTool for EditFileTool {
    fn name(&self) -> &str {
        EDIT_FILE_TOOL
    }

    fn declaration(&self) -> ToolSpec {
        ToolSpec {
            name: EDIT_FILE_TOOL.to_string(),
            description: "Edits a code file on the user's machine. Provide the file path, a \
                          single first-person sentence describing the change, and the edit \
                          snippet with unchanged code elided."
                .to_string(),
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "path": {
                        "type": "STRING",
                        "description": "Absolute path of the file to edit.",
                    },
                    "instruction": {
                        "type": "STRING",
                        "description": "One first-person sentence describing the edit.",
                    },
                    "edit": {
                        "type": "STRING",
                        "description": "The new code, eliding unchanged regions.",
                    },
                },
                "required": ["path", "instruction", "edit"],
            }),
        }
    }

    async fn call(&self, args: Value) -> Result<Value, String> {
        let field = |key: &str| -> Result<String, String> {
            args.get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or(format!("missing required argument: {}", key))
        };
        let request = EditRequest {
            path: field("path")?,
            instruction: field("instruction")?,
            edit: field("edit")?,
        };

        self.host.on_log(LogEntry::remote(format!(
            "Edit requested for {}: {}",
            request.path, request.instruction,
        )));
        log::info!("Edit request: {} ({})", request.path, request.instruction);

        if let Some(sink) = &self.sink {
            sink.submit(request);
        }
        Ok(json!({ "result": "Edit request received." }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::host::AppContext;
    use crate::session::SessionState;
    use crate::tools::ToolRegistry;

    struct RecordingHost {
        switched: Mutex<Vec<String>>,
        fail_switch: bool,
    }

    impl RecordingHost {
        fn new() -> Self {
            Self {
                switched: Mutex::new(Vec::new()),
                fail_switch: false,
            }
        }
    }

    #[async_trait]
    impl HostBridge for RecordingHost {
        fn on_status(&self, _status: SessionState) {}
        fn on_log(&self, _entry: LogEntry) {}
        async fn switch_context(&self, app_id: &str) -> anyhow::Result<()> {
            if self.fail_switch {
                anyhow::bail!("window manager unavailable");
            }
            self.switched.lock().unwrap().push(app_id.to_string());
            Ok(())
        }
    }

    fn app(id: &str, name: &str) -> AppContext {
        AppContext {
            id: id.to_string(),
            name: name.to_string(),
            process_name: name.to_lowercase(),
            category: "test".to_string(),
            shortcut: String::new(),
        }
    }

    #[test]
    fn edit_mode_adds_exactly_one_tool() {
        let host = Arc::new(RecordingHost::new());
        let apps = [app("term", "Terminal")];

        let plain = ToolRegistry::for_session(&apps, false, host.clone(), None);
        let extended = ToolRegistry::for_session(&apps, true, host, None);

        assert_eq!(plain.declarations().len(), 1);
        assert_eq!(extended.declarations().len(), 2);
        assert!(plain.get(EDIT_FILE_TOOL).is_none());
        assert!(extended.get(EDIT_FILE_TOOL).is_some());
    }

    #[test]
    fn switch_declaration_enumerates_app_names() {
        let host = Arc::new(RecordingHost::new());
        let tool = SwitchContextTool::new(vec![app("term", "Terminal"), app("ff", "Firefox")], host);
        let decl = tool.declaration();
        assert_eq!(decl.name, SWITCH_CONTEXT_TOOL);
        assert!(decl.description.contains("Terminal"));
        assert!(decl.description.contains("Firefox"));
        assert_eq!(decl.parameters["required"][0], "appName");
    }

    #[tokio::test]
    async fn switch_matches_case_insensitively() {
        let host = Arc::new(RecordingHost::new());
        let tool = SwitchContextTool::new(vec![app("code", "VS Code")], host.clone());

        let out = tool.call(json!({"appName": "vs code"})).await.unwrap();
        assert_eq!(out["result"], "Switched to VS Code");
        assert_eq!(host.switched.lock().unwrap().as_slice(), ["code"]);
    }

    #[tokio::test]
    async fn unmatched_app_is_a_not_found_result() {
        let host = Arc::new(RecordingHost::new());
        let tool = SwitchContextTool::new(vec![app("term", "Terminal")], host.clone());

        let out = tool.call(json!({"appName": "Blender"})).await.unwrap();
        assert_eq!(out["result"], "Could not find app named Blender");
        assert!(host.switched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn host_failure_becomes_a_tool_error() {
        let mut host = RecordingHost::new();
        host.fail_switch = true;
        let tool = SwitchContextTool::new(vec![app("term", "Terminal")], Arc::new(host));

        let err = tool.call(json!({"appName": "Terminal"})).await.unwrap_err();
        assert!(err.contains("window manager unavailable"));
    }

    #[tokio::test]
    async fn edit_tool_validates_and_forwards_to_the_sink() {
        struct Capture(Mutex<Vec<EditRequest>>);
        impl EditSink for Capture {
            fn submit(&self, request: EditRequest) {
                self.0.lock().unwrap().push(request);
            }
        }

        let sink = Arc::new(Capture(Mutex::new(Vec::new())));
        let tool = EditFileTool::new(Arc::new(RecordingHost::new()), Some(sink.clone()));

        let err = tool
            .call(json!({"path": "/tmp/main.rs", "instruction": "I add a log line"}))
            .await
            .unwrap_err();
        assert!(err.contains("edit"));
        assert!(sink.0.lock().unwrap().is_empty());

        let out = tool
            .call(json!({
                "path": "/tmp/main.rs",
                "instruction": "I add a log line",
                "edit": "log::info!(\"hi\");",
            }))
            .await
            .unwrap();
        assert_eq!(out["result"], "Edit request received.");
        let captured = sink.0.lock().unwrap();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].path, "/tmp/main.rs");
    }
}
