//! Contract between the session core and the owning host integration.
//!
//! The host supplies the controllable application list, toggles the session
//! on and off, and receives status changes and log entries. The core never
//! persists or mutates the application list; it only holds a read-only
//! snapshot taken at connect time.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::SessionState;

/// One controllable application, as configured by the host.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppContext {
    pub id: String,
    pub name: String,
    pub process_name: String,
    pub category: String,
    pub shortcut: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    User,
    Remote,
    System,
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogSource::User => write!(f, "user"),
            LogSource::Remote => write!(f, "remote"),
            LogSource::System => write!(f, "system"),
        }
    }
}

/// Append-only log record pushed to the host. Retention is the host's problem.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub id: String,
    pub timestamp_ms: u64,
    pub source: LogSource,
    pub message: String,
}

impl LogEntry {
    pub fn new(source: LogSource, message: impl Into<String>) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp_ms,
            source,
            message: message.into(),
        }
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self::new(LogSource::System, message)
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::new(LogSource::Remote, message)
    }
}

/// Commands the host sends into the session manager.
#[derive(Debug)]
pub enum HostCommand {
    /// Toggle the session. `true` connects (no-op unless disconnected),
    /// `false` tears the connection down.
    Activate(bool),
    /// Toggle the code-editing tool. Takes effect at the next connect;
    /// an open connection keeps the declarations it was configured with.
    SetEditMode(bool),
    /// Replace the application list used by future connects.
    SetApps(Vec<AppContext>),
}

/// Outbound callbacks into the host integration.
#[async_trait]
pub trait HostBridge: Send + Sync {
    fn on_status(&self, status: SessionState);

    fn on_log(&self, entry: LogEntry);

    /// Execute a context switch to the application with the given id.
    /// Errors are reported back to the remote session as a failed tool call.
    async fn switch_context(&self, app_id: &str) -> anyhow::Result<()>;
}
