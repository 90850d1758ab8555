mod audio;
mod config;
mod error;
mod host;
mod session;
mod tools;

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio::process::Command;
use tokio::signal;
use tokio::sync::mpsc;

use audio::AlsaAdapter;
use config::Config;
use host::{AppContext, HostBridge, HostCommand, LogEntry};
use session::{SessionManager, SessionOptions, SessionState, WsConnector};

/// Host integration for a plain Linux desktop: status and logs go to the
/// process log, context switches shell out to the configured focus command
/// (wmctrl by default).
struct DesktopHost {
    focus_command: &'static str,
    apps: Vec<AppContext>,
}

/// Split the configured focus command and append the target window class.
/// Windows are matched by the application's process name, not its display
/// name (wmctrl -x matches WM_CLASS).
fn focus_invocation(focus_command: &str, app: &AppContext) -> Option<(String, Vec<String>)> {
    let mut parts = focus_command.split_whitespace();
    let program = parts.next()?.to_string();
    let mut args: Vec<String> = parts.map(str::to_string).collect();
    args.push(app.process_name.clone());
    Some((program, args))
}

#[async_trait]
impl HostBridge for DesktopHost {
    fn on_status(&self, status: SessionState) {
        log::info!("Session status: {}", status);
    }

    fn on_log(&self, entry: LogEntry) {
        log::info!("[{}] {}", entry.source, entry.message);
    }

    async fn switch_context(&self, app_id: &str) -> anyhow::Result<()> {
        let app = self
            .apps
            .iter()
            .find(|a| a.id == app_id)
            .with_context(|| format!("unknown app id: {}", app_id))?;

        let (program, args) =
            focus_invocation(self.focus_command, app).context("focus command is empty")?;
        log::info!("Focusing {} ({})", app.name, app.process_name);

        let status = Command::new(&program)
            .args(&args)
            .status()
            .await
            .with_context(|| format!("failed to run {}", program))?;
        anyhow::ensure!(status.success(), "focus command exited with {}", status);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = Config::new().map_err(anyhow::Error::msg)?;
    let apps: Vec<AppContext> =
        serde_json::from_str(env!("APPS_JSON")).context("invalid app list in config.toml")?;
    log::info!(
        "Starting with model {} and {} controllable apps",
        config.model,
        apps.len(),
    );

    let host: Arc<dyn HostBridge> = Arc::new(DesktopHost {
        focus_command: config.focus_command,
        apps: apps.clone(),
    });

    let (cmd_tx, cmd_rx) = mpsc::channel::<HostCommand>(16);
    let (playback_tx, playback_rx) = mpsc::unbounded_channel();

    let manager = SessionManager::new(
        SessionOptions {
            model: config.model.to_string(),
            voice: config.voice.to_string(),
            playback_sample_rate: config.playback_sample_rate,
            apps,
            edit_mode: config.edit_mode,
        },
        host,
        Box::new(WsConnector::new(
            config.api_host,
            &config.api_key,
            config.capture_sample_rate,
        )),
        Box::new(AlsaAdapter::new(&config, playback_tx)),
        None,
        cmd_rx,
        playback_rx,
    );
    let manager_task = tokio::spawn(manager.run());

    cmd_tx.send(HostCommand::Activate(true)).await?;
    log::info!("Voice session active, Ctrl+C to exit");

    signal::ctrl_c().await?;
    log::info!("Received Ctrl+C, shutting down...");
    cmd_tx.send(HostCommand::Activate(false)).await?;
    drop(cmd_tx);
    let _ = manager_task.await;
    Ok(())
}
