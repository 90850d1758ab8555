//! Websocket transport for the realtime session.
//!
//! One task owns the socket: it ships the setup frame, then drives a select
//! loop over inbound frames and outbound commands. The session manager never
//! touches the socket; it holds a `SessionLink` handle backed by a command
//! channel and consumes `LinkEvent`s from the paired receiver.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

use super::protocol::{
    FunctionResponse, RealtimeInputMessage, ServerMessage, SetupMessage, ToolResponseMessage,
    ToolResponsePayload,
};
use crate::audio::{AudioChunk, codec};
use crate::error::{Error, Result};

/// Inbound transport events, in arrival order.
#[derive(Debug)]
pub enum LinkEvent {
    /// The remote side acknowledged the setup; the session is usable.
    Open,
    Message(ServerMessage),
    /// Clean close initiated by either side.
    Closed,
    Failed(String),
}

#[derive(Debug)]
enum LinkCommand {
    Audio(AudioChunk),
    ToolResponse(Vec<FunctionResponse>),
    Close,
}

/// An open session transport. Cheap to clone the handle side; dropping every
/// handle shuts the socket task down.
#[async_trait]
pub trait SessionLink: Send + Sync {
    /// Forward one encoded capture chunk. Latency-bounded: when the outbound
    /// queue is full the chunk is dropped, never delayed.
    fn send_audio(&self, chunk: AudioChunk);

    /// Deliver a batch of tool responses. Unlike audio these must not be
    /// dropped, so this waits for queue space.
    async fn send_tool_response(&self, responses: Vec<FunctionResponse>) -> Result<()>;

    /// Close the transport. Idempotent.
    async fn close(&self);
}

/// Opens a transport configured by a setup message.
#[async_trait]
pub trait LinkConnector: Send + Sync {
    async fn connect(
        &self,
        setup: SetupMessage,
    ) -> Result<(Box<dyn SessionLink>, mpsc::Receiver<LinkEvent>)>;
}

/// The production connector: a `BidiGenerateContent` websocket endpoint.
pub struct WsConnector {
    endpoint: String,
    capture_sample_rate: u32,
}

impl WsConnector {
    pub fn new(api_host: &str, api_key: &str, capture_sample_rate: u32) -> Self {
        let endpoint = format!(
            "{}/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent?key={}",
            api_host, api_key,
        );
        Self {
            endpoint,
            capture_sample_rate,
        }
    }
}

#[async_trait]
impl LinkConnector for WsConnector {
    async fn connect(
        &self,
        setup: SetupMessage,
    ) -> Result<(Box<dyn SessionLink>, mpsc::Receiver<LinkEvent>)> {
        log::info!("Connecting realtime session...");
        let (ws_stream, _) = connect_async(&self.endpoint)
            .await
            .map_err(|e| Error::HandleOpen(e.to_string()))?;

        let (mut write, read) = ws_stream.split();

        let setup_json =
            serde_json::to_string(&setup).map_err(|e| Error::HandleOpen(e.to_string()))?;
        write
            .send(Message::Text(setup_json.into()))
            .await
            .map_err(|e| Error::HandleOpen(e.to_string()))?;

        let (event_tx, event_rx) = mpsc::channel::<LinkEvent>(64);
        let (cmd_tx, cmd_rx) = mpsc::channel::<LinkCommand>(32);

        let sample_rate = self.capture_sample_rate;
        tokio::spawn(async move {
            socket_loop(write, read, cmd_rx, event_tx, sample_rate).await;
        });

        Ok((Box::new(WsLink { cmd_tx }), event_rx))
    }
}

struct WsLink {
    cmd_tx: mpsc::Sender<LinkCommand>,
}

#[async_trait]
impl SessionLink for WsLink {
    fn send_audio(&self, chunk: AudioChunk) {
        // try_send keeps capture latency bounded when the socket stalls
        if let Err(mpsc::error::TrySendError::Full(_)) =
            self.cmd_tx.try_send(LinkCommand::Audio(chunk))
        {
            log::debug!("Outbound queue full, capture chunk dropped");
        }
    }

    async fn send_tool_response(&self, responses: Vec<FunctionResponse>) -> Result<()> {
        self.cmd_tx
            .send(LinkCommand::ToolResponse(responses))
            .await
            .map_err(|_| Error::Transport("session task gone".into()))
    }

    async fn close(&self) {
        let _ = self.cmd_tx.send(LinkCommand::Close).await;
    }
}

type WsWrite = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;
type WsRead = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

async fn socket_loop(
    mut write: WsWrite,
    mut read: WsRead,
    mut cmd_rx: mpsc::Receiver<LinkCommand>,
    event_tx: mpsc::Sender<LinkEvent>,
    sample_rate: u32,
) {
    loop {
        tokio::select! {
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if !dispatch_frame(text.as_bytes(), &event_tx).await {
                            return;
                        }
                    }
                    // The endpoint delivers JSON in binary frames as well
                    Some(Ok(Message::Binary(data))) => {
                        if !dispatch_frame(&data, &event_tx).await {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        log::info!("Server closed session: {:?}", frame);
                        let _ = event_tx.send(LinkEvent::Closed).await;
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let _ = event_tx.send(LinkEvent::Failed(e.to_string())).await;
                        return;
                    }
                    None => {
                        let _ = event_tx.send(LinkEvent::Closed).await;
                        return;
                    }
                }
            }
            cmd = cmd_rx.recv() => {
                let sent = match cmd {
                    Some(LinkCommand::Audio(chunk)) => {
                        let msg =
                            RealtimeInputMessage::pcm_chunk(codec::encode_base64(&chunk), sample_rate);
                        send_json(&mut write, &msg).await
                    }
                    Some(LinkCommand::ToolResponse(responses)) => {
                        let msg = ToolResponseMessage {
                            tool_response: ToolResponsePayload {
                                function_responses: responses,
                            },
                        };
                        send_json(&mut write, &msg).await
                    }
                    Some(LinkCommand::Close) | None => {
                        let _ = write.send(Message::Close(None)).await;
                        let _ = event_tx.send(LinkEvent::Closed).await;
                        return;
                    }
                };
                if let Err(e) = sent {
                    let _ = event_tx.send(LinkEvent::Failed(e.to_string())).await;
                    return;
                }
            }
        }
    }
}

/// Parse and forward one inbound frame. Returns `false` once the event side
/// is gone and the loop should exit.
async fn dispatch_frame(raw: &[u8], event_tx: &mpsc::Sender<LinkEvent>) -> bool {
    let message: ServerMessage = match serde_json::from_slice(raw) {
        Ok(m) => m,
        Err(e) => {
            log::warn!("Unparseable session frame dropped: {}", e);
            return true;
        }
    };

    let event = if message.setup_complete.is_some() {
        log::info!("Session setup complete");
        LinkEvent::Open
    } else {
        LinkEvent::Message(message)
    };
    event_tx.send(event).await.is_ok()
}

async fn send_json<T: serde::Serialize>(write: &mut WsWrite, msg: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string(msg)?;
    write.send(Message::Text(json.into())).await?;
    Ok(())
}
