//! WebSocket client for the live speech endpoint
//!
//! The socket is split into a writer task fed by a bounded queue and a
//! reader task that parses server frames into [`TransportEvent`]s. JSON may
//! arrive in Binary frames as well as Text frames.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::protocol::{
    build_audio_message, build_audio_stream_end_message, build_setup_message,
    build_tool_response, parse_server_message, pcm_mime,
};
use super::{Connector, Transport, TransportEvent, TransportListener};
use crate::config::{Config, LiveConfig};
use crate::voice::FrameSink;
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound frames buffered between capture and the socket
const OUTBOUND_QUEUE: usize = 256;

/// How long close waits for the writer to flush
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug)]
enum Outbound {
    Audio(String),
    ToolResponse { id: String, name: String },
    Close,
}

/// Opens live sessions against the configured endpoint
#[derive(Debug, Clone)]
pub struct LiveConnector {
    live: LiveConfig,
    api_key: Option<String>,
    input_rate: u32,
}

impl LiveConnector {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            live: config.live.clone(),
            api_key: config.api_key.clone(),
            input_rate: config.capture.sample_rate,
        }
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| Error::Config("GEMINI_API_KEY is not set".to_string()))
    }
}

#[async_trait(?Send)]
impl Connector for LiveConnector {
    fn ensure_ready(&self) -> Result<()> {
        self.api_key().map(|_| ())
    }

    async fn connect(&self, listener: Arc<dyn TransportListener>) -> Result<Box<dyn Transport>> {
        let url = format!("{}?key={}", self.live.url, self.api_key()?);

        tracing::info!(
            model = %self.live.model,
            voice = %self.live.voice,
            "connecting to live endpoint"
        );

        let (mut ws, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;

        let setup = serde_json::to_string(&build_setup_message(&self.live))?;
        tracing::debug!(bytes = setup.len(), "sending setup");
        ws.send(WsMessage::Text(setup.into())).await?;

        let (sink, stream) = ws.split();
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);

        let writer = tokio::spawn(outbound_loop(rx, sink, pcm_mime(self.input_rate)));
        let reader = tokio::spawn(inbound_loop(stream, listener));

        Ok(Box::new(LiveTransport {
            tx,
            writer: Some(writer),
            reader: Some(reader),
        }))
    }
}

/// An open live session
pub struct LiveTransport {
    tx: mpsc::Sender<Outbound>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

struct QueueSink {
    tx: mpsc::Sender<Outbound>,
}

impl FrameSink for QueueSink {
    fn send_frame(&self, payload: String) {
        match self.tx.try_send(Outbound::Audio(payload)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::trace!("outbound queue full, frame dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::trace!("transport closed, frame dropped");
            }
        }
    }
}

#[async_trait(?Send)]
impl Transport for LiveTransport {
    fn frame_sink(&self) -> Arc<dyn FrameSink> {
        Arc::new(QueueSink {
            tx: self.tx.clone(),
        })
    }

    async fn send_tool_response(&self, id: &str, name: &str) -> Result<()> {
        let msg = Outbound::ToolResponse {
            id: id.to_string(),
            name: name.to_string(),
        };
        self.tx.try_send(msg).map_err(|e| {
            tracing::warn!(id = %id, name = %name, "tool response dropped");
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    Error::Transport("outbound queue full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    Error::Transport("transport closed".to_string())
                }
            }
        })
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        match self.tx.try_send(Outbound::Close) {
            // Writer already gone if the socket failed
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                writer.abort();
                return Err(Error::Transport(
                    "outbound queue stalled, connection dropped".to_string(),
                ));
            }
        }

        match tokio::time::timeout(CLOSE_TIMEOUT, &mut writer).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::Transport(format!("writer task failed: {e}"))),
            Err(_) => {
                writer.abort();
                Err(Error::Transport("timed out closing connection".to_string()))
            }
        }
    }
}

impl Drop for LiveTransport {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

async fn send_json(sink: &mut SplitSink<WsStream, WsMessage>, value: String) -> bool {
    sink.send(WsMessage::Text(value.into())).await.is_ok()
}

async fn outbound_loop(
    mut rx: mpsc::Receiver<Outbound>,
    mut sink: SplitSink<WsStream, WsMessage>,
    mime_type: String,
) {
    let mut frames: u64 = 0;

    while let Some(msg) = rx.recv().await {
        let json = match msg {
            Outbound::Audio(payload) => {
                frames += 1;
                if frames == 1 || frames.is_multiple_of(500) {
                    tracing::debug!(frames, "streaming audio");
                }
                serde_json::to_string(&build_audio_message(payload, &mime_type))
            }
            Outbound::ToolResponse { id, name } => {
                tracing::debug!(id = %id, name = %name, "sending tool response");
                serde_json::to_string(&build_tool_response(&id, &name))
            }
            Outbound::Close => {
                if let Ok(end) = serde_json::to_string(&build_audio_stream_end_message()) {
                    let _ = send_json(&mut sink, end).await;
                }
                if let Err(e) = sink.close().await {
                    tracing::debug!(error = %e, "websocket close");
                }
                tracing::debug!(frames, "outbound loop closed");
                return;
            }
        };

        match json {
            Ok(json) => {
                if !send_json(&mut sink, json).await {
                    tracing::warn!("websocket send failed, closing outbound loop");
                    return;
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to serialize outbound message"),
        }
    }
}

async fn inbound_loop(mut stream: SplitStream<WsStream>, listener: Arc<dyn TransportListener>) {
    while let Some(msg) = stream.next().await {
        let text = match msg {
            Ok(WsMessage::Text(text)) => text.as_str().to_string(),
            Ok(WsMessage::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => text.to_string(),
                Err(_) => {
                    tracing::trace!(bytes = data.len(), "non-utf8 binary frame ignored");
                    continue;
                }
            },
            Ok(WsMessage::Close(frame)) => {
                let reason = frame
                    .map(|f| f.reason.as_str().to_string())
                    .filter(|r| !r.is_empty());
                tracing::info!(reason = ?reason, "server closed connection");
                listener.on_event(TransportEvent::Closed(reason));
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                listener.on_event(TransportEvent::Error(e.to_string()));
                return;
            }
        };

        match parse_server_message(&text) {
            Ok(events) => {
                for event in events {
                    listener.on_event(event);
                }
            }
            Err(e) => tracing::warn!(error = %e, "unparseable server frame"),
        }
    }

    listener.on_event(TransportEvent::Closed(None));
}
