//! Session transport to the remote live speech service
//!
//! A [`Connector`] opens one duplex [`Transport`] per session. Inbound
//! traffic is reported as [`TransportEvent`]s to a [`TransportListener`];
//! outbound audio flows through the transport's [`FrameSink`].

mod live;
pub mod protocol;

use std::sync::Arc;

use async_trait::async_trait;

pub use live::{LiveConnector, LiveTransport};

use crate::Result;
use crate::voice::FrameSink;

/// Something the remote side did
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Setup acknowledged; audio may flow
    Opened,
    /// Remote asked the client to run a tool
    ToolCall {
        id: String,
        name: String,
        args: serde_json::Value,
    },
    /// Fragment of the user's speech transcript
    InputTranscript(String),
    /// Fragment of the remote's speech transcript
    OutputTranscript(String),
    /// Base64 PCM audio for the current turn
    Audio(String),
    /// Remote finished its turn
    TurnComplete,
    /// User barged in over the remote's speech
    Interrupted,
    /// Remote or connection failure
    Error(String),
    /// Connection closed, with the close reason if one was given
    Closed(Option<String>),
}

/// Receives transport events, possibly from another task
pub trait TransportListener: Send + Sync {
    fn on_event(&self, event: TransportEvent);
}

/// Opens transports
#[async_trait(?Send)]
pub trait Connector {
    /// Check that a session could be opened (credentials present)
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a required credential is missing
    fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }

    /// Open a session; events are delivered to `listener` until closed
    ///
    /// # Errors
    ///
    /// Returns error if the connection or the setup handshake fails
    async fn connect(&self, listener: Arc<dyn TransportListener>) -> Result<Box<dyn Transport>>;
}

/// One open duplex session
#[async_trait(?Send)]
pub trait Transport {
    /// Sink for outbound audio frames; sends never block
    fn frame_sink(&self) -> Arc<dyn FrameSink>;

    /// Acknowledge a tool call
    ///
    /// # Errors
    ///
    /// Returns error if the transport is already closed
    async fn send_tool_response(&self, id: &str, name: &str) -> Result<()>;

    /// Close the session; safe to call twice
    ///
    /// # Errors
    ///
    /// Returns error if the connection did not shut down cleanly
    async fn close(&mut self) -> Result<()>;
}
