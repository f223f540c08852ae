//! One live conversation's resources
//!
//! A [`Session`] owns the transport, the microphone stream and the playback
//! scheduler. It is opened as a unit and torn down as a unit; a cancellation
//! token shared with every callback it registered makes late callbacks
//! no-ops once teardown begins.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::event::{EventSender, SessionEvents};
use crate::Result;
use crate::config::Config;
use crate::transport::{Connector, Transport, TransportListener};
use crate::voice::{
    AudioBackend, FrameProcessor, FrameTap, HandleId, InputDevice, PlaybackListener,
    PlaybackScheduler, ScheduledPlayback,
};

/// Resources of one open conversation
pub struct Session {
    id: u64,
    uuid: Uuid,
    token: CancellationToken,
    tap: Arc<FrameTap>,
    transport: Option<Box<dyn Transport>>,
    input: Option<Box<dyn InputDevice>>,
    playback: Option<PlaybackScheduler>,
}

impl Session {
    /// Acquire devices and open the transport, in that order
    ///
    /// On failure everything acquired so far is released before returning.
    ///
    /// # Errors
    ///
    /// Returns the first device or transport error
    pub async fn open(
        id: u64,
        config: &Config,
        backend: &dyn AudioBackend,
        connector: &dyn Connector,
        tx: EventSender,
    ) -> Result<Self> {
        let token = CancellationToken::new();
        let mut session = Self {
            id,
            uuid: Uuid::new_v4(),
            tap: FrameTap::new(token.clone()),
            token,
            transport: None,
            input: None,
            playback: None,
        };

        tracing::info!(session = %session.uuid, "opening session");

        if let Err(e) = session.acquire(config, backend, connector, tx).await {
            session.close().await;
            return Err(e);
        }
        Ok(session)
    }

    async fn acquire(
        &mut self,
        config: &Config,
        backend: &dyn AudioBackend,
        connector: &dyn Connector,
        tx: EventSender,
    ) -> Result<()> {
        let events = Arc::new(SessionEvents::new(self.id, self.token.clone(), tx));

        let output = backend.open_output(
            &config.playback,
            Arc::clone(&events) as Arc<dyn PlaybackListener>,
        )?;
        let playback = self
            .playback
            .insert(PlaybackScheduler::new(output, &config.playback));

        let processor = FrameProcessor::new(&config.capture, Arc::clone(&self.tap));
        let input = self.input.insert(backend.open_input(&config.capture, processor)?);

        playback.resume()?;
        input.resume()?;
        tracing::debug!(session = %self.uuid, "audio devices ready");

        let transport = connector
            .connect(events as Arc<dyn TransportListener>)
            .await?;
        self.transport = Some(transport);
        Ok(())
    }

    /// Internal id used to tag events
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// True once teardown has begun
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Start streaming captured frames to the transport
    pub fn attach_stream(&self) {
        if self.is_closing() {
            return;
        }
        if let Some(transport) = &self.transport {
            self.tap.attach(transport.frame_sink());
            tracing::debug!(session = %self.uuid, "capture streaming");
        }
    }

    /// True while captured frames are being sent
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.tap.is_streaming()
    }

    /// Schedule an inbound audio chunk
    ///
    /// # Errors
    ///
    /// Returns the decode or format error for a malformed chunk
    pub fn enqueue_audio(&mut self, payload: &str) -> Result<Option<ScheduledPlayback>> {
        match &mut self.playback {
            Some(playback) if !self.token.is_cancelled() => playback.enqueue(payload),
            _ => Ok(None),
        }
    }

    /// Record a finished chunk; true if nothing else is playing
    pub fn playback_complete(&mut self, handle: HandleId) -> bool {
        self.playback
            .as_mut()
            .is_some_and(|playback| playback.complete(handle))
    }

    /// True when nothing is scheduled or playing
    #[must_use]
    pub fn playback_drained(&self) -> bool {
        self.playback.as_ref().is_none_or(PlaybackScheduler::is_drained)
    }

    /// Cut all playback immediately
    pub fn interrupt(&mut self) {
        if let Some(playback) = &mut self.playback {
            playback.interrupt();
        }
    }

    /// Acknowledge a tool call
    ///
    /// # Errors
    ///
    /// Returns error if the transport is closed
    pub async fn send_tool_response(&self, id: &str, name: &str) -> Result<()> {
        match &self.transport {
            Some(transport) => transport.send_tool_response(id, name).await,
            None => Ok(()),
        }
    }

    /// Release everything; every step runs even if an earlier one fails
    ///
    /// Order: transport, microphone, speaker, remaining playback handles.
    pub async fn close(&mut self) {
        self.token.cancel();
        self.tap.detach();

        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                tracing::warn!(session = %self.uuid, error = %e, "transport close failed");
            }
        }
        if let Some(mut input) = self.input.take() {
            if let Err(e) = input.close() {
                tracing::warn!(session = %self.uuid, error = %e, "microphone close failed");
            }
        }
        if let Some(mut playback) = self.playback.take() {
            if let Err(e) = playback.close() {
                tracing::warn!(session = %self.uuid, error = %e, "speaker close failed");
            }
        }

        tracing::info!(session = %self.uuid, "session closed");
    }
}
