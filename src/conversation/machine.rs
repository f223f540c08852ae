//! Conversation state machine
//!
//! The single consumer of the event queue and the only owner of session
//! state. Handlers run one at a time, so transitions need no locking.

use std::mem;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;

use super::event::{Command, Event, EventReceiver, EventSender, RecognizerEvents};
use super::session::Session;
use super::state::{Mood, Phase, Role, Snapshot, TranscriptEntry};
use crate::Error;
use crate::config::Config;
use crate::transport::protocol::SET_MOOD_TOOL;
use crate::transport::{Connector, TransportEvent};
use crate::voice::{AudioBackend, HandleId, RecognizerEvent, WakeOutcome, WakeWordListener};

/// Shown when the service reports it is overloaded or unavailable
pub const OVERLOADED_MESSAGE: &str =
    "The translation service is busy right now. Please try again in a moment.";

/// Shown for any other connection failure
pub const CONNECTION_MESSAGE: &str =
    "Lost connection to the translation service. Check your network and try again.";

/// Shown when no credential is configured
pub const CREDENTIAL_MESSAGE: &str = "No API key configured. Set GEMINI_API_KEY and try again.";

/// Shown when the microphone or speaker cannot be opened
pub const DEVICE_MESSAGE: &str =
    "Could not open the microphone or speaker. Check that audio devices are connected and allowed.";

/// Pick the user-facing message for a transport failure
///
/// Best effort: relies on the service's wording.
#[must_use]
pub fn classify_error(message: &str) -> &'static str {
    let lower = message.to_lowercase();
    if ["503", "unavailable", "overloaded"]
        .iter()
        .any(|marker| lower.contains(marker))
    {
        OVERLOADED_MESSAGE
    } else {
        CONNECTION_MESSAGE
    }
}

fn start_failure_message(error: &Error) -> &'static str {
    match error {
        Error::Config(_) => CREDENTIAL_MESSAGE,
        Error::Audio(_) => DEVICE_MESSAGE,
        other => classify_error(&other.to_string()),
    }
}

/// Orchestrates capture, transport, playback and wake word listening
pub struct ConversationMachine {
    config: Config,
    backend: Box<dyn AudioBackend>,
    connector: Box<dyn Connector>,
    wake: Option<WakeWordListener>,
    tx: EventSender,
    state: watch::Sender<Snapshot>,

    phase: Phase,
    mood: Mood,
    transcript: Vec<TranscriptEntry>,
    error: Option<String>,

    session: Option<Session>,
    sessions_opened: u64,
    user_text: String,
    remote_text: String,
    standby_generation: u64,
    sleep_generation: u64,
}

impl ConversationMachine {
    /// Create an idle machine
    ///
    /// `tx` must feed the receiver later passed to [`Self::run`]; the machine
    /// hands clones of it to every callback it registers.
    #[must_use]
    pub fn new(
        config: Config,
        backend: Box<dyn AudioBackend>,
        connector: Box<dyn Connector>,
        wake: Option<WakeWordListener>,
        tx: EventSender,
    ) -> Self {
        let (state, _) = watch::channel(Snapshot::default());
        Self {
            config,
            backend,
            connector,
            wake,
            tx,
            state,
            phase: Phase::Idle,
            mood: Mood::Neutral,
            transcript: Vec::new(),
            error: None,
            session: None,
            sessions_opened: 0,
            user_text: String::new(),
            remote_text: String::new(),
            standby_generation: 0,
            sleep_generation: 0,
        }
    }

    /// Watch the observable state
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.state.subscribe()
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub const fn mood(&self) -> Mood {
        self.mood
    }

    #[must_use]
    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// True while a session holds devices or a transport
    #[must_use]
    pub const fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// True while captured audio is being streamed
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_streaming)
    }

    /// True while the wake word recognizer is running
    #[must_use]
    pub fn is_wake_listening(&self) -> bool {
        self.wake.as_ref().is_some_and(WakeWordListener::is_listening)
    }

    /// Consume events until `Quit`, then release everything
    pub async fn run(mut self, mut rx: EventReceiver) {
        while let Some(event) = rx.recv().await {
            let quit = matches!(event, Event::Command(Command::Quit));
            self.handle(event).await;
            if quit {
                break;
            }
        }
        self.teardown().await;
        tracing::debug!("conversation loop finished");
    }

    /// Handle one event
    pub async fn handle(&mut self, event: Event) {
        match event {
            Event::Command(command) => self.handle_command(command).await,
            Event::Transport { session, event } => self.handle_transport(session, event).await,
            Event::PlaybackEnded { session, handle } => self.handle_playback_ended(session, handle),
            Event::Recognizer { generation, event } => {
                self.handle_recognizer(generation, event).await;
            }
            Event::SleepElapsed { generation } => {
                if self.phase == Phase::Sleep && generation == self.sleep_generation {
                    self.mood = Mood::Neutral;
                    self.set_phase(Phase::Idle);
                }
            }
        }
    }

    /// Stop wake listening and release any session; phase is left alone
    ///
    /// Safe to call repeatedly.
    pub async fn teardown(&mut self) {
        self.stop_wake_listening();
        self.close_session().await;
    }

    async fn handle_command(&mut self, command: Command) {
        tracing::debug!(?command, phase = %self.phase, "command");
        match command {
            Command::Start => self.start().await,
            Command::Stop => self.stop().await,
            Command::Sleep => self.sleep().await,
            Command::ToggleStandby => self.toggle_standby().await,
            Command::Dismiss => {
                if self.phase == Phase::Error {
                    self.error = None;
                    self.mood = Mood::Neutral;
                    self.set_phase(Phase::Idle);
                }
            }
            Command::Quit => self.teardown().await,
        }
    }

    async fn start(&mut self) {
        if matches!(
            self.phase,
            Phase::Listening | Phase::Speaking | Phase::Reconnecting
        ) {
            tracing::debug!(phase = %self.phase, "start ignored, session already running");
            return;
        }

        self.stop_wake_listening();
        self.close_session().await;
        self.sleep_generation += 1;
        self.error = None;
        self.mood = Mood::Neutral;

        if let Err(e) = self.connector.ensure_ready() {
            self.fail(start_failure_message(&e), &e.to_string());
            return;
        }

        self.set_phase(Phase::Connecting);
        self.sessions_opened += 1;

        let opened = Session::open(
            self.sessions_opened,
            &self.config,
            self.backend.as_ref(),
            self.connector.as_ref(),
            self.tx.clone(),
        )
        .await;

        match opened {
            Ok(session) => self.session = Some(session),
            Err(e) => self.fail(start_failure_message(&e), &e.to_string()),
        }
    }

    async fn stop(&mut self) {
        match self.phase {
            Phase::Idle => {}
            Phase::Error => {
                self.error = None;
                self.mood = Mood::Neutral;
                self.set_phase(Phase::Idle);
            }
            _ => {
                self.teardown().await;
                self.sleep_generation += 1;
                self.mood = Mood::Neutral;
                self.set_phase(Phase::Idle);
            }
        }
    }

    async fn sleep(&mut self) {
        if matches!(self.phase, Phase::Idle | Phase::Sleep) {
            return;
        }

        self.teardown().await;
        self.error = None;
        self.sleep_generation += 1;
        self.set_phase(Phase::Sleep);

        let generation = self.sleep_generation;
        let delay = self.config.sleep_delay;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Event::SleepElapsed { generation });
        });
    }

    async fn toggle_standby(&mut self) {
        if self.phase == Phase::Standby {
            self.stop_wake_listening();
            self.set_phase(Phase::Idle);
            return;
        }

        if self.wake.is_none() {
            tracing::warn!("wake word listening unavailable, no recognizer configured");
            return;
        }

        self.close_session().await;
        self.sleep_generation += 1;
        self.error = None;
        self.mood = Mood::Neutral;

        self.standby_generation += 1;
        let sink = Arc::new(RecognizerEvents::new(
            self.standby_generation,
            self.tx.clone(),
        ));
        let begun = match &mut self.wake {
            Some(wake) => wake.begin(sink),
            None => Ok(()),
        };

        match begun {
            Ok(()) => self.set_phase(Phase::Standby),
            Err(e) => self.fail(DEVICE_MESSAGE, &e.to_string()),
        }
    }

    async fn handle_transport(&mut self, session_id: u64, event: TransportEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.id() != session_id || session.is_closing() {
            tracing::trace!(session_id, "stale transport event dropped");
            return;
        }

        match event {
            TransportEvent::Opened => {
                if self.phase == Phase::Connecting {
                    session.attach_stream();
                    self.set_phase(Phase::Listening);
                }
            }
            TransportEvent::Audio(payload) => match session.enqueue_audio(&payload) {
                Ok(Some(_)) => {
                    if self.phase == Phase::Listening {
                        self.set_phase(Phase::Speaking);
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "audio chunk dropped"),
            },
            TransportEvent::InputTranscript(text) => self.user_text.push_str(&text),
            TransportEvent::OutputTranscript(text) => self.remote_text.push_str(&text),
            TransportEvent::TurnComplete => {
                let drained = session.playback_drained();
                self.complete_turn();
                if drained && matches!(self.phase, Phase::Listening | Phase::Speaking) {
                    self.set_phase(Phase::Listening);
                }
            }
            TransportEvent::Interrupted => {
                session.interrupt();
                if matches!(self.phase, Phase::Listening | Phase::Speaking) {
                    self.set_phase(Phase::Listening);
                }
            }
            TransportEvent::ToolCall { id, name, args } => {
                self.apply_tool_call(&name, &args);
                if let Some(session) = &self.session {
                    if let Err(e) = session.send_tool_response(&id, &name).await {
                        tracing::warn!(id = %id, error = %e, "tool response not sent");
                    }
                }
            }
            TransportEvent::Error(message) => self.transport_failure(&message).await,
            TransportEvent::Closed(reason) => {
                let message = reason.unwrap_or_else(|| "connection closed".to_string());
                self.transport_failure(&message).await;
            }
        }
    }

    fn handle_playback_ended(&mut self, session_id: u64, handle: HandleId) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.id() != session_id || session.is_closing() {
            return;
        }
        if session.playback_complete(handle) && self.phase == Phase::Speaking {
            self.set_phase(Phase::Listening);
        }
    }

    async fn handle_recognizer(&mut self, generation: u64, event: RecognizerEvent) {
        if self.phase != Phase::Standby || generation != self.standby_generation {
            return;
        }
        let Some(wake) = self.wake.as_mut() else {
            return;
        };

        match wake.handle(event) {
            Ok(WakeOutcome::Triggered(_)) => self.start().await,
            Ok(WakeOutcome::Restarted | WakeOutcome::Continue) => {}
            Err(e) => self.fail(DEVICE_MESSAGE, &e.to_string()),
        }
    }

    fn apply_tool_call(&mut self, name: &str, args: &serde_json::Value) {
        if name != SET_MOOD_TOOL {
            tracing::warn!(tool = %name, "unknown tool call acknowledged");
            return;
        }

        let requested = args.get("mood").and_then(serde_json::Value::as_str);
        match requested.map(str::parse::<Mood>) {
            Some(Ok(mood)) => {
                if mood != self.mood {
                    tracing::info!(from = %self.mood, to = %mood, "mood changed");
                    self.mood = mood;
                    self.publish();
                }
            }
            Some(Err(_)) | None => {
                tracing::warn!(args = %args, "invalid mood ignored");
            }
        }
    }

    fn complete_turn(&mut self) {
        let created_at = Utc::now();
        let user = mem::take(&mut self.user_text);
        let remote = mem::take(&mut self.remote_text);

        let mut appended = false;
        for (role, text) in [(Role::User, user), (Role::Remote, remote)] {
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            self.transcript.push(TranscriptEntry {
                role,
                text: text.to_string(),
                created_at,
                mood: self.mood,
            });
            appended = true;
        }

        if appended {
            self.publish();
        }
    }

    async fn transport_failure(&mut self, message: &str) {
        self.close_session().await;
        self.fail(classify_error(message), message);
    }

    fn fail(&mut self, user_message: &str, detail: &str) {
        tracing::error!(error = %detail, "session failed");
        self.error = Some(user_message.to_string());
        self.set_phase(Phase::Error);
    }

    fn stop_wake_listening(&mut self) {
        if let Some(wake) = &mut self.wake {
            wake.end();
        }
    }

    async fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
        self.user_text.clear();
        self.remote_text.clear();
    }

    fn set_phase(&mut self, phase: Phase) {
        if phase != self.phase {
            tracing::info!(from = %self.phase, to = %phase, "phase changed");
            self.phase = phase;
        }
        self.publish();
    }

    fn publish(&self) {
        let snapshot = Snapshot {
            phase: self.phase,
            mood: self.mood,
            transcript: self.transcript.clone(),
            error: self.error.clone(),
        };
        self.state.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }
}
