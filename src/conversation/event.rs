//! Events consumed by the conversation machine
//!
//! Every producer (user commands, transport, playback, recognizer, timers)
//! only enqueues [`Event`]s; the machine is the single consumer.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::transport::{TransportEvent, TransportListener};
use crate::voice::{HandleId, PlaybackListener, RecognizerEvent, RecognizerSink};

/// User-initiated action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Begin a session
    Start,
    /// End the session and go idle
    Stop,
    /// End the session with a short sleep beat before idle
    Sleep,
    /// Switch wake word listening on or off
    ToggleStandby,
    /// Acknowledge an error and go idle
    Dismiss,
    /// Tear down and leave the event loop
    Quit,
}

/// One item on the machine's queue
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Command(Command),
    Transport {
        session: u64,
        event: TransportEvent,
    },
    PlaybackEnded {
        session: u64,
        handle: HandleId,
    },
    Recognizer {
        generation: u64,
        event: RecognizerEvent,
    },
    SleepElapsed {
        generation: u64,
    },
}

/// Producer side of the machine's queue
pub type EventSender = mpsc::UnboundedSender<Event>;

/// Consumer side of the machine's queue
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

/// Routes one session's transport and playback callbacks onto the queue
///
/// Callbacks arriving after the session token is cancelled are dropped.
pub struct SessionEvents {
    session: u64,
    token: CancellationToken,
    tx: EventSender,
}

impl SessionEvents {
    #[must_use]
    pub const fn new(session: u64, token: CancellationToken, tx: EventSender) -> Self {
        Self { session, token, tx }
    }

    fn push(&self, event: Event) {
        if self.token.is_cancelled() {
            tracing::trace!(session = self.session, "event after close dropped");
            return;
        }
        // Receiver gone means the machine has shut down
        let _ = self.tx.send(event);
    }
}

impl TransportListener for SessionEvents {
    fn on_event(&self, event: TransportEvent) {
        self.push(Event::Transport {
            session: self.session,
            event,
        });
    }
}

impl PlaybackListener for SessionEvents {
    fn on_ended(&self, handle: HandleId) {
        self.push(Event::PlaybackEnded {
            session: self.session,
            handle,
        });
    }
}

/// Routes recognizer callbacks for one standby period onto the queue
pub struct RecognizerEvents {
    generation: u64,
    tx: EventSender,
}

impl RecognizerEvents {
    #[must_use]
    pub const fn new(generation: u64, tx: EventSender) -> Self {
        Self { generation, tx }
    }
}

impl RecognizerSink for RecognizerEvents {
    fn on_event(&self, event: RecognizerEvent) {
        let _ = self.tx.send(Event::Recognizer {
            generation: self.generation,
            event,
        });
    }
}
