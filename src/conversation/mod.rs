//! Conversation orchestration
//!
//! The [`ConversationMachine`] owns the lifecycle phase, the mood and the
//! transcript, and is the only place session resources are opened or closed.

mod event;
mod machine;
mod session;
mod state;

pub use event::{
    Command, Event, EventReceiver, EventSender, RecognizerEvents, SessionEvents,
};
pub use machine::{
    CONNECTION_MESSAGE, CREDENTIAL_MESSAGE, ConversationMachine, DEVICE_MESSAGE,
    OVERLOADED_MESSAGE, classify_error,
};
pub use session::Session;
pub use state::{Mood, Phase, Role, Snapshot, TranscriptEntry};
