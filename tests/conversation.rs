//! Conversation machine integration tests

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use common::{
    MissingKeyConnector, MockBackend, audio_chunk, capture, emit, end_playback, machine, new_log,
    pump, recognize, test_config,
};
use salin::conversation::{
    CONNECTION_MESSAGE, CREDENTIAL_MESSAGE, DEVICE_MESSAGE, OVERLOADED_MESSAGE, Role,
};
use salin::voice::RecognizerEvent;
use salin::{Command, ConversationMachine, Event, Mood, Phase, TransportEvent};

fn command(c: Command) -> Event {
    Event::Command(c)
}

fn final_result(text: &str) -> RecognizerEvent {
    RecognizerEvent::Result {
        text: text.to_string(),
        is_final: true,
    }
}

/// Start a session and let the transport report it is open
async fn listening(
    log: &common::SharedLog,
    machine: &mut ConversationMachine,
    rx: &mut salin::conversation::EventReceiver,
) {
    machine.handle(command(Command::Start)).await;
    assert_eq!(machine.phase(), Phase::Connecting);
    emit(log, TransportEvent::Opened);
    pump(machine, rx).await;
    assert_eq!(machine.phase(), Phase::Listening);
}

fn set_mood(id: &str, mood: &str) -> TransportEvent {
    TransportEvent::ToolCall {
        id: id.to_string(),
        name: "setMood".to_string(),
        args: json!({ "mood": mood }),
    }
}

// =============================================================================
// Session lifecycle
// =============================================================================

#[tokio::test]
async fn test_start_opens_devices_then_transport() {
    let log = new_log();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut machine = machine(&log, tx);

    listening(&log, &mut machine, &mut rx).await;

    assert!(machine.has_session());
    assert!(machine.is_streaming());
    assert_eq!(
        log.lock().unwrap().lifecycle,
        ["output#1 opened", "input#2 opened", "transport#3 opened"]
    );
}

#[tokio::test]
async fn test_frames_stream_only_after_open() {
    let log = new_log();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut machine = machine(&log, tx);

    machine.handle(command(Command::Start)).await;
    capture(&log, &[0.05; 1024]);
    assert!(log.lock().unwrap().frames.is_empty());

    emit(&log, TransportEvent::Opened);
    pump(&mut machine, &mut rx).await;
    capture(&log, &[0.05; 1024]);
    assert_eq!(log.lock().unwrap().frames.len(), 2);
}

#[tokio::test]
async fn test_restart_closes_previous_session_first() {
    let log = new_log();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut machine = machine(&log, tx);

    listening(&log, &mut machine, &mut rx).await;
    machine.handle(command(Command::Stop)).await;
    assert_eq!(machine.phase(), Phase::Idle);
    listening(&log, &mut machine, &mut rx).await;

    assert_eq!(
        log.lock().unwrap().lifecycle,
        [
            "output#1 opened",
            "input#2 opened",
            "transport#3 opened",
            "transport#3 closed",
            "input#2 closed",
            "output#1 closed",
            "output#4 opened",
            "input#5 opened",
            "transport#6 opened",
        ]
    );
}

#[tokio::test]
async fn test_start_while_listening_is_ignored() {
    let log = new_log();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut machine = machine(&log, tx);

    listening(&log, &mut machine, &mut rx).await;
    machine.handle(command(Command::Start)).await;

    assert_eq!(machine.phase(), Phase::Listening);
    assert_eq!(log.lock().unwrap().connects, 1);
}

#[tokio::test]
async fn test_teardown_is_idempotent() {
    let log = new_log();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut machine = machine(&log, tx);

    machine.teardown().await;
    listening(&log, &mut machine, &mut rx).await;

    machine.teardown().await;
    machine.teardown().await;

    assert!(!machine.has_session());
    assert!(!machine.is_streaming());
    let lifecycle = log.lock().unwrap().lifecycle.clone();
    for entry in ["transport#3 closed", "input#2 closed", "output#1 closed"] {
        assert_eq!(lifecycle.iter().filter(|e| *e == entry).count(), 1, "{entry}");
    }
}

#[tokio::test]
async fn test_events_from_closed_session_are_ignored() {
    let log = new_log();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut machine = machine(&log, tx);

    listening(&log, &mut machine, &mut rx).await;
    machine.handle(command(Command::Stop)).await;
    listening(&log, &mut machine, &mut rx).await;

    machine
        .handle(Event::Transport {
            session: 1,
            event: TransportEvent::Error("socket reset".to_string()),
        })
        .await;
    machine
        .handle(Event::Transport {
            session: 1,
            event: TransportEvent::Audio(audio_chunk(0.1)),
        })
        .await;

    assert_eq!(machine.phase(), Phase::Listening);
    assert!(machine.error().is_none());
    assert!(log.lock().unwrap().started.is_empty());
}

#[tokio::test]
async fn test_quit_releases_everything() {
    let log = new_log();
    let (tx, rx) = mpsc::unbounded_channel();
    let machine = machine(&log, tx.clone());

    tx.send(command(Command::Start)).unwrap();
    tx.send(command(Command::Quit)).unwrap();
    machine.run(rx).await;

    let lifecycle = log.lock().unwrap().lifecycle.clone();
    assert_eq!(
        &lifecycle[3..],
        ["transport#3 closed", "input#2 closed", "output#1 closed"]
    );
}

// =============================================================================
// Playback and turns
// =============================================================================

#[tokio::test]
async fn test_audio_speaks_until_drained() {
    let log = new_log();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut machine = machine(&log, tx);
    listening(&log, &mut machine, &mut rx).await;

    emit(&log, TransportEvent::Audio(audio_chunk(0.5)));
    emit(&log, TransportEvent::Audio(audio_chunk(0.25)));
    pump(&mut machine, &mut rx).await;

    assert_eq!(machine.phase(), Phase::Speaking);
    assert_eq!(log.lock().unwrap().started, [(1, 0.0), (2, 0.5)]);

    end_playback(&log, 1);
    pump(&mut machine, &mut rx).await;
    assert_eq!(machine.phase(), Phase::Speaking);

    end_playback(&log, 2);
    pump(&mut machine, &mut rx).await;
    assert_eq!(machine.phase(), Phase::Listening);
}

#[tokio::test]
async fn test_late_chunk_starts_now() {
    let log = new_log();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut machine = machine(&log, tx);
    listening(&log, &mut machine, &mut rx).await;

    emit(&log, TransportEvent::Audio(audio_chunk(0.5)));
    pump(&mut machine, &mut rx).await;

    log.lock().unwrap().now = 2.0;
    emit(&log, TransportEvent::Audio(audio_chunk(0.5)));
    pump(&mut machine, &mut rx).await;

    assert_eq!(log.lock().unwrap().started, [(1, 0.0), (2, 2.0)]);
}

#[tokio::test]
async fn test_malformed_audio_is_dropped() {
    let log = new_log();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut machine = machine(&log, tx);
    listening(&log, &mut machine, &mut rx).await;

    emit(&log, TransportEvent::Audio("@@not base64@@".to_string()));
    emit(&log, TransportEvent::Audio(String::new()));
    pump(&mut machine, &mut rx).await;

    assert_eq!(machine.phase(), Phase::Listening);
    assert!(log.lock().unwrap().started.is_empty());
}

#[tokio::test]
async fn test_interruption_cuts_playback() {
    let log = new_log();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut machine = machine(&log, tx);
    listening(&log, &mut machine, &mut rx).await;

    emit(&log, TransportEvent::Audio(audio_chunk(0.5)));
    emit(&log, TransportEvent::Audio(audio_chunk(0.5)));
    emit(&log, TransportEvent::Interrupted);
    pump(&mut machine, &mut rx).await;

    assert_eq!(machine.phase(), Phase::Listening);
    let mut stopped = log.lock().unwrap().stopped.clone();
    stopped.sort_unstable();
    assert_eq!(stopped, [1, 2]);

    // Cursor reset: the next chunk plays immediately
    emit(&log, TransportEvent::Audio(audio_chunk(0.5)));
    pump(&mut machine, &mut rx).await;
    assert_eq!(log.lock().unwrap().started.last(), Some(&(3, 0.0)));
    assert_eq!(machine.phase(), Phase::Speaking);
}

#[tokio::test]
async fn test_turn_complete_commits_transcript() {
    let log = new_log();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut machine = machine(&log, tx);
    listening(&log, &mut machine, &mut rx).await;

    emit(&log, TransportEvent::InputTranscript("Hola ".to_string()));
    emit(&log, TransportEvent::InputTranscript("amigo".to_string()));
    emit(&log, TransportEvent::OutputTranscript(" Hello friend ".to_string()));
    emit(&log, TransportEvent::TurnComplete);
    pump(&mut machine, &mut rx).await;

    let transcript = machine.transcript();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].role, Role::User);
    assert_eq!(transcript[0].text, "Hola amigo");
    assert_eq!(transcript[1].role, Role::Remote);
    assert_eq!(transcript[1].text, "Hello friend");
    assert_eq!(machine.phase(), Phase::Listening);
}

#[tokio::test]
async fn test_empty_turn_appends_nothing() {
    let log = new_log();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut machine = machine(&log, tx);
    listening(&log, &mut machine, &mut rx).await;

    emit(&log, TransportEvent::InputTranscript("   ".to_string()));
    emit(&log, TransportEvent::TurnComplete);
    pump(&mut machine, &mut rx).await;
    assert!(machine.transcript().is_empty());

    emit(&log, TransportEvent::OutputTranscript("Good morning".to_string()));
    emit(&log, TransportEvent::TurnComplete);
    pump(&mut machine, &mut rx).await;
    assert_eq!(machine.transcript().len(), 1);
    assert_eq!(machine.transcript()[0].role, Role::Remote);
}

#[tokio::test]
async fn test_turn_complete_while_playing_stays_speaking() {
    let log = new_log();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut machine = machine(&log, tx);
    listening(&log, &mut machine, &mut rx).await;

    emit(&log, TransportEvent::Audio(audio_chunk(0.5)));
    emit(&log, TransportEvent::TurnComplete);
    pump(&mut machine, &mut rx).await;
    assert_eq!(machine.phase(), Phase::Speaking);

    end_playback(&log, 1);
    pump(&mut machine, &mut rx).await;
    assert_eq!(machine.phase(), Phase::Listening);
}

// =============================================================================
// Mood tool
// =============================================================================

#[tokio::test]
async fn test_set_mood_applies_and_acks() {
    let log = new_log();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut machine = machine(&log, tx);
    listening(&log, &mut machine, &mut rx).await;

    emit(
        &log,
        TransportEvent::ToolCall {
            id: "call-1".to_string(),
            name: "setMood".to_string(),
            args: json!({ "mood": "HAPPY" }),
        },
    );
    pump(&mut machine, &mut rx).await;

    assert_eq!(machine.mood(), Mood::Happy);
    assert_eq!(
        log.lock().unwrap().tool_responses,
        [("call-1".to_string(), "setMood".to_string())]
    );
}

#[tokio::test]
async fn test_unknown_tool_is_acked_once_and_ignored() {
    let log = new_log();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut machine = machine(&log, tx);
    listening(&log, &mut machine, &mut rx).await;

    emit(&log, set_mood("call-1", "SAD"));
    pump(&mut machine, &mut rx).await;

    emit(
        &log,
        TransportEvent::ToolCall {
            id: "call-2".to_string(),
            name: "other".to_string(),
            args: json!({ "mood": "HAPPY" }),
        },
    );
    pump(&mut machine, &mut rx).await;

    assert_eq!(machine.mood(), Mood::Sad);
    let responses = log.lock().unwrap().tool_responses.clone();
    let other: Vec<_> = responses.iter().filter(|(id, _)| id == "call-2").collect();
    assert_eq!(other, [&("call-2".to_string(), "other".to_string())]);
    assert_eq!(machine.phase(), Phase::Listening);
}

#[tokio::test]
async fn test_invalid_mood_is_acked_once_and_ignored() {
    let log = new_log();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut machine = machine(&log, tx);
    listening(&log, &mut machine, &mut rx).await;

    emit(
        &log,
        TransportEvent::ToolCall {
            id: "call-7".to_string(),
            name: "setMood".to_string(),
            args: json!({ "mood": "FURIOUS" }),
        },
    );
    pump(&mut machine, &mut rx).await;

    assert_eq!(machine.mood(), Mood::Neutral);
    assert_eq!(log.lock().unwrap().tool_responses.len(), 1);
}

#[tokio::test]
async fn test_mood_tags_transcript_and_resets_on_stop() {
    let log = new_log();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut machine = machine(&log, tx);
    listening(&log, &mut machine, &mut rx).await;

    emit(
        &log,
        TransportEvent::ToolCall {
            id: "c".to_string(),
            name: "setMood".to_string(),
            args: json!({ "mood": "sad" }),
        },
    );
    emit(&log, TransportEvent::OutputTranscript("I'm sorry".to_string()));
    emit(&log, TransportEvent::TurnComplete);
    pump(&mut machine, &mut rx).await;
    assert_eq!(machine.transcript()[0].mood, Mood::Sad);

    machine.handle(command(Command::Stop)).await;
    assert_eq!(machine.mood(), Mood::Neutral);
    assert_eq!(machine.transcript().len(), 1);
}

// =============================================================================
// Errors
// =============================================================================

#[tokio::test]
async fn test_overload_error_closes_session() {
    let log = new_log();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut machine = machine(&log, tx);
    listening(&log, &mut machine, &mut rx).await;

    emit(&log, TransportEvent::Error("503 Service Unavailable".to_string()));
    pump(&mut machine, &mut rx).await;

    assert_eq!(machine.phase(), Phase::Error);
    assert_eq!(machine.error(), Some(OVERLOADED_MESSAGE));
    assert!(!machine.has_session());

    machine.handle(command(Command::Dismiss)).await;
    assert_eq!(machine.phase(), Phase::Idle);
    assert!(machine.error().is_none());
}

#[tokio::test]
async fn test_unexpected_close_is_generic_error() {
    let log = new_log();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut machine = machine(&log, tx);
    listening(&log, &mut machine, &mut rx).await;

    emit(&log, TransportEvent::Closed(None));
    pump(&mut machine, &mut rx).await;

    assert_eq!(machine.phase(), Phase::Error);
    assert_eq!(machine.error(), Some(CONNECTION_MESSAGE));
}

#[tokio::test]
async fn test_device_failure_releases_partial_session() {
    let log = new_log();
    log.lock().unwrap().fail_input = true;
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut machine = machine(&log, tx);

    machine.handle(command(Command::Start)).await;

    assert_eq!(machine.phase(), Phase::Error);
    assert_eq!(machine.error(), Some(DEVICE_MESSAGE));
    assert!(!machine.has_session());
    let log = log.lock().unwrap();
    assert_eq!(log.lifecycle, ["output#1 opened", "output#1 closed"]);
    assert_eq!(log.connects, 0);
}

#[tokio::test]
async fn test_connect_failure_releases_devices() {
    let log = new_log();
    log.lock().unwrap().fail_connect = Some("connection refused".to_string());
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut machine = machine(&log, tx);

    machine.handle(command(Command::Start)).await;

    assert_eq!(machine.phase(), Phase::Error);
    assert_eq!(machine.error(), Some(CONNECTION_MESSAGE));
    assert_eq!(
        log.lock().unwrap().lifecycle,
        [
            "output#1 opened",
            "input#2 opened",
            "input#2 closed",
            "output#1 closed"
        ]
    );
}

#[tokio::test]
async fn test_missing_credential_opens_nothing() {
    let log = new_log();
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut machine = ConversationMachine::new(
        test_config(),
        Box::new(MockBackend(Arc::clone(&log))),
        Box::new(MissingKeyConnector),
        None,
        tx,
    );

    machine.handle(command(Command::Start)).await;

    assert_eq!(machine.phase(), Phase::Error);
    assert_eq!(machine.error(), Some(CREDENTIAL_MESSAGE));
    assert!(log.lock().unwrap().lifecycle.is_empty());
}

#[tokio::test]
async fn test_retry_from_error() {
    let log = new_log();
    log.lock().unwrap().fail_connect = Some("model overloaded".to_string());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut machine = machine(&log, tx);

    machine.handle(command(Command::Start)).await;
    assert_eq!(machine.error(), Some(OVERLOADED_MESSAGE));

    log.lock().unwrap().fail_connect = None;
    listening(&log, &mut machine, &mut rx).await;
    assert!(machine.error().is_none());
}

// =============================================================================
// Sleep
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_sleep_keeps_mood_until_idle() {
    let log = new_log();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut machine = machine(&log, tx);
    listening(&log, &mut machine, &mut rx).await;

    emit(&log, set_mood("call-1", "HAPPY"));
    pump(&mut machine, &mut rx).await;
    assert_eq!(machine.mood(), Mood::Happy);

    machine.handle(command(Command::Sleep)).await;
    assert_eq!(machine.phase(), Phase::Sleep);
    assert!(!machine.has_session());

    // Halfway through the 20 ms beat
    tokio::time::sleep(Duration::from_millis(10)).await;
    pump(&mut machine, &mut rx).await;
    assert_eq!(machine.phase(), Phase::Sleep);
    assert_eq!(machine.mood(), Mood::Happy);

    tokio::time::sleep(Duration::from_millis(15)).await;
    pump(&mut machine, &mut rx).await;
    assert_eq!(machine.phase(), Phase::Idle);
    assert_eq!(machine.mood(), Mood::Neutral);
}

#[tokio::test(start_paused = true)]
async fn test_start_during_sleep_cancels_timer() {
    let log = new_log();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut machine = machine(&log, tx);
    listening(&log, &mut machine, &mut rx).await;

    machine.handle(command(Command::Sleep)).await;
    machine.handle(command(Command::Start)).await;

    tokio::time::sleep(Duration::from_millis(80)).await;
    pump(&mut machine, &mut rx).await;
    assert_eq!(machine.phase(), Phase::Connecting);
}

// =============================================================================
// Wake word
// =============================================================================

#[tokio::test]
async fn test_wake_word_starts_session() {
    let log = new_log();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut machine = machine(&log, tx);

    machine.handle(command(Command::ToggleStandby)).await;
    assert_eq!(machine.phase(), Phase::Standby);
    assert!(machine.is_wake_listening());

    recognize(&log, final_result("hello there"));
    pump(&mut machine, &mut rx).await;
    assert_eq!(machine.phase(), Phase::Standby);
    assert_eq!(log.lock().unwrap().connects, 0);

    recognize(&log, final_result("Hey Salin, please start"));
    pump(&mut machine, &mut rx).await;

    assert_eq!(machine.phase(), Phase::Connecting);
    assert!(!machine.is_wake_listening());
    let log = log.lock().unwrap();
    assert_eq!(log.connects, 1);
    assert_eq!(log.recognizer_starts, 1);
    assert_eq!(log.recognizer_stops, 1);
}

#[tokio::test]
async fn test_interim_results_never_trigger() {
    let log = new_log();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut machine = machine(&log, tx);

    machine.handle(command(Command::ToggleStandby)).await;
    recognize(
        &log,
        RecognizerEvent::Result {
            text: "salin".to_string(),
            is_final: false,
        },
    );
    pump(&mut machine, &mut rx).await;

    assert_eq!(machine.phase(), Phase::Standby);
    assert_eq!(log.lock().unwrap().connects, 0);
}

#[tokio::test]
async fn test_recognizer_restarts_after_ending() {
    let log = new_log();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut machine = machine(&log, tx);

    machine.handle(command(Command::ToggleStandby)).await;
    recognize(&log, RecognizerEvent::Ended);
    recognize(&log, RecognizerEvent::Error("no-speech".to_string()));
    pump(&mut machine, &mut rx).await;

    assert_eq!(machine.phase(), Phase::Standby);
    let log = log.lock().unwrap();
    assert_eq!(log.recognizer_starts, 3);
    assert_eq!(log.recognizer_stops, 2);
}

#[tokio::test]
async fn test_toggle_standby_off_stops_listening() {
    let log = new_log();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut machine = machine(&log, tx);

    machine.handle(command(Command::ToggleStandby)).await;
    machine.handle(command(Command::ToggleStandby)).await;
    assert_eq!(machine.phase(), Phase::Idle);
    assert!(!machine.is_wake_listening());

    // A late result from the stopped recognizer does nothing
    recognize(&log, final_result("salin"));
    pump(&mut machine, &mut rx).await;
    assert_eq!(machine.phase(), Phase::Idle);
    assert_eq!(log.lock().unwrap().connects, 0);
}

#[tokio::test]
async fn test_standby_without_recognizer_is_noop() {
    let log = new_log();
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut machine = ConversationMachine::new(
        test_config(),
        Box::new(MockBackend(Arc::clone(&log))),
        Box::new(common::MockConnector(Arc::clone(&log))),
        None,
        tx,
    );

    machine.handle(command(Command::ToggleStandby)).await;
    assert_eq!(machine.phase(), Phase::Idle);
}

// =============================================================================
// Observation
// =============================================================================

#[tokio::test]
async fn test_snapshot_follows_phase() {
    let log = new_log();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut machine = machine(&log, tx);
    let state = machine.subscribe();

    listening(&log, &mut machine, &mut rx).await;
    assert_eq!(state.borrow().phase, Phase::Listening);

    emit(&log, TransportEvent::Error("boom".to_string()));
    pump(&mut machine, &mut rx).await;
    let snapshot = state.borrow().clone();
    assert_eq!(snapshot.phase, Phase::Error);
    assert_eq!(snapshot.error.as_deref(), Some(CONNECTION_MESSAGE));
}
