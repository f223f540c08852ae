//! Shared test utilities
//!
//! In-memory audio backend, connector and recognizer that record what the
//! conversation machine does with them.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use salin::config::{CaptureConfig, PlaybackConfig};
use salin::conversation::{EventReceiver, EventSender};
use salin::transport::{Connector, Transport, TransportEvent, TransportListener};
use salin::voice::{
    AudioBackend, AudioBuffer, FrameProcessor, FrameSink, HandleId, InputDevice, OutputDevice,
    PlaybackListener, Recognizer, RecognizerEvent, RecognizerSink, WakeWordDetector,
    WakeWordListener, encode_frame,
};
use salin::{Config, ConversationMachine, Error, Result};

/// Everything the mocks observed, in order
#[derive(Default)]
pub struct Log {
    /// Lifecycle entries such as `"output#1 opened"` or `"transport#2 closed"`
    pub lifecycle: Vec<String>,
    pub tool_responses: Vec<(String, String)>,
    pub frames: Vec<String>,
    pub started: Vec<(HandleId, f64)>,
    pub stopped: Vec<HandleId>,
    pub now: f64,

    pub fail_input: bool,
    pub fail_connect: Option<String>,

    pub connects: usize,
    pub recognizer_starts: usize,
    pub recognizer_stops: usize,

    next_id: usize,
    playback_listener: Option<Arc<dyn PlaybackListener>>,
    transport_listener: Option<Arc<dyn TransportListener>>,
    recognizer_sink: Option<Arc<dyn RecognizerSink>>,
    processor: Option<FrameProcessor>,
}

pub type SharedLog = Arc<Mutex<Log>>;

impl Log {
    fn next_id(&mut self) -> usize {
        self.next_id += 1;
        self.next_id
    }

    fn record(&mut self, entry: String) {
        self.lifecycle.push(entry);
    }
}

pub fn new_log() -> SharedLog {
    Arc::new(Mutex::new(Log::default()))
}

// --- audio ---

pub struct MockBackend(pub SharedLog);

struct MockOutput {
    id: usize,
    log: SharedLog,
}

struct MockInput {
    id: usize,
    log: SharedLog,
    closed: bool,
}

impl AudioBackend for MockBackend {
    fn open_output(
        &self,
        _config: &PlaybackConfig,
        listener: Arc<dyn PlaybackListener>,
    ) -> Result<Box<dyn OutputDevice>> {
        let mut log = self.0.lock().unwrap();
        let id = log.next_id();
        log.record(format!("output#{id} opened"));
        log.playback_listener = Some(listener);
        Ok(Box::new(MockOutput {
            id,
            log: Arc::clone(&self.0),
        }))
    }

    fn open_input(
        &self,
        _config: &CaptureConfig,
        processor: FrameProcessor,
    ) -> Result<Box<dyn InputDevice>> {
        let mut log = self.0.lock().unwrap();
        if log.fail_input {
            return Err(Error::Audio("microphone permission denied".to_string()));
        }
        let id = log.next_id();
        log.record(format!("input#{id} opened"));
        log.processor = Some(processor);
        Ok(Box::new(MockInput {
            id,
            log: Arc::clone(&self.0),
            closed: false,
        }))
    }
}

impl OutputDevice for MockOutput {
    fn current_time(&self) -> f64 {
        self.log.lock().unwrap().now
    }

    fn resume(&mut self) -> Result<()> {
        Ok(())
    }

    fn start(&mut self, handle: HandleId, _buffer: AudioBuffer, at: f64) -> Result<f64> {
        self.log.lock().unwrap().started.push((handle, at));
        Ok(at)
    }

    fn stop(&mut self, handle: HandleId) {
        self.log.lock().unwrap().stopped.push(handle);
    }

    fn close(&mut self) -> Result<()> {
        let id = self.id;
        self.log.lock().unwrap().record(format!("output#{id} closed"));
        Ok(())
    }
}

impl InputDevice for MockInput {
    fn resume(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            let id = self.id;
            let mut log = self.log.lock().unwrap();
            log.record(format!("input#{id} closed"));
            log.processor = None;
        }
        Ok(())
    }
}

/// Standalone output device for scheduler tests
pub fn output_device(log: &SharedLog) -> Box<dyn OutputDevice> {
    Box::new(MockOutput {
        id: 0,
        log: Arc::clone(log),
    })
}

// --- transport ---

pub struct MockConnector(pub SharedLog);

struct MockTransport {
    id: usize,
    log: SharedLog,
    closed: bool,
}

/// Records every frame handed to the transport
pub struct RecordingSink(pub SharedLog);

impl FrameSink for RecordingSink {
    fn send_frame(&self, payload: String) {
        self.0.lock().unwrap().frames.push(payload);
    }
}

#[async_trait(?Send)]
impl Connector for MockConnector {
    fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }

    async fn connect(&self, listener: Arc<dyn TransportListener>) -> Result<Box<dyn Transport>> {
        let mut log = self.0.lock().unwrap();
        log.connects += 1;
        if let Some(reason) = log.fail_connect.clone() {
            return Err(Error::Transport(reason));
        }
        let id = log.next_id();
        log.record(format!("transport#{id} opened"));
        log.transport_listener = Some(listener);
        Ok(Box::new(MockTransport {
            id,
            log: Arc::clone(&self.0),
            closed: false,
        }))
    }
}

/// Connector without a credential
pub struct MissingKeyConnector;

#[async_trait(?Send)]
impl Connector for MissingKeyConnector {
    fn ensure_ready(&self) -> Result<()> {
        Err(Error::Config("GEMINI_API_KEY is not set".to_string()))
    }

    async fn connect(&self, _listener: Arc<dyn TransportListener>) -> Result<Box<dyn Transport>> {
        Err(Error::Config("GEMINI_API_KEY is not set".to_string()))
    }
}

#[async_trait(?Send)]
impl Transport for MockTransport {
    fn frame_sink(&self) -> Arc<dyn FrameSink> {
        Arc::new(RecordingSink(Arc::clone(&self.log)))
    }

    async fn send_tool_response(&self, id: &str, name: &str) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .tool_responses
            .push((id.to_string(), name.to_string()));
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            let id = self.id;
            self.log.lock().unwrap().record(format!("transport#{id} closed"));
        }
        Ok(())
    }
}

// --- recognizer ---

pub struct MockRecognizer(pub SharedLog);

impl Recognizer for MockRecognizer {
    fn start(&mut self, sink: Arc<dyn RecognizerSink>) -> Result<()> {
        let mut log = self.0.lock().unwrap();
        log.recognizer_starts += 1;
        log.recognizer_sink = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        self.0.lock().unwrap().recognizer_stops += 1;
    }
}

// --- driving ---

/// Config suitable for tests: credential present, short sleep beat
pub fn test_config() -> Config {
    Config {
        api_key: Some("test-key".to_string()),
        sleep_delay: Duration::from_millis(20),
        ..Config::default()
    }
}

/// Machine wired to the mocks, with wake word listening available
pub fn machine(log: &SharedLog, tx: EventSender) -> ConversationMachine {
    let detector =
        WakeWordDetector::new(vec!["salin".to_string(), "hey salin".to_string()]).unwrap();
    let wake = WakeWordListener::new(detector, Box::new(MockRecognizer(Arc::clone(log))));
    ConversationMachine::new(
        test_config(),
        Box::new(MockBackend(Arc::clone(log))),
        Box::new(MockConnector(Arc::clone(log))),
        Some(wake),
        tx,
    )
}

/// Feed every queued event to the machine
pub async fn pump(machine: &mut ConversationMachine, rx: &mut EventReceiver) {
    while let Ok(event) = rx.try_recv() {
        machine.handle(event).await;
    }
}

/// Deliver a transport event through the current session's listener
pub fn emit(log: &SharedLog, event: TransportEvent) {
    let listener = log.lock().unwrap().transport_listener.clone();
    listener.expect("no open transport").on_event(event);
}

/// Report a finished playback handle through the current output's listener
pub fn end_playback(log: &SharedLog, handle: HandleId) {
    let listener = log.lock().unwrap().playback_listener.clone();
    listener.expect("no open output").on_ended(handle);
}

/// Deliver a recognizer event through the current sink
pub fn recognize(log: &SharedLog, event: RecognizerEvent) {
    let sink = log.lock().unwrap().recognizer_sink.clone();
    sink.expect("recognizer not started").on_event(event);
}

/// Push captured samples through the open microphone's processor
pub fn capture(log: &SharedLog, samples: &[f32]) {
    let mut processor = log.lock().unwrap().processor.take().expect("no open input");
    processor.process(samples);
    log.lock().unwrap().processor = Some(processor);
}

/// `secs` of mono audio at the default 24 kHz playback rate
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn audio_chunk(secs: f64) -> String {
    encode_frame(&vec![0.1; (24_000.0 * secs) as usize])
}
