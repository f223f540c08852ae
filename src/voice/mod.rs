//! Voice processing module
//!
//! Handles microphone capture and conditioning, the PCM wire codec,
//! scheduled playback, and wake word listening.

mod backend;
mod capture;
mod codec;
mod conditioning;
mod playback;
mod recognizer;
mod stt;
mod wake_word;

pub use backend::{
    AudioBackend, CpalBackend, DeviceList, HandleId, InputDevice, OutputDevice, list_devices,
};
pub use capture::{
    AudioCapture, CpalInput, FrameProcessor, FrameSink, FrameTap, Packetizer, SAMPLE_RATE,
    samples_to_wav,
};
pub use codec::{
    AudioBuffer, build_playable_buffer, decode_frame, encode_frame, pcm16_to_samples,
    samples_to_pcm16,
};
pub use conditioning::{Biquad, Compressor, ConditioningChain};
pub use playback::{CpalOutput, PlaybackListener, PlaybackScheduler, ScheduledPlayback};
pub use recognizer::{SegmentingRecognizer, SpeechSegmenter};
pub use stt::{SpeechToText, SttProvider};
pub use wake_word::{
    Recognizer, RecognizerEvent, RecognizerSink, WakeOutcome, WakeWordDetector, WakeWordListener,
};
