//! Audio device abstraction
//!
//! The conversation machine opens devices through [`AudioBackend`] so that a
//! session can run against real hardware ([`CpalBackend`]) or an in-memory
//! double in tests.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait};

use super::capture::{CpalInput, FrameProcessor};
use super::codec::AudioBuffer;
use super::playback::{CpalOutput, PlaybackListener};
use crate::config::{CaptureConfig, PlaybackConfig};
use crate::{Error, Result};

/// Identifier of one scheduled playback
pub type HandleId = u64;

/// A microphone stream feeding a [`FrameProcessor`]
pub trait InputDevice {
    /// Start (or resume) delivering blocks
    ///
    /// # Errors
    ///
    /// Returns error if the device refuses to start
    fn resume(&mut self) -> Result<()>;

    /// Stop and release the device; safe to call twice
    ///
    /// # Errors
    ///
    /// Returns error if the device fails to shut down cleanly
    fn close(&mut self) -> Result<()>;
}

/// A speaker stream that plays buffers at scheduled times
pub trait OutputDevice {
    /// Device clock in seconds
    fn current_time(&self) -> f64;

    /// Start (or resume) the output clock
    ///
    /// # Errors
    ///
    /// Returns error if the device refuses to start
    fn resume(&mut self) -> Result<()>;

    /// Schedule `buffer` to start at device time `at`
    ///
    /// Returns the time the buffer will actually start, which is later than
    /// `at` when the clock has already passed it.
    ///
    /// # Errors
    ///
    /// Returns error if the device is closed
    fn start(&mut self, handle: HandleId, buffer: AudioBuffer, at: f64) -> Result<f64>;

    /// Cancel a scheduled or playing buffer; no end notification follows
    fn stop(&mut self, handle: HandleId);

    /// Stop and release the device; safe to call twice
    ///
    /// # Errors
    ///
    /// Returns error if the device fails to shut down cleanly
    fn close(&mut self) -> Result<()>;
}

/// Opens the devices a session needs
pub trait AudioBackend {
    /// Open the speaker; `listener` hears about buffers that play to the end
    ///
    /// # Errors
    ///
    /// Returns error if no suitable output device exists
    fn open_output(
        &self,
        config: &PlaybackConfig,
        listener: Arc<dyn PlaybackListener>,
    ) -> Result<Box<dyn OutputDevice>>;

    /// Open the microphone; every captured block goes through `processor`
    ///
    /// # Errors
    ///
    /// Returns error if the microphone is missing, busy or denied
    fn open_input(
        &self,
        config: &CaptureConfig,
        processor: FrameProcessor,
    ) -> Result<Box<dyn InputDevice>>;
}

/// Default host devices through cpal
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    fn open_output(
        &self,
        config: &PlaybackConfig,
        listener: Arc<dyn PlaybackListener>,
    ) -> Result<Box<dyn OutputDevice>> {
        Ok(Box::new(CpalOutput::open(config, listener)?))
    }

    fn open_input(
        &self,
        config: &CaptureConfig,
        processor: FrameProcessor,
    ) -> Result<Box<dyn InputDevice>> {
        Ok(Box::new(CpalInput::open(config, processor)?))
    }
}

/// Names of the host's input and output devices
#[derive(Debug, Clone, Default)]
pub struct DeviceList {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub default_input: Option<String>,
    pub default_output: Option<String>,
}

/// Enumerate audio devices on the default host
///
/// # Errors
///
/// Returns error if the host cannot enumerate devices
pub fn list_devices() -> Result<DeviceList> {
    let host = cpal::default_host();

    let inputs = host
        .input_devices()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter_map(|d| d.name().ok())
        .collect();
    let outputs = host
        .output_devices()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter_map(|d| d.name().ok())
        .collect();

    Ok(DeviceList {
        inputs,
        outputs,
        default_input: host.default_input_device().and_then(|d| d.name().ok()),
        default_output: host.default_output_device().and_then(|d| d.name().ok()),
    })
}
