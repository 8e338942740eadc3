use crate::types::{Capabilities, Stream};

/// Errors that can occur when driving the sensor.
#[derive(Debug, thiserror::Error)]
pub enum MyntEyeError {
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("Unsupported device model: {0}")]
    UnsupportedModel(String),

    #[error("Unsupported stream: {stream:?}. Please use these: {supported:?}")]
    UnsupportedStream {
        stream: Stream,
        supported: Vec<Stream>,
    },

    #[error("Unsupported capability: {0:?}")]
    UnsupportedCapability(Capabilities),

    #[error("Stream request of {0:?} not found, please config one")]
    StreamRequestNotFound(Capabilities),

    #[error("Video streaming is not started")]
    NotStreaming,

    #[error("Motion tracking is not started")]
    NotTracking,

    #[error("{what} too short at offset {offset}: need {needed} bytes")]
    ShortBuffer {
        what: &'static str,
        offset: usize,
        needed: usize,
    },

    #[error("IMU packet at offset {offset} overruns declared size {size}")]
    Framing { offset: usize, size: usize },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Timeout waiting for data")]
    Timeout,

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
