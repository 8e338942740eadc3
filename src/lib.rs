//! # mynteye - Rust SDK core for MYNT EYE stereo camera/IMU sensors
//!
//! Turns raw USB buffers from the sensor head into typed samples. Provides:
//! - Device discovery over USB and identity/calibration queries
//! - Stereo video streaming with per-stream callbacks (direct or async)
//! - IMU motion tracking through a polling thread
//! - A threaded processing graph fed with every stereo frame
//!
//! The USB transport itself is plugged in through [`VideoTransport`] and
//! [`ControlChannel`].
//!
//! ## Quick Start
//! ```no_run
//! use mynteye::{ControlChannel, Device, Source, Stream, VideoTransport};
//! use std::sync::Arc;
//!
//! fn run(video: Arc<dyn VideoTransport>, channel: Arc<dyn ControlChannel>) -> mynteye::Result<()> {
//!     let mut device = Device::create(&video.name(), video, channel)?;
//!     device.set_stream_callback(
//!         Stream::Left,
//!         Some(Box::new(|sample| println!("left frame {}", sample.frame_id))),
//!         true,
//!     )?;
//!     device.start(Source::All)?;
//!     for _ in 0..100 {
//!         device.wait_for_streams()?;
//!         let right = device.stream_datas(Stream::Right)?;
//!         println!("{} right frame(s)", right.len());
//!     }
//!     device.stop(Source::All)
//! }
//! ```

pub mod error;
pub mod types;
pub mod calib;
pub mod protocol;
pub mod supports;
pub mod config;
pub mod transport;
pub mod object;
pub mod async_callback;
pub mod processor;
pub mod streams;
mod motions;
pub mod usb;
pub mod device;

pub use async_callback::AsyncCallback;
pub use calib::{Extrinsics, ImgParams, ImuIntrinsics, ImuParams, Intrinsics, MotionIntrinsics};
pub use config::DeviceConfig;
pub use device::{Device, MotionCallback, StreamCallback};
pub use error::MyntEyeError;
pub use object::{Object, Packet, StereoFrames, StereoObject};
pub use processor::{FnTransform, Processor, Transform};
pub use transport::{Continuation, ControlChannel, FrameCallback, VideoTransport};
pub use types::*;
pub use usb::{list_devices, UsbDeviceInfo};

/// Result type alias for mynteye operations.
pub type Result<T> = std::result::Result<T, MyntEyeError>;
