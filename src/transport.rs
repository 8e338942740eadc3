//! Seams to the USB transport.
//!
//! The library never talks to the wire directly: video buffers arrive through
//! a [`VideoTransport`] and every control/IMU request goes through a
//! [`ControlChannel`]. Platform backends and test doubles implement these.

use crate::calib::{ImgParams, ImuParams};
use crate::types::{DeviceOption, Format};
use crate::Result;

/// Receives one raw buffer plus the continuation that lets the transport
/// deliver the next one. Invoked on a transport-owned thread.
pub type FrameCallback = Box<dyn FnMut(&[u8], Continuation) + Send>;

/// One-shot release of the transport's receive path.
///
/// Call [`Continuation::release`] before doing slow work. An unreleased
/// continuation is released when dropped.
pub struct Continuation {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Continuation {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Continuation with nothing to release.
    pub fn noop() -> Self {
        Self { release: None }
    }

    pub fn release(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Continuation {
    fn drop(&mut self) {
        self.fire();
    }
}

impl std::fmt::Debug for Continuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Continuation")
            .field("pending", &self.release.is_some())
            .finish()
    }
}

/// Video side of the device: mode selection and the streaming switch.
pub trait VideoTransport: Send + Sync {
    /// Name reported by the device, e.g. `MYNT-EYE-S1030`.
    fn name(&self) -> String;

    fn set_device_mode(
        &self,
        width: u16,
        height: u16,
        format: Format,
        fps: u16,
        callback: FrameCallback,
    ) -> Result<()>;

    fn start_streaming(&self) -> Result<()>;

    fn stop_streaming(&self) -> Result<()>;
}

/// Control side of the device: IMU polling, options and calibration blocks.
pub trait ControlChannel: Send + Sync {
    /// Send one 5-byte IMU request and return the raw response.
    fn imu_xfer(&self, request: &[u8; 5]) -> Result<Vec<u8>>;

    fn get_control(&self, option: DeviceOption) -> Result<i32>;

    fn set_control(&self, option: DeviceOption, value: i32) -> Result<()>;

    /// Trigger an action option. `Ok(false)` when the device refused it.
    fn run_action(&self, option: DeviceOption) -> Result<bool>;

    /// Raw device info block.
    fn read_device_info(&self) -> Result<Vec<u8>>;

    /// `Ok(None)` when the device carries no image calibration.
    fn read_img_params(&self) -> Result<Option<ImgParams>>;

    fn read_imu_params(&self) -> Result<Option<ImuParams>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_continuation_releases_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let cont = Continuation::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        cont.release();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let c = count.clone();
        let cont = Continuation::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        drop(cont);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        Continuation::noop().release();
    }
}
