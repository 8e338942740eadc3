use std::fmt;
use std::sync::Arc;

/// Hardware model of the sensor head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Model {
    /// Standard stereo + IMU model (S series).
    Standard,
}

/// Logical image channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stream {
    Left,
    Right,
    LeftRectified,
    RightRectified,
    Disparity,
    DisparityNormalized,
    Depth,
    Points,
}

bitflags::bitflags! {
    /// Hardware feature classes gating which streams and requests are valid.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        const STEREO    = 1 << 0;
        const COLOR     = 1 << 1;
        const DEPTH     = 1 << 2;
        const POINTS    = 1 << 3;
        const FISHEYE   = 1 << 4;
        const INFRARED  = 1 << 5;
        const INFRARED2 = 1 << 6;
        const IMU       = 1 << 7;
    }
}

bitflags::bitflags! {
    /// Flag byte carried by the hardware version.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HardwareFlags: u8 {
        const INFRARED  = 1 << 0;
        const INFRARED2 = 1 << 1;
    }
}

/// Optional hardware add-ons, reported through the hardware version flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOns {
    Infrared,
    Infrared2,
}

/// Integer-valued device controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceOption {
    Gain,
    Brightness,
    Contrast,
    FrameRate,
    ImuFrequency,
    ExposureMode,
    MaxGain,
    MaxExposureTime,
    DesiredBrightness,
    IrControl,
    HdrMode,
    ZeroDriftCalibration,
    EraseChip,
}

impl DeviceOption {
    /// Options that trigger a one-shot device action instead of holding a value.
    pub fn is_action(self) -> bool {
        matches!(self, DeviceOption::ZeroDriftCalibration | DeviceOption::EraseChip)
    }
}

/// Range and default of an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OptionInfo {
    pub min: i32,
    pub max: i32,
    pub def: i32,
}

/// Device identity fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Info {
    DeviceName,
    SerialNumber,
    FirmwareVersion,
    HardwareVersion,
    SpecVersion,
    LensType,
    ImuType,
    NominalBaseline,
}

/// Independently controlled data sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    VideoStreaming,
    MotionTracking,
    All,
}

/// Pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Grey,
    Yuyv,
}

impl Format {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Format::Grey => 1,
            Format::Yuyv => 2,
        }
    }
}

/// A concrete (resolution, pixel format, frame rate) configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamRequest {
    pub width: u16,
    pub height: u16,
    pub format: Format,
    pub fps: u16,
}

impl StreamRequest {
    pub const fn new(width: u16, height: u16, format: Format, fps: u16) -> Self {
        Self {
            width,
            height,
            format,
            fps,
        }
    }

    /// Bytes in one raw buffer of this request.
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}

/// Firmware/spec version "major.minor".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HardwareVersion {
    pub version: Version,
    pub flag: HardwareFlags,
}

impl fmt::Display for HardwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.version.fmt(f)
    }
}

/// Lens or IMU part type (vendor + product code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Type {
    pub vendor: u16,
    pub product: u16,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}", self.vendor, self.product)
    }
}

/// Identity block read from the device at initialization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceInfo {
    pub name: String,
    pub serial_number: String,
    pub firmware_version: Version,
    pub hardware_version: HardwareVersion,
    pub spec_version: Version,
    pub lens_type: Type,
    pub imu_type: Type,
    pub nominal_baseline: u16,
}

/// Pixel buffer of one image.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u16,
    pub height: u16,
    pub format: Format,
    pub data: Vec<u8>,
}

/// One decoded image frame.
///
/// The pixel buffer is shared, so handing a sample to both a callback and the
/// processing pipeline never copies pixels.
#[derive(Debug, Clone)]
pub struct StreamSample {
    pub frame: Arc<Frame>,
    pub frame_id: u16,
    /// Device timestamp in 10 µs ticks.
    pub timestamp: u32,
    pub exposure_time: u16,
}

impl StreamSample {
    pub fn width(&self) -> u16 {
        self.frame.width
    }

    pub fn height(&self) -> u16 {
        self.frame.height
    }

    pub fn format(&self) -> Format {
        self.frame.format
    }
}

/// One IMU segment converted to physical units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSample {
    pub frame_id: u16,
    /// Offset of this segment from its packet timestamp.
    pub offset: i16,
    /// Packet timestamp + offset.
    pub timestamp: u32,
    /// Acceleration in g.
    pub accel: [f64; 3],
    /// Angular rate in deg/s.
    pub gyro: [f64; 3],
    /// Temperature in °C.
    pub temperature: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_display_and_order() {
        let v = Version::new(1, 2);
        assert_eq!(v.to_string(), "1.2");
        assert!(v < Version::new(2, 0));
        assert!(Version::new(1, 10) > v);
    }

    #[test]
    fn test_type_display() {
        let t = Type {
            vendor: 0x01,
            product: 0x0A,
        };
        assert_eq!(t.to_string(), "010A");
    }

    #[test]
    fn test_stream_request_frame_size() {
        let req = StreamRequest::new(752, 480, Format::Yuyv, 25);
        assert_eq!(req.frame_size(), 752 * 480 * 2);
    }
}
