//! Per-model support tables.
//!
//! Immutable process-wide data; nothing here is written after compile time.

use crate::types::{Capabilities, DeviceOption, Format, Model, OptionInfo, Stream, StreamRequest};

const STANDARD_STREAMS: &[Stream] = &[Stream::Left, Stream::Right];

const STANDARD_OPTIONS: &[DeviceOption] = &[
    DeviceOption::Gain,
    DeviceOption::Brightness,
    DeviceOption::Contrast,
    DeviceOption::FrameRate,
    DeviceOption::ImuFrequency,
    DeviceOption::ExposureMode,
    DeviceOption::MaxGain,
    DeviceOption::MaxExposureTime,
    DeviceOption::DesiredBrightness,
    DeviceOption::IrControl,
    DeviceOption::HdrMode,
    DeviceOption::ZeroDriftCalibration,
    DeviceOption::EraseChip,
];

const STANDARD_STEREO_REQUESTS: &[StreamRequest] =
    &[StreamRequest::new(752, 480, Format::Yuyv, 25)];

const FRAME_RATE_VALUES: &[i32] = &[10, 15, 20, 25, 30, 35, 40, 45, 50, 55, 60];
const IMU_FREQUENCY_VALUES: &[i32] = &[100, 200, 250, 333, 500];

/// Streams the model can deliver.
pub fn stream_supports(model: Model) -> &'static [Stream] {
    match model {
        Model::Standard => STANDARD_STREAMS,
    }
}

pub fn capabilities_supports(model: Model) -> Capabilities {
    match model {
        Model::Standard => Capabilities::STEREO | Capabilities::IMU,
    }
}

pub fn option_supports(model: Model) -> &'static [DeviceOption] {
    match model {
        Model::Standard => STANDARD_OPTIONS,
    }
}

/// Valid requests of one capability; empty when the model has none.
pub fn stream_requests(model: Model, capability: Capabilities) -> &'static [StreamRequest] {
    match model {
        Model::Standard if capability == Capabilities::STEREO => STANDARD_STEREO_REQUESTS,
        Model::Standard => &[],
    }
}

/// Streams produced by one buffer of a capability.
pub fn key_streams(capability: Capabilities) -> &'static [Stream] {
    if capability == Capabilities::STEREO {
        &[Stream::Left, Stream::Right]
    } else {
        &[]
    }
}

pub fn option_info(model: Model, option: DeviceOption) -> Option<OptionInfo> {
    if !option_supports(model).contains(&option) {
        return None;
    }
    let (min, max, def) = match option {
        DeviceOption::Gain => (0, 48, 24),
        DeviceOption::Brightness => (0, 240, 120),
        DeviceOption::Contrast => (0, 255, 127),
        DeviceOption::FrameRate => (10, 60, 25),
        DeviceOption::ImuFrequency => (100, 500, 200),
        DeviceOption::ExposureMode => (0, 1, 0),
        DeviceOption::MaxGain => (0, 48, 48),
        DeviceOption::MaxExposureTime => (0, 240, 240),
        DeviceOption::DesiredBrightness => (0, 255, 192),
        DeviceOption::IrControl => (0, 160, 0),
        DeviceOption::HdrMode => (0, 1, 0),
        DeviceOption::ZeroDriftCalibration | DeviceOption::EraseChip => (0, 0, 0),
    };
    Some(OptionInfo { min, max, def })
}

/// Discrete value set, for options that accept only listed values.
pub fn option_values(option: DeviceOption) -> Option<&'static [i32]> {
    match option {
        DeviceOption::FrameRate => Some(FRAME_RATE_VALUES),
        DeviceOption::ImuFrequency => Some(IMU_FREQUENCY_VALUES),
        _ => None,
    }
}

/// Check `value` against the range and discrete set of `option`.
pub fn option_accepts(model: Model, option: DeviceOption, value: i32) -> bool {
    let Some(info) = option_info(model, option) else {
        return false;
    };
    if value < info.min || value > info.max {
        return false;
    }
    option_values(option).map_or(true, |values| values.contains(&value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_tables() {
        let caps = capabilities_supports(Model::Standard);
        assert!(caps.contains(Capabilities::STEREO | Capabilities::IMU));
        assert!(!caps.contains(Capabilities::DEPTH));
        assert_eq!(stream_requests(Model::Standard, Capabilities::STEREO).len(), 1);
        assert!(stream_requests(Model::Standard, Capabilities::COLOR).is_empty());
        assert!(stream_supports(Model::Standard).contains(&Stream::Left));
        assert!(!stream_supports(Model::Standard).contains(&Stream::Depth));
    }

    #[test]
    fn test_option_accepts() {
        assert!(option_accepts(Model::Standard, DeviceOption::FrameRate, 25));
        assert!(!option_accepts(Model::Standard, DeviceOption::FrameRate, 27));
        assert!(option_accepts(Model::Standard, DeviceOption::ImuFrequency, 333));
        assert!(!option_accepts(Model::Standard, DeviceOption::ImuFrequency, 300));
        assert!(option_accepts(Model::Standard, DeviceOption::Gain, 48));
        assert!(!option_accepts(Model::Standard, DeviceOption::Gain, 49));
    }
}
