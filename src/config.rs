use std::time::Duration;

/// Tunables of a [`Device`](crate::Device).
///
/// `from_env()` reads `MYNTEYE_*` overrides on top of the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Pause between stopping motion tracking and stopping video streaming.
    pub stop_delay: Duration,
    /// Cadence of IMU polling requests.
    pub imu_poll_interval: Duration,
    /// Bound of the async motion callback queue (500 Hz × ~2 s).
    pub motion_queue_capacity: usize,
    /// Samples kept per stream until drained.
    pub stream_buffer_size: usize,
    /// Warm-up buffers dropped after each video start.
    pub drop_first_frames: u32,
    /// Log the cost of every stereo frame callback.
    pub log_frame_timing: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            stop_delay: Duration::from_millis(10),
            imu_poll_interval: Duration::from_millis(2),
            motion_queue_capacity: 1000,
            stream_buffer_size: 4,
            drop_first_frames: 1,
            log_frame_timing: false,
        }
    }
}

impl DeviceConfig {
    pub fn from_env() -> Self {
        let def = Self::default();
        let config = Self {
            stop_delay: Duration::from_millis(read_env_u64(
                "MYNTEYE_STOP_DELAY_MS",
                def.stop_delay.as_millis() as u64,
            )),
            imu_poll_interval: Duration::from_millis(read_env_u64(
                "MYNTEYE_IMU_POLL_INTERVAL_MS",
                def.imu_poll_interval.as_millis() as u64,
            )),
            motion_queue_capacity: read_env_u64(
                "MYNTEYE_MOTION_QUEUE_CAPACITY",
                def.motion_queue_capacity as u64,
            )
            .max(1) as usize,
            stream_buffer_size: read_env_u64(
                "MYNTEYE_STREAM_BUFFER_SIZE",
                def.stream_buffer_size as u64,
            )
            .max(1) as usize,
            drop_first_frames: read_env_u64(
                "MYNTEYE_DROP_FIRST_FRAMES",
                def.drop_first_frames as u64,
            ) as u32,
            log_frame_timing: read_env_bool("MYNTEYE_LOG_TIMING", def.log_frame_timing),
        };
        log::debug!("Device config: {:?}", config);
        config
    }
}

pub(crate) fn read_env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| {
            let v = v.trim().to_ascii_lowercase();
            match v.as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            }
        })
        .unwrap_or(default)
}

pub(crate) fn read_env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_overrides() {
        std::env::set_var("MYNTEYE_STOP_DELAY_MS", "25");
        std::env::set_var("MYNTEYE_MOTION_QUEUE_CAPACITY", "0");
        std::env::set_var("MYNTEYE_STREAM_BUFFER_SIZE", "not-a-number");
        let config = DeviceConfig::from_env();
        std::env::remove_var("MYNTEYE_STOP_DELAY_MS");
        std::env::remove_var("MYNTEYE_MOTION_QUEUE_CAPACITY");
        std::env::remove_var("MYNTEYE_STREAM_BUFFER_SIZE");

        assert_eq!(config.stop_delay, Duration::from_millis(25));
        assert_eq!(config.motion_queue_capacity, 1);
        assert_eq!(config.stream_buffer_size, 4);
    }

    #[test]
    fn test_read_env_bool() {
        std::env::set_var("MYNTEYE_TEST_FLAG", " Yes ");
        assert!(read_env_bool("MYNTEYE_TEST_FLAG", false));
        std::env::set_var("MYNTEYE_TEST_FLAG", "off");
        assert!(!read_env_bool("MYNTEYE_TEST_FLAG", true));
        std::env::remove_var("MYNTEYE_TEST_FLAG");
        assert!(read_env_bool("MYNTEYE_TEST_FLAG", true));
    }
}
