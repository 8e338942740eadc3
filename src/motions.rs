use crate::async_callback::Delivery;
use crate::protocol::{self, ImuReqPacket, ImuResPacket, IMU_RES_HEADER};
use crate::transport::ControlChannel;
use crate::types::MotionSample;
use crate::Result;
use crossbeam_channel::{RecvTimeoutError, Sender};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

struct Cache {
    max: usize,
    samples: VecDeque<MotionSample>,
}

#[derive(Default)]
struct Shared {
    callback: Mutex<Option<Delivery<MotionSample>>>,
    cache: Mutex<Option<Cache>>,
    errors: AtomicU64,
    samples: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn publish(&self, sample: MotionSample) {
        self.samples.fetch_add(1, Ordering::Relaxed);
        if let Some(cache) = lock(&self.cache).as_mut() {
            if cache.samples.len() >= cache.max {
                cache.samples.pop_front();
            }
            cache.samples.push_back(sample);
        }
        if let Some(callback) = lock(&self.callback).as_mut() {
            callback.deliver(sample);
        }
    }

    fn reject(&self, reason: std::fmt::Arguments<'_>) {
        let total = self.errors.fetch_add(1, Ordering::Relaxed) + 1;
        log::warn!("IMU response dropped: {} (total {})", reason, total);
    }
}

struct Worker {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

/// Motion tracking subsystem: polls the device for IMU packets on a
/// background thread and fans the decoded samples out.
pub(crate) struct Motions {
    channel: Arc<dyn ControlChannel>,
    poll_interval: Duration,
    shared: Arc<Shared>,
    worker: Option<Worker>,
}

impl Motions {
    pub fn new(channel: Arc<dyn ControlChannel>, poll_interval: Duration) -> Self {
        Self {
            channel,
            poll_interval,
            shared: Arc::new(Shared::default()),
            worker: None,
        }
    }

    pub fn set_callback(&self, callback: Option<Delivery<MotionSample>>) {
        *lock(&self.shared.callback) = callback;
    }

    pub fn has_callback(&self) -> bool {
        lock(&self.shared.callback).is_some()
    }

    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let (stop, stop_rx) = crossbeam_channel::bounded(1);
        let channel = self.channel.clone();
        let shared = self.shared.clone();
        let interval = self.poll_interval;

        let thread = std::thread::Builder::new()
            .name("mynteye-motions".into())
            .spawn(move || {
                log::info!("Motion polling started");
                let mut serial_number = 0;
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    poll_once(channel.as_ref(), &shared, &mut serial_number);
                }
                log::info!("Motion polling stopped");
            })?;

        self.worker = Some(Worker { stop, thread });
        Ok(())
    }

    /// Signal the polling thread and wait for it to exit.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop.send(());
            if worker.thread.join().is_err() {
                log::error!("Motion polling thread panicked");
            }
        }
    }

    /// Start caching samples, keeping at most `max` until drained.
    pub fn enable_datas(&self, max: usize) {
        let mut cache = lock(&self.shared.cache);
        match cache.as_mut() {
            Some(cache) => {
                cache.max = max.max(1);
                while cache.samples.len() > cache.max {
                    cache.samples.pop_front();
                }
            }
            None => {
                *cache = Some(Cache {
                    max: max.max(1),
                    samples: VecDeque::new(),
                })
            }
        }
    }

    /// Drain cached samples. `None` when caching was never enabled.
    pub fn datas(&self) -> Option<Vec<MotionSample>> {
        lock(&self.shared.cache)
            .as_mut()
            .map(|cache| cache.samples.drain(..).collect())
    }

    pub fn error_count(&self) -> u64 {
        self.shared.errors.load(Ordering::Relaxed)
    }

    pub fn sample_count(&self) -> u64 {
        self.shared.samples.load(Ordering::Relaxed)
    }
}

impl Drop for Motions {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One request/response round trip. Advances `serial_number` to the last
/// packet received.
fn poll_once(channel: &dyn ControlChannel, shared: &Shared, serial_number: &mut u32) {
    let request = ImuReqPacket::new(*serial_number);
    let data = match channel.imu_xfer(&request.to_bytes()) {
        Ok(data) => data,
        Err(e) => {
            shared.reject(format_args!("transfer failed: {}", e));
            return;
        }
    };
    if data.is_empty() {
        return;
    }

    let response = match ImuResPacket::from_bytes(&data) {
        Ok(response) => response,
        Err(e) => {
            shared.reject(format_args!("{}", e));
            return;
        }
    };
    if response.header != IMU_RES_HEADER {
        shared.reject(format_args!("bad marker 0x{:02X}", response.header));
        return;
    }
    match protocol::imu_checksum(&data) {
        Ok(sum) if sum == response.checksum => {}
        Ok(sum) => {
            shared.reject(format_args!(
                "checksum 0x{:02X} != 0x{:02X}",
                sum, response.checksum
            ));
            return;
        }
        Err(e) => {
            shared.reject(format_args!("{}", e));
            return;
        }
    }

    for packet in &response.packets {
        for segment in &packet.segments {
            shared.publish(protocol::motion_sample(packet, segment));
        }
    }
    if let Some(last) = response.packets.last() {
        *serial_number = last.serial_number;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::calib::{ImgParams, ImuParams};
    use crate::protocol::tests::{packet_bytes, response_bytes, segment_bytes};
    use crate::types::DeviceOption;
    use crate::MyntEyeError;
    use crossbeam_channel::Receiver;

    /// Control channel that replays scripted IMU responses and records every
    /// request serial number.
    #[derive(Default)]
    pub(crate) struct ScriptedChannel {
        pub responses: Mutex<VecDeque<Vec<u8>>>,
        pub requests: Mutex<Vec<u32>>,
    }

    impl ControlChannel for ScriptedChannel {
        fn imu_xfer(&self, request: &[u8; 5]) -> Result<Vec<u8>> {
            let request = ImuReqPacket::from_bytes(request)?;
            lock(&self.requests).push(request.serial_number);
            Ok(lock(&self.responses).pop_front().unwrap_or_default())
        }

        fn get_control(&self, _: DeviceOption) -> Result<i32> {
            Err(MyntEyeError::Transport("no controls".into()))
        }

        fn set_control(&self, _: DeviceOption, _: i32) -> Result<()> {
            Err(MyntEyeError::Transport("no controls".into()))
        }

        fn run_action(&self, _: DeviceOption) -> Result<bool> {
            Ok(false)
        }

        fn read_device_info(&self) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        fn read_img_params(&self) -> Result<Option<ImgParams>> {
            Ok(None)
        }

        fn read_imu_params(&self) -> Result<Option<ImuParams>> {
            Ok(None)
        }
    }

    fn seg(frame_id: u16) -> Vec<u8> {
        segment_bytes(1, frame_id, [8192, 0, 0], 0, [0, 0, 65])
    }

    fn collect(motions: &Motions) -> Receiver<MotionSample> {
        let (tx, rx) = crossbeam_channel::unbounded();
        motions.set_callback(Some(
            Delivery::new("test", 1, false, move |s| {
                let _ = tx.send(s);
            })
            .unwrap(),
        ));
        rx
    }

    #[test]
    fn test_poll_fans_out_and_tracks_serial() {
        let channel = ScriptedChannel::default();
        let shared = Shared::default();
        lock(&channel.responses).push_back(response_bytes(&[
            packet_bytes(7, 100, &[seg(1), seg(2)]),
            packet_bytes(8, 200, &[seg(3)]),
        ]));

        let mut serial = 0;
        poll_once(&channel, &shared, &mut serial);
        assert_eq!(serial, 8);
        assert_eq!(shared.samples.load(Ordering::Relaxed), 3);

        // Empty response keeps the serial number.
        poll_once(&channel, &shared, &mut serial);
        assert_eq!(serial, 8);
        assert_eq!(*lock(&channel.requests), [0, 8]);
    }

    #[test]
    fn test_bad_checksum_counted() {
        let channel = ScriptedChannel::default();
        let shared = Shared::default();
        let mut bad = response_bytes(&[packet_bytes(3, 0, &[seg(1)])]);
        let last = bad.len() - 1;
        bad[last] ^= 0x01;
        lock(&channel.responses).push_back(bad);
        let mut wrong_marker = response_bytes(&[packet_bytes(4, 0, &[seg(1)])]);
        wrong_marker[0] = 0x00;
        lock(&channel.responses).push_back(wrong_marker);

        let mut serial = 0;
        poll_once(&channel, &shared, &mut serial);
        poll_once(&channel, &shared, &mut serial);
        assert_eq!(serial, 0);
        assert_eq!(shared.errors.load(Ordering::Relaxed), 2);
        assert_eq!(shared.samples.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_worker_delivers_in_order() {
        let channel = Arc::new(ScriptedChannel::default());
        lock(&channel.responses).push_back(response_bytes(&[packet_bytes(1, 1000, &[seg(1), seg(2)])]));
        lock(&channel.responses).push_back(response_bytes(&[packet_bytes(2, 2000, &[seg(3)])]));

        let mut motions = Motions::new(channel.clone(), Duration::from_millis(1));
        let rx = collect(&motions);
        motions.enable_datas(2);
        motions.start().unwrap();
        motions.start().unwrap();

        let ids: Vec<u16> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap().frame_id)
            .collect();
        assert_eq!(ids, [1, 2, 3]);
        motions.stop();
        assert!(motions.worker.is_none());

        let cached: Vec<u16> = motions.datas().unwrap().iter().map(|s| s.frame_id).collect();
        assert_eq!(cached, [2, 3]);
        assert!(motions.datas().unwrap().is_empty());
        assert_eq!(motions.sample_count(), 3);
        assert_eq!(lock(&channel.requests)[..2], [0, 1]);
    }

    #[test]
    fn test_datas_disabled_by_default() {
        let motions = Motions::new(Arc::new(ScriptedChannel::default()), Duration::from_millis(1));
        assert!(motions.datas().is_none());
    }
}
