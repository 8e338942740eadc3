//! Stream stereo frames and IMU samples from a synthetic sensor to stdout.
//!
//! The synthetic transport stands in for a USB backend: it produces
//! well-formed stereo buffers at the requested frame rate and answers IMU
//! polls with one packet per request.
//!
//! Usage: cargo run --example stream

use mynteye::protocol::{self, IMAGE_PACKET_HEADER, IMAGE_PACKET_SIZE, IMU_RES_HEADER};
use mynteye::{
    Continuation, ControlChannel, Device, DeviceOption, FnTransform, FrameCallback, ImgParams,
    ImuParams, Info, MotionSample, Object, Packet, Processor, Source, StereoObject, Stream,
    VideoTransport,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct SyntheticVideo {
    callback: Arc<Mutex<Option<FrameCallback>>>,
    mode: Mutex<(u16, u16, u16)>,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

fn stereo_buffer(width: u16, height: u16, frame_id: u16, timestamp: u32) -> Vec<u8> {
    let pixels = width as usize * height as usize;
    let mut buf: Vec<u8> = (0..pixels * 2).map(|i| (i % 251) as u8).collect();
    let mut raw = [0u8; IMAGE_PACKET_SIZE];
    raw[0] = IMAGE_PACKET_HEADER;
    raw[1] = IMAGE_PACKET_SIZE as u8;
    raw[2..4].copy_from_slice(&frame_id.to_be_bytes());
    raw[4..8].copy_from_slice(&timestamp.to_be_bytes());
    raw[8..10].copy_from_slice(&100u16.to_be_bytes());
    raw[10] = protocol::image_checksum(&raw);
    let len = buf.len();
    for (dst, src) in buf[len - IMAGE_PACKET_SIZE..].iter_mut().zip(raw.iter().rev()) {
        *dst = *src;
    }
    buf
}

impl VideoTransport for SyntheticVideo {
    fn name(&self) -> String {
        "MYNT-EYE-S1030".into()
    }

    fn set_device_mode(
        &self,
        width: u16,
        height: u16,
        _format: mynteye::Format,
        fps: u16,
        callback: FrameCallback,
    ) -> mynteye::Result<()> {
        *self.mode.lock().unwrap() = (width, height, fps.max(1));
        *self.callback.lock().unwrap() = Some(callback);
        Ok(())
    }

    fn start_streaming(&self) -> mynteye::Result<()> {
        let (width, height, fps) = *self.mode.lock().unwrap();
        let callback = self.callback.clone();
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);
        let handle = std::thread::spawn(move || {
            let period = Duration::from_secs(1) / fps as u32;
            let start = Instant::now();
            let mut frame_id = 0u16;
            while running.load(Ordering::SeqCst) {
                let timestamp = (start.elapsed().as_micros() / 10) as u32;
                let buf = stereo_buffer(width, height, frame_id, timestamp);
                if let Some(callback) = callback.lock().unwrap().as_mut() {
                    callback(&buf, Continuation::noop());
                }
                frame_id = frame_id.wrapping_add(1);
                std::thread::sleep(period);
            }
        });
        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    fn stop_streaming(&self) -> mynteye::Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

struct SyntheticControl {
    serial: AtomicU32,
    start: Instant,
}

impl ControlChannel for SyntheticControl {
    fn imu_xfer(&self, _request: &[u8; 5]) -> mynteye::Result<Vec<u8>> {
        let serial = self.serial.fetch_add(1, Ordering::SeqCst) + 1;
        let timestamp = (self.start.elapsed().as_micros() / 10) as u32;

        let mut packet = Vec::new();
        packet.extend_from_slice(&serial.to_be_bytes());
        packet.extend_from_slice(&timestamp.to_be_bytes());
        packet.push(1);
        // offset, frame id, accel xyz, temperature, gyro xyz
        for v in [0i16, serial as i16, 0, 0, 8192, 0, 0, 0, 0] {
            packet.extend_from_slice(&v.to_be_bytes());
        }

        let mut response = vec![IMU_RES_HEADER, 0];
        response.extend_from_slice(&(packet.len() as u16).to_be_bytes());
        response.extend_from_slice(&packet);
        response.push(packet.iter().fold(0, |acc, b| acc ^ b));
        Ok(response)
    }

    fn get_control(&self, option: DeviceOption) -> mynteye::Result<i32> {
        Ok(match option {
            DeviceOption::FrameRate => 25,
            DeviceOption::ImuFrequency => 200,
            _ => 0,
        })
    }

    fn set_control(&self, _option: DeviceOption, _value: i32) -> mynteye::Result<()> {
        Ok(())
    }

    fn run_action(&self, _option: DeviceOption) -> mynteye::Result<bool> {
        Ok(true)
    }

    fn read_device_info(&self) -> mynteye::Result<Vec<u8>> {
        let mut data = vec![0u8; protocol::DEVICE_INFO_SIZE];
        data[..14].copy_from_slice(b"MYNT-EYE-S1030");
        data[16..24].copy_from_slice(b"SYNTH001");
        data[32] = 2;
        data[34] = 2;
        data[37] = 1;
        data[47..49].copy_from_slice(&120u16.to_be_bytes());
        Ok(data)
    }

    fn read_img_params(&self) -> mynteye::Result<Option<ImgParams>> {
        Ok(None)
    }

    fn read_imu_params(&self) -> mynteye::Result<Option<ImuParams>> {
        Ok(None)
    }
}

fn main() {
    env_logger::init();

    let video = Arc::new(SyntheticVideo {
        callback: Arc::new(Mutex::new(None)),
        mode: Mutex::new((0, 0, 1)),
        running: Arc::new(AtomicBool::new(false)),
        thread: Mutex::new(None),
    });
    let control = Arc::new(SyntheticControl {
        serial: AtomicU32::new(0),
        start: Instant::now(),
    });

    let mut device = match Device::create(&video.name(), video.clone(), control) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Failed to open device: {}", e);
            std::process::exit(1);
        }
    };

    for info in [Info::DeviceName, Info::SerialNumber, Info::FirmwareVersion] {
        println!("{:?}: {}", info, device.info(info).unwrap_or_default());
    }
    device.log_option_infos();
    println!();

    // Mean brightness of the left image, computed off the transport thread.
    let brightness = Processor::new(
        "brightness",
        FnTransform::new(
            || Box::new(Packet::new(0.0f64)) as Box<dyn Object>,
            |input: &dyn Object, output: &mut dyn Object| {
                let (Some(frames), Some(out)) = (
                    input.downcast_ref::<StereoObject>(),
                    output.downcast_mut::<Packet<f64>>(),
                ) else {
                    return Ok(false);
                };
                let data = &frames.value.left.frame.data;
                out.value = data.iter().map(|&b| b as f64).sum::<f64>() / data.len().max(1) as f64;
                Ok(true)
            },
        ),
        Duration::from_millis(200),
    );
    if let Err(e) = brightness.activate(false) {
        eprintln!("Failed to start processor: {}", e);
        std::process::exit(1);
    }
    device.attach_processor(brightness.clone());

    let motion_count = Arc::new(AtomicU32::new(0));
    let counter = motion_count.clone();
    let result = device
        .set_motion_callback(
            Some(Box::new(move |sample: MotionSample| {
                if counter.fetch_add(1, Ordering::Relaxed) % 200 == 0 {
                    println!(
                        "imu ts={:<10} accel=[{:+.3}, {:+.3}, {:+.3}] temp={:.1}",
                        sample.timestamp, sample.accel[0], sample.accel[1], sample.accel[2], sample.temperature
                    );
                }
            })),
            true,
        )
        .and_then(|()| device.start(Source::All));
    if let Err(e) = result {
        eprintln!("Failed to start: {}", e);
        std::process::exit(1);
    }

    println!("Streaming for 5 seconds...");
    let start = Instant::now();
    let mut frames = 0u64;
    while start.elapsed() < Duration::from_secs(5) {
        match device.wait_for_streams_timeout(Duration::from_secs(2)) {
            Ok(()) => {}
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        }
        let left = device.stream_datas(Stream::Left).unwrap_or_default();
        frames += left.len() as u64;
        if let Some(sample) = left.last() {
            if sample.frame_id % 25 == 0 {
                let mean = brightness
                    .output()
                    .and_then(|o| o.downcast_ref::<Packet<f64>>().map(|p| p.value))
                    .unwrap_or_default();
                println!(
                    "frame {:<5} ts={:<10} {}x{} mean={:.1}",
                    sample.frame_id,
                    sample.timestamp,
                    sample.width(),
                    sample.height(),
                    mean
                );
            }
        }
    }

    if let Err(e) = device.stop(Source::All) {
        eprintln!("Failed to stop: {}", e);
    }
    let elapsed = start.elapsed().as_secs_f64();
    println!(
        "\nTotal: {} frames ({:.1} Hz), {} IMU samples, {} pipeline drops",
        frames,
        frames as f64 / elapsed,
        motion_count.load(Ordering::Relaxed),
        brightness.dropped_count()
    );
}
