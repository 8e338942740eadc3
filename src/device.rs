use crate::async_callback::Delivery;
use crate::calib::{Extrinsics, Intrinsics, MotionIntrinsics};
use crate::config::DeviceConfig;
use crate::motions::Motions;
use crate::object::StereoObject;
use crate::processor::Processor;
use crate::streams::StreamStore;
use crate::supports;
use crate::transport::{ControlChannel, FrameCallback, VideoTransport};
use crate::types::{
    AddOns, Capabilities, DeviceInfo, DeviceOption, HardwareFlags, Info, Model, MotionSample,
    OptionInfo, Source, Stream, StreamRequest, StreamSample,
};
use crate::{protocol, MyntEyeError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

pub type StreamCallback = Box<dyn FnMut(StreamSample) + Send>;
pub type MotionCallback = Box<dyn FnMut(MotionSample) + Send>;

/// Stream callbacks only ever hold the newest undelivered frame.
const STREAM_QUEUE_CAPACITY: usize = 1;

type StreamCallbacks = Arc<Mutex<HashMap<Stream, Delivery<StreamSample>>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Model code following the `MYNT-EYE-` prefix of a device name, e.g. `S1030-IR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceModel {
    pub kind: char,
    pub generation: char,
    pub baseline_code: char,
    pub hardware_code: char,
    pub custom_code: char,
    pub ir_fixed: bool,
}

impl DeviceModel {
    pub fn parse(code: &str) -> Option<Self> {
        let mut chars = code.chars();
        let model = Self {
            kind: chars.next()?,
            generation: chars.next()?,
            baseline_code: chars.next()?,
            hardware_code: chars.next()?,
            custom_code: chars.next()?,
            ir_fixed: chars.as_str() == "-IR",
        };
        Some(model)
    }
}

/// Pick the hardware model from the name the device reports.
pub fn model_from_name(name: &str) -> Result<Model> {
    if name == "MYNTEYE" {
        return Ok(Model::Standard);
    }
    let code = name
        .strip_prefix("MYNT-EYE-")
        .ok_or_else(|| MyntEyeError::UnsupportedModel(name.to_string()))?;
    let model = DeviceModel::parse(code)
        .ok_or_else(|| MyntEyeError::UnsupportedModel(name.to_string()))?;
    log::debug!("MYNT EYE model: {} {:?}", code, model);
    match model.kind {
        'S' => Ok(Model::Standard),
        _ => Err(MyntEyeError::UnsupportedModel(name.to_string())),
    }
}

/// One sensor head: calibration, options and the video/motion lifecycles.
pub struct Device {
    model: Model,
    config: DeviceConfig,
    video: Arc<dyn VideoTransport>,
    channel: Arc<dyn ControlChannel>,

    info: Option<DeviceInfo>,
    stream_intrinsics: HashMap<Stream, Intrinsics>,
    /// Keyed by (from, to).
    stream_extrinsics: HashMap<(Stream, Stream), Extrinsics>,
    motion_intrinsics: Option<MotionIntrinsics>,
    motion_extrinsics: HashMap<Stream, Extrinsics>,

    config_requests: HashMap<Capabilities, StreamRequest>,
    stream_callbacks: StreamCallbacks,
    streams: Arc<StreamStore>,
    motions: Motions,
    pipeline: Arc<Mutex<Option<Arc<Processor>>>>,

    video_streaming: bool,
    motion_tracking: bool,
}

impl Device {
    /// Bind to a sensor reporting `name`, with configuration from the environment.
    pub fn create(
        name: &str,
        video: Arc<dyn VideoTransport>,
        channel: Arc<dyn ControlChannel>,
    ) -> Result<Device> {
        Self::with_config(name, video, channel, DeviceConfig::from_env())
    }

    pub fn with_config(
        name: &str,
        video: Arc<dyn VideoTransport>,
        channel: Arc<dyn ControlChannel>,
        config: DeviceConfig,
    ) -> Result<Device> {
        let model = model_from_name(name)?;
        let key_streams = supports::key_streams(Capabilities::STEREO);
        let mut device = Device {
            model,
            streams: Arc::new(StreamStore::new(key_streams, config.stream_buffer_size)),
            motions: Motions::new(channel.clone(), config.imu_poll_interval),
            config,
            video,
            channel,
            info: None,
            stream_intrinsics: HashMap::new(),
            stream_extrinsics: HashMap::new(),
            motion_intrinsics: None,
            motion_extrinsics: HashMap::new(),
            config_requests: HashMap::new(),
            stream_callbacks: Arc::new(Mutex::new(HashMap::new())),
            pipeline: Arc::new(Mutex::new(None)),
            video_streaming: false,
            motion_tracking: false,
        };
        device.read_all_infos();
        log::info!("Opened {} ({:?})", name, model);
        Ok(device)
    }

    fn read_all_infos(&mut self) {
        match self
            .channel
            .read_device_info()
            .and_then(|data| protocol::parse_device_info(&data))
        {
            Ok(info) => {
                log::debug!(
                    "Device info: name={} serial={} firmware={} hardware={} spec={} lens={} imu={} baseline={}",
                    info.name,
                    info.serial_number,
                    info.firmware_version,
                    info.hardware_version,
                    info.spec_version,
                    info.lens_type,
                    info.imu_type,
                    info.nominal_baseline
                );
                self.info = Some(info);
            }
            Err(e) => log::warn!(
                "Read device infos failed ({}). Please upgrade your firmware to the latest version.",
                e
            ),
        }

        match self.channel.read_img_params() {
            Ok(Some(params)) => {
                self.set_intrinsics(Stream::Left, params.in_left);
                self.set_intrinsics(Stream::Right, params.in_right);
                self.set_extrinsics(Stream::Right, Stream::Left, params.ex_right_to_left);
            }
            Ok(None) => log::warn!("Device carries no image calibration"),
            Err(e) => log::warn!("Read image calibration failed: {}", e),
        }

        match self.channel.read_imu_params() {
            Ok(Some(params)) => {
                self.set_motion_intrinsics(MotionIntrinsics {
                    accel: params.in_accel,
                    gyro: params.in_gyro,
                });
                self.set_motion_extrinsics(Stream::Left, params.ex_left_to_imu);
            }
            Ok(None) => log::warn!("Device carries no IMU calibration"),
            Err(e) => log::warn!("Read IMU calibration failed: {}", e),
        }
    }

    pub fn model(&self) -> Model {
        self.model
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn supports_stream(&self, stream: Stream) -> bool {
        supports::stream_supports(self.model).contains(&stream)
    }

    pub fn supports_capability(&self, capability: Capabilities) -> bool {
        supports::capabilities_supports(self.model).contains(capability)
    }

    pub fn supports_option(&self, option: DeviceOption) -> bool {
        supports::option_supports(self.model).contains(&option)
    }

    /// Read from the hardware version flags; `false` without device info.
    pub fn supports_addon(&self, addon: AddOns) -> bool {
        let Some(info) = &self.info else {
            log::warn!("Device info not available, cannot check add-on {:?}", addon);
            return false;
        };
        let flag = info.hardware_version.flag;
        match addon {
            AddOns::Infrared => flag.contains(HardwareFlags::INFRARED),
            AddOns::Infrared2 => flag.contains(HardwareFlags::INFRARED2),
        }
    }

    fn check_stream(&self, stream: Stream) -> Result<()> {
        if self.supports_stream(stream) {
            Ok(())
        } else {
            Err(MyntEyeError::UnsupportedStream {
                stream,
                supported: supports::stream_supports(self.model).to_vec(),
            })
        }
    }

    /// Valid requests of `capability`.
    pub fn stream_requests(&self, capability: Capabilities) -> Result<&'static [StreamRequest]> {
        if !self.supports_capability(capability) {
            return Err(MyntEyeError::UnsupportedCapability(capability));
        }
        let requests = supports::stream_requests(self.model, capability);
        if requests.is_empty() {
            return Err(MyntEyeError::StreamRequestNotFound(capability));
        }
        Ok(requests)
    }

    /// Select the request used at the next video start. Returns whether it was
    /// accepted; requests outside the capability's list are ignored.
    pub fn config_stream_request(
        &mut self,
        capability: Capabilities,
        request: StreamRequest,
    ) -> Result<bool> {
        if !self.stream_requests(capability)?.contains(&request) {
            log::warn!(
                "Config stream request of {:?} is not accepted: {:?}",
                capability,
                request
            );
            return Ok(false);
        }
        self.config_requests.insert(capability, request);
        Ok(true)
    }

    /// Configured request of `capability`, else the first valid one.
    pub fn stream_request(&self, capability: Capabilities) -> Result<StreamRequest> {
        if let Some(request) = self.config_requests.get(&capability) {
            return Ok(*request);
        }
        let request = self.stream_requests(capability)?[0];
        log::debug!("Select the first stream request of {:?}", capability);
        Ok(request)
    }

    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.info.as_ref()
    }

    pub fn info(&self, info: Info) -> Option<String> {
        let Some(d) = &self.info else {
            log::warn!("Device info not available");
            return None;
        };
        Some(match info {
            Info::DeviceName => d.name.clone(),
            Info::SerialNumber => d.serial_number.clone(),
            Info::FirmwareVersion => d.firmware_version.to_string(),
            Info::HardwareVersion => d.hardware_version.to_string(),
            Info::SpecVersion => d.spec_version.to_string(),
            Info::LensType => d.lens_type.to_string(),
            Info::ImuType => d.imu_type.to_string(),
            Info::NominalBaseline => d.nominal_baseline.to_string(),
        })
    }

    pub fn intrinsics(&self, stream: Stream) -> Option<Intrinsics> {
        let found = self.stream_intrinsics.get(&stream).copied();
        if found.is_none() {
            log::warn!("Intrinsics of {:?} not found", stream);
        }
        found
    }

    /// Transform from `from` to `to`. Falls back to the inverse of the
    /// reverse pair when only that direction is known.
    pub fn extrinsics(&self, from: Stream, to: Stream) -> Option<Extrinsics> {
        if let Some(ex) = self.stream_extrinsics.get(&(from, to)) {
            return Some(*ex);
        }
        if let Some(ex) = self.stream_extrinsics.get(&(to, from)) {
            return Some(ex.inverse());
        }
        log::warn!("Extrinsics from {:?} to {:?} not found", from, to);
        None
    }

    pub fn motion_intrinsics(&self) -> Option<MotionIntrinsics> {
        if self.motion_intrinsics.is_none() {
            log::debug!("Motion intrinsics not found");
        }
        self.motion_intrinsics
    }

    pub fn motion_extrinsics(&self, from: Stream) -> Option<Extrinsics> {
        let found = self.motion_extrinsics.get(&from).copied();
        if found.is_none() {
            log::debug!("Motion extrinsics from {:?} not found", from);
        }
        found
    }

    pub fn set_intrinsics(&mut self, stream: Stream, intrinsics: Intrinsics) {
        self.stream_intrinsics.insert(stream, intrinsics);
    }

    pub fn set_extrinsics(&mut self, from: Stream, to: Stream, extrinsics: Extrinsics) {
        self.stream_extrinsics.insert((from, to), extrinsics);
    }

    pub fn set_motion_intrinsics(&mut self, intrinsics: MotionIntrinsics) {
        self.motion_intrinsics = Some(intrinsics);
    }

    pub fn set_motion_extrinsics(&mut self, from: Stream, extrinsics: Extrinsics) {
        self.motion_extrinsics.insert(from, extrinsics);
    }

    // -- Options --

    pub fn option_info(&self, option: DeviceOption) -> Option<OptionInfo> {
        let info = supports::option_info(self.model, option);
        if info.is_none() {
            log::warn!("Unsupported option: {:?}", option);
        }
        info
    }

    pub fn option_value(&self, option: DeviceOption) -> Option<i32> {
        if !self.supports_option(option) {
            log::warn!("Unsupported option: {:?}", option);
            return None;
        }
        match self.channel.get_control(option) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Get {:?} failed: {}", option, e);
                None
            }
        }
    }

    /// Write `value` after checking it against the option's range and value
    /// set. Returns whether the device accepted it.
    pub fn set_option_value(&self, option: DeviceOption, value: i32) -> bool {
        if !self.supports_option(option) {
            log::warn!("Unsupported option: {:?}", option);
            return false;
        }
        if option.is_action() {
            log::warn!("{:?} is an action, use run_option_action", option);
            return false;
        }
        if !supports::option_accepts(self.model, option, value) {
            log::warn!(
                "{:?} value {} not accepted, info {:?} values {:?}",
                option,
                value,
                supports::option_info(self.model, option),
                supports::option_values(option)
            );
            return false;
        }
        match self.channel.set_control(option, value) {
            Ok(()) => {
                log::debug!("Set {:?} to {}", option, value);
                true
            }
            Err(e) => {
                log::warn!("Set {:?} failed: {}", option, e);
                false
            }
        }
    }

    pub fn run_option_action(&self, option: DeviceOption) -> bool {
        if !self.supports_option(option) {
            log::warn!("Unsupported option: {:?}", option);
            return false;
        }
        if !option.is_action() {
            log::warn!("{:?} is not an action", option);
            return false;
        }
        match self.channel.run_action(option) {
            Ok(done) => done,
            Err(e) => {
                log::warn!("Run {:?} failed: {}", option, e);
                false
            }
        }
    }

    pub fn log_option_infos(&self) {
        log::info!("Option infos of {:?}:", self.model);
        for &option in supports::option_supports(self.model) {
            if option.is_action() {
                log::info!("  {:?}: action", option);
                continue;
            }
            let info = supports::option_info(self.model, option).unwrap_or_default();
            match self.channel.get_control(option) {
                Ok(value) => log::info!(
                    "  {:?}: min={} max={} def={} cur={}",
                    option,
                    info.min,
                    info.max,
                    info.def,
                    value
                ),
                Err(e) => log::info!(
                    "  {:?}: min={} max={} def={} cur=? ({})",
                    option,
                    info.min,
                    info.max,
                    info.def,
                    e
                ),
            }
        }
    }

    // -- Callbacks --

    /// Register or, with `None`, remove the callback of `stream`. Async
    /// delivery keeps only the newest undelivered sample.
    pub fn set_stream_callback(
        &self,
        stream: Stream,
        callback: Option<StreamCallback>,
        is_async: bool,
    ) -> Result<()> {
        self.check_stream(stream)?;
        let delivery = callback
            .map(|cb| {
                Delivery::new(
                    &format!("{:?}", stream).to_lowercase(),
                    STREAM_QUEUE_CAPACITY,
                    is_async,
                    cb,
                )
            })
            .transpose()?;
        let mut callbacks = lock(&self.stream_callbacks);
        match delivery {
            Some(delivery) => {
                callbacks.insert(stream, delivery);
            }
            None => {
                callbacks.remove(&stream);
            }
        }
        Ok(())
    }

    pub fn has_stream_callback(&self, stream: Stream) -> bool {
        lock(&self.stream_callbacks).contains_key(&stream)
    }

    /// Register or remove the motion callback. Async delivery keeps up to
    /// `motion_queue_capacity` samples in order.
    pub fn set_motion_callback(&self, callback: Option<MotionCallback>, is_async: bool) -> Result<()> {
        let delivery = callback
            .map(|cb| Delivery::new("motion", self.config.motion_queue_capacity, is_async, cb))
            .transpose()?;
        self.motions.set_callback(delivery);
        Ok(())
    }

    pub fn has_motion_callback(&self) -> bool {
        self.motions.has_callback()
    }

    /// Feed every accepted stereo frame to `root`. Replaces any previous root.
    pub fn attach_processor(&self, root: Arc<Processor>) {
        if let Some(previous) = lock(&self.pipeline).replace(root) {
            previous.deactivate(true);
        }
    }

    pub fn detach_processor(&self) -> Option<Arc<Processor>> {
        lock(&self.pipeline).take()
    }

    // -- Lifecycle --

    pub fn start(&mut self, source: Source) -> Result<()> {
        match source {
            Source::VideoStreaming => self.start_video_streaming(),
            Source::MotionTracking => self.start_motion_tracking(),
            Source::All => {
                self.start(Source::VideoStreaming)?;
                self.start(Source::MotionTracking)
            }
        }
    }

    /// Stop `source`. Stopping everything stops motion tracking first and
    /// waits `stop_delay` before stopping video.
    pub fn stop(&mut self, source: Source) -> Result<()> {
        match source {
            Source::VideoStreaming => self.stop_video_streaming(),
            Source::MotionTracking => {
                self.stop_motion_tracking();
                Ok(())
            }
            Source::All => {
                self.stop(Source::MotionTracking)?;
                std::thread::sleep(self.config.stop_delay);
                self.stop(Source::VideoStreaming)
            }
        }
    }

    pub fn is_video_streaming(&self) -> bool {
        self.video_streaming
    }

    pub fn is_motion_tracking(&self) -> bool {
        self.motion_tracking
    }

    fn start_video_streaming(&mut self) -> Result<()> {
        if self.video_streaming {
            log::warn!("Cannot start video streaming without first stopping it");
            return Ok(());
        }
        if !self.supports_capability(Capabilities::STEREO) {
            return Err(MyntEyeError::UnsupportedCapability(Capabilities::STEREO));
        }
        let request = self.stream_request(Capabilities::STEREO)?;

        let callback = self.frame_callback(request);
        self.streams.set_active(true);
        let started = self
            .video
            .set_device_mode(request.width, request.height, request.format, request.fps, callback)
            .and_then(|()| self.video.start_streaming());
        if let Err(e) = started {
            self.streams.set_active(false);
            return Err(e);
        }

        self.video_streaming = true;
        log::info!(
            "Video streaming started on {}: {}x{} {:?} @ {} fps",
            self.video.name(),
            request.width,
            request.height,
            request.format,
            request.fps
        );
        Ok(())
    }

    /// Hardware callback of the stereo capability, run on the transport's
    /// thread. Failures are logged and dropped, never returned.
    fn frame_callback(&self, request: StreamRequest) -> FrameCallback {
        let streams = self.streams.clone();
        let callbacks = self.stream_callbacks.clone();
        let pipeline = self.pipeline.clone();
        let log_timing = self.config.log_frame_timing;
        let mut drop_count = self.config.drop_first_frames;

        Box::new(move |data, continuation| {
            if drop_count > 0 {
                drop_count -= 1;
                log::debug!("Dropping warm-up stereo frame");
                continuation.release();
                return;
            }
            let begin = Instant::now();

            let Some(frames) = streams.unpack(&request, data) else {
                continuation.release();
                return;
            };
            streams.push(&frames);
            {
                let mut callbacks = lock(&callbacks);
                for (stream, sample) in [(Stream::Left, &frames.left), (Stream::Right, &frames.right)] {
                    if let Some(callback) = callbacks.get_mut(&stream) {
                        callback.deliver(sample.clone());
                    }
                }
            }
            continuation.release();

            let root = lock(&pipeline).clone();
            if let Some(root) = root {
                root.process(&StereoObject::new(frames));
            }
            if log_timing {
                log::debug!("Stereo video callback cost {:?}", begin.elapsed());
            }
        })
    }

    fn stop_video_streaming(&mut self) -> Result<()> {
        if !self.video_streaming {
            log::warn!("Cannot stop video streaming without first starting it");
            return Ok(());
        }
        let result = self.video.stop_streaming();
        self.video_streaming = false;
        self.streams.set_active(false);
        log::info!("Video streaming stopped");
        result
    }

    fn start_motion_tracking(&mut self) -> Result<()> {
        if !self.supports_capability(Capabilities::IMU) {
            return Err(MyntEyeError::UnsupportedCapability(Capabilities::IMU));
        }
        if self.motion_tracking {
            log::warn!("Cannot start motion tracking without first stopping it");
            return Ok(());
        }
        if !self.motions.has_callback() {
            log::debug!("Motion tracking started without a motion callback");
        }
        self.motions.start()?;
        self.motion_tracking = true;
        log::info!("Motion tracking started");
        Ok(())
    }

    fn stop_motion_tracking(&mut self) {
        if !self.motion_tracking {
            log::warn!("Cannot stop motion tracking without first starting it");
            return;
        }
        self.motions.stop();
        self.motion_tracking = false;
        log::info!("Motion tracking stopped");
    }

    // -- Data access --

    /// Block until every key stream has delivered a new sample.
    pub fn wait_for_streams(&self) -> Result<()> {
        if !self.video_streaming {
            return Err(MyntEyeError::NotStreaming);
        }
        self.streams.wait(None)
    }

    pub fn wait_for_streams_timeout(&self, timeout: std::time::Duration) -> Result<()> {
        if !self.video_streaming {
            return Err(MyntEyeError::NotStreaming);
        }
        self.streams.wait(Some(timeout))
    }

    /// Drain the buffered samples of `stream`, oldest first.
    pub fn stream_datas(&self, stream: Stream) -> Result<Vec<StreamSample>> {
        if !self.video_streaming {
            return Err(MyntEyeError::NotStreaming);
        }
        self.check_stream(stream)?;
        Ok(self.streams.drain(stream))
    }

    pub fn latest_stream_data(&self, stream: Stream) -> Result<Option<StreamSample>> {
        if !self.video_streaming {
            return Err(MyntEyeError::NotStreaming);
        }
        self.check_stream(stream)?;
        Ok(self.streams.latest(stream))
    }

    /// Keep up to `max` motion samples for [`Device::motion_datas`].
    pub fn enable_motion_datas(&self, max: usize) {
        self.motions.enable_datas(max);
    }

    pub fn motion_datas(&self) -> Result<Vec<MotionSample>> {
        if !self.motion_tracking {
            return Err(MyntEyeError::NotTracking);
        }
        Ok(self.motions.datas().unwrap_or_default())
    }

    /// Stereo buffers rejected for a bad header or size.
    pub fn stream_rejected_count(&self) -> u64 {
        self.streams.rejected_count()
    }

    /// IMU responses dropped for transfer, framing or checksum errors.
    pub fn motion_error_count(&self) -> u64 {
        self.motions.error_count()
    }

    pub fn motion_sample_count(&self) -> u64 {
        self.motions.sample_count()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if self.motion_tracking {
            self.stop_motion_tracking();
            std::thread::sleep(self.config.stop_delay);
        }
        if self.video_streaming {
            if let Err(e) = self.stop_video_streaming() {
                log::warn!("Stop video streaming on drop failed: {}", e);
            }
        }
        if let Some(root) = lock(&self.pipeline).take() {
            root.deactivate(true);
        }
    }
}
