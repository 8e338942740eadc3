//! Stereo frame unpacking and the per-device stream store.

use crate::object::StereoFrames;
use crate::protocol::ImagePacket;
use crate::types::{Format, Frame, Stream, StreamRequest, StreamSample};
use crate::{MyntEyeError, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Split one raw stereo buffer into left and right GREY samples.
///
/// The buffer interleaves both cameras byte by byte (left on even bytes) and
/// carries the image header byte-reversed in its last 11 bytes. Returns
/// `Ok(None)` when the header marker or checksum does not match.
pub fn unpack_stereo(request: &StreamRequest, buf: &[u8]) -> Result<Option<StereoFrames>> {
    let size = request.frame_size();
    if buf.len() < size {
        return Err(MyntEyeError::ShortBuffer {
            what: "stereo frame",
            offset: buf.len(),
            needed: size,
        });
    }
    let data = &buf[..size];
    let (packet, raw) = ImagePacket::from_frame_tail(data)?;
    if !packet.is_valid(&raw) {
        return Ok(None);
    }

    let pixels = request.width as usize * request.height as usize;
    let mut left = Vec::with_capacity(pixels);
    let mut right = Vec::with_capacity(pixels);
    for pair in data.chunks_exact(2).take(pixels) {
        left.push(pair[0]);
        right.push(pair[1]);
    }

    let sample = |data: Vec<u8>| StreamSample {
        frame: Arc::new(Frame {
            width: request.width,
            height: request.height,
            format: Format::Grey,
            data,
        }),
        frame_id: packet.frame_id,
        timestamp: packet.timestamp,
        exposure_time: packet.exposure_time,
    };
    Ok(Some(StereoFrames {
        left: sample(left),
        right: sample(right),
    }))
}

#[derive(Default)]
struct Slot {
    samples: VecDeque<StreamSample>,
    latest: Option<StreamSample>,
}

struct Inner {
    active: bool,
    slots: HashMap<Stream, Slot>,
    /// Key streams that received a sample since the last wait.
    arrived: HashSet<Stream>,
}

/// Recent samples of each stream, shared between the transport callback and
/// readers. One lock guards every stream.
pub(crate) struct StreamStore {
    key_streams: Vec<Stream>,
    buffer_size: usize,
    inner: Mutex<Inner>,
    arrived: Condvar,
    rejected: AtomicU64,
}

impl StreamStore {
    pub fn new(key_streams: &[Stream], buffer_size: usize) -> Self {
        Self {
            key_streams: key_streams.to_vec(),
            buffer_size: buffer_size.max(1),
            inner: Mutex::new(Inner {
                active: false,
                slots: HashMap::new(),
                arrived: HashSet::new(),
            }),
            arrived: Condvar::new(),
            rejected: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open or close the store. Closing wakes every waiter.
    pub fn set_active(&self, active: bool) {
        let mut inner = self.lock();
        inner.active = active;
        inner.arrived.clear();
        if !active {
            inner.slots.clear();
        }
        drop(inner);
        self.arrived.notify_all();
    }

    /// Unpack a raw buffer, counting it as rejected when it cannot be used.
    pub fn unpack(&self, request: &StreamRequest, buf: &[u8]) -> Option<StereoFrames> {
        let rejected = match unpack_stereo(request, buf) {
            Ok(Some(frames)) => return Some(frames),
            Ok(None) => "bad image header".to_string(),
            Err(e) => e.to_string(),
        };
        let total = self.rejected.fetch_add(1, Ordering::Relaxed) + 1;
        log::warn!("Stereo frame rejected: {} (total {})", rejected, total);
        None
    }

    pub fn push(&self, frames: &StereoFrames) {
        let mut inner = self.lock();
        if !inner.active {
            return;
        }
        for (stream, sample) in [(Stream::Left, &frames.left), (Stream::Right, &frames.right)] {
            let slot = inner.slots.entry(stream).or_default();
            if slot.samples.len() >= self.buffer_size {
                slot.samples.pop_front();
            }
            slot.samples.push_back(sample.clone());
            slot.latest = Some(sample.clone());
            inner.arrived.insert(stream);
        }
        drop(inner);
        self.arrived.notify_all();
    }

    /// Block until every key stream has a new sample, or `timeout` passes.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut inner = self.lock();
        loop {
            if !inner.active {
                return Err(MyntEyeError::NotStreaming);
            }
            if self.key_streams.iter().all(|s| inner.arrived.contains(s)) {
                inner.arrived.clear();
                return Ok(());
            }
            inner = match deadline {
                None => self
                    .arrived
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(MyntEyeError::Timeout);
                    }
                    self.arrived
                        .wait_timeout(inner, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Take every buffered sample of `stream`, oldest first.
    pub fn drain(&self, stream: Stream) -> Vec<StreamSample> {
        self.lock()
            .slots
            .get_mut(&stream)
            .map(|slot| slot.samples.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn latest(&self, stream: Stream) -> Option<StreamSample> {
        self.lock().slots.get(&stream).and_then(|slot| slot.latest.clone())
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::protocol::{image_checksum, IMAGE_PACKET_HEADER, IMAGE_PACKET_SIZE};

    /// Build a raw stereo buffer whose left pixels are `l` and right pixels `r`.
    pub(crate) fn stereo_buffer(request: &StreamRequest, frame_id: u16, timestamp: u32, l: u8, r: u8) -> Vec<u8> {
        let pixels = request.width as usize * request.height as usize;
        let mut buf = Vec::with_capacity(pixels * 2);
        for _ in 0..pixels {
            buf.push(l);
            buf.push(r);
        }
        let mut raw = [0u8; IMAGE_PACKET_SIZE];
        raw[0] = IMAGE_PACKET_HEADER;
        raw[1] = IMAGE_PACKET_SIZE as u8;
        raw[2..4].copy_from_slice(&frame_id.to_be_bytes());
        raw[4..8].copy_from_slice(&timestamp.to_be_bytes());
        raw[8..10].copy_from_slice(&7u16.to_be_bytes());
        raw[10] = image_checksum(&raw);
        let len = buf.len();
        for (dst, src) in buf[len - IMAGE_PACKET_SIZE..].iter_mut().zip(raw.iter().rev()) {
            *dst = *src;
        }
        buf
    }

    fn request() -> StreamRequest {
        StreamRequest::new(8, 4, Format::Yuyv, 25)
    }

    #[test]
    fn test_unpack_stereo() {
        let req = request();
        let buf = stereo_buffer(&req, 42, 1000, 0x11, 0x22);
        let frames = unpack_stereo(&req, &buf).unwrap().unwrap();
        assert_eq!(frames.left.frame_id, 42);
        assert_eq!(frames.right.timestamp, 1000);
        assert_eq!(frames.left.exposure_time, 7);
        assert_eq!(frames.left.format(), Format::Grey);
        assert_eq!(frames.left.frame.data.len(), 32);
        assert_eq!(frames.left.frame.data[0], 0x11);
        assert_eq!(frames.right.frame.data[0], 0x22);
    }

    #[test]
    fn test_unpack_rejects_bad_header() {
        let req = request();
        let mut buf = stereo_buffer(&req, 1, 1, 0, 0);
        let last = buf.len() - 3;
        buf[last] ^= 0xFF;
        assert!(unpack_stereo(&req, &buf).unwrap().is_none());
        assert!(unpack_stereo(&req, &buf[..10]).is_err());

        let store = StreamStore::new(&[Stream::Left, Stream::Right], 2);
        assert!(store.unpack(&req, &buf).is_none());
        assert!(store.unpack(&req, &[]).is_none());
        assert_eq!(store.rejected_count(), 2);
    }

    #[test]
    fn test_store_bounded_and_drained() {
        let req = request();
        let store = StreamStore::new(&[Stream::Left, Stream::Right], 2);
        store.set_active(true);
        for id in 0..3 {
            let frames = unpack_stereo(&req, &stereo_buffer(&req, id, 0, 0, 0)).unwrap().unwrap();
            store.push(&frames);
        }
        let left: Vec<u16> = store.drain(Stream::Left).iter().map(|s| s.frame_id).collect();
        assert_eq!(left, [1, 2]);
        assert!(store.drain(Stream::Left).is_empty());
        assert_eq!(store.latest(Stream::Left).unwrap().frame_id, 2);
        assert_eq!(store.drain(Stream::Right).len(), 2);
    }

    #[test]
    fn test_wait_for_streams() {
        let req = request();
        let store = Arc::new(StreamStore::new(&[Stream::Left, Stream::Right], 4));
        assert!(matches!(store.wait(None), Err(MyntEyeError::NotStreaming)));

        store.set_active(true);
        assert!(matches!(
            store.wait(Some(Duration::from_millis(20))),
            Err(MyntEyeError::Timeout)
        ));

        let pusher = store.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            let frames = unpack_stereo(&req, &stereo_buffer(&req, 5, 0, 0, 0)).unwrap().unwrap();
            pusher.push(&frames);
        });
        store.wait(Some(Duration::from_secs(2))).unwrap();
        handle.join().unwrap();

        // Already consumed by the previous wait.
        assert!(store.wait(Some(Duration::from_millis(20))).is_err());

        let closer = store.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            closer.set_active(false);
        });
        assert!(matches!(store.wait(None), Err(MyntEyeError::NotStreaming)));
        handle.join().unwrap();
    }
}
