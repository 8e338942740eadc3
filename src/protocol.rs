//! Binary telemetry codec.
//!
//! All multi-byte fields on the wire are big-endian and are rebuilt with
//! explicit shifts, independent of host byte order. Decoders never read past
//! the slice they are given; a short slice is an error carrying the offset
//! where it was detected.

use crate::types::{
    DeviceInfo, HardwareFlags, HardwareVersion, MotionSample, Type, Version,
};
use crate::{MyntEyeError, Result};

// -- Image header --
pub const IMAGE_PACKET_SIZE: usize = 11;
pub const IMAGE_PACKET_HEADER: u8 = 0x3B;

// -- IMU request / response --
pub const IMU_REQ_HEADER: u8 = 0x5A;
pub const IMU_REQ_SIZE: usize = 5;
pub const IMU_RES_HEADER: u8 = 0x5B;
pub const IMU_RES_HEADER_SIZE: usize = 4;
pub const IMU_PACKET_HEADER_SIZE: usize = 9;
pub const IMU_SEGMENT_SIZE: usize = 18;

// -- Device info block --
pub const DEVICE_INFO_SIZE: usize = 49;
const NAME_SIZE: usize = 16;
const SERIAL_NUMBER_SIZE: usize = 16;

// -- IMU raw → physical units --
/// ±4 g full range over 16 bits.
pub const ACCEL_SCALE: f64 = 8.0 / 65536.0;
/// ±500 deg/s full range over 16 bits.
pub const GYRO_SCALE: f64 = 1000.0 / 65536.0;
pub const TEMPERATURE_SCALE: f64 = 326.8;
pub const TEMPERATURE_OFFSET: f64 = 25.0;

fn ensure(data: &[u8], offset: usize, needed: usize, what: &'static str) -> Result<()> {
    if data.len() < offset + needed {
        return Err(MyntEyeError::ShortBuffer {
            what,
            offset: data.len().max(offset),
            needed,
        });
    }
    Ok(())
}

fn be_u16(data: &[u8], at: usize) -> u16 {
    ((data[at] as u16) << 8) | data[at + 1] as u16
}

fn be_i16(data: &[u8], at: usize) -> i16 {
    be_u16(data, at) as i16
}

fn be_u32(data: &[u8], at: usize) -> u32 {
    ((data[at] as u32) << 24)
        | ((data[at + 1] as u32) << 16)
        | ((data[at + 2] as u32) << 8)
        | data[at + 3] as u32
}

/// Header attached to every stereo frame.
///
/// Layout (11 bytes):
/// - `[0]`: marker (0x3B)
/// - `[1]`: payload size
/// - `[2..3]`: frame id
/// - `[4..7]`: timestamp
/// - `[8..9]`: exposure time
/// - `[10]`: checksum, XOR of bytes `[2..=9]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImagePacket {
    pub header: u8,
    pub size: u8,
    pub frame_id: u16,
    pub timestamp: u32,
    pub exposure_time: u16,
    pub checksum: u8,
}

impl ImagePacket {
    /// Decode the header. The checksum is only read here; see [`ImagePacket::is_valid`].
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        ensure(data, 0, IMAGE_PACKET_SIZE, "image packet")?;
        Ok(Self {
            header: data[0],
            size: data[1],
            frame_id: be_u16(data, 2),
            timestamp: be_u32(data, 4),
            exposure_time: be_u16(data, 8),
            checksum: data[10],
        })
    }

    /// Decode the header stored byte-reversed at the tail of a raw frame buffer.
    pub fn from_frame_tail(buf: &[u8]) -> Result<(Self, [u8; IMAGE_PACKET_SIZE])> {
        ensure(buf, 0, IMAGE_PACKET_SIZE, "image frame")?;
        let mut raw = [0u8; IMAGE_PACKET_SIZE];
        for (dst, src) in raw.iter_mut().zip(buf[buf.len() - IMAGE_PACKET_SIZE..].iter().rev()) {
            *dst = *src;
        }
        Ok((Self::from_bytes(&raw)?, raw))
    }

    pub fn is_valid(&self, raw: &[u8; IMAGE_PACKET_SIZE]) -> bool {
        self.header == IMAGE_PACKET_HEADER && self.checksum == image_checksum(raw)
    }
}

/// XOR of the frame id, timestamp and exposure bytes.
pub fn image_checksum(raw: &[u8; IMAGE_PACKET_SIZE]) -> u8 {
    raw[2..=9].iter().fold(0, |acc, b| acc ^ b)
}

/// Poll request sent to the device for IMU data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImuReqPacket {
    pub header: u8,
    /// Serial number of the last packet received, 0 to start.
    pub serial_number: u32,
}

impl ImuReqPacket {
    pub fn new(serial_number: u32) -> Self {
        Self {
            header: IMU_REQ_HEADER,
            serial_number,
        }
    }

    pub fn to_bytes(&self) -> [u8; IMU_REQ_SIZE] {
        let sn = self.serial_number;
        [
            self.header,
            ((sn >> 24) & 0xFF) as u8,
            ((sn >> 16) & 0xFF) as u8,
            ((sn >> 8) & 0xFF) as u8,
            (sn & 0xFF) as u8,
        ]
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        ensure(data, 0, IMU_REQ_SIZE, "IMU request")?;
        Ok(Self {
            header: data[0],
            serial_number: be_u32(data, 1),
        })
    }
}

/// Raw IMU segment (18 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImuSegment {
    pub offset: i16,
    pub frame_id: u16,
    pub accel: [i16; 3],
    pub temperature: i16,
    pub gyro: [i16; 3],
}

impl ImuSegment {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        ensure(data, 0, IMU_SEGMENT_SIZE, "IMU segment")?;
        Ok(Self {
            offset: be_i16(data, 0),
            frame_id: be_u16(data, 2),
            accel: [be_i16(data, 4), be_i16(data, 6), be_i16(data, 8)],
            temperature: be_i16(data, 10),
            gyro: [be_i16(data, 12), be_i16(data, 14), be_i16(data, 16)],
        })
    }
}

/// One firmware batch of IMU segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImuPacket {
    pub serial_number: u32,
    pub timestamp: u32,
    pub count: u8,
    pub segments: Vec<ImuSegment>,
}

impl ImuPacket {
    /// Bytes this packet occupies on the wire.
    pub fn wire_len(&self) -> usize {
        IMU_PACKET_HEADER_SIZE + self.count as usize * IMU_SEGMENT_SIZE
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        ensure(data, 0, IMU_PACKET_HEADER_SIZE, "IMU packet")?;
        let count = data[8];
        let mut segments = Vec::with_capacity(count as usize);
        for i in 0..count as usize {
            let at = IMU_PACKET_HEADER_SIZE + i * IMU_SEGMENT_SIZE;
            ensure(data, at, IMU_SEGMENT_SIZE, "IMU segment")?;
            segments.push(ImuSegment::from_bytes(&data[at..])?);
        }
        Ok(Self {
            serial_number: be_u32(data, 0),
            timestamp: be_u32(data, 4),
            count,
            segments,
        })
    }
}

/// Device response to an [`ImuReqPacket`].
///
/// Layout:
/// - `[0]`: marker (0x5B)
/// - `[1]`: state
/// - `[2..3]`: size of the packet area
/// - `[4..4+size]`: consecutive IMU packets, each `9 + count*18` bytes
/// - `[4+size]`: checksum, XOR of the packet area
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImuResPacket {
    pub header: u8,
    pub state: u8,
    pub size: u16,
    pub packets: Vec<ImuPacket>,
    pub checksum: u8,
}

impl ImuResPacket {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        ensure(data, 0, IMU_RES_HEADER_SIZE, "IMU response")?;
        let size = be_u16(data, 2) as usize;
        let end = IMU_RES_HEADER_SIZE + size;

        let mut packets = Vec::new();
        let mut i = IMU_RES_HEADER_SIZE;
        while i < end {
            if i + IMU_PACKET_HEADER_SIZE > end {
                return Err(MyntEyeError::Framing { offset: i, size });
            }
            ensure(data, i, IMU_PACKET_HEADER_SIZE, "IMU packet")?;
            let len = IMU_PACKET_HEADER_SIZE + data[i + 8] as usize * IMU_SEGMENT_SIZE;
            if i + len > end {
                return Err(MyntEyeError::Framing { offset: i, size });
            }
            ensure(data, i, len, "IMU packet")?;
            let packet = ImuPacket::from_bytes(&data[i..i + len])?;
            i += packet.wire_len();
            packets.push(packet);
        }

        ensure(data, end, 1, "IMU response checksum")?;
        Ok(Self {
            header: data[0],
            state: data[1],
            size: size as u16,
            packets,
            checksum: data[end],
        })
    }
}

/// XOR of the packet area of a raw IMU response.
pub fn imu_checksum(data: &[u8]) -> Result<u8> {
    ensure(data, 0, IMU_RES_HEADER_SIZE, "IMU response")?;
    let end = IMU_RES_HEADER_SIZE + be_u16(data, 2) as usize;
    ensure(data, 0, end, "IMU response")?;
    Ok(data[IMU_RES_HEADER_SIZE..end].iter().fold(0, |acc, b| acc ^ b))
}

/// Convert a raw segment of `packet` into physical units.
pub fn motion_sample(packet: &ImuPacket, segment: &ImuSegment) -> MotionSample {
    let accel = segment.accel.map(|v| v as f64 * ACCEL_SCALE);
    let gyro = segment.gyro.map(|v| v as f64 * GYRO_SCALE);
    MotionSample {
        frame_id: segment.frame_id,
        offset: segment.offset,
        timestamp: packet.timestamp.wrapping_add_signed(segment.offset as i32),
        accel,
        gyro,
        temperature: segment.temperature as f64 / TEMPERATURE_SCALE + TEMPERATURE_OFFSET,
    }
}

/// Extract a null-terminated string from a byte slice.
pub fn extract_string(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).trim().to_string()
}

/// Decode the device info block.
///
/// Layout (49 bytes): name(16) | serial(16) | firmware(2) | hardware(3) |
/// spec(2) | lens type(4) | IMU type(4) | nominal baseline(2).
pub fn parse_device_info(data: &[u8]) -> Result<DeviceInfo> {
    ensure(data, 0, DEVICE_INFO_SIZE, "device info")?;
    let mut i = 0;
    let name = extract_string(&data[i..i + NAME_SIZE]);
    i += NAME_SIZE;
    let serial_number = extract_string(&data[i..i + SERIAL_NUMBER_SIZE]);
    i += SERIAL_NUMBER_SIZE;
    let firmware_version = Version::new(data[i], data[i + 1]);
    i += 2;
    let hardware_version = HardwareVersion {
        version: Version::new(data[i], data[i + 1]),
        flag: HardwareFlags::from_bits_truncate(data[i + 2]),
    };
    i += 3;
    let spec_version = Version::new(data[i], data[i + 1]);
    i += 2;
    let lens_type = Type {
        vendor: be_u16(data, i),
        product: be_u16(data, i + 2),
    };
    i += 4;
    let imu_type = Type {
        vendor: be_u16(data, i),
        product: be_u16(data, i + 2),
    };
    i += 4;
    let nominal_baseline = be_u16(data, i);

    Ok(DeviceInfo {
        name,
        serial_number,
        firmware_version,
        hardware_version,
        spec_version,
        lens_type,
        imu_type,
        nominal_baseline,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn segment_bytes(offset: i16, frame_id: u16, accel: [i16; 3], temp: i16, gyro: [i16; 3]) -> Vec<u8> {
        let mut out = Vec::with_capacity(IMU_SEGMENT_SIZE);
        out.extend_from_slice(&offset.to_be_bytes());
        out.extend_from_slice(&frame_id.to_be_bytes());
        for a in accel {
            out.extend_from_slice(&a.to_be_bytes());
        }
        out.extend_from_slice(&temp.to_be_bytes());
        for g in gyro {
            out.extend_from_slice(&g.to_be_bytes());
        }
        out
    }

    pub(crate) fn packet_bytes(serial_number: u32, timestamp: u32, segments: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&serial_number.to_be_bytes());
        out.extend_from_slice(&timestamp.to_be_bytes());
        out.push(segments.len() as u8);
        for s in segments {
            out.extend_from_slice(s);
        }
        out
    }

    /// Wrap packets into a response with a correct size and checksum.
    pub(crate) fn response_bytes(packets: &[Vec<u8>]) -> Vec<u8> {
        let body: Vec<u8> = packets.concat();
        let mut out = vec![IMU_RES_HEADER, 0];
        out.extend_from_slice(&(body.len() as u16).to_be_bytes());
        out.extend_from_slice(&body);
        out.push(body.iter().fold(0, |acc, b| acc ^ b));
        out
    }

    #[test]
    fn test_image_packet_decode() {
        let raw = [0x3B, 0x08, 0x01, 0x02, 0x00, 0x00, 0x30, 0x39, 0x00, 0x64, 0x00];
        let packet = ImagePacket::from_bytes(&raw).unwrap();
        assert_eq!(packet.header, IMAGE_PACKET_HEADER);
        assert_eq!(packet.frame_id, 0x0102);
        assert_eq!(packet.timestamp, 12345);
        assert_eq!(packet.exposure_time, 100);
    }

    #[test]
    fn test_image_packet_short_buffer() {
        let err = ImagePacket::from_bytes(&[0x3B, 0x08, 0x01]).unwrap_err();
        match err {
            MyntEyeError::ShortBuffer { offset, needed, .. } => {
                assert_eq!(offset, 3);
                assert_eq!(needed, IMAGE_PACKET_SIZE);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_image_packet_from_frame_tail() {
        let mut raw = [0x3B, 0x08, 0x00, 0x07, 0x00, 0x00, 0x01, 0x00, 0x00, 0x10, 0x00];
        raw[10] = image_checksum(&raw);
        let mut buf = vec![0xAAu8; 32];
        let n = buf.len();
        for (k, b) in raw.iter().enumerate() {
            buf[n - 1 - k] = *b;
        }
        let (packet, decoded_raw) = ImagePacket::from_frame_tail(&buf).unwrap();
        assert_eq!(decoded_raw, raw);
        assert_eq!(packet.frame_id, 7);
        assert!(packet.is_valid(&decoded_raw));

        let mut bad = decoded_raw;
        bad[10] ^= 0xFF;
        let bad_packet = ImagePacket::from_bytes(&bad).unwrap();
        assert!(!bad_packet.is_valid(&bad));
    }

    #[test]
    fn test_imu_request_encode() {
        let req = ImuReqPacket::new(0x0102_0304);
        assert_eq!(req.to_bytes(), [0x5A, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(ImuReqPacket::from_bytes(&req.to_bytes()).unwrap(), req);
    }

    #[test]
    fn test_imu_segment_signed_fields() {
        let raw = segment_bytes(-5, 9, [-1, 2, -32768], 100, [32767, 0, -2]);
        let seg = ImuSegment::from_bytes(&raw).unwrap();
        assert_eq!(seg.offset, -5);
        assert_eq!(seg.frame_id, 9);
        assert_eq!(seg.accel, [-1, 2, -32768]);
        assert_eq!(seg.temperature, 100);
        assert_eq!(seg.gyro, [32767, 0, -2]);
    }

    #[test]
    fn test_imu_response_walks_packets() {
        let p1 = packet_bytes(
            41,
            1000,
            &[
                segment_bytes(0, 1, [0, 0, 8192], 0, [0, 0, 0]),
                segment_bytes(2, 2, [0, 0, 8192], 0, [0, 0, 0]),
            ],
        );
        let p2 = packet_bytes(42, 1004, &[segment_bytes(1, 3, [0; 3], 0, [0; 3])]);
        let empty = packet_bytes(43, 1008, &[]);
        let data = response_bytes(&[p1, p2, empty]);

        let res = ImuResPacket::from_bytes(&data).unwrap();
        assert_eq!(res.header, IMU_RES_HEADER);
        assert_eq!(res.packets.len(), 3);
        let consumed: usize = res.packets.iter().map(|p| p.wire_len()).sum();
        assert_eq!(consumed, res.size as usize);
        assert_eq!(res.packets[0].segments.len(), 2);
        assert_eq!(res.packets[2].count, 0);
        assert_eq!(res.checksum, imu_checksum(&data).unwrap());

        // Serial numbers round-trip through request packets.
        for packet in &res.packets {
            let req = ImuReqPacket::new(packet.serial_number);
            let back = ImuReqPacket::from_bytes(&req.to_bytes()).unwrap();
            assert_eq!(back.serial_number, packet.serial_number);
        }
    }

    #[test]
    fn test_imu_response_framing_error() {
        let p1 = packet_bytes(1, 0, &[segment_bytes(0, 1, [0; 3], 0, [0; 3])]);
        let mut data = response_bytes(&[p1]);
        // Declare two bytes less than the packet actually needs.
        let size = (IMU_PACKET_HEADER_SIZE + IMU_SEGMENT_SIZE - 2) as u16;
        data[2..4].copy_from_slice(&size.to_be_bytes());
        match ImuResPacket::from_bytes(&data).unwrap_err() {
            MyntEyeError::Framing { offset, size: declared } => {
                assert_eq!(offset, IMU_RES_HEADER_SIZE);
                assert_eq!(declared, size as usize);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_imu_response_trailing_partial_header_is_framing_error() {
        let p1 = packet_bytes(1, 0, &[]);
        let mut body = p1.clone();
        body.extend_from_slice(&[0, 0, 0]);
        let mut data = vec![IMU_RES_HEADER, 0];
        data.extend_from_slice(&(body.len() as u16).to_be_bytes());
        data.extend_from_slice(&body);
        data.push(0);
        assert!(matches!(
            ImuResPacket::from_bytes(&data),
            Err(MyntEyeError::Framing { offset: 13, .. })
        ));
    }

    #[test]
    fn test_imu_response_short_buffer() {
        let p1 = packet_bytes(1, 0, &[segment_bytes(0, 1, [0; 3], 0, [0; 3])]);
        let data = response_bytes(&[p1]);
        let truncated = &data[..data.len() - 5];
        assert!(matches!(
            ImuResPacket::from_bytes(truncated),
            Err(MyntEyeError::ShortBuffer { .. })
        ));
        // Checksum byte missing.
        let no_checksum = &data[..data.len() - 1];
        assert!(matches!(
            ImuResPacket::from_bytes(no_checksum),
            Err(MyntEyeError::ShortBuffer { .. })
        ));
        assert!(ImuResPacket::from_bytes(&[IMU_RES_HEADER]).is_err());
    }

    #[test]
    fn test_motion_sample_units() {
        let packet = ImuPacket {
            serial_number: 1,
            timestamp: 1000,
            count: 1,
            segments: vec![],
        };
        let seg = ImuSegment {
            offset: -4,
            frame_id: 3,
            accel: [8192, 0, -8192],
            temperature: 0,
            gyro: [0, 6554, 0],
        };
        let s = motion_sample(&packet, &seg);
        assert_eq!(s.timestamp, 996);
        assert!((s.accel[0] - 1.0).abs() < 1e-9);
        assert!((s.accel[2] + 1.0).abs() < 1e-9);
        assert!((s.gyro[1] - 100.0).abs() < 0.01);
        assert!((s.temperature - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_device_info() {
        let mut data = vec![0u8; DEVICE_INFO_SIZE];
        data[..7].copy_from_slice(b"MYNTEYE");
        data[16..22].copy_from_slice(b"SN0001");
        data[32] = 2;
        data[33] = 4;
        data[34] = 2;
        data[35] = 0;
        data[36] = 0b11;
        data[37] = 1;
        data[38] = 0;
        data[39..43].copy_from_slice(&[0x00, 0x01, 0x00, 0x02]);
        data[43..47].copy_from_slice(&[0x00, 0x03, 0x00, 0x04]);
        data[47..49].copy_from_slice(&120u16.to_be_bytes());

        let info = parse_device_info(&data).unwrap();
        assert_eq!(info.name, "MYNTEYE");
        assert_eq!(info.serial_number, "SN0001");
        assert_eq!(info.firmware_version.to_string(), "2.4");
        assert_eq!(info.hardware_version.version.to_string(), "2.0");
        assert!(info.hardware_version.flag.contains(HardwareFlags::INFRARED2));
        assert_eq!(info.spec_version.to_string(), "1.0");
        assert_eq!(info.lens_type.to_string(), "0102");
        assert_eq!(info.imu_type.to_string(), "0304");
        assert_eq!(info.nominal_baseline, 120);

        assert!(parse_device_info(&data[..20]).is_err());
    }

    #[test]
    fn test_extract_string() {
        assert_eq!(extract_string(b"abc\0def"), "abc");
        assert_eq!(extract_string(b"xyz"), "xyz");
    }
}
