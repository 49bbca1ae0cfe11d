use crate::error::StreamError;
use crate::types::{Calibration, EncodedUnit, Pose, Profile, StreamMode};
use std::io::{IoSlice, Read};

// -- Device-native geometry of a VLC camera --
pub const VLC_WIDTH: u32 = 640;
pub const VLC_HEIGHT: u32 = 480;
pub const VLC_FPS: u32 = 30;

/// Hundred-nanosecond ticks per second.
pub const HNS_BASE: u64 = 10_000_000;

/// Neutral chroma value used to pad grayscale frames to NV12.
pub const NV12_ZERO_CHROMA: u8 = 0x80;

// -- Profile selectors --
pub const PROFILE_H264_BASE: u8 = 0;
pub const PROFILE_H264_MAIN: u8 = 1;
pub const PROFILE_H264_HIGH: u8 = 2;
pub const PROFILE_H265_MAIN: u8 = 3;
pub const PROFILE_NONE: u8 = 0xFF;

// -- Reserved encoder option keys, consumed locally --
pub const OPTION_CONSTANT_FACTOR: u64 = 0xFFFF_FFFF_FFFF_FFFE;
pub const OPTION_EXPOSURE_FACTOR: u64 = 0xFFFF_FFFF_FFFF_FFFF;

// -- Unit framing --
pub const TIMESTAMP_SIZE: usize = 8;
pub const LENGTH_SIZE: usize = 4;
pub const POSE_SIZE: usize = 64;

/// Number of buffers in a calibration message.
pub const CALIBRATION_BUFFERS: usize = 6;

pub fn read_u8<R: Read>(reader: &mut R, field: &str) -> crate::Result<u8> {
    let mut buf = [0u8; 1];
    reader
        .read_exact(&mut buf)
        .map_err(|e| StreamError::short_read(field, e))?;
    Ok(buf[0])
}

pub fn read_u32_le<R: Read>(reader: &mut R, field: &str) -> crate::Result<u32> {
    let mut buf = [0u8; 4];
    reader
        .read_exact(&mut buf)
        .map_err(|e| StreamError::short_read(field, e))?;
    Ok(u32::from_le_bytes(buf))
}

pub fn read_u64_le<R: Read>(reader: &mut R, field: &str) -> crate::Result<u64> {
    let mut buf = [0u8; 8];
    reader
        .read_exact(&mut buf)
        .map_err(|e| StreamError::short_read(field, e))?;
    Ok(u64::from_le_bytes(buf))
}

/// Fixed-size header of one delivered unit.
///
/// Layout on the wire:
/// - `[0..8]`: u64 LE adjusted timestamp
/// - `[8..12]`: u32 LE payload length
/// - payload bytes
/// - 16x f32 LE row-major pose, only when pose tagging is enabled
pub struct UnitHeader {
    timestamp: [u8; TIMESTAMP_SIZE],
    length: [u8; LENGTH_SIZE],
    pose: Option<[u8; POSE_SIZE]>,
}

impl UnitHeader {
    pub fn new(timestamp: u64, payload_len: u32, pose: Option<&Pose>) -> Self {
        Self {
            timestamp: timestamp.to_le_bytes(),
            length: payload_len.to_le_bytes(),
            pose: pose.map(Pose::to_le_bytes),
        }
    }

    /// Ordered buffer list for a single vectored send.
    pub fn buffers<'a>(&'a self, payload: &'a [u8]) -> Vec<IoSlice<'a>> {
        let mut bufs = Vec::with_capacity(4);
        bufs.push(IoSlice::new(&self.timestamp));
        bufs.push(IoSlice::new(&self.length));
        bufs.push(IoSlice::new(payload));
        if let Some(pose) = &self.pose {
            bufs.push(IoSlice::new(pose));
        }
        bufs
    }
}

/// Serialize a float table as little-endian `f32`s.
pub fn floats_to_le_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn le_bytes_to_floats(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// The six calibration buffers in wire order:
/// uv2x, uv2y, extrinsics, mapx, mapy, k.
pub fn calibration_buffers(calibration: &Calibration) -> [Vec<u8>; CALIBRATION_BUFFERS] {
    let extrinsics: Vec<f32> = calibration.extrinsics.iter().flatten().copied().collect();
    [
        floats_to_le_bytes(&calibration.uv2x),
        floats_to_le_bytes(&calibration.uv2y),
        floats_to_le_bytes(&extrinsics),
        floats_to_le_bytes(&calibration.mapx),
        floats_to_le_bytes(&calibration.mapy),
        floats_to_le_bytes(&calibration.k),
    ]
}

// -- Client side --

/// Parameters a client sends to open a live stream.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub mode: StreamMode,
    pub divisor: u8,
    pub profile: Profile,
    pub bitrate: u32,
    pub options: Vec<(u64, u64)>,
}

impl StreamRequest {
    /// Attach the constant timestamp offset option.
    pub fn with_constant_factor(mut self, cf: i64) -> Self {
        self.options.push((OPTION_CONSTANT_FACTOR, cf as u64));
        self
    }

    /// Attach the exposure scaling option.
    pub fn with_exposure_factor(mut self, ef: f64) -> Self {
        self.options.push((OPTION_EXPOSURE_FACTOR, ef.to_bits()));
        self
    }

    /// Mode byte followed by the negotiation handshake.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.options.len() * 16);
        buf.push(self.mode as u8);
        buf.push(self.divisor);
        buf.push(self.profile.to_wire());
        buf.extend_from_slice(&self.bitrate.to_le_bytes());
        buf.push(self.options.len() as u8);
        for (key, value) in &self.options {
            buf.extend_from_slice(&key.to_le_bytes());
            buf.extend_from_slice(&value.to_le_bytes());
        }
        buf
    }
}

/// Read one delivered unit from a live stream.
pub fn read_unit<R: Read>(reader: &mut R, with_pose: bool) -> crate::Result<EncodedUnit> {
    let timestamp = read_u64_le(reader, "timestamp")?;
    let length = read_u32_le(reader, "payload length")? as usize;
    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload)?;
    let pose = if with_pose {
        let mut bytes = [0u8; POSE_SIZE];
        reader.read_exact(&mut bytes)?;
        Some(Pose::from_le_bytes(&bytes))
    } else {
        None
    };
    Ok(EncodedUnit {
        payload,
        timestamp,
        pose,
    })
}

/// Read a calibration message for a camera whose tables hold `table_len`
/// entries each.
pub fn read_calibration<R: Read>(reader: &mut R, table_len: usize) -> crate::Result<Calibration> {
    let mut table = |len: usize| -> crate::Result<Vec<f32>> {
        let mut bytes = vec![0u8; len * 4];
        reader.read_exact(&mut bytes)?;
        Ok(le_bytes_to_floats(&bytes))
    };

    let uv2x = table(table_len)?;
    let uv2y = table(table_len)?;
    let flat = table(16)?;
    let mapx = table(table_len)?;
    let mapy = table(table_len)?;
    let k = table(4)?;

    let mut extrinsics = [[0.0f32; 4]; 4];
    for (dst, src) in extrinsics.iter_mut().flatten().zip(flat) {
        *dst = src;
    }

    Ok(Calibration {
        uv2x,
        uv2y,
        extrinsics,
        mapx,
        mapy,
        k: [k[0], k[1], k[2], k[3]],
    })
}
