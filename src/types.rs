use crate::protocol::{
    HNS_BASE, NV12_ZERO_CHROMA, PROFILE_H264_BASE, PROFILE_H264_HIGH, PROFILE_H264_MAIN,
    PROFILE_H265_MAIN, PROFILE_NONE,
};

/// Encoding profile requested by the client.
///
/// Every H.26x profile makes the encoder emit a parameter/header unit ahead
/// of each frame's data unit. `None` produces exactly one unit per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    H264Base,
    H264Main,
    H264High,
    H265Main,
    None,
}

impl Profile {
    /// Decode the wire byte. Returns `None` for unknown selectors.
    pub fn from_wire(byte: u8) -> Option<Profile> {
        match byte {
            PROFILE_H264_BASE => Some(Profile::H264Base),
            PROFILE_H264_MAIN => Some(Profile::H264Main),
            PROFILE_H264_HIGH => Some(Profile::H264High),
            PROFILE_H265_MAIN => Some(Profile::H265Main),
            PROFILE_NONE => Some(Profile::None),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            Profile::H264Base => PROFILE_H264_BASE,
            Profile::H264Main => PROFILE_H264_MAIN,
            Profile::H264High => PROFILE_H264_HIGH,
            Profile::H265Main => PROFILE_H265_MAIN,
            Profile::None => PROFILE_NONE,
        }
    }

    /// True when the encoder emits a separate header unit before each data unit.
    pub fn splits_headers(self) -> bool {
        self != Profile::None
    }

    /// Pixel layout the encoder is configured with for this profile.
    pub fn layout(self) -> SubsampleLayout {
        if self.splits_headers() {
            SubsampleLayout::Nv12
        } else {
            SubsampleLayout::L8
        }
    }
}

/// Pixel layout of the buffers submitted to the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsampleLayout {
    /// Luma only.
    L8,
    /// Luma plane followed by a half-size interleaved chroma plane.
    Nv12,
}

impl SubsampleLayout {
    /// Chroma bytes that follow `luma_len` bytes of luma.
    pub fn chroma_len(self, luma_len: usize) -> usize {
        match self {
            SubsampleLayout::L8 => 0,
            SubsampleLayout::Nv12 => luma_len / 2,
        }
    }

    /// Build an encoder buffer from a grayscale image, padding neutral chroma
    /// when the layout needs it.
    pub fn pad(self, luma: &[u8]) -> Vec<u8> {
        let chroma = self.chroma_len(luma.len());
        let mut buffer = Vec::with_capacity(luma.len() + chroma);
        buffer.extend_from_slice(luma);
        buffer.resize(luma.len() + chroma, NV12_ZERO_CHROMA);
        buffer
    }
}

/// Session stream format. Width, height and framerate come from the device;
/// only the profile, bitrate and divisor are negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub profile: Profile,
    pub bitrate: u32,
    /// Forward one of every `divisor` frames. Always at least 1.
    pub divisor: u8,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
}

impl StreamFormat {
    /// Bytes of luma in one frame.
    pub fn luma_size(&self) -> usize {
        (self.width * self.height) as usize
    }

    /// Duration of one frame in hundred-nanosecond ticks.
    pub fn frame_duration(&self) -> u64 {
        HNS_BASE / self.framerate as u64
    }
}

/// Opaque encoder tuning parameters forwarded verbatim to the encoder.
pub type EncoderOptions = Vec<(u64, u64)>;

/// One frame as delivered by the capture device.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Grayscale image, `width * height` bytes.
    pub luma: Vec<u8>,
    /// Host clock ticks at readout end.
    pub host_ticks: u64,
    /// Exposure duration reported for this frame.
    pub exposure: u64,
}

/// A frame ready for submission to the encoder.
#[derive(Debug, Clone)]
pub struct EncoderInput {
    pub buffer: Vec<u8>,
    pub duration: u64,
    pub timestamp: u64,
    /// Pose blob attached to the sample when pose tagging is enabled.
    pub pose: Option<Pose>,
}

/// One unit produced by the encoder.
#[derive(Debug, Clone)]
pub struct EncodedUnit {
    pub payload: Vec<u8>,
    pub timestamp: u64,
    pub pose: Option<Pose>,
}

/// 4x4 row-major rigid transform.
///
/// The zeroed matrix doubles as the "no pose known yet" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    pub m: [[f32; 4]; 4],
}

impl Pose {
    pub const SENTINEL: Pose = Pose { m: [[0.0; 4]; 4] };

    pub fn new(m: [[f32; 4]; 4]) -> Self {
        Self { m }
    }

    pub fn identity() -> Self {
        let mut m = [[0.0; 4]; 4];
        for (i, row) in m.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        Self { m }
    }

    pub fn is_sentinel(&self) -> bool {
        *self == Pose::SENTINEL
    }

    /// Row-major little-endian `f32` bytes, as sent on the wire.
    pub fn to_le_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        for (i, v) in self.m.iter().flatten().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
        }
        out
    }

    pub fn from_le_bytes(bytes: &[u8; 64]) -> Self {
        let mut m = [[0.0f32; 4]; 4];
        for (i, v) in m.iter_mut().flatten().enumerate() {
            *v = f32::from_le_bytes([
                bytes[i * 4],
                bytes[i * 4 + 1],
                bytes[i * 4 + 2],
                bytes[i * 4 + 3],
            ]);
        }
        Self { m }
    }
}

/// Lens and mounting calibration for one camera.
#[derive(Debug, Clone, Default)]
pub struct Calibration {
    /// Undistortion table, x image coordinates.
    pub uv2x: Vec<f32>,
    /// Undistortion table, y image coordinates.
    pub uv2y: Vec<f32>,
    /// Camera-to-rig transform.
    pub extrinsics: [[f32; 4]; 4],
    /// Pixel remap table, x.
    pub mapx: Vec<f32>,
    /// Pixel remap table, y.
    pub mapy: Vec<f32>,
    /// Distortion coefficients.
    pub k: [f32; 4],
}

/// Operating mode requested by the client as the first byte of a connection.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Encoded frames only.
    Stream = 0,
    /// Encoded frames, each tagged with a pose.
    StreamWithPose = 1,
    /// One-shot calibration dump.
    Calibration = 2,
}

impl StreamMode {
    pub fn from_wire(byte: u8) -> Option<StreamMode> {
        match byte {
            0 => Some(StreamMode::Stream),
            1 => Some(StreamMode::StreamWithPose),
            2 => Some(StreamMode::Calibration),
            _ => None,
        }
    }
}

/// The four visible-light tracking cameras.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorId {
    LeftFront = 0,
    LeftLeft = 1,
    RightFront = 2,
    RightRight = 3,
}

impl SensorId {
    pub const ALL: [SensorId; 4] = [
        SensorId::LeftFront,
        SensorId::LeftLeft,
        SensorId::RightFront,
        SensorId::RightRight,
    ];

    /// Port offset from the configured base port.
    pub fn port_offset(self) -> u16 {
        self as u16
    }

    pub fn name(self) -> &'static str {
        match self {
            SensorId::LeftFront => "left-front",
            SensorId::LeftLeft => "left-left",
            SensorId::RightFront => "right-front",
            SensorId::RightRight => "right-right",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_wire_bytes() {
        assert_eq!(Profile::from_wire(0xFF), Some(Profile::None));
        assert_eq!(Profile::from_wire(3), Some(Profile::H265Main));
        assert_eq!(Profile::from_wire(4), None);
        assert!(!Profile::None.splits_headers());
        assert!(Profile::H264High.splits_headers());
    }

    #[test]
    fn test_nv12_padding() {
        let luma = [1u8, 2, 3, 4];
        let padded = SubsampleLayout::Nv12.pad(&luma);
        assert_eq!(padded, vec![1, 2, 3, 4, 0x80, 0x80]);
        assert_eq!(SubsampleLayout::L8.pad(&luma), luma.to_vec());
    }

    #[test]
    fn test_pose_bytes_row_major() {
        let mut m = [[0.0f32; 4]; 4];
        m[0][1] = 2.5;
        m[3][3] = -1.0;
        let bytes = Pose::new(m).to_le_bytes();
        assert_eq!(&bytes[4..8], &2.5f32.to_le_bytes());
        assert_eq!(&bytes[60..64], &(-1.0f32).to_le_bytes());
        assert_eq!(Pose::from_le_bytes(&bytes), Pose::new(m));
    }

    #[test]
    fn test_sentinel_is_zeroed() {
        assert!(Pose::default().is_sentinel());
        assert!(!Pose::identity().is_sentinel());
    }
}
