//! Session format negotiation.
//!
//! Handshake, all little-endian, read in this order:
//!
//! ```text
//! divisor  u8
//! profile  u8, bitrate u32
//! count    u8, then count x (key u64, value u64)
//! ```
//!
//! Two option keys are reserved and consumed here: the constant timestamp
//! offset and the exposure factor. Every other pair is passed through to the
//! encoder untouched.

use crate::error::StreamError;
use crate::protocol::{self, OPTION_CONSTANT_FACTOR, OPTION_EXPOSURE_FACTOR};
use crate::timestamp::TimestampCorrector;
use crate::types::{EncoderOptions, Profile, StreamFormat};
use crate::Result;
use std::io::Read;

/// Outcome of a successful negotiation.
#[derive(Debug, Clone)]
pub struct Negotiated {
    pub format: StreamFormat,
    /// Pass-through options, reserved keys removed.
    pub options: EncoderOptions,
    pub corrector: TimestampCorrector,
}

/// Reads session parameters from the client and fixes the device geometry.
#[derive(Debug, Clone, Copy)]
pub struct FormatNegotiator {
    width: u32,
    height: u32,
    framerate: u32,
}

impl Default for FormatNegotiator {
    fn default() -> Self {
        Self::new(protocol::VLC_WIDTH, protocol::VLC_HEIGHT, protocol::VLC_FPS)
    }
}

impl FormatNegotiator {
    pub fn new(width: u32, height: u32, framerate: u32) -> Self {
        Self {
            width,
            height,
            framerate,
        }
    }

    pub fn negotiate<R: Read>(&self, reader: &mut R) -> Result<Negotiated> {
        let divisor = protocol::read_u8(reader, "divisor")?;
        if divisor == 0 {
            return Err(StreamError::Negotiation("divisor must be at least 1".into()));
        }

        let profile_byte = protocol::read_u8(reader, "profile")?;
        let profile = Profile::from_wire(profile_byte).ok_or_else(|| {
            StreamError::Negotiation(format!("unknown profile 0x{:02x}", profile_byte))
        })?;
        let bitrate = protocol::read_u32_le(reader, "bitrate")?;

        let raw = read_options(reader)?;
        let (corrector, options) = split_options(&raw);

        let format = StreamFormat {
            profile,
            bitrate,
            divisor,
            width: self.width,
            height: self.height,
            framerate: self.framerate,
        };

        log::debug!(
            "Negotiated {:?} divisor={} bitrate={} options={} ef={} cf={}",
            profile,
            divisor,
            bitrate,
            options.len(),
            corrector.exposure_factor,
            corrector.constant_factor
        );

        Ok(Negotiated {
            format,
            options,
            corrector,
        })
    }
}

fn read_options<R: Read>(reader: &mut R) -> Result<EncoderOptions> {
    let count = protocol::read_u8(reader, "option count")?;
    let mut options = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let key = protocol::read_u64_le(reader, "option key")?;
        let value = protocol::read_u64_le(reader, "option value")?;
        options.push((key, value));
    }
    Ok(options)
}

/// Separate the reserved correction scalars from the pass-through options.
/// Later occurrences of a reserved key override earlier ones.
pub fn split_options(raw: &[(u64, u64)]) -> (TimestampCorrector, EncoderOptions) {
    let mut corrector = TimestampCorrector::default();
    let mut passthrough = Vec::with_capacity(raw.len());
    for &(key, value) in raw {
        match key {
            OPTION_CONSTANT_FACTOR => corrector.constant_factor = value as i64,
            OPTION_EXPOSURE_FACTOR => corrector.exposure_factor = f64::from_bits(value),
            _ => passthrough.push((key, value)),
        }
    }
    (corrector, passthrough)
}
