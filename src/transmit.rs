use crate::error::StreamError;
use crate::protocol::{self, UnitHeader};
use crate::types::{Calibration, Pose};
use crate::Result;
use std::io::{ErrorKind, IoSlice, Write};

/// Write an ordered buffer set as one vectored send.
///
/// Short writes continue from where the socket stopped; bytes already
/// accepted are never sent again. Any error or a zero-length write fails the
/// whole set, with no retry.
pub fn send_multiple<W: Write + ?Sized>(writer: &mut W, bufs: &mut [IoSlice<'_>]) -> Result<()> {
    let mut bufs = bufs;
    while !bufs.is_empty() {
        match writer.write_vectored(bufs) {
            Ok(0) => {
                return Err(StreamError::Transmit(std::io::Error::new(
                    ErrorKind::WriteZero,
                    "socket accepted no bytes",
                )))
            }
            Ok(n) => IoSlice::advance_slices(&mut bufs, n),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(StreamError::Transmit(e)),
        }
    }
    writer.flush().map_err(StreamError::Transmit)
}

/// Frames encoded units and calibration messages onto one client socket.
pub struct Transmitter<W: Write> {
    writer: W,
    units_sent: u64,
    bytes_sent: u64,
}

impl<W: Write> Transmitter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            units_sent: 0,
            bytes_sent: 0,
        }
    }

    /// Send one unit: timestamp, length, payload and, if given, the pose.
    pub fn send_unit(
        &mut self,
        timestamp: u64,
        payload: &[u8],
        pose: Option<&Pose>,
    ) -> Result<()> {
        let length = u32::try_from(payload.len()).map_err(|_| {
            StreamError::Transmit(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("payload of {} bytes does not fit the length field", payload.len()),
            ))
        })?;
        let header = UnitHeader::new(timestamp, length, pose);
        let mut bufs = header.buffers(payload);
        let total: usize = bufs.iter().map(|b| b.len()).sum();
        send_multiple(&mut self.writer, &mut bufs)?;
        self.units_sent += 1;
        self.bytes_sent += total as u64;
        Ok(())
    }

    /// Send the fixed six-buffer calibration message.
    pub fn send_calibration(&mut self, calibration: &Calibration) -> Result<()> {
        let tables = protocol::calibration_buffers(calibration);
        let mut bufs: Vec<IoSlice<'_>> = tables.iter().map(|t| IoSlice::new(t)).collect();
        let total: usize = tables.iter().map(Vec::len).sum();
        send_multiple(&mut self.writer, &mut bufs)?;
        self.bytes_sent += total as u64;
        Ok(())
    }

    pub fn units_sent(&self) -> u64 {
        self.units_sent
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
