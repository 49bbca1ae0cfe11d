use crate::device::CalibrationSource;
use crate::transmit::Transmitter;
use crate::types::Calibration;
use crate::Result;
use std::io::Write;

/// One-shot calibration dump.
///
/// Sends uv2x, uv2y, extrinsics, mapx, mapy and k as a single six-buffer
/// message. Empty tables are sent as zero-length buffers.
pub struct CalibrationDumper<'a> {
    source: &'a dyn CalibrationSource,
}

impl<'a> CalibrationDumper<'a> {
    pub fn new(source: &'a dyn CalibrationSource) -> Self {
        Self { source }
    }

    /// Gather intrinsics and extrinsics from the source.
    pub fn collect(&self) -> Result<Calibration> {
        let mut calibration = self.source.intrinsics()?;
        calibration.extrinsics = self.source.extrinsics()?;
        Ok(calibration)
    }

    pub fn dump<W: Write>(&self, writer: W) -> Result<Calibration> {
        let calibration = self.collect()?;
        let mut tx = Transmitter::new(writer);
        tx.send_calibration(&calibration)?;
        log::info!(
            "Sent calibration: {} table entries, {} bytes",
            calibration.uv2x.len(),
            tx.bytes_sent()
        );
        Ok(calibration)
    }
}
