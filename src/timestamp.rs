/// Corrects raw capture timestamps for exposure and fixed pipeline latency.
///
/// The device stamps frames at readout end. The exposure factor shifts the
/// stamp by a percentage of the exposure duration and the constant factor
/// adds a fixed offset in host ticks. Monotonicity of the result is the
/// client's responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimestampCorrector {
    /// Percentage of the exposure duration to add.
    pub exposure_factor: f64,
    /// Signed offset in host ticks.
    pub constant_factor: i64,
}

impl TimestampCorrector {
    pub fn new(exposure_factor: f64, constant_factor: i64) -> Self {
        Self {
            exposure_factor,
            constant_factor,
        }
    }

    /// `t0 + floor(ef * e / 100) + cf`, wrapping on overflow.
    pub fn adjust(&self, host_ticks: u64, exposure: u64) -> u64 {
        let shift = (self.exposure_factor * exposure as f64 / 100.0).floor() as i64;
        host_ticks.wrapping_add_signed(shift.wrapping_add(self.constant_factor))
    }
}
