//! Collaborator interfaces for the sensor platform.
//!
//! The capture device, the spatial locator and the calibration store are
//! provided by the host platform. Only their contracts live here.

use crate::types::{Calibration, Pose, RawFrame};
use crate::Result;

/// Blocking frame source for one camera.
pub trait CaptureDevice: Send {
    /// Start delivering frames.
    fn open_stream(&mut self) -> Result<()>;

    /// Stop delivering frames. Called exactly once per successful open.
    fn close_stream(&mut self) -> Result<()>;

    /// Block until the next frame is available. There is no timeout; an
    /// error is terminal for the session.
    fn next_frame(&mut self) -> Result<RawFrame>;
}

/// Opaque handle to a coordinate system known to the locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoordinateFrame(pub u64);

/// Resolves host timestamps to rig poses.
pub trait SpatialLocator: Send + Sync {
    /// The world coordinate system valid at `timestamp`.
    fn world_frame(&self, timestamp: u64) -> CoordinateFrame;

    /// Pose of the rig at `timestamp` relative to `frame`. Returns the
    /// sentinel pose when tracking is unavailable.
    fn locate(&self, timestamp: u64, frame: CoordinateFrame) -> Pose;

    /// Pose in the world frame at `timestamp`.
    fn locate_in_world(&self, timestamp: u64) -> Pose {
        self.locate(timestamp, self.world_frame(timestamp))
    }
}

/// Source of per-camera lens and mounting calibration.
pub trait CalibrationSource: Send + Sync {
    /// Undistortion tables, remap tables and distortion coefficients.
    /// Only `uv2x`, `uv2y`, `mapx`, `mapy` and `k` are filled in.
    fn intrinsics(&self) -> Result<Calibration>;

    /// Camera-to-rig transform.
    fn extrinsics(&self) -> Result<[[f32; 4]; 4]>;
}
