use crate::types::{Pose, Profile};

/// One-slot deferred pose buffer.
///
/// With header-splitting profiles the pose attached to the unit currently
/// being delivered belongs to the next unit, so it is held here for exactly
/// one delivery. Owned by a single session; starts at the sentinel.
#[derive(Debug, Clone, Default)]
pub struct PoseLatch {
    slot: Pose,
}

impl PoseLatch {
    pub fn new() -> Self {
        Self {
            slot: Pose::SENTINEL,
        }
    }

    /// Pose currently held.
    pub fn current(&self) -> Pose {
        self.slot
    }

    /// Replace the held pose. A unit without a pose leaves the slot as is,
    /// so the last known pose carries forward.
    pub fn store(&mut self, pose: Option<Pose>) {
        if let Some(pose) = pose {
            self.slot = pose;
        }
    }

    /// Run `send` with the pose that belongs to `attached`'s unit under
    /// `profile`, updating the slot in the order the profile requires.
    pub fn realign<T>(
        &mut self,
        profile: Profile,
        attached: Option<Pose>,
        send: impl FnOnce(&Pose) -> T,
    ) -> T {
        if profile.splits_headers() {
            let result = send(&self.slot);
            self.store(attached);
            result
        } else {
            self.store(attached);
            send(&self.slot)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pose(v: f32) -> Pose {
        Pose::new([[v; 4]; 4])
    }

    #[test]
    fn test_no_splitting_uses_own_pose() {
        let mut latch = PoseLatch::new();
        let sent: Vec<Pose> = (0..3)
            .map(|i| latch.realign(Profile::None, Some(pose(i as f32)), |p| *p))
            .collect();
        assert_eq!(sent, vec![pose(0.0), pose(1.0), pose(2.0)]);
    }

    #[test]
    fn test_splitting_defers_by_one() {
        let mut latch = PoseLatch::new();
        let sent: Vec<Pose> = [1.0, 2.0, 3.0]
            .iter()
            .map(|&v| latch.realign(Profile::H265Main, Some(pose(v)), |p| *p))
            .collect();
        assert_eq!(sent, vec![Pose::SENTINEL, pose(1.0), pose(2.0)]);
        assert_eq!(latch.current(), pose(3.0));
    }

    #[test]
    fn test_missing_pose_keeps_previous() {
        let mut latch = PoseLatch::new();
        latch.store(Some(pose(4.0)));
        latch.store(None);
        assert_eq!(latch.current(), pose(4.0));
    }

    #[test]
    fn test_poseless_unit_carries_last_pose_forward() {
        let mut latch = PoseLatch::new();
        let sent: Vec<Pose> = [Some(pose(1.0)), None, Some(pose(3.0))]
            .into_iter()
            .map(|attached| latch.realign(Profile::H264Main, attached, |p| *p))
            .collect();
        assert_eq!(sent, vec![Pose::SENTINEL, pose(1.0), pose(1.0)]);
        assert_eq!(latch.current(), pose(3.0));
    }

    #[test]
    fn test_header_then_data_units_get_frame_pose() {
        // Header units carry the frame pose; the data unit after each carries none.
        let mut latch = PoseLatch::new();
        let attached = [Some(pose(1.0)), None, Some(pose(2.0)), None];
        let sent: Vec<Pose> = attached
            .into_iter()
            .map(|a| latch.realign(Profile::H265Main, a, |p| *p))
            .collect();
        assert_eq!(sent[1], pose(1.0));
        assert_eq!(sent[3], pose(2.0));
    }
}
