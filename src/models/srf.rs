use crate::physics::FrameModel;
use glam::DVec3;

/// Single rotating frame about an axis through `origin`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RotatingFrame {
    pub origin: DVec3,
    pub omega: DVec3,
}

impl RotatingFrame {
    /// Rotation at `rpm` revolutions per minute about `axis`.
    pub fn from_rpm(origin: DVec3, axis: DVec3, rpm: f64) -> Self {
        Self {
            origin,
            omega: axis.normalize_or_zero() * rpm * std::f64::consts::TAU / 60.0,
        }
    }
}

impl FrameModel for RotatingFrame {
    fn omega(&self) -> DVec3 {
        self.omega
    }

    fn velocity(&self, x: DVec3) -> DVec3 {
        self.omega.cross(x - self.origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_velocity_is_tangential() {
        let frame = RotatingFrame::from_rpm(DVec3::ZERO, DVec3::Z, 60.0);
        let v = frame.velocity(DVec3::X);
        assert!((v - DVec3::Y * std::f64::consts::TAU).length() < 1e-12);
        assert!((frame.axis() - DVec3::Z).length() < 1e-12);
    }
}
