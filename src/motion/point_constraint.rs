use glam::{DMat3, DVec3};

const PARALLEL_TOL: f64 = 1e-3;
const SMALL: f64 = 1e-15;

/// Accumulated motion constraint of one point.
///
/// `count` is the number of removed degrees of freedom: 1 keeps a plane
/// with normal `direction`, 2 keeps the line along `direction`, 3 pins.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointConstraint {
    pub count: u8,
    pub direction: DVec3,
}

impl Default for PointConstraint {
    fn default() -> Self {
        Self {
            count: 0,
            direction: DVec3::ZERO,
        }
    }
}

fn outer(a: DVec3, b: DVec3) -> DMat3 {
    DMat3::from_cols(a * b.x, a * b.y, a * b.z)
}

impl PointConstraint {
    pub fn fixed() -> Self {
        Self {
            count: 3,
            direction: DVec3::ZERO,
        }
    }

    /// Remove motion along the normal `d`. A vanishing `d` constrains nothing.
    pub fn apply_constraint(&mut self, d: DVec3) {
        if !d.is_finite() || d.length() <= SMALL {
            return;
        }
        match self.count {
            0 => {
                self.count = 1;
                self.direction = d.normalize_or_zero();
            }
            1 => {
                let ncd = d.normalize_or_zero();
                if ncd.dot(self.direction).abs() < 1.0 - PARALLEL_TOL {
                    self.direction = self.direction.cross(ncd).normalize_or_zero();
                    self.count = 2;
                }
            }
            2 => {
                if d.dot(self.direction).abs() > PARALLEL_TOL {
                    *self = Self::fixed();
                }
            }
            _ => {}
        }
    }

    /// Merge the constraint accumulated elsewhere for the same point.
    pub fn combine(&mut self, other: &PointConstraint) {
        match self.count {
            0 => *self = *other,
            1 => {
                let n = self.direction;
                *self = *other;
                self.apply_constraint(n);
            }
            2 => match other.count {
                0 => {}
                1 => self.apply_constraint(other.direction),
                2 => {
                    if self.direction.dot(other.direction).abs() <= 1.0 - PARALLEL_TOL {
                        *self = Self::fixed();
                    }
                }
                _ => *self = Self::fixed(),
            },
            _ => {}
        }
    }

    /// Projection onto the remaining degrees of freedom.
    pub fn constraint_transformation(&self) -> DMat3 {
        match self.count {
            0 => DMat3::IDENTITY,
            1 => DMat3::IDENTITY - outer(self.direction, self.direction),
            2 => outer(self.direction, self.direction),
            _ => DMat3::ZERO,
        }
    }

    pub fn constrain_displacement(&self, d: DVec3) -> DVec3 {
        self.constraint_transformation() * d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_vec_eq(a: DVec3, b: DVec3) {
        assert!((a - b).length() < 1e-12, "{a:?} != {b:?}");
    }

    #[test]
    fn planes_reduce_to_line_then_point() {
        let mut pc = PointConstraint::default();
        pc.apply_constraint(DVec3::new(0.0, 0.0, 2.0));
        assert_eq!(pc.count, 1);
        assert_vec_eq(pc.constrain_displacement(DVec3::new(1.0, 2.0, 3.0)), DVec3::new(1.0, 2.0, 0.0));

        // Parallel normal changes nothing.
        pc.apply_constraint(DVec3::new(0.0, 0.0, -1.0));
        assert_eq!(pc.count, 1);

        pc.apply_constraint(DVec3::Y);
        assert_eq!(pc.count, 2);
        assert_vec_eq(pc.constrain_displacement(DVec3::new(1.0, 2.0, 3.0)), DVec3::new(1.0, 0.0, 0.0));

        pc.apply_constraint(DVec3::X);
        assert_eq!(pc.count, 3);
        assert_vec_eq(pc.constrain_displacement(DVec3::new(1.0, 2.0, 3.0)), DVec3::ZERO);
    }

    #[test]
    fn combination_is_order_independent() {
        let mut plane = PointConstraint::default();
        plane.apply_constraint(DVec3::Z);
        let mut line = PointConstraint::default();
        line.apply_constraint(DVec3::Z);
        line.apply_constraint(DVec3::X);
        let mut other_plane = PointConstraint::default();
        other_plane.apply_constraint(DVec3::X);

        let cases = [(plane, line), (plane, other_plane), (line, other_plane), (plane, PointConstraint::fixed())];
        for (a, b) in cases {
            let mut ab = a;
            ab.combine(&b);
            let mut ba = b;
            ba.combine(&a);
            assert_eq!(ab.count, ba.count);
            let d = DVec3::new(0.3, -1.2, 2.5);
            assert_vec_eq(ab.constrain_displacement(d), ba.constrain_displacement(d));
        }
    }

    #[test]
    fn zero_direction_leaves_point_free() {
        let mut pc = PointConstraint::default();
        pc.apply_constraint(DVec3::ZERO);
        assert_eq!(pc, PointConstraint::default());

        pc.apply_constraint(DVec3::Y);
        pc.apply_constraint(DVec3::splat(1e-20));
        assert_eq!(pc.count, 1);
        assert_vec_eq(pc.constrain_displacement(DVec3::new(1.0, 2.0, 3.0)), DVec3::new(1.0, 0.0, 3.0));

        let mut free = PointConstraint::default();
        free.combine(&PointConstraint::default());
        assert_eq!(free.constraint_transformation(), DMat3::IDENTITY);
    }

    #[test]
    fn combining_single_planes_matches_sequential_application() {
        let d1 = DVec3::new(0.3, -0.8, 0.52);
        let d2 = DVec3::new(-0.6, 0.1, 0.9);
        let apply = |pc: PointConstraint, d: DVec3| {
            let mut pc = pc;
            pc.apply_constraint(d);
            pc
        };
        let identity = PointConstraint::default();

        let mut combined = apply(identity, d1);
        combined.combine(&apply(identity, d2));
        let sequential = apply(apply(identity, d2), d1);
        assert_eq!(combined.count, 2);
        assert_eq!(combined.count, sequential.count);
        assert_vec_eq(combined.direction, sequential.direction);

        // The other order flips the line direction but not the projection.
        let mut reversed = apply(identity, d2);
        reversed.combine(&apply(identity, d1));
        let line = d1.cross(d2).normalize();
        let d = DVec3::new(1.0, 2.0, -0.5);
        for pc in [combined, sequential, reversed] {
            assert_vec_eq(pc.constrain_displacement(d), line * line.dot(d));
        }
    }

    #[test]
    fn two_different_lines_pin() {
        let mut a = PointConstraint { count: 2, direction: DVec3::X };
        a.combine(&PointConstraint { count: 2, direction: DVec3::Y });
        assert_eq!(a, PointConstraint::fixed());
    }
}
