//! 2x3 affine transforms for image alignment

/// A 2x3 affine matrix in row-major order:
///
/// ```text
/// [ m0 m1 m2 ]   [x]
/// [ m3 m4 m5 ] * [y]
///                [1]
/// ```
///
/// Transforms compose right-to-left: `a.mul(b)` applies `b` first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aff3(pub [f64; 6]);

impl Aff3 {
    pub fn identity() -> Self {
        Aff3([1.0, 0.0, 0.0, 0.0, 1.0, 0.0])
    }

    /// Compose with a pure translation (applied before `self`)
    pub fn translate(self, tx: f64, ty: f64) -> Self {
        self.mul(Aff3([1.0, 0.0, tx, 0.0, 1.0, ty]))
    }

    /// Compose with a rotation about the origin (applied before `self`)
    pub fn rotate(self, theta_deg: f64) -> Self {
        let (sin, cos) = theta_deg.to_radians().sin_cos();
        self.mul(Aff3([cos, -sin, 0.0, sin, cos, 0.0]))
    }

    /// Rotation of `theta_deg` about the point `(x, y)`.
    /// Rightmost operations are performed first.
    pub fn rotate_about(theta_deg: f64, x: f64, y: f64) -> Self {
        Aff3::identity().translate(x, y).rotate(theta_deg).translate(-x, -y)
    }

    pub fn mul(self, q: Aff3) -> Self {
        let p = self.0;
        let q = q.0;
        Aff3([
            p[0] * q[0] + p[1] * q[3],
            p[0] * q[1] + p[1] * q[4],
            p[0] * q[2] + p[1] * q[5] + p[2],
            p[3] * q[0] + p[4] * q[3],
            p[3] * q[1] + p[4] * q[4],
            p[3] * q[2] + p[4] * q[5] + p[5],
        ])
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let m = self.0;
        (m[0] * x + m[1] * y + m[2], m[3] * x + m[4] * y + m[5])
    }

    /// Inverse transform. The linear part of an alignment transform is a
    /// rotation, so the determinant is never near zero in practice.
    pub fn invert(&self) -> Self {
        let m = self.0;
        let det = m[0] * m[4] - m[1] * m[3];
        let inv_det = 1.0 / det;

        let a = m[4] * inv_det;
        let b = -m[1] * inv_det;
        let c = -m[3] * inv_det;
        let d = m[0] * inv_det;

        Aff3([
            a,
            b,
            -(a * m[2] + b * m[5]),
            c,
            d,
            -(c * m[2] + d * m[5]),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_about_fixed_point() {
        // Rotating about (tx, ty) must leave (tx, ty) itself in place
        let (tx, ty) = (123.0, 456.0);
        for theta in [0.0, 12.5, 90.0, -33.0] {
            let m = Aff3::rotate_about(theta, tx, ty);
            let (x, y) = m.apply(tx, ty);
            assert!(
                (x - tx).abs() < 1e-9 && (y - ty).abs() < 1e-9,
                "theta {}: ({}, {})",
                theta,
                x,
                y
            );
        }
    }

    #[test]
    fn test_translate_then_rotate_composition() {
        // Composition is right-to-left: translate applies first
        let m = Aff3::identity().rotate(90.0).translate(1.0, 0.0);
        let (x, y) = m.apply(0.0, 0.0);
        assert!((x - 0.0).abs() < 1e-9, "x = {}", x);
        assert!((y - 1.0).abs() < 1e-9, "y = {}", y);
    }

    #[test]
    fn test_invert_roundtrip() {
        let m = Aff3::identity()
            .translate(14.25, -3.5)
            .mul(Aff3::rotate_about(7.5, 100.0, 80.0));
        let inv = m.invert();

        for (px, py) in [(0.0, 0.0), (50.5, 20.25), (-7.0, 99.0)] {
            let (fx, fy) = m.apply(px, py);
            let (bx, by) = inv.apply(fx, fy);
            assert!(
                (bx - px).abs() < 1e-9 && (by - py).abs() < 1e-9,
                "({}, {}) -> ({}, {})",
                px,
                py,
                bx,
                by
            );
        }
    }
}
