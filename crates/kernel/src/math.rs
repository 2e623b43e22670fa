//! Shared numerical helpers: error function, Gaussian draws, symmetric
//! tensors, and face-normal coordinate frames.
//!
//! Everything here is f64. The geometric predicates downstream (signed
//! tetrahedron volumes near shared faces) and the distribution tail bounds
//! need the headroom of double precision.

use glam::{DMat3, DVec3};
use rand::Rng;

/// Error function approximation, Abramowitz & Stegun 7.1.26.
///
/// Maximum absolute error 1.5e-7, well below the 1e-6 tail tolerances used
/// by the inflow distribution.
pub fn erf(x: f64) -> f64 {
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - (((((A5 * t + A4) * t) + A3) * t + A2) * t + A1) * t * (-x * x).exp();
    sign * y
}

/// Draw a standard normal N(0, 1) variate via the Box-Muller transform.
pub fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    let u1 = rng.random::<f64>().max(1.0e-300); // avoid log(0)
    let u2 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

// ---------------------------------------------------------------------------
// Symmetric rank-2 tensor
// ---------------------------------------------------------------------------

/// Symmetric 3x3 tensor storing the six unique components.
///
/// Used for Reynolds stresses at boundary faces. Component order follows the
/// usual (xx, xy, xz, yy, yz, zz) convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymTensor3 {
    /// xx component
    pub xx: f64,
    /// xy component
    pub xy: f64,
    /// xz component
    pub xz: f64,
    /// yy component
    pub yy: f64,
    /// yz component
    pub yz: f64,
    /// zz component
    pub zz: f64,
}

impl SymTensor3 {
    /// The zero tensor.
    pub const ZERO: Self = Self {
        xx: 0.0,
        xy: 0.0,
        xz: 0.0,
        yy: 0.0,
        yz: 0.0,
        zz: 0.0,
    };

    /// Isotropic tensor `d * I`.
    pub fn diagonal(d: f64) -> Self {
        Self {
            xx: d,
            xy: 0.0,
            xz: 0.0,
            yy: d,
            yz: 0.0,
            zz: d,
        }
    }

    /// Sum of the diagonal components.
    pub fn trace(&self) -> f64 {
        self.xx + self.yy + self.zz
    }

    /// Expand into a full (column-major) 3x3 matrix.
    pub fn to_mat3(&self) -> DMat3 {
        DMat3::from_cols(
            DVec3::new(self.xx, self.xy, self.xz),
            DVec3::new(self.xy, self.yy, self.yz),
            DVec3::new(self.xz, self.yz, self.zz),
        )
    }

    /// Congruence transform `T * S * T^T`.
    ///
    /// With `T` the global-to-local rotation of a face frame, this expresses
    /// the stress tensor in face-local coordinates.
    pub fn congruence(&self, t: &DMat3) -> SymTensor3 {
        let r = *t * self.to_mat3() * t.transpose();
        SymTensor3 {
            xx: r.x_axis.x,
            xy: r.y_axis.x,
            xz: r.z_axis.x,
            yy: r.y_axis.y,
            yz: r.z_axis.y,
            zz: r.z_axis.z,
        }
    }
}

// ---------------------------------------------------------------------------
// Face-normal frames
// ---------------------------------------------------------------------------

/// Build the forward/reverse transforms of a face-normal frame.
///
/// The local x-axis is the *inward* face normal, so the wall-normal velocity
/// of entering particles is positive in local coordinates. The two tangent
/// axes complete a right-handed orthonormal basis.
///
/// Returns `(fwd, rev)`: `fwd` maps global to face-local vectors, `rev` is
/// its inverse (the transpose, since both are pure rotations).
pub fn face_frame(outward_normal: DVec3) -> (DMat3, DMat3) {
    let e1 = (-outward_normal).normalize();
    // Pick the global axis least aligned with e1 to seed the first tangent.
    let seed = if e1.x.abs() < 0.5 {
        DVec3::X
    } else {
        DVec3::Y
    };
    let e2 = (seed - seed.dot(e1) * e1).normalize();
    let e3 = e1.cross(e2);

    let rev = DMat3::from_cols(e1, e2, e3);
    (rev.transpose(), rev)
}
