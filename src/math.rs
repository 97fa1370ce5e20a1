//! Vector and quaternion helpers.
//!
//! The simulation works in `f64` throughout; vectors and rotations are the
//! glam double-precision types re-exported by Bevy. This module only adds the
//! handful of operations the core needs on top of them.

use bevy::math::{DQuat, DVec3};

/// Local axis bodies spin about.
pub const SPIN_AXIS: DVec3 = DVec3::Y;

/// Advance an orientation by a spin of `angular_velocity` rad/s about the
/// local spin axis for `dt` seconds.
///
/// The result is renormalized so drift from repeated multiplication never
/// accumulates.
#[inline]
pub fn integrate_spin(orientation: DQuat, angular_velocity: f64, dt: f64) -> DQuat {
    if angular_velocity == 0.0 || dt == 0.0 {
        return orientation;
    }
    let rotated = orientation * DQuat::from_axis_angle(SPIN_AXIS, angular_velocity * dt);
    rotated.normalize()
}

/// Pack an orientation as `[x, y, z, w]` single-precision components.
#[inline]
pub fn pack_orientation(q: DQuat) -> [f32; 4] {
    [q.x as f32, q.y as f32, q.z as f32, q.w as f32]
}

/// Unpack `[x, y, z, w]` into a unit quaternion.
///
/// Degenerate input (zero length or non-finite) yields the identity rotation.
pub fn unpack_orientation(c: [f32; 4]) -> DQuat {
    let q = DQuat::from_xyzw(c[0] as f64, c[1] as f64, c[2] as f64, c[3] as f64);
    let len = q.length();
    if !len.is_finite() || len < 1e-12 {
        return DQuat::IDENTITY;
    }
    q / len
}

/// Convert a fixed-size array into a vector.
#[inline]
pub fn vec_from_array(a: [f64; 3]) -> DVec3 {
    DVec3::new(a[0], a[1], a[2])
}
