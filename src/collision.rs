//! Sphere-sphere collision detection and impulse response.
//!
//! Runs after integration each tick. Overlapping pairs that are approaching
//! exchange an impulse along the contact normal scaled by the coefficient of
//! restitution, then are pushed apart in proportion to their inverse masses.
//! Pairs that are already separating are left alone.

use bevy::log::debug;
use bevy::math::DVec3;

use crate::types::Body;

/// A resolved (or detected) contact between two bodies.
#[derive(Clone, Debug, PartialEq)]
pub struct CollisionEvent {
    pub body_a: String,
    pub body_b: String,
    /// Contact point on the surface of `body_a`.
    pub point: DVec3,
    /// Unit normal from `body_a` toward `body_b`.
    pub normal: DVec3,
    /// Closing speed along the normal before response (m/s).
    pub relative_speed: f64,
    /// Impulse magnitude applied (N·s); zero when the pair was not resolved.
    pub impulse: f64,
    /// Simulation time of contact (seconds).
    pub time: f64,
}

/// Detect and resolve every overlapping pair in `bodies`.
///
/// `elasticity` is the coefficient of restitution in `[0, 1]`: 1 keeps the
/// normal relative speed, 0 removes it. Pairs involving a massless body are
/// reported with zero impulse and left unresolved.
pub fn resolve_collisions(bodies: &mut [Body], elasticity: f64, time: f64) -> Vec<CollisionEvent> {
    let mut events = Vec::new();
    let n = bodies.len();

    for i in 0..n {
        for j in (i + 1)..n {
            let (left, right) = bodies.split_at_mut(j);
            if let Some(event) = resolve_pair(&mut left[i], &mut right[0], elasticity, time) {
                events.push(event);
            }
        }
    }

    events
}

fn resolve_pair(a: &mut Body, b: &mut Body, elasticity: f64, time: f64) -> Option<CollisionEvent> {
    let delta = b.position - a.position;
    let dist = delta.length();
    let contact = a.radius + b.radius;
    if dist >= contact {
        return None;
    }

    // Coincident centers have no defined normal; pick one
    let normal = if dist > 0.0 { delta / dist } else { DVec3::X };
    let closing = (b.velocity - a.velocity).dot(normal);
    if closing >= 0.0 {
        return None;
    }

    let mut event = CollisionEvent {
        body_a: a.id.clone(),
        body_b: b.id.clone(),
        point: a.position + normal * a.radius,
        normal,
        relative_speed: -closing,
        impulse: 0.0,
        time,
    };

    if a.mass <= 0.0 || b.mass <= 0.0 {
        return Some(event);
    }

    let inv_a = 1.0 / a.mass;
    let inv_b = 1.0 / b.mass;
    let inv_sum = inv_a + inv_b;

    let impulse = -(1.0 + elasticity) * closing / inv_sum;
    a.velocity -= normal * (impulse * inv_a);
    b.velocity += normal * (impulse * inv_b);

    let overlap = contact - dist;
    a.position -= normal * (overlap * inv_a / inv_sum);
    b.position += normal * (overlap * inv_b / inv_sum);

    debug!(
        "Collision '{}' <-> '{}': closing {:.3} m/s, impulse {:.3e} N·s",
        a.id, b.id, event.relative_speed, impulse
    );
    event.impulse = impulse;
    Some(event)
}
