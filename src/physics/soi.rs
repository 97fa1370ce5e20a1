//! Sphere-of-influence tracking for passive bodies.
//!
//! Each massive body owns a sphere of influence: either an explicit radius
//! or its Hill radius around whichever heavier body pulls on it hardest.
//! A passive body's dominant body is the one with the largest `M/d²` among
//! those whose sphere contains it.

use std::collections::HashMap;

use bevy::log::debug;
use bevy::math::DVec3;

use super::gravity::GravityField;
use crate::types::Body;

/// Hill sphere radius: `a · (m / 3M)^(1/3)`.
///
/// # Arguments
/// * `semi_major_axis` - Orbital distance from the primary (meters)
/// * `mass` - Mass of the secondary (kg)
/// * `primary_mass` - Mass of the primary (kg)
#[inline]
pub fn hill_radius(semi_major_axis: f64, mass: f64, primary_mass: f64) -> f64 {
    if primary_mass <= 0.0 {
        return f64::INFINITY;
    }
    semi_major_axis * (mass / (3.0 * primary_mass)).cbrt()
}

/// SOI radius of every source in the field, in field order.
///
/// Explicit radii win. Otherwise the Hill radius is taken around the heavier
/// source with the strongest pull; a source with no heavier peer has an
/// unbounded sphere.
pub fn soi_radii(field: &GravityField) -> Vec<f64> {
    (0..field.len())
        .map(|i| {
            if let Some(r) = field.explicit_soi_radius(i) {
                return r;
            }
            let pos = field.position(i);
            let mass = field.mass(i);
            let primary = (0..field.len())
                .filter(|&k| k != i && field.mass(k) > mass)
                .map(|k| {
                    let d2 = field.position(k).distance_squared(pos);
                    (k, field.mass(k) / d2.max(f64::MIN_POSITIVE))
                })
                .max_by(|a, b| a.1.total_cmp(&b.1));
            match primary {
                Some((k, _)) => hill_radius(field.position(k).distance(pos), mass, field.mass(k)),
                None => f64::INFINITY,
            }
        })
        .collect()
}

/// Field index of the body dominating `position`, if it lies inside any sphere.
pub fn dominant_body(field: &GravityField, radii: &[f64], position: DVec3) -> Option<usize> {
    (0..field.len())
        .filter_map(|j| {
            let d2 = field.position(j).distance_squared(position);
            (d2.sqrt() < radii[j]).then(|| (j, field.mass(j) / d2.max(f64::MIN_POSITIVE)))
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(j, _)| j)
}

/// A passive body moved from one sphere of influence to another.
#[derive(Clone, Debug, PartialEq)]
pub struct SoiTransition {
    pub body: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub time: f64,
}

/// Current dominant body for every tracked passive body.
#[derive(Clone, Debug, Default)]
pub struct SoiTracker {
    current: HashMap<String, Option<String>>,
}

impl SoiTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dominant body id for `id`, if known and inside some sphere.
    pub fn dominant(&self, id: &str) -> Option<&str> {
        self.current.get(id).and_then(|d| d.as_deref())
    }

    /// Re-evaluate every passive body; returns the transitions that occurred.
    ///
    /// The first assignment after a body appears counts as a transition.
    pub fn update(&mut self, bodies: &[Body], field: &GravityField, time: f64) -> Vec<SoiTransition> {
        let radii = soi_radii(field);
        let mut transitions = Vec::new();

        for body in bodies.iter().filter(|b| !b.is_massive()) {
            let to = dominant_body(field, &radii, body.position).map(|j| field.id(j).to_string());
            let from = self.current.get(&body.id).cloned().flatten();
            if from == to {
                continue;
            }

            debug!("SOI transition: '{}' {:?} -> {:?}", body.id, from, to);
            transitions.push(SoiTransition {
                body: body.id.clone(),
                from,
                to: to.clone(),
                time,
            });
            self.current.insert(body.id.clone(), to);
        }

        transitions
    }

    pub fn remove(&mut self, id: &str) {
        self.current.remove(id);
    }

    pub fn clear(&mut self) {
        self.current.clear();
    }
}
