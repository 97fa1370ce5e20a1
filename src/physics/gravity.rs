//! Gravity field snapshot and exact pairwise summation.
//!
//! The field is captured from the massive bodies at the start of every tick,
//! so all bodies in a tick see the same sources regardless of update order.
//! Source data is kept as structure-of-arrays so the direct solver can sum
//! four sources per iteration with `f64x4`.

use bevy::math::DVec3;
use wide::f64x4;

use super::SimulationError;
use crate::types::{Body, SINGULARITY_DISTANCE};

/// Start-of-tick copy of every massive body.
#[derive(Clone, Debug, Default)]
pub struct GravityField {
    ids: Vec<String>,
    xs: Vec<f64>,
    ys: Vec<f64>,
    zs: Vec<f64>,
    masses: Vec<f64>,
    /// Softening length per source (not squared).
    softening: Vec<f64>,
    radii: Vec<f64>,
    soi_radii: Vec<Option<f64>>,
}

impl GravityField {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a field from every massive body in `bodies`.
    pub fn from_bodies<'a>(bodies: impl IntoIterator<Item = &'a Body>) -> Self {
        let mut field = Self::new();
        field.capture(bodies);
        field
    }

    /// Replace the field contents, reusing the allocations.
    pub fn capture<'a>(&mut self, bodies: impl IntoIterator<Item = &'a Body>) {
        self.clear();
        for body in bodies.into_iter().filter(|b| b.is_massive()) {
            self.push(body);
        }
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.xs.clear();
        self.ys.clear();
        self.zs.clear();
        self.masses.clear();
        self.softening.clear();
        self.radii.clear();
        self.soi_radii.clear();
    }

    pub fn push(&mut self, body: &Body) {
        self.ids.push(body.id.clone());
        self.xs.push(body.position.x);
        self.ys.push(body.position.y);
        self.zs.push(body.position.z);
        self.masses.push(body.mass);
        self.softening.push(body.softening);
        self.radii.push(body.radius);
        self.soi_radii.push(body.soi_radius);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[inline]
    pub fn position(&self, i: usize) -> DVec3 {
        DVec3::new(self.xs[i], self.ys[i], self.zs[i])
    }

    #[inline]
    pub fn mass(&self, i: usize) -> f64 {
        self.masses[i]
    }

    #[inline]
    pub fn softening(&self, i: usize) -> f64 {
        self.softening[i]
    }

    #[inline]
    pub fn radius(&self, i: usize) -> f64 {
        self.radii[i]
    }

    /// Explicitly configured SOI radius of a source, if any.
    #[inline]
    pub fn explicit_soi_radius(&self, i: usize) -> Option<f64> {
        self.soi_radii[i]
    }

    #[inline]
    pub fn id(&self, i: usize) -> &str {
        &self.ids[i]
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.ids.iter().position(|s| s == id)
    }

    pub fn total_mass(&self) -> f64 {
        self.masses.iter().sum()
    }

    /// Whether `position` lies within `multiplier` radii of any source other
    /// than `exclude`.
    pub fn is_close_encounter(&self, position: DVec3, exclude: Option<usize>, multiplier: f64) -> bool {
        (0..self.len()).any(|j| {
            Some(j) != exclude
                && position.distance_squared(self.position(j))
                    < (self.radii[j] * multiplier).powi(2)
        })
    }

    pub(crate) fn singularity(&self, body_id: &str, source: usize) -> SimulationError {
        SimulationError::Singularity {
            body: body_id.to_string(),
            other: self.ids[source].clone(),
        }
    }

    /// Exact softened gravitational acceleration at `position`.
    ///
    /// Each source contributes `G·M/(d² + ε²)` along the unit separation,
    /// where `ε` is that source's softening. The source at index `exclude`
    /// (the querying body itself) is skipped.
    ///
    /// # Errors
    /// [`SimulationError::Singularity`] if any other source is closer than
    /// [`SINGULARITY_DISTANCE`].
    pub fn direct_acceleration(
        &self,
        body_id: &str,
        position: DVec3,
        exclude: Option<usize>,
        g: f64,
    ) -> Result<DVec3, SimulationError> {
        let n = self.len();
        let singular_sq = SINGULARITY_DISTANCE * SINGULARITY_DISTANCE;

        let px = f64x4::splat(position.x);
        let py = f64x4::splat(position.y);
        let pz = f64x4::splat(position.z);
        let mut ax = f64x4::splat(0.0);
        let mut ay = f64x4::splat(0.0);
        let mut az = f64x4::splat(0.0);

        let full = n - n % 4;
        for base in (0..full).step_by(4) {
            let dx = lane(&self.xs, base) - px;
            let dy = lane(&self.ys, base) - py;
            let dz = lane(&self.zs, base) - pz;

            let mut d2 = (dx * dx + dy * dy + dz * dz).to_array();
            let mut mass = [
                self.masses[base],
                self.masses[base + 1],
                self.masses[base + 2],
                self.masses[base + 3],
            ];
            for (k, (d2k, mk)) in d2.iter_mut().zip(mass.iter_mut()).enumerate() {
                let j = base + k;
                if Some(j) == exclude {
                    // Zero mass over unit distance contributes nothing
                    *mk = 0.0;
                    *d2k = 1.0;
                } else if *d2k < singular_sq {
                    return Err(self.singularity(body_id, j));
                }
            }

            let d2 = f64x4::new(d2);
            let eps = lane(&self.softening, base);
            let dist = d2.sqrt();
            let factor = f64x4::new(mass) / ((d2 + eps * eps) * dist);
            ax += dx * factor;
            ay += dy * factor;
            az += dz * factor;
        }

        let sum = |v: f64x4| v.to_array().iter().sum::<f64>();
        let mut acc = DVec3::new(sum(ax), sum(ay), sum(az));

        for j in full..n {
            if Some(j) == exclude {
                continue;
            }
            let delta = self.position(j) - position;
            let d2 = delta.length_squared();
            if d2 < singular_sq {
                return Err(self.singularity(body_id, j));
            }
            let eps = self.softening[j];
            acc += delta * (self.masses[j] / ((d2 + eps * eps) * d2.sqrt()));
        }

        Ok(acc * g)
    }

    /// Gravitational potential energy `-Σ G·m_i·m_j / r_ij` over unique
    /// source pairs.
    ///
    /// Unsoftened, so the result does not depend on source order. Coincident
    /// pairs are skipped.
    pub fn potential_energy(&self, g: f64) -> f64 {
        let mut pe = 0.0;
        for i in 0..self.len() {
            for j in (i + 1)..self.len() {
                let r = self.position(i).distance(self.position(j));
                if r > 0.0 {
                    pe -= g * self.masses[i] * self.masses[j] / r;
                }
            }
        }
        pe
    }
}

#[inline]
fn lane(v: &[f64], base: usize) -> f64x4 {
    f64x4::new([v[base], v[base + 1], v[base + 2], v[base + 3]])
}
