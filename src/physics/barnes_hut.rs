//! Barnes-Hut octree for O(N log N) gravity.
//!
//! Nodes live in a flat arena indexed by `u32`; children are arena indices.
//! The arena is cleared and refilled every tick so its allocation is reused
//! and no node ever outlives the field it was built from.

use bevy::math::DVec3;

use super::SimulationError;
use super::gravity::GravityField;
use crate::types::SINGULARITY_DISTANCE;

/// Default opening angle.
pub const DEFAULT_THETA: f64 = 0.5;

/// Deepest subdivision. Bodies still sharing a cube at this depth share its leaf.
pub const MAX_TREE_DEPTH: usize = 64;

/// Root cube half-size as a fraction of the largest bounding extent (20% padding).
const ROOT_PADDING: f64 = 0.6;

/// Smallest root half-size, so a lone body still gets a finite cube.
const MIN_ROOT_HALF_SIZE: f64 = 1.0;

/// One cube of the octree.
///
/// A node is empty (no body, no children), external (one body, or several
/// at [`MAX_TREE_DEPTH`]) or internal (at least one child).
#[derive(Clone, Debug)]
pub struct OctreeNode {
    pub center: DVec3,
    pub half_size: f64,
    pub total_mass: f64,
    pub center_of_mass: DVec3,
    /// Largest softening of any contained body.
    pub softening: f64,
    children: [Option<u32>; 8],
    /// First body of the leaf; the rest follow through `BarnesHutTree::next`.
    body: Option<u32>,
}

impl OctreeNode {
    fn new(center: DVec3, half_size: f64) -> Self {
        Self {
            center,
            half_size,
            total_mass: 0.0,
            center_of_mass: DVec3::ZERO,
            softening: 0.0,
            children: [None; 8],
            body: None,
        }
    }

    #[inline]
    pub fn is_internal(&self) -> bool {
        self.children.iter().any(Option::is_some)
    }

    #[inline]
    pub fn is_external(&self) -> bool {
        self.body.is_some()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.body.is_none() && !self.is_internal()
    }

    #[inline]
    fn contains(&self, point: DVec3) -> bool {
        (point - self.center).abs().max_element() <= self.half_size
    }

    fn absorb(&mut self, position: DVec3, mass: f64, softening: f64) {
        let total = self.total_mass + mass;
        if total > 0.0 {
            self.center_of_mass = (self.center_of_mass * self.total_mass + position * mass) / total;
        }
        self.total_mass = total;
        self.softening = self.softening.max(softening);
    }

    /// Octant of `point` relative to this node's center: bit 0 = x, bit 1 = y, bit 2 = z.
    #[inline]
    fn octant(&self, point: DVec3) -> usize {
        let mut octant = 0;
        if point.x >= self.center.x {
            octant |= 1;
        }
        if point.y >= self.center.y {
            octant |= 2;
        }
        if point.z >= self.center.z {
            octant |= 4;
        }
        octant
    }
}

/// Shape of the most recently built tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub node_count: usize,
    pub leaf_count: usize,
    pub max_depth: usize,
}

/// Arena-backed Barnes-Hut octree.
#[derive(Clone, Debug)]
pub struct BarnesHutTree {
    nodes: Vec<OctreeNode>,
    /// Per field index, the next body sharing the same leaf.
    next: Vec<Option<u32>>,
    theta: f64,
    max_depth: usize,
}

impl Default for BarnesHutTree {
    fn default() -> Self {
        Self::new(DEFAULT_THETA)
    }
}

impl BarnesHutTree {
    pub fn new(theta: f64) -> Self {
        Self {
            nodes: Vec::new(),
            next: Vec::new(),
            theta: theta.max(0.0),
            max_depth: 0,
        }
    }

    #[inline]
    pub fn theta(&self) -> f64 {
        self.theta
    }

    /// Set the opening angle. Zero makes every query exact.
    pub fn set_theta(&mut self, theta: f64) -> Result<(), SimulationError> {
        if !theta.is_finite() || theta < 0.0 {
            return Err(SimulationError::InvalidConfig(format!(
                "theta must be a non-negative finite number, got {theta}"
            )));
        }
        self.theta = theta;
        Ok(())
    }

    pub fn root(&self) -> Option<&OctreeNode> {
        self.nodes.first()
    }

    /// Arena capacity, exposed so callers can confirm reuse across rebuilds.
    pub fn capacity(&self) -> usize {
        self.nodes.capacity()
    }

    pub fn stats(&self) -> TreeStats {
        TreeStats {
            node_count: self.nodes.len(),
            leaf_count: self.nodes.iter().filter(|n| n.is_external()).count(),
            max_depth: self.max_depth,
        }
    }

    /// Rebuild the tree over every source in `field`.
    ///
    /// # Errors
    /// - [`SimulationError::InvalidBody`] if a source position is not finite.
    /// - [`SimulationError::Singularity`] if two sources lie within
    ///   [`SINGULARITY_DISTANCE`] of each other.
    pub fn build(&mut self, field: &GravityField) -> Result<(), SimulationError> {
        self.nodes.clear();
        self.next.clear();
        self.next.resize(field.len(), None);
        self.max_depth = 0;
        if field.is_empty() {
            return Ok(());
        }

        let mut min = DVec3::splat(f64::INFINITY);
        let mut max = DVec3::splat(f64::NEG_INFINITY);
        for i in 0..field.len() {
            let p = field.position(i);
            if !p.is_finite() {
                return Err(SimulationError::InvalidBody {
                    id: field.id(i).to_string(),
                    reason: "non-finite position".to_string(),
                });
            }
            min = min.min(p);
            max = max.max(p);
        }

        let center = (min + max) * 0.5;
        let extent = (max - min).max_element();
        let half_size = (extent * ROOT_PADDING).max(MIN_ROOT_HALF_SIZE);
        self.nodes.push(OctreeNode::new(center, half_size));

        for i in 0..field.len() {
            self.insert(field, i as u32)?;
        }
        Ok(())
    }

    fn insert(&mut self, field: &GravityField, body: u32) -> Result<(), SimulationError> {
        let position = field.position(body as usize);
        let mass = field.mass(body as usize);
        let softening = field.softening(body as usize);

        let mut node = 0usize;
        let mut depth = 0usize;

        loop {
            self.max_depth = self.max_depth.max(depth);

            if self.nodes[node].is_empty() {
                let n = &mut self.nodes[node];
                n.body = Some(body);
                n.absorb(position, mass, softening);
                return Ok(());
            }

            if depth == MAX_TREE_DEPTH {
                return self.share_leaf(field, node, body);
            }

            // External node: push its body one level down before descending
            if let Some(existing) = self.nodes[node].body.take() {
                let existing_pos = field.position(existing as usize);
                let child = self.child_for(node, existing_pos);
                let c = &mut self.nodes[child];
                c.body = Some(existing);
                c.absorb(
                    existing_pos,
                    field.mass(existing as usize),
                    field.softening(existing as usize),
                );
            }

            self.nodes[node].absorb(position, mass, softening);
            node = self.child_for(node, position);
            depth += 1;
        }
    }

    /// Add `body` to a leaf that cannot be split any further.
    fn share_leaf(&mut self, field: &GravityField, node: usize, body: u32) -> Result<(), SimulationError> {
        let position = field.position(body as usize);
        let limit = SINGULARITY_DISTANCE * SINGULARITY_DISTANCE;
        if let Some(other) = self
            .leaf_bodies(node)
            .find(|&other| field.position(other as usize).distance_squared(position) < limit)
        {
            return Err(field.singularity(field.id(body as usize), other as usize));
        }

        self.next[body as usize] = self.nodes[node].body;
        let n = &mut self.nodes[node];
        n.body = Some(body);
        n.absorb(position, field.mass(body as usize), field.softening(body as usize));
        Ok(())
    }

    /// Field indices of every body stored in the leaf `node`.
    fn leaf_bodies(&self, node: usize) -> impl Iterator<Item = u32> + '_ {
        std::iter::successors(self.nodes[node].body, move |&body| self.next[body as usize])
    }

    /// Arena index of the child containing `point`, created on demand.
    fn child_for(&mut self, node: usize, point: DVec3) -> usize {
        let parent = &self.nodes[node];
        let octant = parent.octant(point);
        if let Some(child) = parent.children[octant] {
            return child as usize;
        }

        let q = parent.half_size * 0.5;
        let offset = DVec3::new(
            if octant & 1 != 0 { q } else { -q },
            if octant & 2 != 0 { q } else { -q },
            if octant & 4 != 0 { q } else { -q },
        );
        let child = OctreeNode::new(parent.center + offset, q);

        let index = self.nodes.len();
        self.nodes.push(child);
        self.nodes[node].children[octant] = Some(index as u32);
        index
    }

    /// Approximate gravitational acceleration at `position`.
    ///
    /// `exclude` is the field index of the querying body, if it is itself a
    /// source. A node is treated as a point mass when it is external or when
    /// `2·half_size / d < theta` and the query point lies outside it.
    pub fn acceleration_at(
        &self,
        field: &GravityField,
        body_id: &str,
        position: DVec3,
        exclude: Option<usize>,
        g: f64,
    ) -> Result<DVec3, SimulationError> {
        let mut acc = DVec3::ZERO;
        if !self.nodes.is_empty() {
            self.accumulate(field, 0, body_id, position, exclude, &mut acc)?;
        }
        Ok(acc * g)
    }

    fn accumulate(
        &self,
        field: &GravityField,
        node: usize,
        body_id: &str,
        position: DVec3,
        exclude: Option<usize>,
        acc: &mut DVec3,
    ) -> Result<(), SimulationError> {
        let n = &self.nodes[node];
        if n.is_empty() {
            return Ok(());
        }

        if n.is_external() {
            for body in self.leaf_bodies(node) {
                let index = body as usize;
                if Some(index) == exclude {
                    continue;
                }
                let delta = field.position(index) - position;
                let d2 = delta.length_squared();
                if d2 < SINGULARITY_DISTANCE * SINGULARITY_DISTANCE {
                    return Err(field.singularity(body_id, index));
                }
                *acc += point_mass(delta, d2, field.mass(index), field.softening(index));
            }
            return Ok(());
        }

        let delta = n.center_of_mass - position;
        let d2 = delta.length_squared();
        let d = d2.sqrt();
        let size = 2.0 * n.half_size;
        if d > 0.0 && size / d < self.theta && !n.contains(position) {
            *acc += point_mass(delta, d2, n.total_mass, n.softening);
            return Ok(());
        }

        for child in n.children.iter().flatten() {
            self.accumulate(field, *child as usize, body_id, position, exclude, acc)?;
        }
        Ok(())
    }

    /// Field indices of every source within `radius` of `point`.
    pub fn bodies_within(&self, field: &GravityField, point: DVec3, radius: f64) -> Vec<usize> {
        let mut found = Vec::new();
        if !self.nodes.is_empty() {
            self.collect_within(field, 0, point, radius, &mut found);
        }
        found
    }

    fn collect_within(
        &self,
        field: &GravityField,
        node: usize,
        point: DVec3,
        radius: f64,
        found: &mut Vec<usize>,
    ) {
        let n = &self.nodes[node];
        // Distance from the point to the cube, zero if inside
        let outside = ((point - n.center).abs() - DVec3::splat(n.half_size)).max(DVec3::ZERO);
        if outside.length_squared() > radius * radius {
            return;
        }

        if n.is_external() {
            found.extend(
                self.leaf_bodies(node)
                    .map(|body| body as usize)
                    .filter(|&i| field.position(i).distance_squared(point) <= radius * radius),
            );
            return;
        }
        for child in n.children.iter().flatten() {
            self.collect_within(field, *child as usize, point, radius, found);
        }
    }
}

/// Softened point-mass acceleration (without G).
#[inline]
fn point_mass(delta: DVec3, d2: f64, mass: f64, softening: f64) -> DVec3 {
    delta * (mass / ((d2 + softening * softening) * d2.sqrt()))
}
