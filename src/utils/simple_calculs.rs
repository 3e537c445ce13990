use std::ops::Index;

use glam::DVec3;

use eyre::eyre;

use crate::utils::constants::{
    ANGLE_EPSILON, BOGUS_RANGE, EQUAL_EPSILON, ON_EPSILON, TINY_EDGE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Front,
    Back,
    On,
}

/// A plane in Hessian form with a unit normal: `normal . p = distance`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane3D {
    pub normal: DVec3,
    pub distance: f64,
}

impl Plane3D {
    pub fn new(normal: DVec3, distance: f64) -> Self {
        Self { normal, distance }
    }

    /// Quake plane-point order: counterclockwise seen from the front.
    pub fn from_three_points(p1: DVec3, p2: DVec3, p3: DVec3) -> eyre::Result<Self> {
        let normal = (p1 - p2).cross(p3 - p2);

        if normal.length_squared() < ANGLE_EPSILON {
            return Err(eyre!("Plane points are collinear"));
        }

        let normal = normal.normalize();

        Ok(Self {
            normal,
            distance: normal.dot(p1),
        })
    }

    pub fn distance_to(&self, point: DVec3) -> f64 {
        self.normal.dot(point) - self.distance
    }

    pub fn side_of(&self, point: DVec3) -> Side {
        let distance = self.distance_to(point);

        if distance > ON_EPSILON {
            Side::Front
        } else if distance < -ON_EPSILON {
            Side::Back
        } else {
            Side::On
        }
    }

    pub fn flip(&self) -> Self {
        Self {
            normal: -self.normal,
            distance: -self.distance,
        }
    }

    /// Index of the normal's dominant component.
    pub fn dominant_axis(&self) -> usize {
        let abs = self.normal.abs();

        if abs.x >= abs.y && abs.x >= abs.z {
            0
        } else if abs.y >= abs.z {
            1
        } else {
            2
        }
    }

    pub fn is_axial(&self) -> bool {
        let abs = self.normal.abs();
        abs.x == 1. || abs.y == 1. || abs.z == 1.
    }

    pub fn equals(&self, other: &Self) -> bool {
        (self.normal - other.normal).abs().max_element() < ANGLE_EPSILON
            && (self.distance - other.distance).abs() < EQUAL_EPSILON
    }
}

/// An axis-aligned box grown from points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub mins: DVec3,
    pub maxs: DVec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self {
            mins: DVec3::INFINITY,
            maxs: DVec3::NEG_INFINITY,
        }
    }
}

impl Aabb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_points(points: impl IntoIterator<Item = DVec3>) -> Self {
        let mut aabb = Self::new();
        for point in points {
            aabb.add_point(point);
        }
        aabb
    }

    pub fn add_point(&mut self, point: DVec3) {
        self.mins = self.mins.min(point);
        self.maxs = self.maxs.max(point);
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            mins: self.mins.min(other.mins),
            maxs: self.maxs.max(other.maxs),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.mins.x <= self.maxs.x && self.mins.y <= self.maxs.y && self.mins.z <= self.maxs.z
    }

    pub fn size(&self) -> DVec3 {
        self.maxs - self.mins
    }

    pub fn center(&self) -> DVec3 {
        (self.mins + self.maxs) * 0.5
    }

    pub fn longest_axis(&self) -> usize {
        let size = self.size();

        if size.x >= size.y && size.x >= size.z {
            0
        } else if size.y >= size.z {
            1
        } else {
            2
        }
    }

    pub fn expand(&self, amount: f64) -> Self {
        Self {
            mins: self.mins - DVec3::splat(amount),
            maxs: self.maxs + DVec3::splat(amount),
        }
    }

    pub fn contains_point(&self, point: DVec3) -> bool {
        point.cmpge(self.mins).all() && point.cmple(self.maxs).all()
    }

    pub fn intersects(&self, other: &Self) -> bool {
        self.mins.cmple(other.maxs).all() && other.mins.cmple(self.maxs).all()
    }
}

// | a b |
// | c d |
#[derive(Debug)]
pub struct Matrix2x2 {
    a: f64,
    b: f64,
    c: f64,
    d: f64,
}

impl Matrix2x2 {
    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    pub fn solve_cramer(&self, r: [f64; 2]) -> eyre::Result<[f64; 2]> {
        let denominator = self.determinant();

        if denominator.abs() <= EQUAL_EPSILON * EQUAL_EPSILON {
            return Err(eyre!("Determinant is 0."));
        }

        let x_nom = Matrix2x2::from([r[0], self.b, r[1], self.d]).determinant();
        let y_nom = Matrix2x2::from([self.a, r[0], self.c, r[1]]).determinant();

        Ok([x_nom / denominator, y_nom / denominator])
    }
}

impl From<[f64; 4]> for Matrix2x2 {
    fn from(value: [f64; 4]) -> Self {
        Self {
            a: value[0],
            b: value[1],
            c: value[2],
            d: value[3],
        }
    }
}

/// Barycentric weights of `p` in triangle `(a, b, c)`, or `None` for a
/// degenerate triangle.
pub fn barycentric(p: DVec3, a: DVec3, b: DVec3, c: DVec3) -> Option<DVec3> {
    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;

    let d00 = v0.dot(v0);
    let d01 = v0.dot(v1);
    let d11 = v1.dot(v1);
    let d20 = v2.dot(v0);
    let d21 = v2.dot(v1);

    let denom = d00 * d11 - d01 * d01;
    if denom.abs() < ANGLE_EPSILON {
        return None;
    }

    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;

    Some(DVec3::new(1. - v - w, v, w))
}

/// Convex polygon, wound clockwise seen from the front of its plane.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Winding(Vec<DVec3>);

impl Winding {
    pub fn new(points: Vec<DVec3>) -> Self {
        Self(points)
    }

    /// A quad centered on the plane, big enough to cover the world; the
    /// starting point for half-space clipping.
    pub fn base_for_plane(plane: &Plane3D) -> Self {
        let axis = plane.dominant_axis();
        let up = if axis == 2 { DVec3::X } else { DVec3::Z };

        // Project "up" into the plane.
        let up = (up - plane.normal * up.dot(plane.normal)).normalize();
        let right = up.cross(plane.normal);

        let origin = plane.normal * plane.distance;
        let up = up * BOGUS_RANGE;
        let right = right * BOGUS_RANGE;

        Self(vec![
            origin - right + up,
            origin + right + up,
            origin + right - up,
            origin - right - up,
        ])
    }

    pub fn points(&self) -> &[DVec3] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, point: DVec3) {
        self.0.push(point);
    }

    pub fn insert(&mut self, index: usize, point: DVec3) {
        self.0.insert(index, point);
    }

    pub fn flip(&self) -> Self {
        Self(self.0.iter().rev().copied().collect())
    }

    pub fn translate(&self, offset: DVec3) -> Self {
        Self(self.0.iter().map(|&p| p + offset).collect())
    }

    pub fn plane(&self) -> eyre::Result<Plane3D> {
        if self.0.len() < 3 {
            return Err(eyre!("Winding has fewer than 3 points"));
        }

        let v1 = self.0[1] - self.0[0];
        let v2 = self.0[2] - self.0[0];
        let normal = v2.cross(v1);

        if normal.length_squared() < ANGLE_EPSILON {
            return Err(eyre!("Winding is degenerate"));
        }

        let normal = normal.normalize();
        Ok(Plane3D::new(normal, normal.dot(self.0[0])))
    }

    pub fn centroid(&self) -> DVec3 {
        self.0.iter().sum::<DVec3>() / self.0.len().max(1) as f64
    }

    pub fn area(&self) -> f64 {
        if self.0.len() < 3 {
            return 0.;
        }

        let mut total = 0.;
        for i in 2..self.0.len() {
            let d1 = self.0[i - 1] - self.0[0];
            let d2 = self.0[i] - self.0[0];
            total += d1.cross(d2).length() * 0.5;
        }

        total
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::from_points(self.0.iter().copied())
    }

    /// A sliver: any edge shorter than the healing threshold.
    pub fn is_tiny(&self) -> bool {
        let mut edges = 0;

        for i in 0..self.0.len() {
            let j = (i + 1) % self.0.len();
            if (self.0[j] - self.0[i]).length() > TINY_EDGE {
                edges += 1;
            }
        }

        edges < 3
    }

    /// Keeps the part of the winding on the front side of `plane`.
    /// `keep_on` decides the fate of a winding lying exactly on the plane.
    pub fn clip(&self, plane: &Plane3D, keep_on: bool) -> Option<Winding> {
        let (front, _) = self.split_sided(plane, keep_on);
        front
    }

    /// Splits into front and back parts; a winding on the plane goes to
    /// front when `keep_on` is set, otherwise it is dropped.
    pub fn split(&self, plane: &Plane3D) -> (Option<Winding>, Option<Winding>) {
        self.split_sided(plane, true)
    }

    fn split_sided(&self, plane: &Plane3D, keep_on: bool) -> (Option<Winding>, Option<Winding>) {
        let dists: Vec<f64> = self.0.iter().map(|&p| plane.distance_to(p)).collect();
        let sides: Vec<Side> = dists
            .iter()
            .map(|&d| {
                if d > ON_EPSILON {
                    Side::Front
                } else if d < -ON_EPSILON {
                    Side::Back
                } else {
                    Side::On
                }
            })
            .collect();

        let fronts = sides.iter().filter(|&&s| s == Side::Front).count();
        let backs = sides.iter().filter(|&&s| s == Side::Back).count();

        if fronts == 0 && backs == 0 {
            // Entirely on the plane.
            return if keep_on {
                (Some(self.clone()), None)
            } else {
                (None, None)
            };
        }
        if fronts == 0 {
            return (None, Some(self.clone()));
        }
        if backs == 0 {
            return (Some(self.clone()), None);
        }

        let mut front = Vec::with_capacity(self.0.len() + 4);
        let mut back = Vec::with_capacity(self.0.len() + 4);

        for i in 0..self.0.len() {
            let j = (i + 1) % self.0.len();
            let p1 = self.0[i];

            match sides[i] {
                Side::On => {
                    front.push(p1);
                    back.push(p1);
                    continue;
                }
                Side::Front => front.push(p1),
                Side::Back => back.push(p1),
            }

            if sides[j] == Side::On || sides[j] == sides[i] {
                continue;
            }

            // The edge crosses the plane.
            let p2 = self.0[j];
            let t = dists[i] / (dists[i] - dists[j]);

            // Axial planes snap the crossing exactly onto the plane.
            let mut mid = p1 + (p2 - p1) * t;
            for axis in 0..3 {
                if plane.normal[axis] == 1. {
                    mid[axis] = plane.distance;
                } else if plane.normal[axis] == -1. {
                    mid[axis] = -plane.distance;
                }
            }

            front.push(mid);
            back.push(mid);
        }

        let front = (front.len() >= 3).then(|| Winding(front));
        let back = (back.len() >= 3).then(|| Winding(back));

        (front, back)
    }

    /// Which side of `plane` the whole winding is on.
    pub fn side_of(&self, plane: &Plane3D) -> Side {
        let mut front = false;
        let mut back = false;

        for &point in &self.0 {
            match plane.side_of(point) {
                Side::Front => front = true,
                Side::Back => back = true,
                Side::On => {}
            }
        }

        match (front, back) {
            (true, false) => Side::Front,
            (false, true) => Side::Back,
            (false, false) => Side::On,
            // Straddling counts as front for coarse tests.
            (true, true) => Side::Front,
        }
    }
}

impl Index<usize> for Winding {
    type Output = DVec3;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl From<Vec<DVec3>> for Winding {
    fn from(value: Vec<DVec3>) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn unit_quad() -> Winding {
        Winding::new(vec![
            DVec3::new(0., 0., 0.),
            DVec3::new(0., 64., 0.),
            DVec3::new(64., 64., 0.),
            DVec3::new(64., 0., 0.),
        ])
    }

    #[test]
    fn plane_from_points_is_unit() {
        let plane = Plane3D::from_three_points(
            DVec3::new(0., 0., 16.),
            DVec3::new(0., 64., 16.),
            DVec3::new(64., 0., 16.),
        )
        .unwrap();

        assert!((plane.normal.length() - 1.).abs() < 1e-12);
        assert!((plane.distance - 16.).abs() < 1e-9);
    }

    #[test]
    fn collinear_points_rejected() {
        assert!(Plane3D::from_three_points(
            DVec3::ZERO,
            DVec3::new(1., 0., 0.),
            DVec3::new(2., 0., 0.)
        )
        .is_err());
    }

    #[test]
    fn quad_area() {
        assert!((unit_quad().area() - 64. * 64.).abs() < 1e-9);
    }

    #[test]
    fn base_winding_lies_on_plane() {
        let plane = Plane3D::new(DVec3::new(1., 2., 3.).normalize(), 100.);
        let winding = Winding::base_for_plane(&plane);

        assert_eq!(winding.len(), 4);
        for &point in winding.points() {
            assert!(plane.distance_to(point).abs() < 1e-6);
        }

        // CCW: the derived plane matches the source.
        let derived = winding.plane().unwrap();
        assert!((derived.normal - plane.normal).length() < 1e-6);
    }

    #[test]
    fn clip_keeps_front() {
        let quad = unit_quad();
        let plane = Plane3D::new(DVec3::X, 32.);

        let clipped = quad.clip(&plane, false).unwrap();
        let bounds = clipped.bounds();

        assert!((bounds.mins.x - 32.).abs() < 1e-9);
        assert!((bounds.maxs.x - 64.).abs() < 1e-9);
        assert!((clipped.area() - 32. * 64.).abs() < 1e-9);
    }

    #[test]
    fn clip_away_everything() {
        let quad = unit_quad();
        let plane = Plane3D::new(DVec3::X, 128.);

        assert!(quad.clip(&plane, false).is_none());
    }

    #[test]
    fn split_partitions_area() {
        let quad = unit_quad();
        let plane = Plane3D::new(DVec3::new(1., 1., 0.).normalize(), 30.);

        let (front, back) = quad.split(&plane);
        let front = front.unwrap();
        let back = back.unwrap();

        assert!((front.area() + back.area() - quad.area()).abs() < 1e-6);
    }

    #[test]
    fn tiny_winding_detected() {
        let sliver = Winding::new(vec![
            DVec3::new(0., 0., 0.),
            DVec3::new(0.01, 0., 0.),
            DVec3::new(0.01, 0.01, 0.),
        ]);

        assert!(sliver.is_tiny());
        assert!(!unit_quad().is_tiny());
    }

    #[test]
    fn barycentric_weights() {
        let a = DVec3::new(0., 0., 0.);
        let b = DVec3::new(1., 0., 0.);
        let c = DVec3::new(0., 1., 0.);

        let w = barycentric(DVec3::new(0.25, 0.25, 0.), a, b, c).unwrap();
        assert!((w.x - 0.5).abs() < 1e-9);
        assert!((w.y - 0.25).abs() < 1e-9);
        assert!((w.z - 0.25).abs() < 1e-9);
    }
}
