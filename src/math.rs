//! The math kernel: planes, point classification, axis permutations, bounding boxes,
//! and the shared epsilons everything else compares against.

use glam::{DAffine3, DMat3, DVec3, dvec3};
use serde::{Deserialize, Serialize};

/// Positions closer than this are the same point. Generous enough to swallow the
/// float error that accumulates over repeated cuts of 32-bit map coordinates.
pub const POSITION_EPSILON: f64 = 0.001;

/// Epsilon for dot products and other unit-scale quantities.
pub const DOT_EPSILON: f64 = 0.0001;

/// Which side of a plane a point is on, as seen along the plane normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointStatus {
	Above,
	Below,
	Inside,
}

/// One of the three world axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
	X,
	Y,
	Z,
}

impl Axis {
	pub fn unit(self) -> DVec3 {
		match self {
			Axis::X => DVec3::X,
			Axis::Y => DVec3::Y,
			Axis::Z => DVec3::Z,
		}
	}

	/// Quarter turn around this axis, clockwise when viewed from the positive end.
	///
	/// Expressed as a signed permutation so that integer coordinates stay integer,
	/// no trig involved.
	pub fn rotation_90_cw(self) -> DMat3 {
		match self {
			Axis::X => DMat3::from_cols(dvec3(1., 0., 0.), dvec3(0., 0., -1.), dvec3(0., 1., 0.)),
			Axis::Y => DMat3::from_cols(dvec3(0., 0., 1.), dvec3(0., 1., 0.), dvec3(-1., 0., 0.)),
			Axis::Z => DMat3::from_cols(dvec3(0., -1., 0.), dvec3(1., 0., 0.), dvec3(0., 0., 1.)),
		}
	}

	/// Quarter turn around this axis, counter-clockwise when viewed from the positive end.
	pub fn rotation_90_ccw(self) -> DMat3 {
		self.rotation_90_cw().transpose()
	}

	/// Reflection across the plane through the origin perpendicular to this axis.
	pub fn mirror(self) -> DMat3 {
		let mut diagonal = DVec3::ONE;
		match self {
			Axis::X => diagonal.x = -1.,
			Axis::Y => diagonal.y = -1.,
			Axis::Z => diagonal.z = -1.,
		}
		DMat3::from_diagonal(diagonal)
	}
}

/// Builds the affine map that applies `linear` around `center` instead of the origin.
pub fn about(center: DVec3, linear: DMat3) -> DAffine3 {
	DAffine3 {
		matrix3: linear,
		translation: center - linear * center,
	}
}

/// An infinite oriented plane, `normal.dot(p) + distance == 0` for points on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Plane {
	pub normal: DVec3,
	pub distance: f64,
}

impl Plane {
	/// Converts a triangle into a [Plane]. The direction of the plane comes from the
	/// winding of the triple; returns `None` if the points are collinear.
	pub fn from_points(points: [DVec3; 3]) -> Option<Self> {
		let normal = (points[2] - points[0]).cross(points[1] - points[0]);
		if normal.length_squared() < DOT_EPSILON * DOT_EPSILON {
			return None;
		}
		let normal = normal.normalize();
		Some(Self {
			normal,
			distance: -normal.dot(points[0]),
		})
	}

	/// Signed distance of `point` from the plane. `>0` = above (in front), `<0` = below.
	pub fn point_side(&self, point: DVec3) -> f64 {
		self.normal.dot(point) + self.distance
	}

	pub fn status(&self, point: DVec3) -> PointStatus {
		let side = self.point_side(point);
		if side > POSITION_EPSILON {
			PointStatus::Above
		} else if side < -POSITION_EPSILON {
			PointStatus::Below
		} else {
			PointStatus::Inside
		}
	}

	/// Distance along `direction` from `origin` to the plane, or `None` if the line
	/// runs parallel to it. The result is negative when the plane lies behind `origin`.
	pub fn intersect_line(&self, origin: DVec3, direction: DVec3) -> Option<f64> {
		let denominator = self.normal.dot(direction);
		if denominator.abs() < DOT_EPSILON {
			return None;
		}
		Some(-self.point_side(origin) / denominator)
	}

	pub fn translated(&self, delta: DVec3) -> Self {
		Self {
			normal: self.normal,
			distance: self.distance - self.normal.dot(delta),
		}
	}

	/// Whether `other` describes the same oriented plane within epsilon.
	pub fn almost_eq(&self, other: &Plane) -> bool {
		self.normal.dot(other.normal) > 1. - DOT_EPSILON && (self.distance - other.distance).abs() < POSITION_EPSILON
	}
}

impl std::ops::Neg for Plane {
	type Output = Self;
	fn neg(self) -> Self::Output {
		Self {
			normal: -self.normal,
			distance: -self.distance,
		}
	}
}

/// Classifies `point` against the plane through `origin` with normal `direction`.
///
/// `direction` need not be normalized; the comparison happens on the raw dot product,
/// which is what the separating axis tests want.
pub fn point_status_from_ray(origin: DVec3, direction: DVec3, point: DVec3) -> PointStatus {
	let dot = direction.dot(point - origin);
	if dot > DOT_EPSILON {
		PointStatus::Above
	} else if dot < -DOT_EPSILON {
		PointStatus::Below
	} else {
		PointStatus::Inside
	}
}

/// Rounds every coordinate to the nearest integer.
pub fn snap(v: DVec3) -> DVec3 {
	v.round()
}

/// Rounds `value` to the nearest integer if it is within epsilon of one.
pub fn correct(value: f64) -> f64 {
	let rounded = value.round();
	if (value - rounded).abs() < POSITION_EPSILON { rounded } else { value }
}

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
	pub min: DVec3,
	pub max: DVec3,
}

impl Bounds {
	pub fn new(min: DVec3, max: DVec3) -> Self {
		Self {
			min: min.min(max),
			max: min.max(max),
		}
	}

	/// The smallest box covering all of `points`. Panics on an empty iterator.
	pub fn from_points(points: impl IntoIterator<Item = DVec3>) -> Self {
		let mut points = points.into_iter();
		let first = points.next().expect("bounds of no points");
		let mut bounds = Self { min: first, max: first };
		for point in points {
			bounds.merge_point(point);
		}
		bounds
	}

	pub fn merge_point(&mut self, point: DVec3) {
		self.min = self.min.min(point);
		self.max = self.max.max(point);
	}

	pub fn center(&self) -> DVec3 {
		(self.min + self.max) / 2.
	}

	pub fn size(&self) -> DVec3 {
		self.max - self.min
	}

	pub fn contains_point(&self, point: DVec3) -> bool {
		point.cmpge(self.min).all() && point.cmple(self.max).all()
	}

	pub fn contains_bounds(&self, other: &Bounds) -> bool {
		self.contains_point(other.min) && self.contains_point(other.max)
	}

	pub fn intersects(&self, other: &Bounds) -> bool {
		self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
	}

	pub fn translated(&self, delta: DVec3) -> Self {
		Self {
			min: self.min + delta,
			max: self.max + delta,
		}
	}

	/// The eight corners, min first, max last.
	pub fn corners(&self) -> [DVec3; 8] {
		let (min, max) = (self.min, self.max);
		[
			dvec3(min.x, min.y, min.z),
			dvec3(max.x, min.y, min.z),
			dvec3(max.x, max.y, min.z),
			dvec3(min.x, max.y, min.z),
			dvec3(min.x, min.y, max.z),
			dvec3(max.x, min.y, max.z),
			dvec3(min.x, max.y, max.z),
			dvec3(max.x, max.y, max.z),
		]
	}
}

pub(crate) trait AlmostEqual<T> {
	fn almost_eq(self, other: T, margin: f64) -> bool;
}

impl AlmostEqual<f64> for f64 {
	fn almost_eq(self, other: f64, margin: f64) -> bool {
		(other - self).abs() < margin
	}
}

impl AlmostEqual<DVec3> for DVec3 {
	fn almost_eq(self, other: DVec3, margin: f64) -> bool {
		self.x.almost_eq(other.x, margin) && self.y.almost_eq(other.y, margin) && self.z.almost_eq(other.z, margin)
	}
}

#[allow(unused)]
macro_rules! assert_almost_eq {
	($left:expr, $right:expr, $margin:expr) => {
		match ($left, $right, $margin) {
			(left, right, margin) => {
				if !crate::math::AlmostEqual::almost_eq(left, right, margin) {
					panic!("assertion `left.almost_eq(right)` failed\n  left: {left}\n right: {right}");
				}
			}
		}
	};
}
#[allow(unused)]
pub(crate) use assert_almost_eq;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn plane_from_points_winding() {
		// Map-file winding: these triples produce outward normals on an axis box.
		let plane = Plane::from_points([dvec3(0., 0., 32.), dvec3(0., 64., 32.), dvec3(64., 0., 32.)]).unwrap();
		assert_eq!(plane.normal, dvec3(0., 0., 1.));
		assert_eq!(plane.distance, -32.);

		assert!(Plane::from_points([DVec3::ZERO, DVec3::X, dvec3(2., 0., 0.)]).is_none());
	}

	#[test]
	fn point_classification() {
		let plane = Plane::from_points([dvec3(0., 0., 32.), dvec3(0., 64., 32.), dvec3(64., 0., 32.)]).unwrap();
		assert_eq!(plane.status(dvec3(5., 5., 40.)), PointStatus::Above);
		assert_eq!(plane.status(dvec3(5., 5., 10.)), PointStatus::Below);
		assert_eq!(plane.status(dvec3(5., 5., 32.)), PointStatus::Inside);
	}

	#[test]
	fn line_intersection() {
		let plane = Plane::from_points([dvec3(0., 0., 32.), dvec3(0., 64., 32.), dvec3(64., 0., 32.)]).unwrap();
		assert_eq!(plane.intersect_line(DVec3::ZERO, DVec3::Z), Some(32.));
		assert_eq!(plane.intersect_line(dvec3(0., 0., 64.), DVec3::Z), Some(-32.));
		assert_eq!(plane.intersect_line(DVec3::ZERO, DVec3::X), None);
	}

	#[test]
	fn quarter_turns() {
		for axis in [Axis::X, Axis::Y, Axis::Z] {
			let cw = axis.rotation_90_cw();
			let ccw = axis.rotation_90_ccw();
			assert_eq!(cw * ccw, DMat3::IDENTITY);
			assert_eq!(cw * cw * cw * cw, DMat3::IDENTITY);
			assert_eq!(cw * axis.unit(), axis.unit());
		}
		// Viewed from +Z, x-right y-up: clockwise takes +X to -Y.
		assert_eq!(Axis::Z.rotation_90_cw() * DVec3::X, -DVec3::Y);
	}

	#[test]
	fn rotation_about_center() {
		let affine = about(dvec3(32., 32., 32.), Axis::Z.rotation_90_cw());
		assert_eq!(affine.transform_point3(dvec3(0., 0., 0.)), dvec3(32. - 32., 32. + 32., 0.));
		assert_eq!(affine.transform_point3(dvec3(32., 32., 7.)), dvec3(32., 32., 7.));
	}

	#[test]
	fn mirror_reverses_orientation() {
		for axis in [Axis::X, Axis::Y, Axis::Z] {
			assert_eq!(axis.mirror().determinant(), -1.);
			assert_eq!(axis.mirror() * axis.mirror(), DMat3::IDENTITY);
		}
	}

	#[test]
	fn bounds_queries() {
		let bounds = Bounds::new(dvec3(0., 0., 0.), dvec3(64., 64., 64.));
		assert!(bounds.contains_point(dvec3(64., 0., 32.)));
		assert!(!bounds.contains_point(dvec3(65., 0., 32.)));
		assert!(bounds.contains_bounds(&Bounds::new(dvec3(8., 8., 8.), dvec3(16., 16., 16.))));
		assert!(bounds.intersects(&Bounds::new(dvec3(60., 60., 60.), dvec3(90., 90., 90.))));
		assert!(!bounds.intersects(&Bounds::new(dvec3(65., 0., 0.), dvec3(90., 4., 4.))));
		assert_eq!(Bounds::from_points(bounds.corners()), bounds);
	}

	#[test]
	fn snapping() {
		assert_eq!(snap(dvec3(15.9999, -0.0001, 32.5)), dvec3(16., 0., 33.));
		assert_eq!(correct(15.9999), 16.);
		assert_eq!(correct(15.9), 15.9);
	}
}
