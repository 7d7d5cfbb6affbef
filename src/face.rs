//! Faces: the half-spaces a brush is built from, each carrying the texture frame
//! that maps its surface into texel space.

use glam::{DAffine3, DQuat, DVec2, DVec3, dvec2};
use thiserror::Error;

use crate::math::{DOT_EPSILON, Plane, correct};
use crate::texture::TextureRef;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FaceError {
	#[error("face points are collinear and do not define a plane")]
	CollinearPoints,
}

/// The six texture base rows: a dominant normal and the in-plane U/V directions
/// textures use when the face points that way. Same table as the Quake tools.
const BASE_AXES: [[DVec3; 3]; 6] = [
	[DVec3::Z, DVec3::X, DVec3::NEG_Y],
	[DVec3::NEG_Z, DVec3::X, DVec3::NEG_Y],
	[DVec3::X, DVec3::Y, DVec3::NEG_Z],
	[DVec3::NEG_X, DVec3::Y, DVec3::NEG_Z],
	[DVec3::Y, DVec3::X, DVec3::NEG_Z],
	[DVec3::NEG_Y, DVec3::X, DVec3::NEG_Z],
];

/// Picks the base row for `normal` and returns its U/V axes, the row index of the
/// positive member of the row's axis pair (the texture rotation axis), and the row
/// index itself. Later rows win ties, like the original tools.
fn texture_axes_and_rows(normal: DVec3) -> (DVec3, DVec3, usize, usize) {
	let mut best = 0;
	let mut best_dot = f64::NEG_INFINITY;
	for (row, axes) in BASE_AXES.iter().enumerate() {
		let dot = normal.dot(axes[0]);
		if dot >= best_dot {
			best_dot = dot;
			best = row;
		}
	}
	(BASE_AXES[best][1], BASE_AXES[best][2], (best / 2) * 2, best)
}

/// Rotates the U/V axes around the rotation axis of `plane_row`. The texture spins
/// around the absolute axis of the row pair, never around the face normal.
fn rotate_texture_axes(u: DVec3, v: DVec3, radians: f64, plane_row: usize) -> (DVec3, DVec3) {
	let rotation = DQuat::from_axis_angle(BASE_AXES[plane_row][0], radians);
	(rotation * u, rotation * v)
}

/// Moves `v` along the absolute axis of `plane_row` until it lies on the plane
/// through the origin with `normal`.
fn project_into_plane(normal: DVec3, plane_row: usize, mut v: DVec3) -> DVec3 {
	let axis = BASE_AXES[plane_row][0];
	if axis.x != 0. {
		v.x = -(normal.y * v.y + normal.z * v.z) / normal.x;
	} else if axis.y != 0. {
		v.y = -(normal.x * v.x + normal.z * v.z) / normal.y;
	} else {
		v.z = -(normal.x * v.x + normal.y * v.y) / normal.z;
	}
	v
}

/// Zeroes the component of `v` along the absolute axis of `plane_row`.
fn flatten_into_row_plane(plane_row: usize, mut v: DVec3) -> DVec3 {
	let axis = BASE_AXES[plane_row][0];
	if axis.x != 0. {
		v.x = 0.;
	} else if axis.y != 0. {
		v.y = 0.;
	} else {
		v.z = 0.;
	}
	v
}

/// Scale factors of zero would divide texel coordinates into NaN; treat them as one.
fn nonzero(scale: f64) -> f64 {
	if scale == 0. { 1. } else { scale }
}

/// One half-space of a brush: three points defining the boundary plane (winding
/// gives the outward normal) plus the texture frame projected onto the surface.
///
/// A face is pure intent; its polygonal realization lives in the brush geometry as
/// a side. Operations that need the realized polygon take it as a parameter.
#[derive(Debug)]
pub struct Face {
	points: [DVec3; 3],
	plane: Plane,
	texture: Option<TextureRef>,
	pub x_offset: f64,
	pub y_offset: f64,
	/// Texture rotation in degrees.
	pub rotation: f64,
	pub x_scale: f64,
	pub y_scale: f64,
}

impl Face {
	pub fn new(point1: DVec3, point2: DVec3, point3: DVec3) -> Result<Self, FaceError> {
		let points = [point1, point2, point3];
		let plane = Plane::from_points(points).ok_or(FaceError::CollinearPoints)?;
		Ok(Self {
			points,
			plane,
			texture: None,
			x_offset: 0.,
			y_offset: 0.,
			rotation: 0.,
			x_scale: 1.,
			y_scale: 1.,
		})
	}

	pub fn points(&self) -> [DVec3; 3] {
		self.points
	}

	pub fn boundary(&self) -> Plane {
		self.plane
	}

	pub fn normal(&self) -> DVec3 {
		self.plane.normal
	}

	pub fn texture(&self) -> Option<&TextureRef> {
		self.texture.as_ref()
	}

	/// Swaps the referenced texture, keeping usage counts straight.
	pub fn set_texture(&mut self, texture: Option<TextureRef>) {
		if let Some(old) = &self.texture {
			old.release();
		}
		if let Some(new) = &texture {
			new.retain();
		}
		self.texture = texture;
	}

	/// Re-reads the defining points from the side's vertex cycle after a cut or snap,
	/// choosing the corner whose edges are closest to perpendicular so the re-derived
	/// plane is as stable as the polygon allows.
	pub fn update_points(&mut self, polygon: &[DVec3]) {
		use float_ord::FloatOrd;
		use itertools::Itertools;

		debug_assert!(polygon.len() >= 3);
		let count = polygon.len();
		let best = (0..count)
			.position_min_by_key(|&i| {
				let previous = polygon[(i + count - 1) % count];
				let current = polygon[i];
				let next = polygon[(i + 1) % count];
				let to_previous = (previous - current).normalize_or_zero();
				let to_next = (next - current).normalize_or_zero();
				FloatOrd(to_previous.dot(to_next).abs())
			})
			.unwrap_or(0);

		self.points = [polygon[best], polygon[(best + 1) % count], polygon[(best + count - 1) % count]];
		if let Some(plane) = Plane::from_points(self.points) {
			self.plane = plane;
		}
	}

	/// The texture U/V axes for this face, rotated but unscaled.
	fn texture_axes(&self) -> (DVec3, DVec3) {
		let (u, v, plane_row, _) = texture_axes_and_rows(self.plane.normal);
		rotate_texture_axes(u, v, self.rotation.to_radians(), plane_row)
	}

	fn scaled_texture_axes(&self) -> (DVec3, DVec3) {
		let (u, v) = self.texture_axes();
		(u / nonzero(self.x_scale), v / nonzero(self.y_scale))
	}

	/// Texel coordinates of a 3d point on this face.
	pub fn texture_coords(&self, point: DVec3) -> DVec2 {
		let (u, v) = self.scaled_texture_axes();
		dvec2(point.dot(u) + self.x_offset, point.dot(v) + self.y_offset)
	}

	/// Scrolls whichever offset axis lines up better with `dir` by `delta` texels.
	pub fn translate_offsets(&mut self, delta: f64, dir: DVec3) {
		let (u, v) = self.texture_axes();
		let dot_u = dir.dot(u);
		let dot_v = dir.dot(v);
		if dot_u.abs() >= dot_v.abs() {
			self.x_offset += if dot_u >= 0. { -delta } else { delta };
		} else {
			self.y_offset += if dot_v >= 0. { -delta } else { delta };
		}
	}

	/// Spins the texture by `angle` degrees. Two of the six base rows are mirrored,
	/// so the stored rotation runs backwards on them.
	pub fn rotate_texture(&mut self, angle: f64) {
		let (_, _, plane_row, face_row) = texture_axes_and_rows(self.plane.normal);
		if plane_row == face_row {
			self.rotation += angle;
		} else {
			self.rotation -= angle;
		}
	}

	/// Applies an affine transform to the half-space. `center` is the centroid of the
	/// face's realized polygon, used as the anchor the texture stays pinned to when
	/// `lock_texture` is set. An orientation-reversing transform also reverses the
	/// point winding so the normal stays outward.
	pub fn transform(&mut self, transform: &DAffine3, lock_texture: bool, center: DVec3) {
		if lock_texture {
			self.compensate_transform(transform, center);
		}
		for point in &mut self.points {
			*point = transform.transform_point3(*point);
		}
		if transform.matrix3.determinant() < 0. {
			self.points.swap(1, 2);
		}
		if let Some(plane) = Plane::from_points(self.points) {
			self.plane = plane;
		}
	}

	/// Pushes the half-space boundary along its normal by `dist`.
	pub fn move_along_normal(&mut self, dist: f64, lock_texture: bool, center: DVec3) {
		let transform = DAffine3::from_translation(self.plane.normal * dist);
		self.transform(&transform, lock_texture, center);
	}

	/// Re-solves the texture frame so that every surface point keeps its texel when
	/// the face geometry goes through `transform`. Runs on the pre-transform state.
	fn compensate_transform(&mut self, transform: &DAffine3, center: DVec3) {
		let (_, _, plane_row, _) = texture_axes_and_rows(self.plane.normal);
		let (tex_u, tex_v) = self.texture_axes();
		let (scaled_u, scaled_v) = self.scaled_texture_axes();

		// where the center sits in texel space right now
		let current_coords = dvec2(center.dot(scaled_u) + self.x_offset, center.dot(scaled_v) + self.y_offset);

		// undo the scale, then drop the axes into the boundary plane so the transform
		// moves them the way it moves the surface
		let new_u = project_into_plane(self.plane.normal, plane_row, tex_u * self.x_scale);
		let new_v = project_into_plane(self.plane.normal, plane_row, tex_v * self.y_scale);

		// directions transform without the translation part
		let mut new_u = transform.matrix3 * new_u;
		let mut new_v = transform.matrix3 * new_v;
		let mut new_normal = transform.matrix3 * self.plane.normal;
		let new_center = transform.transform_point3(center);

		// fend off rounding when the transform barely touched the normal
		if (new_normal - self.plane.normal).length_squared() < DOT_EPSILON * DOT_EPSILON {
			new_normal = self.plane.normal;
		}

		let (base_u, base_v, new_plane_row, _) = texture_axes_and_rows(new_normal);

		// flatten the transformed axes into the new texture plane
		new_u = flatten_into_row_plane(new_plane_row, new_u);
		new_v = flatten_into_row_plane(new_plane_row, new_v);

		self.x_scale = new_u.length();
		self.y_scale = new_v.length();
		new_u /= nonzero(self.x_scale);
		new_v /= nonzero(self.y_scale);

		// infer the rotation as the signed angle from the new base axes
		let row_normal = BASE_AXES[new_plane_row][0];
		let mut radians = base_u.dot(new_u).clamp(-1., 1.).acos();
		if base_u.cross(new_u).dot(row_normal) < 0. {
			radians = -radians;
		}
		self.rotation = radians.to_degrees();

		// scale signs fall out of comparing the rotated base axes with the targets
		let (rotated_base_u, rotated_base_v) = rotate_texture_axes(base_u, base_v, radians, new_plane_row);
		if rotated_base_u.dot(new_u) < 0. {
			self.x_scale = -self.x_scale;
		}
		if rotated_base_v.dot(new_v) < 0. {
			self.y_scale = -self.y_scale;
		}

		self.x_scale = correct(self.x_scale);
		self.y_scale = correct(self.y_scale);
		self.rotation = correct(self.rotation);

		// re-derive the axes exactly as they will be read back post-transform, then
		// pick the offsets that pin the center to its old texel
		let (final_u, final_v) = rotate_texture_axes(base_u, base_v, self.rotation.to_radians(), new_plane_row);
		let new_coords = dvec2(
			new_center.dot(final_u / nonzero(self.x_scale)),
			new_center.dot(final_v / nonzero(self.y_scale)),
		);
		self.x_offset = current_coords.x - new_coords.x;
		self.y_offset = current_coords.y - new_coords.y;
		if let Some(texture) = &self.texture {
			self.x_offset %= texture.width() as f64;
			self.y_offset %= texture.height() as f64;
		}
	}
}

impl Clone for Face {
	fn clone(&self) -> Self {
		if let Some(texture) = &self.texture {
			texture.retain();
		}
		Self {
			points: self.points,
			plane: self.plane,
			texture: self.texture.clone(),
			x_offset: self.x_offset,
			y_offset: self.y_offset,
			rotation: self.rotation,
			x_scale: self.x_scale,
			y_scale: self.y_scale,
		}
	}
}

impl Drop for Face {
	fn drop(&mut self) {
		if let Some(texture) = &self.texture {
			texture.release();
		}
	}
}

impl PartialEq for Face {
	fn eq(&self, other: &Self) -> bool {
		self.points == other.points
			&& self.plane == other.plane
			&& self.x_offset == other.x_offset
			&& self.y_offset == other.y_offset
			&& self.rotation == other.rotation
			&& self.x_scale == other.x_scale
			&& self.y_scale == other.y_scale
			&& match (&self.texture, &other.texture) {
				(Some(a), Some(b)) => std::rc::Rc::ptr_eq(a, b),
				(None, None) => true,
				_ => false,
			}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::math::{Axis, about, assert_almost_eq};
	use crate::texture::Texture;
	use glam::dvec3;

	/// A face on z = 64 with outward normal +Z.
	fn top_face() -> Face {
		Face::new(dvec3(0., 0., 64.), dvec3(0., 64., 64.), dvec3(64., 0., 64.)).unwrap()
	}

	#[test]
	fn base_row_selection() {
		let (u, v, plane_row, face_row) = texture_axes_and_rows(DVec3::Z);
		assert_eq!((u, v), (DVec3::X, DVec3::NEG_Y));
		assert_eq!((plane_row, face_row), (0, 0));

		let (u, v, plane_row, face_row) = texture_axes_and_rows(DVec3::NEG_Z);
		assert_eq!((u, v), (DVec3::X, DVec3::NEG_Y));
		assert_eq!((plane_row, face_row), (0, 1));

		let (u, v, _, face_row) = texture_axes_and_rows(DVec3::NEG_X);
		assert_eq!((u, v), (DVec3::Y, DVec3::NEG_Z));
		assert_eq!(face_row, 3);
	}

	#[test]
	fn texture_coords_on_top_face() {
		let face = top_face();
		assert_eq!(face.normal(), DVec3::Z);
		assert_eq!(face.texture_coords(dvec3(16., 8., 64.)), dvec2(16., -8.));

		let mut offset = top_face();
		offset.x_offset = 4.;
		offset.y_offset = -2.;
		assert_eq!(offset.texture_coords(dvec3(16., 8., 64.)), dvec2(20., -10.));

		let mut scaled = top_face();
		scaled.x_scale = 2.;
		scaled.y_scale = 0.5;
		assert_eq!(scaled.texture_coords(dvec3(16., 8., 64.)), dvec2(8., -16.));
	}

	#[test]
	fn update_points_prefers_square_corners() {
		// A square with one corner shaved off; the best triple avoids the shallow cut.
		let polygon = [
			dvec3(0., 0., 64.),
			dvec3(0., 64., 64.),
			dvec3(48., 64., 64.),
			dvec3(64., 48., 64.),
			dvec3(64., 0., 64.),
		];
		let mut face = top_face();
		face.update_points(&polygon);
		assert_eq!(face.normal(), DVec3::Z);
		let [p0, ..] = face.points();
		// the chosen corner is one of the right-angled ones
		assert!(polygon.contains(&p0));
		assert_ne!(p0, dvec3(48., 64., 64.));
		assert_ne!(p0, dvec3(64., 48., 64.));
	}

	#[test]
	fn offset_translation_picks_dominant_axis() {
		let mut face = top_face();
		face.translate_offsets(8., DVec3::X);
		assert_eq!((face.x_offset, face.y_offset), (-8., 0.));
		face.translate_offsets(8., DVec3::Y);
		// +Y runs against the V axis (-Y), so the offset moves the other way
		assert_eq!((face.x_offset, face.y_offset), (-8., 8.));
	}

	#[test]
	fn texture_rotation_row_sign() {
		let mut top = top_face();
		top.rotate_texture(15.);
		assert_eq!(top.rotation, 15.);

		// -Z uses the mirrored row, the same drag spins the other way
		let mut bottom = Face::new(dvec3(0., 0., 0.), dvec3(64., 0., 0.), dvec3(0., 64., 0.)).unwrap();
		assert_eq!(bottom.normal(), DVec3::NEG_Z);
		bottom.rotate_texture(15.);
		assert_eq!(bottom.rotation, -15.);
	}

	#[test]
	fn translate_with_lock_keeps_texels() {
		let mut face = top_face();
		face.set_texture(Some(Texture::new("crate2", 64, 64)));
		let center = dvec3(32., 32., 64.);
		let sample = dvec3(48., 16., 64.);
		let before = face.texture_coords(sample);

		let delta = dvec3(7., -13., 5.);
		face.transform(&DAffine3::from_translation(delta), true, center);

		let after = face.texture_coords(sample + delta);
		assert_almost_eq!(before.x.rem_euclid(64.), after.x.rem_euclid(64.), 1e-6);
		assert_almost_eq!(before.y.rem_euclid(64.), after.y.rem_euclid(64.), 1e-6);
	}

	#[test]
	fn rotate_90_with_lock_keeps_texels() {
		let mut face = top_face();
		face.set_texture(Some(Texture::new("crate2", 64, 64)));
		let center = dvec3(32., 32., 64.);
		let transform = about(center, Axis::Z.rotation_90_cw());

		let samples = [center, dvec3(48., 16., 64.), dvec3(0., 0., 64.)];
		let before = samples.map(|p| face.texture_coords(p));
		face.transform(&transform, true, center);

		for (point, expected) in samples.into_iter().zip(before) {
			let moved = transform.transform_point3(point);
			let after = face.texture_coords(moved);
			assert_almost_eq!(after.x.rem_euclid(64.), expected.x.rem_euclid(64.), 1e-6);
			assert_almost_eq!(after.y.rem_euclid(64.), expected.y.rem_euclid(64.), 1e-6);
		}
	}

	#[test]
	fn flip_reverses_winding() {
		let mut face = top_face();
		let transform = about(dvec3(32., 32., 32.), Axis::Z.mirror());
		face.transform(&transform, false, dvec3(32., 32., 64.));
		// still a valid plane, normal mirrored outward
		assert_eq!(face.normal(), DVec3::NEG_Z);
		assert_eq!(face.boundary().point_side(dvec3(5., 5., 0.)), 0.);
	}

	#[test]
	fn texture_usage_follows_face_lifetime() {
		let texture = Texture::new("crate2", 64, 64);
		let mut face = top_face();
		face.set_texture(Some(texture.clone()));
		assert_eq!(texture.usage_count(), 1);

		let copy = face.clone();
		assert_eq!(texture.usage_count(), 2);
		drop(copy);
		assert_eq!(texture.usage_count(), 1);

		face.set_texture(None);
		assert_eq!(texture.usage_count(), 0);
	}
}
