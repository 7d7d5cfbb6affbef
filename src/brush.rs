//! Brushes: convex solids defined by their faces, the unit everything else in a
//! map is built from.

use glam::{DAffine3, DMat3, DQuat, DVec3};
use itertools::Itertools;
use thiserror::Error;

use crate::entity::Entity;
use crate::face::Face;
use crate::geometry::{BrushGeometry, CutOutcome, MoveResult, vertex_status_from_ray};
use crate::math::{Axis, Bounds, PointStatus, about};
use crate::texture::TextureRef;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BrushError {
	#[error("brush bounds reach outside the world bounds")]
	OutsideWorldBounds,
	#[error("brush bounds are flat or empty")]
	DegenerateBounds,
}

/// A convex brush: the faces that define it and the polyhedron they carve out of
/// the world. Face indices and side indices are the same thing; the geometry stays
/// closed (every side realizes a face) between operations.
#[derive(Debug, Clone, PartialEq)]
pub struct Brush {
	world_bounds: Bounds,
	geometry: BrushGeometry,
}

impl Brush {
	/// Seeds a box-shaped brush spanning `bounds`, all six faces textured alike.
	pub fn from_bounds(world_bounds: Bounds, bounds: Bounds, texture: Option<&TextureRef>) -> Result<Self, BrushError> {
		if bounds.size().min_element() <= 0. {
			return Err(BrushError::DegenerateBounds);
		}
		if !world_bounds.contains_bounds(&bounds) {
			return Err(BrushError::OutsideWorldBounds);
		}

		let (min, max) = (bounds.min, bounds.max);
		let mut faces = [
			// front, left and bottom wind around the min corner
			Face::new(min, DVec3::new(min.x, min.y, max.z), DVec3::new(max.x, min.y, min.z)),
			Face::new(min, DVec3::new(min.x, max.y, min.z), DVec3::new(min.x, min.y, max.z)),
			Face::new(min, DVec3::new(max.x, min.y, min.z), DVec3::new(min.x, max.y, min.z)),
			// back, right and top around the max corner
			Face::new(max, DVec3::new(min.x, max.y, max.z), DVec3::new(max.x, max.y, min.z)),
			Face::new(max, DVec3::new(max.x, max.y, min.z), DVec3::new(max.x, min.y, max.z)),
			Face::new(max, DVec3::new(max.x, min.y, max.z), DVec3::new(min.x, max.y, max.z)),
		]
		.map(|face| face.expect("box corners are distinct"));
		for face in &mut faces {
			face.set_texture(texture.cloned());
		}

		let mut brush = Self {
			world_bounds,
			geometry: BrushGeometry::new(world_bounds),
		};
		let mut dropped = Vec::new();
		let complete = brush.geometry.add_faces(faces, &mut dropped);
		debug_assert!(complete && dropped.is_empty());
		Ok(brush)
	}

	/// Deep-copies `template` into a new brush living in `world_bounds`.
	pub fn from_template(world_bounds: Bounds, template: &Brush) -> Result<Self, BrushError> {
		if !world_bounds.contains_bounds(&template.bounds()) {
			return Err(BrushError::OutsideWorldBounds);
		}
		let faces: Vec<Face> = template.faces().cloned().collect();
		let mut brush = Self {
			world_bounds,
			geometry: BrushGeometry::new(world_bounds),
		};
		let mut dropped = Vec::new();
		brush.geometry.add_faces(faces, &mut dropped);
		Ok(brush)
	}

	pub fn world_bounds(&self) -> Bounds {
		self.world_bounds
	}

	pub fn bounds(&self) -> Bounds {
		self.geometry.bounds()
	}

	pub fn geometry(&self) -> &BrushGeometry {
		&self.geometry
	}

	pub fn faces(&self) -> impl Iterator<Item = &Face> {
		self.geometry.faces()
	}

	pub fn face(&self, index: usize) -> Option<&Face> {
		self.geometry.face(index)
	}

	pub fn face_count(&self) -> usize {
		self.geometry.side_count()
	}

	pub fn vertices(&self) -> impl Iterator<Item = DVec3> + '_ {
		self.geometry.vertex_positions()
	}

	pub fn edges(&self) -> impl Iterator<Item = (DVec3, DVec3)> + '_ {
		(0..self.geometry.edge_count()).map(|index| self.geometry.edge_endpoints(index))
	}

	/// Adds a half-space to the brush. Returns `false` iff the cut would leave
	/// nothing; the caller must not retry the same face. A redundant face is
	/// discarded, a splitting face replaces whatever it beheads.
	pub fn add_face(&mut self, face: Face) -> bool {
		let mut dropped = Vec::new();
		!matches!(self.geometry.add_face(face, &mut dropped), CutOutcome::Nullified(_))
	}

	/// Whether the brush would still be a closed solid without this face.
	pub fn can_delete_face(&self, index: usize) -> bool {
		let mut trial = BrushGeometry::new(self.world_bounds);
		let mut dropped = Vec::new();
		let others = self.faces_without(index);
		trial.add_faces(others, &mut dropped) && trial.closed()
	}

	/// Removes a face and rebuilds the polyhedron from the rest. Returns `false`
	/// (and changes nothing) when the remainder would not close.
	pub fn delete_face(&mut self, index: usize) -> bool {
		if !self.can_delete_face(index) {
			return false;
		}
		let mut faces = self.geometry.take_faces();
		faces.remove(index);
		self.rebuild(faces);
		true
	}

	/// Whether dragging this face by `dist` along its normal leaves a valid brush
	/// inside the world, without consuming any other face.
	pub fn can_resize(&self, index: usize, dist: f64) -> bool {
		let Some(face) = self.geometry.face(index) else { return false };
		let mut moved = face.clone();
		moved.move_along_normal(dist, false, self.geometry.side_centroid(index));
		if moved.boundary().almost_eq(&face.boundary()) {
			return false;
		}

		let mut trial = BrushGeometry::new(self.world_bounds);
		let mut dropped = Vec::new();
		if !trial.add_faces(self.faces_without(index), &mut dropped) {
			return false;
		}
		let outcome = trial.add_face(moved, &mut dropped);
		dropped.is_empty() && !matches!(outcome, CutOutcome::Nullified(_)) && self.world_bounds.contains_bounds(&trial.bounds())
	}

	/// Drags a face along its normal by `dist` and rebuilds. Check [Self::can_resize]
	/// first; an invalid resize may consume faces.
	pub fn resize(&mut self, index: usize, dist: f64, lock_textures: bool) {
		let centroid = self.geometry.side_centroid(index);
		if let Some(face) = self.geometry.face_mut(index) {
			face.move_along_normal(dist, lock_textures, centroid);
		}
		let faces = self.geometry.take_faces();
		self.rebuild(faces);
	}

	/// Pushes every face outward by `delta`, thickening the whole brush.
	pub fn enlarge(&mut self, delta: f64, lock_textures: bool) {
		for index in 0..self.geometry.side_count() {
			let centroid = self.geometry.side_centroid(index);
			if let Some(face) = self.geometry.face_mut(index) {
				face.move_along_normal(delta, lock_textures, centroid);
			}
		}
		let faces = self.geometry.take_faces();
		self.rebuild(faces);
	}

	fn faces_without(&self, index: usize) -> Vec<Face> {
		(0..self.geometry.side_count())
			.filter(|&i| i != index)
			.filter_map(|i| self.geometry.face(i).cloned())
			.collect()
	}

	fn rebuild(&mut self, faces: Vec<Face>) {
		self.geometry = BrushGeometry::new(self.world_bounds);
		let mut dropped = Vec::new();
		self.geometry.add_faces(faces, &mut dropped);
	}

	pub fn translate(&mut self, delta: DVec3, lock_textures: bool) {
		self.geometry.transform(&DAffine3::from_translation(delta), lock_textures);
	}

	pub fn rotate_90_cw(&mut self, axis: Axis, center: DVec3, lock_textures: bool) {
		self.geometry.transform(&about(center, axis.rotation_90_cw()), lock_textures);
	}

	pub fn rotate_90_ccw(&mut self, axis: Axis, center: DVec3, lock_textures: bool) {
		self.geometry.transform(&about(center, axis.rotation_90_ccw()), lock_textures);
	}

	pub fn rotate(&mut self, rotation: DQuat, center: DVec3, lock_textures: bool) {
		self.geometry.transform(&about(center, DMat3::from_quat(rotation)), lock_textures);
	}

	pub fn flip(&mut self, axis: Axis, center: DVec3, lock_textures: bool) {
		self.geometry.transform(&about(center, axis.mirror()), lock_textures);
	}

	/// Rounds every vertex onto the integer grid. Textures are left alone; grid
	/// snapping is not an affine map, so there is nothing exact to compensate.
	pub fn snap(&mut self) {
		self.geometry.snap();
	}

	/// Drags the feature at `index` in the combined vertex/edge/side index space.
	/// See [BrushGeometry::move_vertex].
	pub fn move_vertex(&mut self, index: usize, delta: DVec3) -> MoveResult {
		let mut new_faces = Vec::new();
		let mut dropped = Vec::new();
		self.geometry.move_vertex(index, delta, &mut new_faces, &mut dropped)
	}

	/// Drags a whole edge by `delta`. See [BrushGeometry::move_edge].
	pub fn move_edge(&mut self, index: usize, delta: DVec3) -> MoveResult {
		let mut new_faces = Vec::new();
		let mut dropped = Vec::new();
		self.geometry.move_edge(index, delta, &mut new_faces, &mut dropped)
	}

	/// Drags a whole face by `delta`. See [BrushGeometry::move_side].
	pub fn move_face(&mut self, index: usize, delta: DVec3) -> MoveResult {
		let mut new_faces = Vec::new();
		let mut dropped = Vec::new();
		self.geometry.move_side(index, delta, &mut new_faces, &mut dropped)
	}

	pub fn contains_point(&self, point: DVec3) -> bool {
		if !self.bounds().contains_point(point) {
			return false;
		}
		self.faces().all(|face| face.boundary().status(point) != PointStatus::Above)
	}

	/// Separating axis test against another brush: first every face plane of both,
	/// then the cross products of every edge pair. Touching counts as intersecting.
	pub fn intersects_brush(&self, other: &Brush) -> bool {
		if !self.bounds().intersects(&other.bounds()) {
			return false;
		}

		let my_vertices: Vec<DVec3> = self.vertices().collect();
		let their_vertices: Vec<DVec3> = other.vertices().collect();

		for index in 0..other.face_count() {
			let Some(face) = other.face(index) else { continue };
			let origin = other.geometry.side_polygon(index)[0];
			if vertex_status_from_ray(origin, face.normal(), my_vertices.iter().copied()) == PointStatus::Above {
				return false;
			}
		}
		for index in 0..self.face_count() {
			let Some(face) = self.face(index) else { continue };
			let origin = self.geometry.side_polygon(index)[0];
			if vertex_status_from_ray(origin, face.normal(), their_vertices.iter().copied()) == PointStatus::Above {
				return false;
			}
		}

		for (mine, theirs) in (0..self.geometry.edge_count()).cartesian_product(0..other.geometry.edge_count()) {
			let (my_start, my_end) = self.geometry.edge_endpoints(mine);
			let (their_start, their_end) = other.geometry.edge_endpoints(theirs);
			let direction = (my_end - my_start).cross(their_end - their_start);

			let my_status = vertex_status_from_ray(my_start, direction, my_vertices.iter().copied());
			if my_status == PointStatus::Inside {
				continue;
			}
			let their_status = vertex_status_from_ray(my_start, direction, their_vertices.iter().copied());
			if their_status != PointStatus::Inside && my_status != their_status {
				return false;
			}
		}

		true
	}

	pub fn contains_brush(&self, other: &Brush) -> bool {
		self.bounds().contains_bounds(&other.bounds()) && other.vertices().all(|vertex| self.contains_point(vertex))
	}

	/// Whether any corner of the entity's bounding box sits inside the brush.
	pub fn intersects_entity(&self, entity: &Entity) -> bool {
		let bounds = entity.bounds();
		if !self.bounds().intersects(&bounds) {
			return false;
		}
		bounds.corners().into_iter().any(|corner| self.contains_point(corner))
	}

	pub fn contains_entity(&self, entity: &Entity) -> bool {
		let bounds = entity.bounds();
		self.bounds().contains_bounds(&bounds) && bounds.corners().into_iter().all(|corner| self.contains_point(corner))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::math::{POSITION_EPSILON, assert_almost_eq};
	use crate::texture::Texture;
	use glam::dvec3;

	fn world() -> Bounds {
		Bounds::new(dvec3(-4096., -4096., -4096.), dvec3(4096., 4096., 4096.))
	}

	fn cube() -> Brush {
		Brush::from_bounds(world(), Bounds::new(dvec3(0., 0., 0.), dvec3(64., 64., 64.)), None).unwrap()
	}

	#[test]
	fn seeded_box_is_the_expected_cube() {
		let texture = Texture::new("crate2", 64, 64);
		let brush = Brush::from_bounds(world(), Bounds::new(dvec3(0., 0., 0.), dvec3(64., 64., 64.)), Some(&texture)).unwrap();

		assert_eq!(brush.vertices().count(), 8);
		assert_eq!(brush.edges().count(), 12);
		assert_eq!(brush.face_count(), 6);
		assert_eq!(brush.bounds(), Bounds::new(dvec3(0., 0., 0.), dvec3(64., 64., 64.)));
		assert!(brush.geometry().closed());
		brush.geometry().validate().unwrap();
		assert_eq!(texture.usage_count(), 6);

		assert!(Brush::from_bounds(world(), Bounds::new(dvec3(0., 0., 0.), dvec3(9000., 64., 64.)), None).is_err());
		assert!(Brush::from_bounds(world(), Bounds::new(dvec3(0., 0., 0.), dvec3(0., 64., 64.)), None).is_err());
	}

	#[test]
	fn adding_a_face_cuts_the_brush() {
		let mut brush = cube();
		let cut = Face::new(dvec3(0., 0., 32.), dvec3(0., 64., 32.), dvec3(64., 0., 32.)).unwrap();
		assert!(brush.add_face(cut.clone()));
		brush.geometry().validate().unwrap();
		assert_eq!(brush.face_count(), 6);
		assert_eq!(brush.bounds().max.z, 32.);

		// the same half-space again is redundant, nothing changes
		let snapshot = brush.clone();
		assert!(brush.add_face(cut));
		assert_eq!(brush, snapshot);

		// a half-space below the whole brush would empty it
		let below = Face::new(dvec3(0., 0., -10.), dvec3(0., 64., -10.), dvec3(64., 0., -10.)).unwrap();
		assert!(!brush.add_face(below));
	}

	#[test]
	fn rotate_90_permutes_the_corners() {
		let mut brush = cube();
		let before: Vec<DVec3> = brush.vertices().collect();
		brush.rotate_90_cw(Axis::Z, dvec3(32., 32., 32.), false);
		brush.geometry().validate().unwrap();
		for (old, new) in before.into_iter().zip(brush.vertices()) {
			assert_eq!(new, dvec3(old.y, 64. - old.x, old.z));
		}
		assert_eq!(brush.bounds(), Bounds::new(dvec3(0., 0., 0.), dvec3(64., 64., 64.)));

		brush.rotate_90_ccw(Axis::Z, dvec3(32., 32., 32.), false);
		brush.geometry().validate().unwrap();
		assert_eq!(brush.bounds(), Bounds::new(dvec3(0., 0., 0.), dvec3(64., 64., 64.)));
	}

	#[test]
	fn flip_round_trips_and_stays_valid() {
		let mut brush = cube();
		let snapshot = brush.clone();
		brush.flip(Axis::X, dvec3(32., 32., 32.), false);
		brush.geometry().validate().unwrap();
		assert_eq!(brush.bounds(), snapshot.bounds());
		brush.flip(Axis::X, dvec3(32., 32., 32.), false);
		brush.geometry().validate().unwrap();
		assert_eq!(brush.bounds(), snapshot.bounds());
	}

	#[test]
	fn snap_restores_the_grid() {
		let mut brush = cube();
		brush.translate(dvec3(0.25, 0.5, -0.25), false);
		brush.snap();
		brush.geometry().validate().unwrap();
		assert_eq!(brush.bounds(), Bounds::new(dvec3(0., 1., 0.), dvec3(64., 65., 64.)));
	}

	#[test]
	fn resize_drags_a_face_along_its_normal() {
		let mut brush = cube();
		let top = (0..brush.face_count())
			.find(|&i| brush.face(i).unwrap().normal() == DVec3::Z)
			.unwrap();

		assert!(brush.can_resize(top, 16.));
		brush.resize(top, 16., false);
		brush.geometry().validate().unwrap();
		assert_eq!(brush.bounds().max.z, 80.);

		// dragging the roof below the floor would nullify the brush
		let top = (0..brush.face_count())
			.find(|&i| brush.face(i).unwrap().normal() == DVec3::Z)
			.unwrap();
		assert!(!brush.can_resize(top, -100.));
		assert!(!brush.can_resize(top, 0.));
	}

	#[test]
	fn enlarge_thickens_every_side() {
		let mut brush = cube();
		brush.enlarge(8., false);
		brush.geometry().validate().unwrap();
		assert_eq!(brush.bounds(), Bounds::new(dvec3(-8., -8., -8.), dvec3(72., 72., 72.)));
	}

	#[test]
	fn deleting_a_face_needs_the_rest_to_close() {
		let mut brush = cube();
		for index in 0..brush.face_count() {
			assert!(!brush.can_delete_face(index), "a box face is load bearing");
		}

		let chamfer = Face::new(dvec3(64., 64., 32.), dvec3(64., 32., 64.), dvec3(32., 64., 64.)).unwrap();
		assert!(brush.add_face(chamfer));
		let index = (0..brush.face_count())
			.find(|&i| brush.face(i).unwrap().normal().x > 0.5 && brush.face(i).unwrap().normal().z > 0.5)
			.unwrap();
		assert!(brush.can_delete_face(index));
		assert!(brush.delete_face(index));
		brush.geometry().validate().unwrap();
		assert_eq!(brush.face_count(), 6);
		assert_eq!(brush.bounds(), Bounds::new(dvec3(0., 0., 0.), dvec3(64., 64., 64.)));
	}

	#[test]
	fn point_queries() {
		let brush = cube();
		assert!(brush.contains_point(dvec3(32., 32., 32.)));
		assert!(brush.contains_point(dvec3(0., 0., 0.)));
		assert!(brush.contains_point(dvec3(64., 64., 64.)));
		assert!(!brush.contains_point(dvec3(65., 32., 32.)));
		assert!(!brush.contains_point(dvec3(32., 32., -1.)));
	}

	#[test]
	fn brush_intersection_and_containment() {
		let big = cube();
		let inner = Brush::from_bounds(world(), Bounds::new(dvec3(16., 16., 16.), dvec3(48., 48., 48.)), None).unwrap();
		let overlapping = Brush::from_bounds(world(), Bounds::new(dvec3(32., 32., 32.), dvec3(96., 96., 96.)), None).unwrap();
		let separate = Brush::from_bounds(world(), Bounds::new(dvec3(128., 0., 0.), dvec3(192., 64., 64.)), None).unwrap();

		assert!(big.intersects_brush(&inner));
		assert!(big.intersects_brush(&overlapping));
		assert!(!big.intersects_brush(&separate));

		// symmetry
		assert!(inner.intersects_brush(&big));
		assert!(overlapping.intersects_brush(&big));
		assert!(!separate.intersects_brush(&big));

		assert!(big.contains_brush(&inner));
		assert!(!big.contains_brush(&overlapping));
		assert!(!inner.contains_brush(&big));
		// containment implies intersection
		assert!(big.intersects_brush(&inner));
	}

	#[test]
	fn chamfered_brushes_separate_despite_box_overlap() {
		// two chamfered brushes whose boxes overlap but whose solids do not
		let mut a = cube();
		let chamfer = Face::new(dvec3(64., 64., 32.), dvec3(64., 32., 64.), dvec3(32., 64., 64.)).unwrap();
		assert!(a.add_face(chamfer));

		let mut b = Brush::from_bounds(world(), Bounds::new(dvec3(48., 48., 48.), dvec3(112., 112., 112.)), None).unwrap();
		let mirror = Face::new(dvec3(48., 48., 80.), dvec3(80., 48., 48.), dvec3(48., 80., 48.)).unwrap();
		assert!(b.add_face(mirror));

		assert!(a.bounds().intersects(&b.bounds()));
		assert!(!a.intersects_brush(&b));
		assert!(!b.intersects_brush(&a));
	}

	#[test]
	fn entity_queries_use_its_box() {
		let brush = cube();
		let mut inside = Entity::new();
		inside.set_property("origin", "32 32 32");
		assert!(brush.intersects_entity(&inside));
		assert!(brush.contains_entity(&inside));

		let mut outside = Entity::new();
		outside.set_property("origin", "256 256 256");
		assert!(!brush.intersects_entity(&outside));
		assert!(!brush.contains_entity(&outside));

		let mut straddling = Entity::new();
		straddling.set_property("origin", "64 32 32");
		assert!(brush.intersects_entity(&straddling));
		assert!(!brush.contains_entity(&straddling));
	}

	#[test]
	fn template_copies_are_deep() {
		let texture = Texture::new("crate2", 64, 64);
		let original = Brush::from_bounds(world(), Bounds::new(dvec3(0., 0., 0.), dvec3(64., 64., 64.)), Some(&texture)).unwrap();
		let copy = Brush::from_template(world(), &original).unwrap();

		assert_eq!(copy.bounds(), original.bounds());
		assert_eq!(copy.face_count(), original.face_count());
		copy.geometry().validate().unwrap();
		// both brushes hold their own references
		assert_eq!(texture.usage_count(), 12);
	}

	#[test]
	fn translation_with_texture_lock_keeps_texels() {
		let texture = Texture::new("crate2", 64, 64);
		let mut brush = Brush::from_bounds(world(), Bounds::new(dvec3(0., 0., 0.), dvec3(64., 64., 64.)), Some(&texture)).unwrap();
		let top = (0..brush.face_count())
			.find(|&i| brush.face(i).unwrap().normal() == DVec3::Z)
			.unwrap();
		let sample = dvec3(48., 16., 64.);
		let before = brush.face(top).unwrap().texture_coords(sample);

		let delta = dvec3(23., -7., 48.);
		brush.translate(delta, true);
		brush.geometry().validate().unwrap();

		let top = (0..brush.face_count())
			.find(|&i| brush.face(i).unwrap().normal() == DVec3::Z)
			.unwrap();
		let after = brush.face(top).unwrap().texture_coords(sample + delta);
		assert_almost_eq!(before.x.rem_euclid(64.), after.x.rem_euclid(64.), 1e-6);
		assert_almost_eq!(before.y.rem_euclid(64.), after.y.rem_euclid(64.), 1e-6);
	}

	#[test]
	fn vertex_drag_through_the_facade() {
		let mut brush = cube();
		let index = brush.vertices().position(|p| p == dvec3(0., 0., 0.)).unwrap();
		let result = brush.move_vertex(index, dvec3(16., 16., 0.));
		assert!(result.moved);
		brush.geometry().validate().unwrap();
		let moved = brush.vertices().nth(result.index).unwrap();
		assert_almost_eq!(moved, dvec3(16., 16., 0.), POSITION_EPSILON);
	}
}
