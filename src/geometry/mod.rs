//! The polyhedral realization of a brush: a doubly-linked vertex/edge/side mesh kept
//! convex, closed and bounded through cuts, transforms and drags.
//!
//! Vertices, edges and sides live in arenas and reference each other by index.
//! Operations that delete elements tombstone them in per-operation tables and
//! compact the arenas once at the end, so ids only move at well-defined points.

pub mod cut;
pub mod mover;

use glam::{DAffine3, DVec3};
use thiserror::Error;

use crate::face::Face;
use crate::math::{Bounds, Plane, PointStatus, snap};

pub use cut::CutOutcome;
pub use mover::MoveResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct VertexId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct EdgeId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SideId(pub(crate) u32);

impl VertexId {
	pub(crate) fn index(self) -> usize {
		self.0 as usize
	}
}
impl EdgeId {
	pub(crate) fn index(self) -> usize {
		self.0 as usize
	}
}
impl SideId {
	pub(crate) fn index(self) -> usize {
		self.0 as usize
	}
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Vertex {
	pub(crate) position: DVec3,
}

/// An edge of the mesh. Once the polyhedron is closed every edge borders exactly
/// two sides, its direction running with the right side's winding and against the
/// left side's.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Edge {
	pub(crate) start: VertexId,
	pub(crate) end: VertexId,
	pub(crate) left: Option<SideId>,
	pub(crate) right: Option<SideId>,
}

impl Edge {
	/// The first vertex of this edge as seen from `side`'s winding.
	pub(crate) fn start_vertex(&self, side: SideId) -> VertexId {
		if self.left == Some(side) { self.end } else { self.start }
	}

	pub(crate) fn end_vertex(&self, side: SideId) -> VertexId {
		if self.left == Some(side) { self.start } else { self.end }
	}

	pub(crate) fn has_vertex(&self, vertex: VertexId) -> bool {
		self.start == vertex || self.end == vertex
	}

	pub(crate) fn other_vertex(&self, vertex: VertexId) -> VertexId {
		if self.start == vertex { self.end } else { self.start }
	}

	/// Swaps direction and handedness at once, preserving what every side sees.
	pub(crate) fn flip(&mut self) {
		std::mem::swap(&mut self.left, &mut self.right);
		std::mem::swap(&mut self.start, &mut self.end);
	}

	pub(crate) fn replace_side(&mut self, from: SideId, to: SideId) {
		if self.left == Some(from) {
			self.left = Some(to);
		} else if self.right == Some(from) {
			self.right = Some(to);
		}
	}

	pub(crate) fn other_side(&self, side: SideId) -> Option<SideId> {
		if self.left == Some(side) { self.right } else { self.left }
	}
}

/// One convex polygon of the mesh: an edge cycle and the matching vertex cycle,
/// wound clockwise as seen from outside. Owns the [Face] realized by it, if any.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Side {
	pub(crate) edges: Vec<EdgeId>,
	pub(crate) vertices: Vec<VertexId>,
	pub(crate) face: Option<Face>,
}

/// Defects the mesh validator can find. These are programmer errors, surfaced as
/// values so tests can assert on them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
	#[error("edge {edge} does not border two distinct sides")]
	OpenEdge { edge: usize },
	#[error("edge {edge} is degenerate")]
	DegenerateEdge { edge: usize },
	#[error("side {side} has fewer than three edges")]
	DegenerateSide { side: usize },
	#[error("side {side} edge and vertex cycles disagree")]
	InconsistentCycle { side: usize },
	#[error("side {side} does not have a plane")]
	PlanelessSide { side: usize },
	#[error("side {side} disagrees with its face boundary")]
	FaceMismatch { side: usize },
	#[error("vertex {vertex} lies outside side {side}")]
	ConcaveVertex { vertex: usize, side: usize },
	#[error("stored bounds do not match the vertex set")]
	StaleBounds,
}

/// Remapping tables produced by [BrushGeometry::sweep]: old index to new index,
/// `None` for elements that were swept away.
pub(crate) struct SweepMaps {
	pub(crate) vertices: Vec<Option<usize>>,
	pub(crate) edges: Vec<Option<usize>>,
	pub(crate) sides: Vec<Option<usize>>,
}

/// A convex polyhedron kept as the intersection of the half-spaces that were cut
/// into it, together with its axis-aligned bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct BrushGeometry {
	pub(crate) vertices: Vec<Vertex>,
	pub(crate) edges: Vec<Edge>,
	pub(crate) sides: Vec<Side>,
	pub(crate) bounds: Bounds,
}

impl BrushGeometry {
	/// Seeds the axis-aligned cuboid of `bounds`: eight vertices, twelve edges, six
	/// sides, no faces bound yet. Every brush starts as this box and is cut down.
	pub fn new(bounds: Bounds) -> Self {
		let mut geometry = Self {
			vertices: Vec::with_capacity(8),
			edges: Vec::with_capacity(12),
			sides: Vec::with_capacity(6),
			bounds,
		};

		let (min, max) = (bounds.min, bounds.max);
		// left/right, front/back, down/up
		let lfd = geometry.push_vertex(DVec3::new(min.x, min.y, min.z));
		let lfu = geometry.push_vertex(DVec3::new(min.x, min.y, max.z));
		let lbd = geometry.push_vertex(DVec3::new(min.x, max.y, min.z));
		let lbu = geometry.push_vertex(DVec3::new(min.x, max.y, max.z));
		let rfd = geometry.push_vertex(DVec3::new(max.x, min.y, min.z));
		let rfu = geometry.push_vertex(DVec3::new(max.x, min.y, max.z));
		let rbd = geometry.push_vertex(DVec3::new(max.x, max.y, min.z));
		let rbu = geometry.push_vertex(DVec3::new(max.x, max.y, max.z));

		let lfd_lbd = geometry.push_edge(lfd, lbd);
		let lbd_lbu = geometry.push_edge(lbd, lbu);
		let lbu_lfu = geometry.push_edge(lbu, lfu);
		let lfu_lfd = geometry.push_edge(lfu, lfd);
		let rfd_rfu = geometry.push_edge(rfd, rfu);
		let rfu_rbu = geometry.push_edge(rfu, rbu);
		let rbu_rbd = geometry.push_edge(rbu, rbd);
		let rbd_rfd = geometry.push_edge(rbd, rfd);
		let lfu_rfu = geometry.push_edge(lfu, rfu);
		let rfd_lfd = geometry.push_edge(rfd, lfd);
		let lbd_rbd = geometry.push_edge(lbd, rbd);
		let rbu_lbu = geometry.push_edge(rbu, lbu);

		geometry.push_seed_side([lfd_lbd, lbd_lbu, lbu_lfu, lfu_lfd], [false; 4]);
		geometry.push_seed_side([rfd_rfu, rfu_rbu, rbu_rbd, rbd_rfd], [false; 4]);
		geometry.push_seed_side([lfu_rfu, rfd_rfu, rfd_lfd, lfu_lfd], [false, true, false, true]);
		geometry.push_seed_side([rbu_lbu, lbd_lbu, lbd_rbd, rbu_rbd], [false, true, false, true]);
		geometry.push_seed_side([lbu_lfu, rbu_lbu, rfu_rbu, lfu_rfu], [true; 4]);
		geometry.push_seed_side([rfd_lfd, rbd_rfd, lbd_rbd, lfd_lbd], [true; 4]);

		geometry
	}

	fn push_vertex(&mut self, position: DVec3) -> VertexId {
		self.vertices.push(Vertex { position });
		VertexId(self.vertices.len() as u32 - 1)
	}

	fn push_edge(&mut self, start: VertexId, end: VertexId) -> EdgeId {
		self.edges.push(Edge {
			start,
			end,
			left: None,
			right: None,
		});
		EdgeId(self.edges.len() as u32 - 1)
	}

	/// Installs one seed side. An inverted edge runs against the side's winding and
	/// is claimed on its left, a regular one on its right.
	fn push_seed_side(&mut self, edges: [EdgeId; 4], invert: [bool; 4]) {
		let side_id = SideId(self.sides.len() as u32);
		let mut vertices = Vec::with_capacity(4);
		for (edge_id, invert) in edges.into_iter().zip(invert) {
			let edge = &mut self.edges[edge_id.index()];
			if invert {
				edge.left = Some(side_id);
				vertices.push(edge.end);
			} else {
				edge.right = Some(side_id);
				vertices.push(edge.start);
			}
		}
		self.sides.push(Side {
			edges: edges.to_vec(),
			vertices,
			face: None,
		});
	}

	pub fn vertex_count(&self) -> usize {
		self.vertices.len()
	}

	pub fn edge_count(&self) -> usize {
		self.edges.len()
	}

	pub fn side_count(&self) -> usize {
		self.sides.len()
	}

	pub fn bounds(&self) -> Bounds {
		self.bounds
	}

	pub fn vertex_positions(&self) -> impl Iterator<Item = DVec3> + '_ {
		self.vertices.iter().map(|vertex| vertex.position)
	}

	pub fn edge_endpoints(&self, index: usize) -> (DVec3, DVec3) {
		let edge = &self.edges[index];
		(self.vertices[edge.start.index()].position, self.vertices[edge.end.index()].position)
	}

	/// The vertex cycle of a side, clockwise as seen from outside.
	pub fn side_polygon(&self, index: usize) -> Vec<DVec3> {
		self.sides[index].vertices.iter().map(|v| self.vertices[v.index()].position).collect()
	}

	pub fn side_centroid(&self, index: usize) -> DVec3 {
		let side = &self.sides[index];
		side.vertices.iter().map(|v| self.vertices[v.index()].position).sum::<DVec3>() / side.vertices.len() as f64
	}

	pub fn face(&self, index: usize) -> Option<&Face> {
		self.sides[index].face.as_ref()
	}

	pub fn face_mut(&mut self, index: usize) -> Option<&mut Face> {
		self.sides[index].face.as_mut()
	}

	pub fn faces(&self) -> impl Iterator<Item = &Face> {
		self.sides.iter().filter_map(|side| side.face.as_ref())
	}

	/// Whether every side has a face bound to it. A brush geometry that is not
	/// closed is still being assembled from its face list.
	pub fn closed(&self) -> bool {
		self.sides.iter().all(|side| side.face.is_some())
	}

	/// Moves every face out of the mesh, leaving the sides unbound. Used when the
	/// geometry is rebuilt from scratch.
	pub fn take_faces(&mut self) -> Vec<Face> {
		self.sides.iter_mut().filter_map(|side| side.face.take()).collect()
	}

	/// The supporting plane of a side: its face boundary when bound, otherwise the
	/// plane of its polygon.
	pub(crate) fn side_plane(&self, side: SideId) -> Option<Plane> {
		if let Some(face) = &self.sides[side.index()].face {
			return Some(face.boundary());
		}
		self.polygon_plane(side)
	}

	/// The plane of a side's vertex polygon by Newell's formula, oriented outward
	/// for the clockwise-from-outside winding sides carry.
	pub(crate) fn polygon_plane(&self, side: SideId) -> Option<Plane> {
		let side = &self.sides[side.index()];
		let count = side.vertices.len();
		if count < 3 {
			return None;
		}
		let at = |i: usize| self.vertices[side.vertices[i % count].index()].position;
		let mut normal = DVec3::ZERO;
		let mut centroid = DVec3::ZERO;
		for i in 0..count {
			normal += at(i).cross(at(i + 1));
			centroid += at(i);
		}
		normal = -normal;
		if normal.length_squared() < crate::math::DOT_EPSILON * crate::math::DOT_EPSILON {
			return None;
		}
		let normal = normal.normalize();
		centroid /= count as f64;
		Some(Plane {
			normal,
			distance: -normal.dot(centroid),
		})
	}

	pub(crate) fn position(&self, vertex: VertexId) -> DVec3 {
		self.vertices[vertex.index()].position
	}

	/// Recomputes a side's vertex cycle from its edge cycle.
	pub(crate) fn rebuild_side_vertices(&mut self, side_id: SideId) {
		let side = &self.sides[side_id.index()];
		let vertices = side.edges.iter().map(|e| self.edges[e.index()].start_vertex(side_id)).collect();
		self.sides[side_id.index()].vertices = vertices;
	}

	pub(crate) fn recompute_bounds(&mut self) {
		self.bounds = Bounds::from_points(self.vertex_positions());
	}

	/// Applies an affine transform to the whole mesh, faces included. An
	/// orientation-reversing transform also reverses every winding so side normals
	/// stay outward. Topology never changes.
	pub fn transform(&mut self, transform: &DAffine3, lock_textures: bool) {
		for index in 0..self.sides.len() {
			let centroid = self.side_centroid(index);
			if let Some(face) = self.sides[index].face.as_mut() {
				face.transform(transform, lock_textures, centroid);
			}
		}

		for vertex in &mut self.vertices {
			vertex.position = transform.transform_point3(vertex.position);
		}

		if transform.matrix3.determinant() < 0. {
			for edge in &mut self.edges {
				edge.flip();
			}
			for index in 0..self.sides.len() {
				let side = &mut self.sides[index];
				side.edges.reverse();
				side.edges.rotate_left(1);
				let side_id = SideId(index as u32);
				self.rebuild_side_vertices(side_id);
			}
		}

		self.recompute_bounds();
	}

	/// Rounds every vertex to the integer grid and re-derives the face planes from
	/// the snapped polygons.
	pub fn snap(&mut self) {
		for vertex in &mut self.vertices {
			vertex.position = snap(vertex.position);
		}
		for index in 0..self.sides.len() {
			let polygon = self.side_polygon(index);
			if let Some(face) = self.sides[index].face.as_mut() {
				face.update_points(&polygon);
			}
		}
		self.recompute_bounds();
	}

	/// Compacts the arenas, removing every tombstoned element and rewriting all
	/// stored ids. The tables must cover the arenas exactly.
	pub(crate) fn sweep(&mut self, dead_vertices: &[bool], dead_edges: &[bool], dead_sides: &[bool]) -> SweepMaps {
		fn remap(dead: &[bool]) -> Vec<Option<usize>> {
			let mut next = 0;
			dead.iter()
				.map(|&dead| {
					if dead {
						None
					} else {
						next += 1;
						Some(next - 1)
					}
				})
				.collect()
		}

		debug_assert_eq!(dead_vertices.len(), self.vertices.len());
		debug_assert_eq!(dead_edges.len(), self.edges.len());
		debug_assert_eq!(dead_sides.len(), self.sides.len());

		let maps = SweepMaps {
			vertices: remap(dead_vertices),
			edges: remap(dead_edges),
			sides: remap(dead_sides),
		};

		let map_vertex = |id: VertexId| VertexId(maps.vertices[id.index()].unwrap() as u32);
		let map_side = |id: Option<SideId>| id.and_then(|s| maps.sides[s.index()]).map(|s| SideId(s as u32));

		let mut keep_index = 0;
		self.vertices.retain(|_| {
			keep_index += 1;
			!dead_vertices[keep_index - 1]
		});

		let mut index = 0;
		self.edges.retain_mut(|edge| {
			let keep = !dead_edges[index];
			index += 1;
			if keep {
				edge.start = map_vertex(edge.start);
				edge.end = map_vertex(edge.end);
				edge.left = map_side(edge.left);
				edge.right = map_side(edge.right);
			}
			keep
		});

		let mut index = 0;
		self.sides.retain_mut(|side| {
			let keep = !dead_sides[index];
			index += 1;
			if keep {
				for edge in &mut side.edges {
					*edge = EdgeId(maps.edges[edge.index()].unwrap() as u32);
				}
				for vertex in &mut side.vertices {
					*vertex = map_vertex(*vertex);
				}
			}
			keep
		});

		maps
	}

	/// Checks every structural and geometric invariant of the mesh. Cheap enough
	/// for tests and for gating drag commits, not run on every operation.
	pub fn validate(&self) -> Result<(), GeometryError> {
		for (index, edge) in self.edges.iter().enumerate() {
			let (Some(left), Some(right)) = (edge.left, edge.right) else {
				return Err(GeometryError::OpenEdge { edge: index });
			};
			if left == right {
				return Err(GeometryError::OpenEdge { edge: index });
			}
			if edge.start == edge.end {
				return Err(GeometryError::DegenerateEdge { edge: index });
			}
			let edge_id = EdgeId(index as u32);
			for side in [left, right] {
				if !self.sides[side.index()].edges.contains(&edge_id) {
					return Err(GeometryError::InconsistentCycle { side: side.index() });
				}
			}
		}

		for (index, side) in self.sides.iter().enumerate() {
			let side_id = SideId(index as u32);
			if side.edges.len() < 3 {
				return Err(GeometryError::DegenerateSide { side: index });
			}
			if side.edges.len() != side.vertices.len() {
				return Err(GeometryError::InconsistentCycle { side: index });
			}
			let count = side.edges.len();
			for i in 0..count {
				let edge = &self.edges[side.edges[i].index()];
				if edge.start_vertex(side_id) != side.vertices[i] || edge.end_vertex(side_id) != side.vertices[(i + 1) % count] {
					return Err(GeometryError::InconsistentCycle { side: index });
				}
			}

			let Some(plane) = self.polygon_plane(side_id) else {
				return Err(GeometryError::PlanelessSide { side: index });
			};
			if let Some(face) = &side.face {
				if !face.boundary().almost_eq(&plane) {
					return Err(GeometryError::FaceMismatch { side: index });
				}
			}
			// planarity of the side's own polygon, then convexity against everything
			for vertex in &side.vertices {
				if plane.status(self.position(*vertex)) != PointStatus::Inside {
					return Err(GeometryError::FaceMismatch { side: index });
				}
			}
			for (vertex_index, vertex) in self.vertices.iter().enumerate() {
				if plane.status(vertex.position) == PointStatus::Above {
					return Err(GeometryError::ConcaveVertex {
						vertex: vertex_index,
						side: index,
					});
				}
			}
		}

		let actual = Bounds::from_points(self.vertex_positions());
		if (actual.min - self.bounds.min).length() > crate::math::POSITION_EPSILON
			|| (actual.max - self.bounds.max).length() > crate::math::POSITION_EPSILON
		{
			return Err(GeometryError::StaleBounds);
		}

		Ok(())
	}
}

/// Classifies a whole vertex set against the plane through `origin` with normal
/// `direction`: [PointStatus::Inside] as soon as points sit on both sides.
pub(crate) fn vertex_status_from_ray(origin: DVec3, direction: DVec3, positions: impl IntoIterator<Item = DVec3>) -> PointStatus {
	let mut above = 0;
	let mut below = 0;
	for position in positions {
		match crate::math::point_status_from_ray(origin, direction, position) {
			PointStatus::Above => above += 1,
			PointStatus::Below => below += 1,
			PointStatus::Inside => {}
		}
		if above > 0 && below > 0 {
			return PointStatus::Inside;
		}
	}
	if above > 0 { PointStatus::Above } else { PointStatus::Below }
}

#[cfg(test)]
mod tests {
	use super::*;
	use glam::dvec3;

	fn unit_cube() -> BrushGeometry {
		BrushGeometry::new(Bounds::new(dvec3(0., 0., 0.), dvec3(64., 64., 64.)))
	}

	#[test]
	fn seed_cube_shape() {
		let cube = unit_cube();
		assert_eq!(cube.vertex_count(), 8);
		assert_eq!(cube.edge_count(), 12);
		assert_eq!(cube.side_count(), 6);
		assert_eq!(cube.bounds(), Bounds::new(dvec3(0., 0., 0.), dvec3(64., 64., 64.)));
		cube.validate().unwrap();
		assert!(!cube.closed());
	}

	#[test]
	fn seed_cube_normals_point_outward() {
		let cube = unit_cube();
		let center = dvec3(32., 32., 32.);
		for index in 0..cube.side_count() {
			let plane = cube.side_plane(SideId(index as u32)).unwrap();
			assert!(plane.point_side(center) < 0., "side {index} faces inward");
		}
	}

	#[test]
	fn transform_round_trips() {
		let original = unit_cube();

		let mut cube = original.clone();
		let delta = dvec3(16., -48., 8.);
		cube.transform(&DAffine3::from_translation(delta), false);
		assert_eq!(cube.bounds(), original.bounds().translated(delta));
		cube.transform(&DAffine3::from_translation(-delta), false);
		assert_eq!(cube, original);

		use crate::math::{Axis, about};
		let center = dvec3(32., 32., 32.);
		let mut cube = original.clone();
		cube.transform(&about(center, Axis::Z.rotation_90_cw()), false);
		cube.validate().unwrap();
		assert_eq!(cube.bounds(), original.bounds());
		cube.transform(&about(center, Axis::Z.rotation_90_ccw()), false);
		assert_eq!(cube, original);
	}

	#[test]
	fn rotate_90_permutes_vertices() {
		let mut cube = unit_cube();
		let center = dvec3(32., 32., 32.);
		let before: Vec<DVec3> = cube.vertex_positions().collect();
		cube.transform(&crate::math::about(center, crate::math::Axis::Z.rotation_90_cw()), false);
		for (old, new) in before.into_iter().zip(cube.vertex_positions()) {
			assert_eq!(new, dvec3(old.y, 64. - old.x, old.z));
		}
	}

	#[test]
	fn flip_keeps_mesh_valid() {
		let mut cube = unit_cube();
		let center = dvec3(32., 32., 32.);
		cube.transform(&crate::math::about(center, crate::math::Axis::X.mirror()), false);
		cube.validate().unwrap();

		let original = unit_cube();
		cube.transform(&crate::math::about(center, crate::math::Axis::X.mirror()), false);
		assert_eq!(cube, original);
	}

	#[test]
	fn snap_rounds_vertices() {
		let mut cube = unit_cube();
		cube.transform(&DAffine3::from_translation(dvec3(0.25, -0.4, 0.5)), false);
		cube.snap();
		cube.validate().unwrap();
		assert_eq!(cube.bounds(), Bounds::new(dvec3(0., 0., 1.), dvec3(64., 64., 65.)));
	}

	#[test]
	fn ray_status_over_vertex_sets() {
		let cube = unit_cube();
		let positions: Vec<DVec3> = cube.vertex_positions().collect();
		assert_eq!(
			vertex_status_from_ray(dvec3(0., 0., 100.), DVec3::Z, positions.iter().copied()),
			PointStatus::Below
		);
		assert_eq!(
			vertex_status_from_ray(dvec3(0., 0., -100.), DVec3::Z, positions.iter().copied()),
			PointStatus::Above
		);
		assert_eq!(vertex_status_from_ray(dvec3(0., 0., 32.), DVec3::Z, positions), PointStatus::Inside);
	}
}
