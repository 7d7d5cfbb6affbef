//! Direct manipulation of vertices, edge midpoints and side centroids: clamped
//! stepwise motion with the topology repairs that keep the polyhedron convex and
//! closed along the way.
//!
//! Every move works on a clone of the geometry. The clone replaces the original
//! only when the motion made progress and the result passes validation; a failed
//! drag leaves the brush untouched and both out-lists empty.

use float_ord::FloatOrd;
use glam::DVec3;
use tracing::warn;

use super::{BrushGeometry, Edge, EdgeId, Side, SideId, Vertex, VertexId};
use crate::face::Face;
use crate::math::{AlmostEqual, DOT_EPSILON, POSITION_EPSILON};

/// Where a drag ended up. `index` addresses the moved feature after the operation;
/// on failure it is the original index and the brush is unchanged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveResult {
	pub index: usize,
	pub moved: bool,
}

/// Repairs may cascade but each one strictly shrinks or settles the mesh; the cap
/// only guards against a cycling bug.
const MAX_MOVE_ITERATIONS: usize = 256;

struct MoveAbort;

enum MoveEnd {
	/// The vertex (or the vertex it merged into) ended somewhere new.
	Moved(VertexId),
	/// Repairs dissolved the vertex entirely; the drag was a net no-op.
	Vanished,
	NoProgress,
}

enum MovePlan {
	Vertex(VertexId),
	EdgeMidpoint(EdgeId),
	SideCentroid(SideId),
}

impl BrushGeometry {
	/// Drags the feature at `index` by `delta`. Features share one index space:
	/// vertices first, then edge midpoints, then side centroids. Moving a midpoint
	/// or centroid first inserts a vertex there, so a successful result always
	/// addresses a vertex. Indices of sides created by the drag are appended to
	/// `new_faces`, faces that ceased to exist are moved into `dropped_faces`.
	pub fn move_vertex(&mut self, index: usize, delta: DVec3, new_faces: &mut Vec<usize>, dropped_faces: &mut Vec<Face>) -> MoveResult {
		let vertex_count = self.vertices.len();
		let edge_count = self.edges.len();
		assert!(index < vertex_count + edge_count + self.sides.len(), "feature index out of range");

		if delta.length_squared() == 0. {
			return MoveResult { index, moved: false };
		}

		let plan = if index < vertex_count {
			MovePlan::Vertex(VertexId(index as u32))
		} else if index < vertex_count + edge_count {
			MovePlan::EdgeMidpoint(EdgeId((index - vertex_count) as u32))
		} else {
			MovePlan::SideCentroid(SideId((index - vertex_count - edge_count) as u32))
		};
		self.run_move(index, plan, delta, new_faces, dropped_faces)
	}

	/// Drags a whole edge by `delta`, moving the endpoint that leads along the edge
	/// direction first. Fails atomically if either endpoint cannot travel the full
	/// distance. `index` and the result index are plain edge indices.
	pub fn move_edge(&mut self, index: usize, delta: DVec3, new_faces: &mut Vec<usize>, dropped_faces: &mut Vec<Face>) -> MoveResult {
		assert!(index < self.edges.len(), "edge index out of range");
		let failed = MoveResult { index, moved: false };
		if delta.length_squared() == 0. {
			return failed;
		}

		let edge = &self.edges[index];
		let (start, end) = (edge.start, edge.end);
		let edge_direction = self.position(end) - self.position(start);
		let order = if edge_direction.dot(delta) > 0. { [end, start] } else { [start, end] };

		let mut mover = Mover::new(self.clone());
		for vertex in order {
			if !mover.move_fully(vertex, delta) {
				warn!("edge drag rejected");
				return failed;
			}
		}

		let start_position = self.position(start) + delta;
		let end_position = self.position(end) + delta;
		let Some((geometry, new_sides, dropped)) = mover.commit() else {
			warn!("edge drag rejected");
			return failed;
		};
		let Some(final_index) = geometry.find_edge_at(start_position, end_position) else {
			warn!("edge drag dissolved the edge");
			return failed;
		};

		*self = geometry;
		new_faces.extend(new_sides);
		dropped_faces.extend(dropped);
		MoveResult {
			index: final_index,
			moved: true,
		}
	}

	/// Drags a whole side by `delta`, moving its vertices in ascending order of
	/// their projection onto the motion so the polygon never runs over itself.
	/// Fails atomically if any vertex cannot travel the full distance. `index` and
	/// the result index are plain side indices.
	pub fn move_side(&mut self, index: usize, delta: DVec3, new_faces: &mut Vec<usize>, dropped_faces: &mut Vec<Face>) -> MoveResult {
		assert!(index < self.sides.len(), "side index out of range");
		let failed = MoveResult { index, moved: false };
		if delta.length_squared() == 0. {
			return failed;
		}

		let center = self.side_centroid(index);
		let direction = delta.normalize();
		let mut order = self.sides[index].vertices.clone();
		order.sort_by_key(|vertex| FloatOrd((self.position(*vertex) - center).dot(direction)));
		let moved_polygon: Vec<DVec3> = self.sides[index].vertices.iter().map(|v| self.position(*v) + delta).collect();

		let mut mover = Mover::new(self.clone());
		for vertex in order {
			if !mover.move_fully(vertex, delta) {
				warn!("side drag rejected");
				return failed;
			}
		}

		let Some((geometry, new_sides, dropped)) = mover.commit() else {
			warn!("side drag rejected");
			return failed;
		};
		let Some(final_index) = geometry.find_side_at(&moved_polygon) else {
			warn!("side drag dissolved the side");
			return failed;
		};

		*self = geometry;
		new_faces.extend(new_sides);
		dropped_faces.extend(dropped);
		MoveResult {
			index: final_index,
			moved: true,
		}
	}

	fn run_move(&mut self, original_index: usize, plan: MovePlan, delta: DVec3, new_faces: &mut Vec<usize>, dropped_faces: &mut Vec<Face>) -> MoveResult {
		let failed = MoveResult {
			index: original_index,
			moved: false,
		};

		let mut mover = Mover::new(self.clone());
		let end = (|| {
			let vertex = match plan {
				MovePlan::Vertex(vertex) => vertex,
				MovePlan::EdgeMidpoint(edge) => mover.split_edge_at_midpoint(edge),
				MovePlan::SideCentroid(side) => mover.fan_triangulate(side),
			};
			mover.move_single(vertex, true, delta)
		})();

		let Ok(MoveEnd::Moved(final_vertex)) = end else {
			warn!("vertex drag rejected");
			return failed;
		};

		let final_index = mover.vertex_survives(final_vertex);
		let Some((geometry, new_sides, dropped)) = mover.commit() else {
			warn!("vertex drag rejected");
			return failed;
		};
		let Some(final_index) = final_index else { return failed };

		*self = geometry;
		new_faces.extend(new_sides);
		dropped_faces.extend(dropped);
		MoveResult {
			index: final_index,
			moved: true,
		}
	}

	fn find_edge_at(&self, a: DVec3, b: DVec3) -> Option<usize> {
		self.edges.iter().position(|edge| {
			let start = self.position(edge.start);
			let end = self.position(edge.end);
			(start.almost_eq(a, POSITION_EPSILON) && end.almost_eq(b, POSITION_EPSILON))
				|| (start.almost_eq(b, POSITION_EPSILON) && end.almost_eq(a, POSITION_EPSILON))
		})
	}

	fn find_side_at(&self, polygon: &[DVec3]) -> Option<usize> {
		self.sides.iter().position(|side| {
			if side.vertices.len() != polygon.len() {
				return false;
			}
			let count = polygon.len();
			(0..count).any(|offset| {
				(0..count).all(|i| {
					self.position(side.vertices[(offset + i) % count])
						.almost_eq(polygon[i], POSITION_EPSILON)
				})
			})
		})
	}
}

/// One in-flight drag on a working copy of the geometry. Elements deleted by
/// repairs are tombstoned here and swept out in [Mover::commit].
struct Mover {
	geo: BrushGeometry,
	dead_vertices: Vec<bool>,
	dead_edges: Vec<bool>,
	dead_sides: Vec<bool>,
	/// Sides created by this drag; their faces are new, not dropped, if they die.
	born_sides: Vec<SideId>,
	dropped: Vec<Face>,
}

impl Mover {
	fn new(geo: BrushGeometry) -> Self {
		Self {
			dead_vertices: vec![false; geo.vertices.len()],
			dead_edges: vec![false; geo.edges.len()],
			dead_sides: vec![false; geo.sides.len()],
			born_sides: Vec::new(),
			dropped: Vec::new(),
			geo,
		}
	}

	/// Sweeps the tombstones, revalidates, and hands the geometry back together
	/// with the final indices of surviving new sides and the dropped faces.
	fn commit(mut self) -> Option<(BrushGeometry, Vec<usize>, Vec<Face>)> {
		let maps = self.geo.sweep(&self.dead_vertices, &self.dead_edges, &self.dead_sides);
		self.geo.recompute_bounds();
		if let Err(defect) = self.geo.validate() {
			warn!("drag result failed validation: {defect}");
			return None;
		}
		let new_sides = self.born_sides.iter().filter_map(|side| maps.sides[side.index()]).collect();
		Some((self.geo, new_sides, self.dropped))
	}

	/// The final index the vertex will have after the sweep, if it survived.
	fn vertex_survives(&self, vertex: VertexId) -> Option<usize> {
		if self.dead_vertices[vertex.index()] {
			return None;
		}
		let dead_before = self.dead_vertices[..vertex.index()].iter().filter(|&&dead| dead).count();
		Some(vertex.index() - dead_before)
	}

	fn move_fully(&mut self, vertex: VertexId, delta: DVec3) -> bool {
		let target = self.geo.position(vertex) + delta;
		match self.move_single(vertex, false, delta) {
			Ok(MoveEnd::Moved(survivor)) => self.geo.position(survivor).almost_eq(target, POSITION_EPSILON),
			_ => false,
		}
	}

	/// The stepwise drag of one vertex: clamp at the first side plane in the way,
	/// absorb flush sides by flipping diagonals, merge into coincident neighbors,
	/// and keep going until the delta is spent or nothing gives.
	fn move_single(&mut self, start: VertexId, mergeable: bool, delta: DVec3) -> Result<MoveEnd, MoveAbort> {
		let mut vertex = start;
		let target = self.geo.position(vertex) + delta;
		let mut advanced = false;

		for _ in 0..MAX_MOVE_ITERATIONS {
			let position = self.geo.position(vertex);
			let remaining = target - position;
			if remaining.length() < POSITION_EPSILON {
				break;
			}
			let direction = remaining.normalize();

			// incident polygons can only follow the vertex if they are triangles
			for side in self.sides_at(vertex) {
				if self.geo.sides[side.index()].edges.len() > 3 {
					self.chop_corner(side, vertex);
				}
			}

			// clamp the step at the first plane of a side the vertex is not part of
			let mut step = remaining.length();
			let mut limiter = None;
			for side in self.alive_sides() {
				if self.side_has_vertex(side, vertex) {
					continue;
				}
				let Some(plane) = self.geo.side_plane(side) else { continue };
				let speed = plane.normal.dot(direction);
				if speed > DOT_EPSILON {
					let t = (-plane.point_side(position) / speed).max(0.);
					if t < step {
						step = t;
						limiter = Some(side);
					}
				}
			}

			if step < POSITION_EPSILON {
				// flush against a side: fold it into the cone around the vertex and
				// try again, otherwise the drag is spent here
				if let Some(limiter) = limiter {
					if self.absorb_limiter(limiter, vertex) {
						continue;
					}
				}
				break;
			}

			self.geo.vertices[vertex.index()].position = position + direction * step;
			advanced = true;
			self.refresh_incident_faces(vertex);

			// the vertex may have landed on a neighbor; merging ends the drag
			let survivor = self.collapse_around(vertex, mergeable)?;
			if survivor != vertex {
				vertex = survivor;
				break;
			}
		}

		self.settle(&mut vertex, mergeable)?;

		if self.dead_vertices[vertex.index()] {
			return Ok(MoveEnd::Vanished);
		}
		if !advanced {
			return Ok(MoveEnd::NoProgress);
		}
		self.refresh_incident_faces(vertex);
		Ok(MoveEnd::Moved(vertex))
	}

	fn alive_sides(&self) -> impl Iterator<Item = SideId> + '_ {
		(0..self.geo.sides.len())
			.map(|index| SideId(index as u32))
			.filter(|side| !self.dead_sides[side.index()])
	}

	fn alive_edges(&self) -> impl Iterator<Item = EdgeId> + '_ {
		(0..self.geo.edges.len())
			.map(|index| EdgeId(index as u32))
			.filter(|edge| !self.dead_edges[edge.index()])
	}

	fn side_has_vertex(&self, side: SideId, vertex: VertexId) -> bool {
		self.geo.sides[side.index()].vertices.contains(&vertex)
	}

	fn sides_at(&self, vertex: VertexId) -> Vec<SideId> {
		self.alive_sides().filter(|side| self.side_has_vertex(*side, vertex)).collect()
	}

	fn edges_at(&self, vertex: VertexId) -> Vec<EdgeId> {
		self.alive_edges().filter(|edge| self.geo.edges[edge.index()].has_vertex(vertex)).collect()
	}

	fn edge_length(&self, edge: EdgeId) -> f64 {
		let edge = &self.geo.edges[edge.index()];
		(self.geo.position(edge.start) - self.geo.position(edge.end)).length()
	}

	fn new_vertex(&mut self, position: DVec3) -> VertexId {
		self.geo.vertices.push(Vertex { position });
		self.dead_vertices.push(false);
		VertexId(self.geo.vertices.len() as u32 - 1)
	}

	fn new_edge(&mut self, edge: Edge) -> EdgeId {
		self.geo.edges.push(edge);
		self.dead_edges.push(false);
		EdgeId(self.geo.edges.len() as u32 - 1)
	}

	fn new_side(&mut self, side: Side, born: bool) -> SideId {
		self.geo.sides.push(side);
		self.dead_sides.push(false);
		let id = SideId(self.geo.sides.len() as u32 - 1);
		if born {
			self.born_sides.push(id);
		}
		id
	}

	fn kill_side(&mut self, side: SideId) {
		self.dead_sides[side.index()] = true;
		let face = self.geo.sides[side.index()].face.take();
		if let Some(position) = self.born_sides.iter().position(|born| *born == side) {
			self.born_sides.swap_remove(position);
		} else if let Some(face) = face {
			self.dropped.push(face);
		}
	}

	fn refresh_incident_faces(&mut self, vertex: VertexId) {
		for side in self.sides_at(vertex) {
			self.refresh_face(side);
		}
	}

	fn refresh_face(&mut self, side: SideId) {
		let polygon: Vec<DVec3> = self.geo.sides[side.index()]
			.vertices
			.iter()
			.map(|v| self.geo.position(*v))
			.collect();
		if let Some(face) = self.geo.sides[side.index()].face.as_mut() {
			face.update_points(&polygon);
		}
	}

	/// Splits the triangle at `vertex` off a polygon side, leaving the polygon
	/// without the corner. The triangle clones the side's face and can follow the
	/// vertex; if it ends up coplanar again the merge pass folds it back.
	fn chop_corner(&mut self, side_id: SideId, vertex: VertexId) -> SideId {
		let side = &self.geo.sides[side_id.index()];
		let count = side.edges.len();
		debug_assert!(count > 3);
		let i = side.vertices.iter().position(|v| *v == vertex).expect("vertex is on the side");
		let j = (i + count - 1) % count;
		let entering = side.edges[j];
		let leaving = side.edges[i];
		let before = side.vertices[j];
		let after = side.vertices[(i + 1) % count];

		let triangle_id = SideId(self.geo.sides.len() as u32);
		let diagonal = self.new_edge(Edge {
			start: after,
			end: before,
			left: Some(side_id),
			right: Some(triangle_id),
		});
		self.geo.edges[entering.index()].replace_side(side_id, triangle_id);
		self.geo.edges[leaving.index()].replace_side(side_id, triangle_id);

		let face = self.geo.sides[side_id.index()].face.clone();
		let created = self.new_side(
			Side {
				edges: vec![entering, leaving, diagonal],
				vertices: vec![before, vertex, after],
				face,
			},
			true,
		);
		debug_assert_eq!(created, triangle_id);

		let side = &mut self.geo.sides[side_id.index()];
		side.edges[j] = diagonal;
		side.edges.remove(i);
		self.geo.rebuild_side_vertices(side_id);
		self.refresh_face(side_id);
		self.refresh_face(triangle_id);
		triangle_id
	}

	/// The vertex is flush against `limiter` and wants through: fold the limiter
	/// into the cone around the vertex by flipping the diagonal they share.
	fn absorb_limiter(&mut self, limiter: SideId, vertex: VertexId) -> bool {
		let candidates = self.geo.sides[limiter.index()].edges.clone();
		for diagonal in candidates {
			let Some(triangle) = self.geo.edges[diagonal.index()].other_side(limiter) else {
				continue;
			};
			if !self.side_has_vertex(triangle, vertex) || self.geo.edges[diagonal.index()].has_vertex(vertex) {
				continue;
			}
			if self.geo.sides[triangle.index()].edges.len() != 3 {
				continue;
			}
			let far = if self.geo.sides[limiter.index()].edges.len() > 3 {
				let corner = self.geo.edges[diagonal.index()].start;
				self.chop_corner(limiter, corner)
			} else {
				limiter
			};
			self.flip_diagonal(diagonal, triangle, far);
			return true;
		}
		false
	}

	/// Replaces the diagonal between two triangles with the opposite one. `near`
	/// must contain the moving vertex, which ends up on both result triangles.
	fn flip_diagonal(&mut self, diagonal: EdgeId, near: SideId, far: SideId) {
		debug_assert_eq!(self.geo.sides[near.index()].edges.len(), 3);
		debug_assert_eq!(self.geo.sides[far.index()].edges.len(), 3);

		let near_at = self.geo.sides[near.index()].edges.iter().position(|e| *e == diagonal).unwrap();
		let far_at = self.geo.sides[far.index()].edges.iter().position(|e| *e == diagonal).unwrap();

		let apex = self.geo.sides[near.index()].vertices[(near_at + 2) % 3];
		let opposite = self.geo.sides[far.index()].vertices[(far_at + 2) % 3];
		let to_apex = self.geo.sides[near.index()].edges[(near_at + 1) % 3];
		let from_apex = self.geo.sides[near.index()].edges[(near_at + 2) % 3];
		let to_opposite = self.geo.sides[far.index()].edges[(far_at + 1) % 3];
		let from_opposite = self.geo.sides[far.index()].edges[(far_at + 2) % 3];

		let flipped = self.new_edge(Edge {
			start: opposite,
			end: apex,
			left: Some(near),
			right: Some(far),
		});
		self.geo.edges[from_opposite.index()].replace_side(far, near);
		self.geo.edges[from_apex.index()].replace_side(near, far);
		self.dead_edges[diagonal.index()] = true;

		self.geo.sides[near.index()].edges = vec![to_apex, flipped, from_opposite];
		self.geo.sides[far.index()].edges = vec![from_apex, to_opposite, flipped];
		self.geo.rebuild_side_vertices(near);
		self.geo.rebuild_side_vertices(far);
		self.refresh_face(near);
		self.refresh_face(far);
	}

	/// Collapses zero-length edges at the vertex, merging it into whichever
	/// neighbor it landed on. Returns the surviving vertex.
	fn collapse_around(&mut self, vertex: VertexId, mergeable: bool) -> Result<VertexId, MoveAbort> {
		let mut survivor = vertex;
		loop {
			let Some(collapsing) = self
				.edges_at(survivor)
				.into_iter()
				.find(|edge| self.edge_length(*edge) < POSITION_EPSILON)
			else {
				return Ok(survivor);
			};
			if !mergeable {
				return Err(MoveAbort);
			}
			let keep = self.geo.edges[collapsing.index()].other_vertex(survivor);
			self.collapse_edge(collapsing, keep);
			survivor = keep;
		}
	}

	/// Removes a zero-length edge, funneling everything at its dying endpoint into
	/// `keep` and dissolving any side squeezed down to two edges.
	fn collapse_edge(&mut self, edge_id: EdgeId, keep: VertexId) {
		let edge = &self.geo.edges[edge_id.index()];
		let dying = edge.other_vertex(keep);
		let flanks = [edge.left, edge.right];
		self.dead_edges[edge_id.index()] = true;
		self.dead_vertices[dying.index()] = true;

		let alive: Vec<EdgeId> = self.alive_edges().collect();
		for other in alive {
			let other = &mut self.geo.edges[other.index()];
			if other.start == dying {
				other.start = keep;
			}
			if other.end == dying {
				other.end = keep;
			}
		}

		for side in flanks.into_iter().flatten() {
			if self.dead_sides[side.index()] {
				continue;
			}
			self.geo.sides[side.index()].edges.retain(|e| *e != edge_id);
			self.geo.rebuild_side_vertices(side);
			if self.geo.sides[side.index()].edges.len() == 2 {
				self.dissolve_two_gon(side);
			}
		}

		// vertex cycles elsewhere still name the dead vertex
		let stale: Vec<SideId> = self
			.alive_sides()
			.filter(|side| self.geo.sides[side.index()].vertices.contains(&dying))
			.collect();
		for side in stale {
			self.geo.rebuild_side_vertices(side);
		}
	}

	/// A side squeezed to two parallel edges vanishes; one edge takes over both
	/// neighbors and the other dies with the side.
	fn dissolve_two_gon(&mut self, side: SideId) {
		let [keep_edge, dead_edge]: [EdgeId; 2] = self.geo.sides[side.index()].edges[..].try_into().expect("two-gon");
		let far = self.geo.edges[dead_edge.index()].other_side(side);
		if let Some(far) = far {
			for slot in self.geo.sides[far.index()].edges.iter_mut() {
				if *slot == dead_edge {
					*slot = keep_edge;
				}
			}
			self.geo.edges[keep_edge.index()].replace_side(side, far);
			self.geo.rebuild_side_vertices(far);
		}
		self.dead_edges[dead_edge.index()] = true;
		self.kill_side(side);
	}

	/// Post-move fixpoint: collapse coincident vertices, fold coplanar neighbor
	/// sides back together and dissolve collinear two-edge vertices.
	fn settle(&mut self, vertex: &mut VertexId, mergeable: bool) -> Result<(), MoveAbort> {
		for _ in 0..MAX_MOVE_ITERATIONS {
			let collapsing_edge = self.alive_edges().find(|edge| self.edge_length(*edge) < POSITION_EPSILON);
			if let Some(collapsing) = collapsing_edge {
				let edge = &self.geo.edges[collapsing.index()];
				if !mergeable && edge.has_vertex(*vertex) {
					return Err(MoveAbort);
				}
				let keep = if edge.start == *vertex { edge.end } else { edge.start };
				let dying = self.geo.edges[collapsing.index()].other_vertex(keep);
				self.collapse_edge(collapsing, keep);
				if dying == *vertex {
					*vertex = keep;
				}
				continue;
			}
			if self.merge_coplanar_once() {
				continue;
			}
			if self.dissolve_collinear_once() {
				continue;
			}
			return Ok(());
		}
		Ok(())
	}

	fn merge_coplanar_once(&mut self) -> bool {
		let candidates: Vec<EdgeId> = self.alive_edges().collect();
		for edge_id in candidates {
			let edge = &self.geo.edges[edge_id.index()];
			let (Some(left), Some(right)) = (edge.left, edge.right) else { continue };
			if left == right || self.dead_sides[left.index()] || self.dead_sides[right.index()] {
				continue;
			}
			let (Some(left_plane), Some(right_plane)) = (self.geo.side_plane(left), self.geo.side_plane(right)) else {
				continue;
			};
			if left_plane.almost_eq(&right_plane) {
				self.merge_sides(edge_id, left, right);
				return true;
			}
		}
		false
	}

	/// Folds `absorb` into `keep` across their shared edge, splicing the absorbed
	/// cycle in place of the edge. Prefers keeping a side that predates the drag so
	/// its face survives.
	fn merge_sides(&mut self, shared: EdgeId, left: SideId, right: SideId) {
		let left_born = self.born_sides.contains(&left);
		let right_born = self.born_sides.contains(&right);
		let (keep, absorb) = if left_born && !right_born { (right, left) } else { (left, right) };

		let mut absorbed = self.geo.sides[absorb.index()].edges.clone();
		let at = absorbed.iter().position(|e| *e == shared).unwrap();
		absorbed.rotate_left(at);
		absorbed.remove(0);

		for edge in &absorbed {
			self.geo.edges[edge.index()].replace_side(absorb, keep);
		}

		let keep_at = self.geo.sides[keep.index()].edges.iter().position(|e| *e == shared).unwrap();
		self.geo.sides[keep.index()].edges.splice(keep_at..=keep_at, absorbed);
		self.dead_edges[shared.index()] = true;

		// make sure the kept side still realizes a face
		if self.geo.sides[keep.index()].face.is_none() {
			self.geo.sides[keep.index()].face = self.geo.sides[absorb.index()].face.take();
		}
		self.kill_side(absorb);

		// a side that swallowed its neighbor around a spoke traverses the spoke
		// twice in a row; cut the hairpin off
		loop {
			let edges = &self.geo.sides[keep.index()].edges;
			let count = edges.len();
			let Some(i) = (0..count).find(|&i| edges[i] == edges[(i + 1) % count]) else {
				break;
			};
			let hairpin = edges[i];
			let previous = edges[(i + count - 1) % count];
			let side_id = keep;
			let anchor = self.geo.edges[previous.index()].end_vertex(side_id);
			let orphan = self.geo.edges[hairpin.index()].other_vertex(anchor);
			let edges = &mut self.geo.sides[keep.index()].edges;
			if i + 1 < edges.len() {
				edges.remove(i + 1);
				edges.remove(i);
			} else {
				edges.remove(i);
				edges.remove(0);
			}
			self.dead_edges[hairpin.index()] = true;
			if self.edges_at(orphan).is_empty() {
				self.dead_vertices[orphan.index()] = true;
			}
		}

		self.geo.rebuild_side_vertices(keep);
		self.refresh_face(keep);
	}

	/// A vertex left with exactly two collinear edges is no corner at all; the two
	/// edges fuse and the vertex goes away.
	fn dissolve_collinear_once(&mut self) -> bool {
		for index in 0..self.geo.vertices.len() {
			if self.dead_vertices[index] {
				continue;
			}
			let vertex = VertexId(index as u32);
			let edges = self.edges_at(vertex);
			let &[g, h] = edges.as_slice() else { continue };

			let before = self.geo.edges[g.index()].other_vertex(vertex);
			let after = self.geo.edges[h.index()].other_vertex(vertex);
			let incoming = (self.geo.position(vertex) - self.geo.position(before)).normalize_or_zero();
			let outgoing = (self.geo.position(after) - self.geo.position(vertex)).normalize_or_zero();
			if incoming.cross(outgoing).length() > DOT_EPSILON || incoming.dot(outgoing) <= 0. {
				continue;
			}

			let g_sides = [self.geo.edges[g.index()].left, self.geo.edges[g.index()].right];
			let h_sides = [self.geo.edges[h.index()].left, self.geo.edges[h.index()].right];
			if !(g_sides.contains(&h_sides[0]) && g_sides.contains(&h_sides[1])) {
				continue;
			}

			// stretch g over the gap and drop h and the vertex
			let g_edge = &mut self.geo.edges[g.index()];
			if g_edge.start == vertex {
				g_edge.start = after;
			} else {
				g_edge.end = after;
			}
			self.dead_edges[h.index()] = true;
			self.dead_vertices[index] = true;
			for side in g_sides.into_iter().flatten() {
				if self.dead_sides[side.index()] {
					continue;
				}
				self.geo.sides[side.index()].edges.retain(|e| *e != h);
				self.geo.rebuild_side_vertices(side);
			}
			return true;
		}
		false
	}

	/// Puts a vertex at the middle of an edge, subdividing it in both neighboring
	/// cycles. The mesh is unchanged geometrically; the new vertex is ready to move.
	fn split_edge_at_midpoint(&mut self, edge_id: EdgeId) -> VertexId {
		let edge = &self.geo.edges[edge_id.index()];
		let (start, end) = (edge.start, edge.end);
		let flanks = [edge.left, edge.right];
		let midpoint = (self.geo.position(start) + self.geo.position(end)) / 2.;

		let middle = self.new_vertex(midpoint);
		let tail = self.new_edge(Edge {
			start: middle,
			end,
			left: flanks[0],
			right: flanks[1],
		});
		self.geo.edges[edge_id.index()].end = middle;

		for side in flanks.into_iter().flatten() {
			let at = self.geo.sides[side.index()].edges.iter().position(|e| *e == edge_id).unwrap();
			let insert_at = if self.geo.edges[edge_id.index()].start_vertex(side) == start { at + 1 } else { at };
			self.geo.sides[side.index()].edges.insert(insert_at, tail);
			self.geo.rebuild_side_vertices(side);
		}
		middle
	}

	/// Replaces a side with the fan of triangles around its centroid. The first
	/// triangle carries the side's face on, the rest get copies.
	fn fan_triangulate(&mut self, side_id: SideId) -> VertexId {
		let cycle_edges = self.geo.sides[side_id.index()].edges.clone();
		let cycle_vertices = self.geo.sides[side_id.index()].vertices.clone();
		let count = cycle_edges.len();
		let centroid = cycle_vertices.iter().map(|v| self.geo.position(*v)).sum::<DVec3>() / count as f64;

		let template = self.geo.sides[side_id.index()].face.take();
		let apex = self.new_vertex(centroid);
		let spokes: Vec<EdgeId> = cycle_vertices
			.iter()
			.map(|v| {
				self.new_edge(Edge {
					start: apex,
					end: *v,
					left: None,
					right: None,
				})
			})
			.collect();

		for i in 0..count {
			let rim = cycle_edges[i];
			let inward = spokes[(i + 1) % count];
			let outward = spokes[i];
			let triangle = self.new_side(
				Side {
					edges: vec![rim, inward, outward],
					vertices: vec![cycle_vertices[i], cycle_vertices[(i + 1) % count], apex],
					face: template.clone(),
				},
				i != 0,
			);
			self.geo.edges[rim.index()].replace_side(side_id, triangle);
			self.geo.edges[inward.index()].left = Some(triangle);
			self.geo.edges[outward.index()].right = Some(triangle);
			self.refresh_face(triangle);
		}

		self.kill_side(side_id);
		apex
	}
}
