//! Cutting a brush geometry by a new half-space: the incremental CSG step that
//! turns a list of faces into a convex polyhedron.

use tracing::{trace, warn};

use super::{BrushGeometry, Edge, EdgeId, Side, SideId, VertexId};
use crate::face::Face;
use crate::math::{Plane, PointStatus, snap};

/// What a cut did to the geometry. `Redundant` and `Nullified` hand the face back
/// untouched; `Split` consumed it into the new side.
#[derive(Debug, PartialEq)]
pub enum CutOutcome {
	/// The half-space contains the whole polyhedron; nothing was cut.
	Redundant(Face),
	/// The half-space excludes the whole polyhedron; the cut would empty it.
	Nullified(Face),
	/// The polyhedron was cut and the face is now realized by a side.
	Split,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VertexMark {
	Keep,
	Drop,
	Undecided,
	New,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeMark {
	Keep,
	Drop,
	Split,
	Undecided,
	New,
}

/// What [BrushGeometry::split_side] decided for one side.
enum SideDisposition {
	Keep,
	/// Kept, but one edge lies in the cut plane and becomes part of the seam.
	Seam(EdgeId),
	Drop,
	/// Cut in two; the returned edge is the freshly spliced seam edge.
	Split(EdgeId),
}

/// Marks an edge from the marks of its endpoints.
fn edge_mark(start: VertexMark, end: VertexMark) -> EdgeMark {
	let mut keep = 0;
	let mut drop = 0;
	for mark in [start, end] {
		match mark {
			VertexMark::Keep => keep += 1,
			VertexMark::Drop => drop += 1,
			VertexMark::Undecided | VertexMark::New => {}
		}
	}
	if keep == 1 && drop == 1 {
		EdgeMark::Split
	} else if keep > 0 {
		EdgeMark::Keep
	} else if drop > 0 {
		EdgeMark::Drop
	} else {
		EdgeMark::Undecided
	}
}

impl BrushGeometry {
	/// Cuts the polyhedron by `face`'s half-space, keeping the material below the
	/// boundary. Faces whose sides vanish are moved into `dropped_faces`; the caller
	/// owns them. On [CutOutcome::Split] the mesh has a new side realizing `face`.
	pub fn add_face(&mut self, face: Face, dropped_faces: &mut Vec<Face>) -> CutOutcome {
		let boundary = face.boundary();

		// classify every vertex against the new boundary
		let mut keep = 0;
		let mut drop = 0;
		let mut vertex_marks: Vec<VertexMark> = self
			.vertices
			.iter()
			.map(|vertex| match boundary.status(vertex.position) {
				PointStatus::Above => {
					drop += 1;
					VertexMark::Drop
				}
				PointStatus::Below => {
					keep += 1;
					VertexMark::Keep
				}
				PointStatus::Inside => VertexMark::Undecided,
			})
			.collect();

		if drop == 0 {
			trace!("cut is redundant");
			return CutOutcome::Redundant(face);
		}
		if keep == 0 {
			warn!("cut nullifies the brush");
			return CutOutcome::Nullified(face);
		}

		// mark every edge, splitting the ones that cross the boundary
		let mut edge_marks: Vec<EdgeMark> = self
			.edges
			.iter()
			.map(|edge| edge_mark(vertex_marks[edge.start.index()], vertex_marks[edge.end.index()]))
			.collect();
		for index in 0..self.edges.len() {
			if edge_marks[index] == EdgeMark::Split {
				self.split_edge(EdgeId(index as u32), &boundary, &mut vertex_marks);
			}
		}

		// split, keep or drop each side, collecting the seam edges of the cut
		let mut seam_edges: Vec<EdgeId> = Vec::new();
		let mut dead_sides = vec![false; self.sides.len()];
		for index in 0..self.sides.len() {
			let side_id = SideId(index as u32);
			match self.split_side(side_id, &vertex_marks, &mut edge_marks) {
				SideDisposition::Keep => {}
				SideDisposition::Drop => {
					dead_sides[index] = true;
					if let Some(dead) = self.sides[index].face.take() {
						dropped_faces.push(dead);
					}
				}
				SideDisposition::Split(seam) => seam_edges.push(seam),
				SideDisposition::Seam(seam) => {
					// an existing edge in the cut plane: flip it so the surviving side
					// stays on its right and the new side can claim its left
					if self.edges[seam.index()].right != Some(side_id) {
						self.edges[seam.index()].flip();
					}
					seam_edges.push(seam);
				}
			}
		}

		// chain the seam edges head to tail into the polygon of the new side
		for i in 0..seam_edges.len().saturating_sub(1) {
			let tail = self.edges[seam_edges[i].index()].start;
			for j in i + 2..seam_edges.len() {
				if self.edges[seam_edges[j].index()].end == tail {
					seam_edges.swap(i + 1, j);
				}
			}
		}

		let new_side = SideId(self.sides.len() as u32);
		for &seam in &seam_edges {
			self.edges[seam.index()].left = Some(new_side);
		}
		self.sides.push(Side {
			edges: seam_edges,
			vertices: Vec::new(),
			face: Some(face),
		});
		self.rebuild_side_vertices(new_side);
		dead_sides.push(false);

		// sweep out everything the cut dropped
		let dead_vertices: Vec<bool> = vertex_marks.iter().map(|mark| *mark == VertexMark::Drop).collect();
		let dead_edges: Vec<bool> = edge_marks.iter().map(|mark| *mark == EdgeMark::Drop).collect();
		self.sweep(&dead_vertices, &dead_edges, &dead_sides);

		// the seam vertices were snapped, so re-derive every bound face from its polygon
		for index in 0..self.sides.len() {
			let polygon = self.side_polygon(index);
			if let Some(face) = self.sides[index].face.as_mut() {
				face.update_points(&polygon);
			}
		}

		self.recompute_bounds();
		CutOutcome::Split
	}

	/// Cuts by every face in order. Returns `false` if any cut would empty the
	/// polyhedron; the caller discards the whole batch in that case. Redundant
	/// faces are dropped silently.
	pub fn add_faces(&mut self, faces: impl IntoIterator<Item = Face>, dropped_faces: &mut Vec<Face>) -> bool {
		for face in faces {
			if let CutOutcome::Nullified(_) = self.add_face(face, dropped_faces) {
				return false;
			}
		}
		true
	}

	/// Splits an edge crossing the cut plane: the intersection becomes a new vertex
	/// (snapped to the grid) replacing the dropped endpoint.
	fn split_edge(&mut self, edge_id: EdgeId, boundary: &Plane, vertex_marks: &mut Vec<VertexMark>) -> VertexId {
		let edge = &self.edges[edge_id.index()];
		let start = self.vertices[edge.start.index()].position;
		let end = self.vertices[edge.end.index()].position;
		let direction = end - start;
		let distance = boundary.intersect_line(start, direction).unwrap_or(0.5);
		let position = snap(start + direction * distance);

		self.vertices.push(super::Vertex { position });
		let new_vertex = VertexId(self.vertices.len() as u32 - 1);
		vertex_marks.push(VertexMark::New);

		let edge = &mut self.edges[edge_id.index()];
		if vertex_marks[edge.start.index()] == VertexMark::Drop {
			edge.start = new_vertex;
		} else {
			edge.end = new_vertex;
		}
		new_vertex
	}

	/// Walks a side's edge cycle once and decides its fate under the cut. A side
	/// with both kept and dropped edges has exactly one contiguous dropped arc; it
	/// is spliced out and bridged by a new seam edge.
	fn split_side(&mut self, side_id: SideId, vertex_marks: &[VertexMark], edge_marks: &mut Vec<EdgeMark>) -> SideDisposition {
		let side = &self.sides[side_id.index()];
		let count = side.edges.len();

		let mut keep = 0;
		let mut drop = 0;
		let mut undecided = 0;
		let mut undecided_edge = None;
		let mut split_index1 = None;
		let mut split_index2 = None;

		let mut last_mark = edge_marks[side.edges[count - 1].index()];
		for (i, &edge_id) in side.edges.iter().enumerate() {
			let mark = edge_marks[edge_id.index()];
			match mark {
				EdgeMark::Split => {
					let start = self.edges[edge_id.index()].start_vertex(side_id);
					if vertex_marks[start.index()] == VertexMark::Keep {
						split_index1 = Some(i);
					} else {
						split_index2 = Some(i);
					}
				}
				EdgeMark::Undecided => {
					undecided += 1;
					undecided_edge = Some(edge_id);
				}
				EdgeMark::Keep => {
					if last_mark == EdgeMark::Drop {
						split_index2 = Some(i);
					}
					keep += 1;
				}
				EdgeMark::Drop => {
					if last_mark == EdgeMark::Keep {
						split_index1 = Some(if i > 0 { i - 1 } else { count - 1 });
					}
					drop += 1;
				}
				EdgeMark::New => {}
			}
			last_mark = mark;
		}

		if keep == count {
			return SideDisposition::Keep;
		}
		if undecided == 1 && keep == count - 1 {
			return SideDisposition::Seam(undecided_edge.unwrap());
		}
		if drop + undecided == count {
			return SideDisposition::Drop;
		}

		let index1 = split_index1.expect("cut arc has a kept end");
		let index2 = split_index2.expect("cut arc has a dropped end");

		let start = self.edges[side.edges[index1].index()].end_vertex(side_id);
		let end = self.edges[side.edges[index2].index()].start_vertex(side_id);
		self.edges.push(Edge {
			start,
			end,
			left: None,
			right: Some(side_id),
		});
		edge_marks.push(EdgeMark::New);
		let seam = EdgeId(self.edges.len() as u32 - 1);

		self.replace_edges(side_id, index1, index2, seam);
		SideDisposition::Split(seam)
	}

	/// Splices `seam` into a side's cycle in place of the dropped arc strictly
	/// between `index1` and `index2`.
	fn replace_edges(&mut self, side_id: SideId, index1: usize, index2: usize, seam: EdgeId) {
		let edges = &self.sides[side_id.index()].edges;
		let mut replacement = Vec::with_capacity(edges.len());
		if index2 > index1 {
			replacement.extend_from_slice(&edges[..=index1]);
			replacement.push(seam);
			replacement.extend_from_slice(&edges[index2..]);
		} else {
			replacement.extend_from_slice(&edges[index2..=index1]);
			replacement.push(seam);
		}
		self.sides[side_id.index()].edges = replacement;
		self.rebuild_side_vertices(side_id);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::math::Bounds;
	use glam::dvec3;

	fn cube() -> BrushGeometry {
		BrushGeometry::new(Bounds::new(dvec3(0., 0., 0.), dvec3(64., 64., 64.)))
	}

	/// The half-space below z = 32, outward normal +Z.
	fn halving_face() -> Face {
		Face::new(dvec3(0., 0., 32.), dvec3(0., 64., 32.), dvec3(64., 0., 32.)).unwrap()
	}

	#[test]
	fn cut_splits_the_cube() {
		let mut cube = cube();
		let mut dropped = Vec::new();
		assert_eq!(cube.add_face(halving_face(), &mut dropped), CutOutcome::Split);

		cube.validate().unwrap();
		assert!(dropped.is_empty(), "the seed top has no face to drop");
		assert_eq!(cube.vertex_count(), 8);
		assert_eq!(cube.edge_count(), 12);
		assert_eq!(cube.side_count(), 6);
		assert_eq!(cube.bounds(), Bounds::new(dvec3(0., 0., 0.), dvec3(64., 64., 32.)));
		assert!(cube.vertex_positions().all(|p| p.z <= 32.));
	}

	#[test]
	fn repeated_cut_is_redundant() {
		let mut cube = cube();
		let mut dropped = Vec::new();
		assert_eq!(cube.add_face(halving_face(), &mut dropped), CutOutcome::Split);
		let snapshot = cube.clone();

		match cube.add_face(halving_face(), &mut dropped) {
			CutOutcome::Redundant(face) => assert_eq!(face.normal(), dvec3(0., 0., 1.)),
			other => panic!("expected a redundant cut, got {other:?}"),
		}
		assert_eq!(cube, snapshot);
		assert!(dropped.is_empty());
	}

	#[test]
	fn cut_below_the_brush_nullifies() {
		let mut cube = cube();
		let mut dropped = Vec::new();
		let below = Face::new(dvec3(0., 0., -10.), dvec3(0., 64., -10.), dvec3(64., 0., -10.)).unwrap();
		assert!(matches!(cube.add_face(below, &mut dropped), CutOutcome::Nullified(_)));
		assert!(dropped.is_empty());
	}

	#[test]
	fn cut_reports_dropped_faces() {
		let mut cube = cube();
		let mut dropped = Vec::new();
		assert_eq!(cube.add_face(halving_face(), &mut dropped), CutOutcome::Split);

		// cut again above the first: the z = 32 face is beheaded and comes back
		let lower = Face::new(dvec3(0., 0., 16.), dvec3(0., 64., 16.), dvec3(64., 0., 16.)).unwrap();
		assert_eq!(cube.add_face(lower, &mut dropped), CutOutcome::Split);
		cube.validate().unwrap();
		assert_eq!(dropped.len(), 1);
		assert_eq!(dropped[0].normal(), dvec3(0., 0., 1.));
		assert_eq!(cube.bounds().max.z, 16.);
	}

	#[test]
	fn corner_cut_keeps_euler_characteristic() {
		let mut cube = cube();
		let mut dropped = Vec::new();
		// chop the (64, 64, 64) corner
		let chamfer = Face::new(dvec3(64., 64., 32.), dvec3(64., 32., 64.), dvec3(32., 64., 64.)).unwrap();
		assert_eq!(cube.add_face(chamfer, &mut dropped), CutOutcome::Split);

		cube.validate().unwrap();
		assert_eq!(cube.vertex_count(), 10);
		assert_eq!(cube.side_count(), 7);
		assert_eq!(cube.edge_count(), 15);
		let euler = cube.vertex_count() as isize - cube.edge_count() as isize + cube.side_count() as isize;
		assert_eq!(euler, 2);
	}

	#[test]
	fn cut_through_an_edge_reuses_it_as_seam() {
		let mut cube = cube();
		let mut dropped = Vec::new();
		// plane through the top-front edge, leaning back: drops the top-back arc
		let wedge = Face::new(dvec3(0., 0., 64.), dvec3(0., 64., 0.), dvec3(64., 0., 64.)).unwrap();
		assert_eq!(cube.add_face(wedge, &mut dropped), CutOutcome::Split);
		cube.validate().unwrap();
		assert_eq!(cube.vertex_count(), 6);
		assert_eq!(cube.side_count(), 5);
		assert_eq!(cube.edge_count(), 9);
	}

	#[test]
	fn add_faces_rejects_a_nullifying_batch() {
		let mut cube = cube();
		let mut dropped = Vec::new();
		let ok = Face::new(dvec3(0., 0., 32.), dvec3(0., 64., 32.), dvec3(64., 0., 32.)).unwrap();
		let bad = Face::new(dvec3(0., 0., -10.), dvec3(0., 64., -10.), dvec3(64., 0., -10.)).unwrap();
		assert!(!cube.add_faces([ok, bad], &mut dropped));
	}
}
