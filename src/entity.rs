//! Map entities as the geometry engine sees them: a property bag that owns zero or
//! more brushes and keeps a bounding box over them.

use std::cell::Cell;
use std::collections::HashMap;

use glam::{DQuat, DVec3, dvec3};
use thiserror::Error;

use crate::brush::Brush;
use crate::math::{Axis, Bounds};

/// Half-extent of the box drawn around a point entity (one with no brushes).
const POINT_ENTITY_SIZE: f64 = 8.;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EntityError {
	#[error("required property `{property}` not found")]
	RequiredPropertyNotFound { property: String },
	#[error("property `{property}` is not a valid {required_type}: `{value}`")]
	PropertyParseError {
		property: String,
		required_type: &'static str,
		value: String,
	},
}

/// An entity: key/value properties plus the brushes it owns. Brush mutations go
/// through the entity (or are followed by [Entity::brush_changed]) so the cached
/// bounds stay honest.
#[derive(Debug, Default)]
pub struct Entity {
	properties: HashMap<String, String>,
	brushes: Vec<Brush>,
	cached_bounds: Cell<Option<Bounds>>,
}

impl Entity {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_properties(properties: HashMap<String, String>) -> Self {
		Self {
			properties,
			..Self::default()
		}
	}

	pub fn properties(&self) -> &HashMap<String, String> {
		&self.properties
	}

	pub fn property(&self, key: &str) -> Option<&str> {
		self.properties.get(key).map(String::as_str)
	}

	pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
		self.properties.insert(key.into(), value.into());
		self.cached_bounds.set(None);
	}

	/// The classname every valid entity carries.
	pub fn classname(&self) -> Result<&str, EntityError> {
		self.property("classname").ok_or_else(|| EntityError::RequiredPropertyNotFound {
			property: "classname".into(),
		})
	}

	pub fn worldspawn(&self) -> bool {
		self.classname() == Ok("worldspawn")
	}

	/// The entity origin. Missing means the world origin; a malformed value is an
	/// error so the caller can report the broken map.
	pub fn origin(&self) -> Result<DVec3, EntityError> {
		let Some(value) = self.property("origin") else {
			return Ok(DVec3::ZERO);
		};
		let parsed: Vec<f64> = value.split_ascii_whitespace().filter_map(|part| part.parse().ok()).collect();
		match parsed[..] {
			[x, y, z] => Ok(dvec3(x, y, z)),
			_ => Err(EntityError::PropertyParseError {
				property: "origin".into(),
				required_type: "vector",
				value: value.into(),
			}),
		}
	}

	fn set_origin(&mut self, origin: DVec3) {
		self.set_property("origin", format!("{} {} {}", origin.x, origin.y, origin.z));
	}

	pub fn brushes(&self) -> &[Brush] {
		&self.brushes
	}

	pub fn add_brush(&mut self, brush: Brush) {
		self.brushes.push(brush);
		self.cached_bounds.set(None);
	}

	pub fn remove_brush(&mut self, index: usize) -> Brush {
		self.cached_bounds.set(None);
		self.brushes.remove(index)
	}

	/// Mutable access to one brush. The bounds cache is dropped up front; callers
	/// that mutate through other paths must call [Entity::brush_changed] themselves.
	pub fn brush_mut(&mut self, index: usize) -> &mut Brush {
		self.cached_bounds.set(None);
		&mut self.brushes[index]
	}

	/// A brush of this entity changed shape; forget the cached bounds.
	pub fn brush_changed(&self) {
		self.cached_bounds.set(None);
	}

	/// The bounds of all owned brushes, or a small box around the origin for a
	/// point entity.
	pub fn bounds(&self) -> Bounds {
		if let Some(bounds) = self.cached_bounds.get() {
			return bounds;
		}
		let bounds = match self.brushes.split_first() {
			Some((first, rest)) => {
				let mut bounds = first.bounds();
				for brush in rest {
					bounds.merge_point(brush.bounds().min);
					bounds.merge_point(brush.bounds().max);
				}
				bounds
			}
			None => {
				let origin = self.origin().unwrap_or(DVec3::ZERO);
				Bounds::new(origin - DVec3::splat(POINT_ENTITY_SIZE), origin + DVec3::splat(POINT_ENTITY_SIZE))
			}
		};
		self.cached_bounds.set(Some(bounds));
		bounds
	}

	pub fn translate(&mut self, delta: DVec3, lock_textures: bool) {
		for brush in &mut self.brushes {
			brush.translate(delta, lock_textures);
		}
		if let Ok(origin) = self.origin() {
			if self.property("origin").is_some() {
				self.set_origin(origin + delta);
			}
		}
		self.cached_bounds.set(None);
	}

	pub fn rotate_90_cw(&mut self, axis: Axis, center: DVec3, lock_textures: bool) {
		for brush in &mut self.brushes {
			brush.rotate_90_cw(axis, center, lock_textures);
		}
		self.transform_origin(|origin| center + axis.rotation_90_cw() * (origin - center));
	}

	pub fn rotate_90_ccw(&mut self, axis: Axis, center: DVec3, lock_textures: bool) {
		for brush in &mut self.brushes {
			brush.rotate_90_ccw(axis, center, lock_textures);
		}
		self.transform_origin(|origin| center + axis.rotation_90_ccw() * (origin - center));
	}

	pub fn rotate(&mut self, rotation: DQuat, center: DVec3, lock_textures: bool) {
		for brush in &mut self.brushes {
			brush.rotate(rotation, center, lock_textures);
		}
		self.transform_origin(|origin| center + rotation * (origin - center));
	}

	pub fn flip(&mut self, axis: Axis, center: DVec3, lock_textures: bool) {
		for brush in &mut self.brushes {
			brush.flip(axis, center, lock_textures);
		}
		self.transform_origin(|origin| center + axis.mirror() * (origin - center));
	}

	fn transform_origin(&mut self, transform: impl Fn(DVec3) -> DVec3) {
		if self.property("origin").is_some() {
			if let Ok(origin) = self.origin() {
				self.set_origin(transform(origin));
			}
		}
		self.cached_bounds.set(None);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn property_access() {
		let mut entity = Entity::new();
		assert_eq!(
			entity.classname(),
			Err(EntityError::RequiredPropertyNotFound {
				property: "classname".into()
			})
		);

		entity.set_property("classname", "worldspawn");
		assert_eq!(entity.classname(), Ok("worldspawn"));
		assert!(entity.worldspawn());

		entity.set_property("origin", "16 -32 48");
		assert_eq!(entity.origin(), Ok(dvec3(16., -32., 48.)));

		entity.set_property("origin", "not a vector");
		assert!(matches!(entity.origin(), Err(EntityError::PropertyParseError { .. })));
	}

	#[test]
	fn point_entities_get_a_default_box() {
		let mut entity = Entity::new();
		entity.set_property("origin", "100 0 0");
		assert_eq!(entity.bounds(), Bounds::new(dvec3(92., -8., -8.), dvec3(108., 8., 8.)));
	}

	#[test]
	fn bounds_cover_all_brushes() {
		let world = Bounds::new(dvec3(-4096., -4096., -4096.), dvec3(4096., 4096., 4096.));
		let mut entity = Entity::new();
		entity.add_brush(Brush::from_bounds(world, Bounds::new(dvec3(0., 0., 0.), dvec3(64., 64., 64.)), None).unwrap());
		entity.add_brush(Brush::from_bounds(world, Bounds::new(dvec3(128., 0., 0.), dvec3(160., 32., 32.)), None).unwrap());
		assert_eq!(entity.bounds(), Bounds::new(dvec3(0., 0., 0.), dvec3(160., 64., 64.)));
	}

	#[test]
	fn translation_moves_brushes_and_origin() {
		let world = Bounds::new(dvec3(-4096., -4096., -4096.), dvec3(4096., 4096., 4096.));
		let mut entity = Entity::new();
		entity.set_property("origin", "32 32 32");
		entity.add_brush(Brush::from_bounds(world, Bounds::new(dvec3(0., 0., 0.), dvec3(64., 64., 64.)), None).unwrap());

		entity.translate(dvec3(64., 0., 0.), false);
		assert_eq!(entity.origin(), Ok(dvec3(96., 32., 32.)));
		assert_eq!(entity.bounds(), Bounds::new(dvec3(64., 0., 0.), dvec3(128., 64., 64.)));
	}

	#[test]
	fn mutating_a_brush_refreshes_bounds() {
		let world = Bounds::new(dvec3(-4096., -4096., -4096.), dvec3(4096., 4096., 4096.));
		let mut entity = Entity::new();
		entity.add_brush(Brush::from_bounds(world, Bounds::new(dvec3(0., 0., 0.), dvec3(64., 64., 64.)), None).unwrap());
		assert_eq!(entity.bounds().max.x, 64.);

		entity.brush_mut(0).translate(dvec3(16., 0., 0.), false);
		assert_eq!(entity.bounds().max.x, 80.);
	}
}
