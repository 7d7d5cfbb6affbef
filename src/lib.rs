#![doc = include_str!("../readme.md")]

pub mod brush;
pub mod entity;
pub mod face;
pub mod geometry;
pub mod math;
pub mod prelude;
pub mod texture;

// Re-exports
pub use glam;
