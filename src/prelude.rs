pub use crate::brush::{Brush, BrushError};
pub use crate::entity::{Entity, EntityError};
pub use crate::face::{Face, FaceError};
pub use crate::geometry::{BrushGeometry, CutOutcome, GeometryError, MoveResult};
pub use crate::math::{Axis, Bounds, Plane, PointStatus};
pub use crate::texture::{Texture, TextureRef};

pub use glam::{DQuat, DVec2, DVec3, dvec2, dvec3};
