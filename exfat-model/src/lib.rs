//! The reconstructed entity tree: types and the session arena that holds
//! every entity found during a recovery pass, independent of how each entity
//! was discovered.

pub mod arena;
pub mod entity;

pub use arena::{EntityArena, ROOT_OFFSET};
pub use entity::{DirectoryData, Entity, EntityMeta, FileData, MAX_CHILDREN};
