//! The reconstruction engine: loads entities recorded by a scan, rebuilds
//! the directory tree, adopts orphans, and either writes fresh metadata or
//! extracts file contents.

pub mod engine;
pub mod metadata;
pub mod session;

pub use engine::{ExtractionReport, LoadStats, ReconstructionEngine};
pub use metadata::MetadataImage;
pub use session::SessionState;
