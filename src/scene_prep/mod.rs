//! Scene-side preparation around a bake: restoring what the sequencer
//! changed, export copies and mesh export.

pub mod export_copies;
pub mod obj_export;
pub mod restore;

pub use export_copies::{CopyRequest, prepare_export_copies};
pub use restore::restore_original_materials;
