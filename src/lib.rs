//! Multi-pass texture baking over shading node graphs: material isolation,
//! a bake sequencer with full scene restoration, and image delivery.

pub mod background;
pub mod bake;
pub mod channel;
pub mod error;
pub mod graph;
pub mod imaging;
pub mod material_prep;
pub mod scene;
pub mod scene_prep;
pub mod schema;
pub mod settings;
pub mod validation;
