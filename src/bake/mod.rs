//! Bake orchestration: the host primitive seam, the per-invocation session
//! and the reference CPU host.

pub mod color_id;
pub mod cpu_host;
pub mod eval;
pub mod geometry;
pub mod operation;
pub mod progress;
pub mod session;

use crate::{channel::BakePass, error::HostError, imaging::ImageStore, scene::Scene};

pub use cpu_host::CpuBakeHost;
pub use operation::BakeOperation;
pub use session::{BakeOutcome, BakeSession, planned_modes, run_bake};

/// One call of the host bake primitive.
#[derive(Debug, Clone, PartialEq)]
pub struct BakeRequest {
    pub pass: BakePass,
    /// Objects receiving pixels. Each triangle writes into the image bound
    /// to the active node of its material.
    pub objects: Vec<String>,
    /// High-poly sources for selected-to-active; empty otherwise.
    pub sources: Vec<String>,
    pub selected_to_active: bool,
    pub cage_extrusion: f32,
    /// 0 means unlimited.
    pub max_ray_distance: f32,
    pub margin: u32,
}

impl BakeRequest {
    /// Request for `objects` with the pass and ray settings the scene's bake
    /// toggles currently hold.
    pub fn from_scene(scene: &Scene, objects: Vec<String>, sources: Vec<String>) -> Self {
        let t = &scene.render.bake;
        Self {
            pass: t.bake_type,
            objects,
            sources,
            selected_to_active: t.use_selected_to_active,
            cage_extrusion: t.cage_extrusion,
            max_ray_distance: t.max_ray_distance,
            margin: t.margin,
        }
    }
}

/// The host's bake-to-texture primitive. Implementations write into the
/// images already present in `images`; they never create or remove any.
pub trait BakeHost {
    fn bake(&mut self, scene: &Scene, request: &BakeRequest, images: &mut ImageStore) -> Result<(), HostError>;
}
