use thiserror::Error;

use crate::channel::Channel;

/// Pre-flight problems the user has to fix. Carries every diagnostic found.
#[derive(Debug, Error)]
#[error("bake refused, {} problem(s) found:\n{}", .diagnostics.len(), .diagnostics.join("\n"))]
pub struct ValidationError {
    pub diagnostics: Vec<String>,
}

/// A single material/channel combination that could not be isolated. The
/// sequencer skips it and keeps going.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("material '{material}' has no node-graph output")]
    NoOutput { material: String },
    #[error("material '{material}' has an unsupported shader layout for channel {channel}")]
    InvalidArchetype { material: String, channel: Channel },
    #[error("material '{material}': socket '{socket}' not found on principled node for channel {channel}")]
    MissingSocket {
        material: String,
        socket: String,
        channel: Channel,
    },
    #[error("material '{material}': mix shader tree contains a cycle")]
    Cycle { material: String },
    #[error("material '{material}': mix shader tree deeper than {limit}")]
    TooDeep { material: String, limit: usize },
    #[error("material '{material}': {message}")]
    Graph { material: String, message: String },
}

/// Failures reported by the host bake primitive.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("no active image texture node in material '{material}'")]
    NoActiveImage { material: String },
    #[error("image '{image}' bound in material '{material}' does not exist")]
    MissingImage { material: String, image: String },
    #[error("object '{object}' has no uv map to bake into")]
    NoUvMap { object: String },
    #[error("bake pass {pass} is not supported by this host")]
    UnsupportedPass { pass: String },
    #[error("bake failed: {0}")]
    Failed(String),
}
