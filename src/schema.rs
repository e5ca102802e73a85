use std::{collections::HashMap, sync::OnceLock};

use anyhow::{Result, anyhow};
use serde::Deserialize;

use crate::graph::{NodeGraph, NodeKind, SocketValue};

const DEFAULT_NODE_SCHEME_JSON: &str = include_str!("../assets/node-scheme.json");

#[derive(Debug, Clone)]
pub struct NodeScheme {
    pub nodes: HashMap<String, NodeTypeScheme>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortType {
    Float,
    Color,
    Vector,
    Shader,
    Any,
}

#[derive(Debug, Clone)]
pub struct PortScheme {
    pub ty: PortType,
    pub default: Option<SocketValue>,
}

#[derive(Debug, Clone)]
pub struct NodeTypeScheme {
    pub category: Option<String>,
    pub inputs: Vec<(String, PortScheme)>,
    pub outputs: Vec<(String, PortType)>,
    pub default_params: HashMap<String, serde_json::Value>,
}

impl NodeTypeScheme {
    pub fn input(&self, socket: &str) -> Option<&PortScheme> {
        self.inputs
            .iter()
            .find(|(id, _)| id == socket)
            .map(|(_, p)| p)
    }

    pub fn output(&self, socket: &str) -> Option<PortType> {
        self.outputs
            .iter()
            .find(|(id, _)| id == socket)
            .map(|(_, t)| *t)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawNodeScheme {
    #[serde(rename = "schemaVersion")]
    #[allow(dead_code)]
    schema_version: u32,
    #[serde(default)]
    nodes: Vec<RawNodeDef>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawNodeDef {
    #[serde(rename = "type")]
    node_type: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    inputs: Vec<RawPort>,
    #[serde(default)]
    outputs: Vec<RawPort>,
    #[serde(rename = "defaultParams", default)]
    default_params: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawPort {
    id: String,
    #[serde(rename = "type")]
    port_type: PortType,
    #[serde(default)]
    default: Option<SocketValue>,
}

pub fn parse_scheme(json: &str) -> Result<NodeScheme> {
    let raw: RawNodeScheme = serde_json::from_str(json)
        .map_err(|e| anyhow!("failed to parse node scheme: {e}"))?;
    let nodes = raw
        .nodes
        .into_iter()
        .map(|n| {
            let inputs = n
                .inputs
                .into_iter()
                .map(|p| {
                    (
                        p.id,
                        PortScheme {
                            ty: p.port_type,
                            default: p.default,
                        },
                    )
                })
                .collect();
            let outputs = n.outputs.into_iter().map(|p| (p.id, p.port_type)).collect();
            (
                n.node_type,
                NodeTypeScheme {
                    category: n.category,
                    inputs,
                    outputs,
                    default_params: n.default_params,
                },
            )
        })
        .collect();
    Ok(NodeScheme { nodes })
}

/// The bundled scheme, parsed once per process.
pub fn load_default_scheme() -> Result<&'static NodeScheme> {
    static SCHEME: OnceLock<Result<NodeScheme, String>> = OnceLock::new();
    SCHEME
        .get_or_init(|| {
            parse_scheme(DEFAULT_NODE_SCHEME_JSON).map_err(|e| format!("assets/node-scheme.json: {e:#}"))
        })
        .as_ref()
        .map_err(|e| anyhow!("{e}"))
}

impl NodeScheme {
    pub fn node_type(&self, kind: NodeKind) -> Option<&NodeTypeScheme> {
        self.nodes.get(kind.type_name())
    }

    pub fn input_default(&self, kind: NodeKind, socket: &str) -> Option<SocketValue> {
        self.node_type(kind)?.input(socket)?.default
    }

    pub fn input_type(&self, kind: NodeKind, socket: &str) -> Option<PortType> {
        Some(self.node_type(kind)?.input(socket)?.ty)
    }
}

/// Fill every missing input default and param from the scheme, keeping values
/// the author wrote explicitly.
pub fn normalize_graph_defaults(graph: &mut NodeGraph, scheme: &NodeScheme) {
    let ids: Vec<_> = graph.nodes().map(|(id, _)| id).collect();
    for id in ids {
        let Some(node) = graph.node_mut(id) else {
            continue;
        };
        let Some(node_scheme) = scheme.node_type(node.kind) else {
            continue;
        };
        for (socket, port) in &node_scheme.inputs {
            if let Some(default) = port.default {
                node.inputs.entry(socket.clone()).or_insert(default);
            }
        }
        for (k, v) in &node_scheme.default_params {
            node.params.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
}
