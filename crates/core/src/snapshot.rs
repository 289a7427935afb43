//! JSON snapshots of a graph.
//!
//! A snapshot is a JSON array of primitives in any order. Every structural
//! reference must name a primitive in the same snapshot.

use std::path::Path;

use tracing::{debug, info};

use crate::errors::SnapshotError;
use crate::graph::Graph;
use crate::primitive::Primitive;

pub fn from_json_str(json: &str) -> Result<Graph, SnapshotError> {
    let primitives: Vec<Primitive> = serde_json::from_str(json)?;
    Ok(Graph::from_primitives(primitives)?)
}

pub fn to_json_string(graph: &Graph, pretty: bool) -> Result<String, SnapshotError> {
    let primitives: Vec<&Primitive> = graph.iter().collect();
    let json = if pretty {
        serde_json::to_string_pretty(&primitives)?
    } else {
        serde_json::to_string(&primitives)?
    };
    Ok(json)
}

/// Read a graph from a snapshot file.
pub fn load_graph<P: AsRef<Path>>(path: P) -> Result<Graph, SnapshotError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(SnapshotError::FileNotFound(path.display().to_string()));
    }
    let contents = std::fs::read_to_string(path)?;
    let graph = from_json_str(&contents)?;
    info!(path = %path.display(), objects = graph.len(), "loaded snapshot");
    Ok(graph)
}

/// Write a graph to a snapshot file.
pub fn save_graph<P: AsRef<Path>>(graph: &Graph, path: P, pretty: bool) -> Result<(), SnapshotError> {
    let path = path.as_ref();
    let json = to_json_string(graph, pretty)?;
    std::fs::write(path, json)?;
    debug!(path = %path.display(), objects = graph.len(), "wrote snapshot");
    Ok(())
}
