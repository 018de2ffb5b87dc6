use serde::Serialize;

use crate::color::AnsiColor;

/// A serializable point-in-time copy of a node and its subtree.
///
/// Each level is captured under that node's own lock, so siblings in one
/// snapshot may have been read at slightly different instants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSnapshot {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<AnsiColor>,
    pub running: bool,
    pub duration_ms: u64,
    pub description: Vec<String>,
    pub children: Vec<NodeSnapshot>,
}
