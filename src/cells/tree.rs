use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use super::Cell;

/// Opaque unique cell identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId(String);

impl CellId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CellId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity, links and lifecycle of one cell
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellNode {
    pub id: CellId,
    pub role: String,
    pub input: String,
    pub output: Option<String>,
    /// Non-owning back reference
    pub parent: Option<CellId>,
    /// Insertion ordered, never shrinks
    pub children: Vec<CellId>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CellNode {
    pub fn new(role: impl Into<String>, input: impl Into<String>, parent: Option<CellId>) -> Self {
        Self {
            id: CellId::new(),
            role: role.into(),
            input: input.into(),
            output: None,
            parent,
            children: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn is_director(&self) -> bool {
        self.role == "Director"
    }
}

/// Arena of every cell ever created, in creation order. Behaviours live
/// beside the nodes so a running cell can be taken out while it borrows
/// the rest of the engine.
#[derive(Default)]
pub struct CellTree {
    nodes: HashMap<CellId, CellNode>,
    behaviors: HashMap<CellId, Box<dyn Cell>>,
    order: Vec<CellId>,
}

impl CellTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, linking it under its parent when it has one
    pub fn insert(&mut self, node: CellNode, behavior: Box<dyn Cell>) -> CellId {
        let id = node.id.clone();
        if let Some(parent) = node.parent.as_ref().and_then(|p| self.nodes.get_mut(p)) {
            parent.children.push(id.clone());
        }
        self.behaviors.insert(id.clone(), behavior);
        self.nodes.insert(id.clone(), node);
        self.order.push(id.clone());
        id
    }

    pub fn get(&self, id: &CellId) -> Option<&CellNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn order(&self) -> &[CellId] {
        &self.order
    }

    /// Ids created after `mark` (a previous `len()`)
    pub fn spawned_since(&self, mark: usize) -> Vec<CellId> {
        self.order.get(mark..).map(|s| s.to_vec()).unwrap_or_default()
    }

    pub fn children(&self, id: &CellId) -> &[CellId] {
        self.nodes
            .get(id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_completed(&self, id: &CellId) -> bool {
        self.nodes.get(id).is_some_and(|n| n.is_completed())
    }

    pub fn is_director(&self, id: &CellId) -> bool {
        self.nodes.get(id).is_some_and(|n| n.is_director())
    }

    /// Stamp output and completion time. Returns false if the cell was
    /// already completed; the first stamp is final.
    pub fn complete(&mut self, id: &CellId, output: impl Into<String>) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) if node.completed_at.is_none() => {
                node.output = Some(output.into());
                node.completed_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    pub fn take_behavior(&mut self, id: &CellId) -> Option<Box<dyn Cell>> {
        self.behaviors.remove(id)
    }

    pub fn restore_behavior(&mut self, id: &CellId, behavior: Box<dyn Cell>) {
        self.behaviors.insert(id.clone(), behavior);
    }

    /// Hops to the nearest Director ancestor (0 for a Director). Cells
    /// outside any Director subtree count hops to their root.
    pub fn chain_depth(&self, id: &CellId) -> usize {
        let mut depth = 0;
        let mut current = self.nodes.get(id);
        while let Some(node) = current {
            if node.is_director() {
                break;
            }
            match node.parent.as_ref().and_then(|p| self.nodes.get(p)) {
                Some(parent) => {
                    depth += 1;
                    current = Some(parent);
                }
                None => break,
            }
        }
        depth
    }

    /// Nodes with the given role, oldest first
    pub fn with_role<'a>(&'a self, role: &'a str) -> impl Iterator<Item = &'a CellNode> + 'a {
        self.order
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .filter(move |n| n.role == role)
    }
}
