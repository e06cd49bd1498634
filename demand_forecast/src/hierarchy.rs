//! Aggregation hierarchy: item → product group → location → total
//!
//! Nodes live in a flat list and refer to their children by index. Leaves
//! are the single (location, item) series; every other node's value is the
//! sum of the leaves below it, which [`Hierarchy::summing_matrix`] encodes.

use crate::data::SeriesKey;
use crate::error::{ForecastError, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;

/// Identity of a hierarchy node
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    Total,
    Location(String),
    Group { location: String, group: String },
    Leaf(SeriesKey),
}

impl NodeId {
    pub fn is_leaf(&self) -> bool {
        matches!(self, NodeId::Leaf(_))
    }

    pub fn series_key(&self) -> Option<&SeriesKey> {
        match self {
            NodeId::Leaf(key) => Some(key),
            _ => None,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Total => write!(f, "total"),
            NodeId::Location(location) => write!(f, "location={}", location),
            NodeId::Group { location, group } => {
                write!(f, "location={}/group={}", location, group)
            }
            NodeId::Leaf(key) => write!(f, "location={}/item={}", key.location_id, key.item_id),
        }
    }
}

/// Catalog entry for one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub item_id: String,
    pub product_group: String,
}

/// Catalog entry for one location and the items it sells
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogLocation {
    pub location_id: String,
    pub items: Vec<String>,
}

/// Catalog snapshot defining the hierarchy
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub items: Vec<CatalogItem>,
    pub locations: Vec<CatalogLocation>,
}

impl Catalog {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    /// Product group of every item
    pub fn groups(&self) -> BTreeMap<&str, &str> {
        self.items
            .iter()
            .map(|i| (i.item_id.as_str(), i.product_group.as_str()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct HierarchyNode {
    id: NodeId,
    children: Vec<usize>,
}

/// Validated acyclic summing structure
#[derive(Debug, Clone, PartialEq)]
pub struct Hierarchy {
    nodes: Vec<HierarchyNode>,
    index: BTreeMap<NodeId, usize>,
    /// Node indices of the leaves, in summing-matrix column order
    leaves: Vec<usize>,
}

fn structural(message: String) -> ForecastError {
    ForecastError::Reconciliation(message)
}

impl Hierarchy {
    /// Build from a node list and (parent, child) edges
    pub fn from_edges(nodes: Vec<NodeId>, edges: &[(NodeId, NodeId)]) -> Result<Self> {
        let mut index = BTreeMap::new();
        for (i, id) in nodes.iter().enumerate() {
            if index.insert(id.clone(), i).is_some() {
                return Err(structural(format!("duplicate hierarchy node {}", id)));
            }
        }

        let mut built: Vec<HierarchyNode> = nodes
            .into_iter()
            .map(|id| HierarchyNode {
                id,
                children: Vec::new(),
            })
            .collect();

        for (parent, child) in edges {
            let p = *index
                .get(parent)
                .ok_or_else(|| structural(format!("edge from unknown node {}", parent)))?;
            let c = *index
                .get(child)
                .ok_or_else(|| structural(format!("edge to unknown node {}", child)))?;
            if !built[p].children.contains(&c) {
                built[p].children.push(c);
            }
        }

        let leaves = built
            .iter()
            .enumerate()
            .filter(|(_, n)| n.id.is_leaf())
            .map(|(i, _)| i)
            .collect();

        let hierarchy = Self {
            nodes: built,
            index,
            leaves,
        };
        hierarchy.validate()?;
        Ok(hierarchy)
    }

    /// Total → location → product group → leaf, from a catalog
    pub fn from_catalog(catalog: &Catalog) -> Result<Self> {
        let groups = catalog.groups();
        let mut nodes = vec![NodeId::Total];
        let mut group_nodes = Vec::new();
        let mut leaf_nodes = Vec::new();
        let mut edges = Vec::new();

        for location in &catalog.locations {
            let loc = NodeId::Location(location.location_id.clone());
            nodes.push(loc.clone());
            edges.push((NodeId::Total, loc.clone()));

            let mut seen_groups = BTreeSet::new();
            for item in &location.items {
                let group = groups.get(item.as_str()).ok_or_else(|| {
                    structural(format!(
                        "item {} at location {} has no catalog entry",
                        item, location.location_id
                    ))
                })?;
                let group_id = NodeId::Group {
                    location: location.location_id.clone(),
                    group: group.to_string(),
                };
                if seen_groups.insert(group.to_string()) {
                    group_nodes.push(group_id.clone());
                    edges.push((loc.clone(), group_id.clone()));
                }

                let leaf = NodeId::Leaf(SeriesKey::new(location.location_id.clone(), item.clone()));
                leaf_nodes.push(leaf.clone());
                edges.push((group_id, leaf));
            }
        }

        nodes.extend(group_nodes);
        nodes.extend(leaf_nodes);
        Self::from_edges(nodes, &edges)
    }

    /// Structural checks: leaves have parents and no children, aggregates
    /// have children, no cycles
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(structural("hierarchy has no nodes".to_string()));
        }

        let mut has_parent = vec![false; self.nodes.len()];
        for node in &self.nodes {
            for &child in &node.children {
                has_parent[child] = true;
            }
        }

        for (i, node) in self.nodes.iter().enumerate() {
            if node.id.is_leaf() {
                if !node.children.is_empty() {
                    return Err(structural(format!("leaf {} has children", node.id)));
                }
                if !has_parent[i] && self.nodes.len() > 1 {
                    return Err(structural(format!("leaf {} has no parent", node.id)));
                }
            } else if node.children.is_empty() {
                return Err(structural(format!("aggregate {} has no children", node.id)));
            }
        }

        self.check_acyclic()
    }

    fn check_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        let mut marks = vec![Mark::New; self.nodes.len()];
        for root in 0..self.nodes.len() {
            if marks[root] != Mark::New {
                continue;
            }
            // (node, next child position)
            let mut stack = vec![(root, 0usize)];
            marks[root] = Mark::Active;
            while let Some((node, pos)) = stack.pop() {
                match self.nodes[node].children.get(pos) {
                    Some(&child) => {
                        stack.push((node, pos + 1));
                        match marks[child] {
                            Mark::Active => {
                                return Err(structural(format!(
                                    "cyclic reference through {}",
                                    self.nodes[child].id
                                )))
                            }
                            Mark::New => {
                                marks[child] = Mark::Active;
                                stack.push((child, 0));
                            }
                            Mark::Done => {}
                        }
                    }
                    None => marks[node] = Mark::Done,
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn n_leaves(&self) -> usize {
        self.leaves.len()
    }

    /// Node ids in summing-matrix row order
    pub fn node_ids(&self) -> Vec<&NodeId> {
        self.nodes.iter().map(|n| &n.id).collect()
    }

    /// Leaf ids in summing-matrix column order
    pub fn leaf_ids(&self) -> Vec<&NodeId> {
        self.leaves.iter().map(|&i| &self.nodes[i].id).collect()
    }

    pub fn index_of(&self, id: &NodeId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn children(&self, id: &NodeId) -> Vec<&NodeId> {
        self.index_of(id)
            .map(|i| {
                self.nodes[i]
                    .children
                    .iter()
                    .map(|&c| &self.nodes[c].id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Leaf column indices below every node, in node order
    fn descendant_columns(&self) -> Vec<BTreeSet<usize>> {
        let column_of: BTreeMap<usize, usize> = self
            .leaves
            .iter()
            .enumerate()
            .map(|(col, &node)| (node, col))
            .collect();

        let mut memo: Vec<Option<BTreeSet<usize>>> = vec![None; self.nodes.len()];
        for start in 0..self.nodes.len() {
            let mut stack = vec![start];
            while let Some(&node) = stack.last() {
                if memo[node].is_some() {
                    stack.pop();
                    continue;
                }
                let pending: Vec<usize> = self.nodes[node]
                    .children
                    .iter()
                    .copied()
                    .filter(|&c| memo[c].is_none())
                    .collect();
                if pending.is_empty() {
                    let mut set = BTreeSet::new();
                    if let Some(&col) = column_of.get(&node) {
                        set.insert(col);
                    }
                    for &child in &self.nodes[node].children {
                        if let Some(below) = &memo[child] {
                            set.extend(below.iter().copied());
                        }
                    }
                    memo[node] = Some(set);
                    stack.pop();
                } else {
                    stack.extend(pending);
                }
            }
        }

        memo.into_iter().map(Option::unwrap_or_default).collect()
    }

    /// Leaf ids below `id`
    pub fn descendant_leaves(&self, id: &NodeId) -> Vec<&NodeId> {
        match self.index_of(id) {
            Some(i) => self.descendant_columns()[i]
                .iter()
                .map(|&col| &self.nodes[self.leaves[col]].id)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Summing matrix S: one row per node, one column per leaf, 1 where the
    /// leaf lies below (or is) the row's node
    pub fn summing_matrix(&self) -> Array2<f64> {
        let mut s = Array2::zeros((self.nodes.len(), self.leaves.len()));
        for (row, columns) in self.descendant_columns().into_iter().enumerate() {
            for col in columns {
                s[[row, col]] = 1.0;
            }
        }
        s
    }

    /// Hierarchy restricted to the given leaves; aggregates left without
    /// any leaf below them are removed too
    pub fn retain_leaves(&self, keep: &BTreeSet<NodeId>) -> Result<Self> {
        let below = self.descendant_columns();
        let kept_columns: BTreeSet<usize> = self
            .leaves
            .iter()
            .enumerate()
            .filter(|(_, node)| keep.contains(&self.nodes[**node].id))
            .map(|(col, _)| col)
            .collect();
        if kept_columns.is_empty() {
            return Err(structural("no leaves left in the hierarchy".to_string()));
        }

        let alive: Vec<bool> = below
            .iter()
            .map(|cols| !cols.is_disjoint(&kept_columns))
            .collect();

        let nodes = self
            .nodes
            .iter()
            .zip(&alive)
            .filter(|(_, a)| **a)
            .map(|(n, _)| n.id.clone())
            .collect();
        let edges: Vec<(NodeId, NodeId)> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| alive[*i])
            .flat_map(|(_, n)| {
                n.children
                    .iter()
                    .filter(|&&c| alive[c])
                    .map(move |&c| (n.id.clone(), self.nodes[c].id.clone()))
            })
            .collect();

        Self::from_edges(nodes, &edges)
    }
}
