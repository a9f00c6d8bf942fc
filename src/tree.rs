//! Rooted phylogenetic trees stored as flat preorder arenas.
//!
//! Nodes live in a `Vec` and are addressed by index. The root is always node
//! 0 and every other node's parent index is strictly smaller than its own, so
//! a forward scan visits parents before children and a reverse scan visits
//! children before parents.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::errors::{CanopyError, Result};

/// A single node in a rooted tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    /// Taxon or clade label.
    pub name: Option<String>,
    /// Parent node (None for the root).
    pub parent: Option<usize>,
    /// Child nodes, in the order they were attached.
    pub children: SmallVec<[u32; 2]>,
    /// Branch length from this node to its parent; 0.0 at the root.
    pub distance: f64,
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// A rooted tree over a flat node arena, preorder-indexed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<TreeNode>,
}

impl Tree {
    /// Build a tree from pre-built nodes, checking the arena invariants:
    /// node 0 is the only root, parents precede children, parent and child
    /// links agree, and branch lengths are finite and non-negative.
    pub fn from_nodes(nodes: Vec<TreeNode>) -> Result<Self> {
        if nodes.is_empty() {
            return Err(CanopyError::InvalidParameter("empty tree".to_string()));
        }
        if nodes[0].parent.is_some() {
            return Err(CanopyError::InvalidParameter(
                "node 0 must be the root".to_string(),
            ));
        }

        for (ix, node) in nodes.iter().enumerate() {
            match node.parent {
                None if ix > 0 => {
                    return Err(CanopyError::InvalidParameter(format!(
                        "multiple roots: node {ix} has no parent"
                    )));
                }
                Some(p) if p >= ix => {
                    return Err(CanopyError::InvalidParameter(format!(
                        "node {ix} has parent {p}; parents must precede children"
                    )));
                }
                Some(p) => {
                    if !nodes[p].children.iter().any(|&c| c as usize == ix) {
                        return Err(CanopyError::InvalidParameter(format!(
                            "node {p} does not list node {ix} as a child"
                        )));
                    }
                }
                None => {}
            }

            if !node.distance.is_finite() || node.distance < 0.0 {
                return Err(CanopyError::InvalidParameter(format!(
                    "branch length {} at node {ix} (must be finite and >= 0)",
                    node.distance
                )));
            }

            for &c in &node.children {
                let c = c as usize;
                if c >= nodes.len() || nodes[c].parent != Some(ix) {
                    return Err(CanopyError::InvalidParameter(format!(
                        "child link {ix} -> {c} has no matching parent link"
                    )));
                }
            }
        }

        Ok(Self { nodes })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, ix: usize) -> &TreeNode {
        &self.nodes[ix]
    }

    pub fn root(&self) -> usize {
        0
    }

    pub fn is_leaf(&self, ix: usize) -> bool {
        self.nodes[ix].is_leaf()
    }

    pub fn parent(&self, ix: usize) -> Option<usize> {
        self.nodes[ix].parent
    }

    pub fn distance(&self, ix: usize) -> f64 {
        self.nodes[ix].distance
    }

    pub fn name(&self, ix: usize) -> Option<&str> {
        self.nodes[ix].name.as_deref()
    }

    pub fn children(&self, ix: usize) -> impl Iterator<Item = usize> + '_ {
        self.nodes[ix].children.iter().map(|&c| c as usize)
    }

    /// All leaf indices in preorder.
    pub fn leaves(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.nodes.len()).filter(|&ix| self.nodes[ix].is_leaf())
    }

    /// Node indices with every parent before its children.
    pub fn top_down(&self) -> impl Iterator<Item = usize> {
        0..self.nodes.len()
    }

    /// Node indices with every child before its parent.
    pub fn bottom_up(&self) -> impl Iterator<Item = usize> {
        (0..self.nodes.len()).rev()
    }

    /// Parent index of every node, as a parallel array.
    pub fn parent_indices(&self) -> Vec<Option<usize>> {
        self.nodes.iter().map(|n| n.parent).collect()
    }

    /// Branch length of every node, as a parallel array.
    pub fn distances(&self) -> Vec<f64> {
        self.nodes.iter().map(|n| n.distance).collect()
    }

    /// Label of every node, as a parallel array.
    pub fn names(&self) -> Vec<Option<String>> {
        self.nodes.iter().map(|n| n.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: Option<&str>, parent: Option<usize>, children: &[u32], distance: f64) -> TreeNode {
        TreeNode {
            name: name.map(str::to_string),
            parent,
            children: SmallVec::from_slice(children),
            distance,
        }
    }

    fn three_taxon() -> Tree {
        // ((A,B)AB,C)root
        Tree::from_nodes(vec![
            node(Some("root"), None, &[1, 4], 0.0),
            node(Some("AB"), Some(0), &[2, 3], 0.1),
            node(Some("A"), Some(1), &[], 0.2),
            node(Some("B"), Some(1), &[], 0.3),
            node(Some("C"), Some(0), &[], 0.4),
        ])
        .unwrap()
    }

    #[test]
    fn leaves_and_children() {
        let tree = three_taxon();
        assert_eq!(tree.len(), 5);
        assert_eq!(tree.leaves().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(tree.children(1).collect::<Vec<_>>(), vec![2, 3]);
        assert!(tree.is_leaf(4));
        assert!(!tree.is_leaf(0));
        assert_eq!(tree.parent(4), Some(0));
        assert_eq!(tree.name(1), Some("AB"));
    }

    #[test]
    fn bottom_up_visits_children_first() {
        let tree = three_taxon();
        let order: Vec<usize> = tree.bottom_up().collect();
        for (pos, &ix) in order.iter().enumerate() {
            if let Some(p) = tree.parent(ix) {
                let parent_pos = order.iter().position(|&o| o == p).unwrap();
                assert!(parent_pos > pos, "parent {p} visited before child {ix}");
            }
        }
    }

    #[test]
    fn rejects_parent_after_child() {
        let result = Tree::from_nodes(vec![
            node(None, None, &[1], 0.0),
            node(None, Some(2), &[], 0.1),
            node(None, Some(0), &[1], 0.1),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_multiple_roots() {
        let result = Tree::from_nodes(vec![
            node(None, None, &[], 0.0),
            node(None, None, &[], 0.0),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_negative_branch_length() {
        let result = Tree::from_nodes(vec![
            node(None, None, &[1], 0.0),
            node(Some("A"), Some(0), &[], -0.5),
        ]);
        assert!(matches!(result, Err(CanopyError::InvalidParameter(_))));
    }

    #[test]
    fn rejects_dangling_child_link() {
        let result = Tree::from_nodes(vec![
            node(None, None, &[1], 0.0),
            node(None, Some(0), &[2], 0.1),
            node(None, Some(0), &[], 0.1),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn single_node_tree() {
        let tree = Tree::from_nodes(vec![node(Some("only"), None, &[], 0.0)]).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.leaves().collect::<Vec<_>>(), vec![0]);
        assert_eq!(tree.root(), 0);
    }
}
