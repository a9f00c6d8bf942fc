//! Alignment history serialization.
//!
//! Two on-disk forms: a nested JSON document mirroring the tree shape, one
//! object per node with its children inline, and a compact bincode encoding
//! of the whole [`CigarTree`]. Both loaders re-validate what they read, so a
//! hand-edited file with inconsistent cigar arithmetic is rejected instead
//! of reaching the engines.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::cigar::{Cigar, CigarTree};
use crate::errors::Result;
use crate::tree::{Tree, TreeNode};

/// One node of the JSON form.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub distance: f64,
    pub cigar: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child: Vec<HistoryNode>,
}

pub fn history_to_json(history: &CigarTree) -> HistoryNode {
    node_repr(history, history.tree().root())
}

pub fn history_from_json(repr: &HistoryNode) -> Result<CigarTree> {
    let mut nodes = Vec::new();
    let mut cigars = Vec::new();
    let mut seqs = Vec::new();
    flatten(repr, None, &mut nodes, &mut cigars, &mut seqs)?;
    CigarTree::from_parts(Tree::from_nodes(nodes)?, cigars, seqs)
}

pub fn save_history_json(history: &CigarTree, mut output: impl Write) -> Result<()> {
    serde_json::to_writer_pretty(&mut output, &history_to_json(history))?;
    writeln!(output)?;
    Ok(())
}

pub fn load_history_json(reader: impl Read) -> Result<CigarTree> {
    let repr: HistoryNode = serde_json::from_reader(reader)?;
    history_from_json(&repr)
}

pub fn save_history(history: &CigarTree, output: impl Write) -> Result<()> {
    bincode::serialize_into(output, history)?;

    Ok(())
}

pub fn load_history(reader: impl Read) -> Result<CigarTree> {
    let history: CigarTree = bincode::deserialize_from(reader)?;
    history.validate()?;

    Ok(history)
}

fn node_repr(history: &CigarTree, ix: usize) -> HistoryNode {
    let tree = history.tree();
    HistoryNode {
        id: tree.name(ix).map(str::to_string),
        distance: tree.distance(ix),
        cigar: history.cigar(ix).to_string(),
        seq: history.seq(ix).map(str::to_string),
        child: tree
            .children(ix)
            .map(|child| node_repr(history, child))
            .collect(),
    }
}

/// Preorder flattening, so parents always land before their children.
fn flatten(
    repr: &HistoryNode,
    parent: Option<usize>,
    nodes: &mut Vec<TreeNode>,
    cigars: &mut Vec<Cigar>,
    seqs: &mut Vec<Option<String>>,
) -> Result<usize> {
    let ix = nodes.len();
    nodes.push(TreeNode {
        name: repr.id.clone(),
        parent,
        children: SmallVec::new(),
        distance: repr.distance,
    });
    cigars.push(repr.cigar.parse()?);
    seqs.push(repr.seq.clone());

    for child in &repr.child {
        let child_ix = flatten(child, Some(ix), nodes, cigars, seqs)?;
        nodes[ix].children.push(child_ix as u32);
    }
    Ok(ix)
}
