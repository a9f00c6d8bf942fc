//! Newick format parser and writer.
//!
//! Supports the standard Newick grammar:
//! ```text
//! tree     = subtree ';'
//! subtree  = '(' children ')' label | label
//! children = subtree (',' subtree)*
//! label    = name? (':' length)?
//! ```
//!
//! A missing branch length reads as zero. Nodes are allocated in the order
//! the parser first reaches them, so every parent index precedes its
//! children's.

use smallvec::SmallVec;

use crate::errors::{CanopyError, Result};
use crate::tree::{Tree, TreeNode};

/// Parse a Newick string into a [`Tree`].
pub fn parse_newick(input: &str) -> Result<Tree> {
    let mut parser = Parser::new(input.as_bytes());
    let nodes = parser.parse_tree()?;
    Tree::from_nodes(nodes)
}

/// Serialize a [`Tree`] to a Newick string.
pub fn write_newick(tree: &Tree) -> String {
    let mut buf = String::new();
    write_subtree(tree, tree.root(), &mut buf);
    buf.push(';');
    buf
}

fn write_subtree(tree: &Tree, ix: usize, buf: &mut String) {
    let mut children = tree.children(ix).peekable();
    if children.peek().is_some() {
        buf.push('(');
        for (i, child) in children.enumerate() {
            if i > 0 {
                buf.push(',');
            }
            write_subtree(tree, child, buf);
        }
        buf.push(')');
    }
    if let Some(name) = tree.name(ix) {
        buf.push_str(name);
    }
    // the root rarely carries a meaningful length; write it only when set
    if tree.parent(ix).is_some() || tree.distance(ix) != 0.0 {
        buf.push(':');
        // Use enough precision but strip trailing zeros
        let s = format!("{:.10}", tree.distance(ix));
        let s = s.trim_end_matches('0');
        let s = s.trim_end_matches('.');
        buf.push_str(s);
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    nodes: Vec<TreeNode>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: 0,
            nodes: Vec::new(),
        }
    }

    fn parse_tree(&mut self) -> Result<Vec<TreeNode>> {
        self.skip_whitespace();
        self.parse_subtree(None)?;
        self.skip_whitespace();
        if self.peek() != Some(b';') {
            return Err(CanopyError::NewickFormat(
                "expected ';' at end of Newick string".to_string(),
            ));
        }
        self.pos += 1;
        self.skip_whitespace();
        if self.pos < self.input.len() {
            return Err(CanopyError::NewickFormat(format!(
                "unexpected content after ';' at byte {}",
                self.pos
            )));
        }
        Ok(std::mem::take(&mut self.nodes))
    }

    fn parse_subtree(&mut self, parent: Option<usize>) -> Result<usize> {
        self.skip_whitespace();
        let ix = self.alloc_node(parent);

        if self.peek() == Some(b'(') {
            self.pos += 1; // consume '('
            let first_child = self.parse_subtree(Some(ix))?;
            self.nodes[ix].children.push(first_child as u32);

            loop {
                self.skip_whitespace();
                if self.peek() == Some(b',') {
                    self.pos += 1;
                    let child = self.parse_subtree(Some(ix))?;
                    self.nodes[ix].children.push(child as u32);
                } else {
                    break;
                }
            }
            self.skip_whitespace();
            if self.peek() != Some(b')') {
                return Err(CanopyError::NewickFormat(
                    "expected ')' in Newick string".to_string(),
                ));
            }
            self.pos += 1; // consume ')'
        }

        self.parse_label(ix)?;
        Ok(ix)
    }

    fn parse_label(&mut self, ix: usize) -> Result<()> {
        self.skip_whitespace();
        let name = self.parse_name();
        if !name.is_empty() {
            self.nodes[ix].name = Some(name);
        }
        self.skip_whitespace();
        if self.peek() == Some(b':') {
            self.pos += 1;
            self.skip_whitespace();
            let len_str = self.parse_float_str();
            if len_str.is_empty() {
                return Err(CanopyError::NewickFormat(
                    "expected number after ':'".to_string(),
                ));
            }
            self.nodes[ix].distance = len_str.parse().map_err(|_| {
                CanopyError::NewickFormat(format!("invalid branch length: '{len_str}'"))
            })?;
        }
        Ok(())
    }

    /// Everything until ':', ',', ')', '(', ';' or whitespace.
    fn parse_name(&mut self) -> String {
        let start = self.pos;
        while self.pos < self.input.len() {
            match self.input[self.pos] {
                b':' | b',' | b')' | b'(' | b';' => break,
                b' ' | b'\t' | b'\n' | b'\r' => break,
                _ => self.pos += 1,
            }
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    fn parse_float_str(&mut self) -> String {
        let start = self.pos;
        while self.pos < self.input.len() {
            match self.input[self.pos] {
                b'0'..=b'9' | b'.' | b'-' | b'+' | b'e' | b'E' => self.pos += 1,
                _ => break,
            }
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    fn alloc_node(&mut self, parent: Option<usize>) -> usize {
        let ix = self.nodes.len();
        self.nodes.push(TreeNode {
            name: None,
            parent,
            children: SmallVec::new(),
            distance: 0.0,
        });
        ix
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.input.len() {
            match self.input[self.pos] {
                b' ' | b'\t' | b'\n' | b'\r' => self.pos += 1,
                _ => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_pair() {
        let tree = parse_newick("(A,B);").unwrap();
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.leaves().count(), 2);
        assert_eq!(tree.name(1), Some("A"));
        assert_eq!(tree.name(2), Some("B"));
        assert_eq!(tree.parent(1), Some(0));
        assert_eq!(tree.distance(1), 0.0);
    }

    #[test]
    fn parse_with_branch_lengths() {
        let tree = parse_newick("(A:0.1,B:0.2)root:0.0;").unwrap();
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.name(0), Some("root"));
        assert_eq!(tree.distance(0), 0.0);
        assert_eq!(tree.distance(1), 0.1);
        assert_eq!(tree.distance(2), 0.2);
    }

    #[test]
    fn parse_nested_preserves_parent_before_child_order() {
        let tree = parse_newick("((A:0.1,B:0.2):0.3,(C:0.4,D:0.5):0.6);").unwrap();
        assert_eq!(tree.len(), 7);
        assert_eq!(tree.leaves().count(), 4);
        for ix in 1..tree.len() {
            assert!(tree.parent(ix).unwrap() < ix);
        }
        let leaf_names: Vec<_> = tree
            .leaves()
            .filter_map(|ix| tree.name(ix))
            .collect();
        assert_eq!(leaf_names, vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn parse_internal_names() {
        let tree = parse_newick("((A,B)AB,(C,D)CD)root;").unwrap();
        assert_eq!(tree.name(0), Some("root"));
        assert_eq!(tree.name(1), Some("AB"));
    }

    #[test]
    fn parse_single_leaf() {
        let tree = parse_newick("A:1.5;").unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.name(0), Some("A"));
        assert_eq!(tree.distance(0), 1.5);
    }

    #[test]
    fn parse_whitespace() {
        let tree = parse_newick("  ( A : 0.1 , B : 0.2 ) ; ").unwrap();
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn parse_error_unbalanced_parens() {
        assert!(parse_newick("((A,B);").is_err());
    }

    #[test]
    fn parse_error_missing_semicolon() {
        assert!(parse_newick("(A,B)").is_err());
    }

    #[test]
    fn parse_error_trailing_content() {
        assert!(parse_newick("(A,B);(C,D);").is_err());
    }

    #[test]
    fn parse_error_bad_float() {
        assert!(parse_newick("(A:abc,B);").is_err());
    }

    #[test]
    fn parse_error_negative_length() {
        assert!(parse_newick("(A:-0.5,B);").is_err());
    }

    #[test]
    fn write_simple() {
        let tree = parse_newick("(A,B);").unwrap();
        assert_eq!(write_newick(&tree), "(A:0,B:0);");
    }

    #[test]
    fn roundtrip_with_lengths() {
        let input = "((A:0.1,B:0.2)AB:0.3,(C:0.4,D:0.5)CD:0.6)root;";
        let tree = parse_newick(input).unwrap();
        let output = write_newick(&tree);
        assert_eq!(output, input);
        assert_eq!(parse_newick(&output).unwrap(), tree);
    }
}
