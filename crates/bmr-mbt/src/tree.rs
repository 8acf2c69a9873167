//! Incremental Merkle Binary Tree over an append-only sequence of opaque
//! contents.
//!
//! The tree shape is canonical: it depends only on the number of leaves, never
//! on their values. For `n` leaves the left subtree holds the largest perfect
//! (power-of-two) prefix and the remainder recurses on the right, which keeps
//! the depth close to `log2(n)`. Proof verification rebuilds the same shape,
//! so the combination rule here is load-bearing for [`crate::proof`].

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use crate::hasher::Hasher;
use crate::proof::{MerkleBinaryTreeProof, ProofNode};

/// Level of the empty tree.
pub(crate) const LEVEL_NONE: usize = 0;
/// Level of a leaf node.
pub(crate) const LEVEL_LEAF: usize = 1;
/// Level of a two-leaf branch.
pub(crate) const LEVEL_BRANCH: usize = 2;

/// Level occupied by a subtree holding `n` leaves.
pub(crate) fn number_to_level(n: usize) -> usize {
    match n {
        0 => LEVEL_NONE,
        1 => LEVEL_LEAF,
        2 => LEVEL_BRANCH,
        _ => LEVEL_BRANCH + 1 + ((n - 1) / 2).ilog2() as usize,
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MbtError {
    #[error("invalid content: empty payload")]
    InvalidContent,
    #[error("out of range: begin {begin}, end {end}, len {len}")]
    OutOfRange { begin: usize, end: usize, len: usize },
    #[error("invalid range: begin {begin} > end {end}")]
    InvalidRange { begin: usize, end: usize },
    #[error("proof verification failed: {0}")]
    Verify(String),
}

pub(crate) type NodeId = usize;

/// Tree node stored in the arena. Children are arena indices, so the node
/// graph has no aliasing even while lazy restructuring mutates it in place.
#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) level: usize,
    pub(crate) num_of_leaf: usize,
    /// Unset on lazy interior nodes until [`Arena::ensure_hash`] runs.
    pub(crate) hash: Option<Bytes>,
    pub(crate) left: Option<NodeId>,
    pub(crate) right: Option<NodeId>,
}

impl Node {
    fn leaf(hash: Bytes) -> Self {
        Node {
            level: LEVEL_LEAF,
            num_of_leaf: 1,
            hash: Some(hash),
            left: None,
            right: None,
        }
    }
}

/// Arena of nodes plus the lazy combination rule. Shared between the tree
/// and proof reconstruction so both produce identical shapes.
#[derive(Debug)]
pub(crate) struct Arena {
    hasher: Arc<dyn Hasher>,
    nodes: Vec<Node>,
}

impl Arena {
    pub(crate) fn new(hasher: Arc<dyn Hasher>) -> Self {
        Arena {
            hasher,
            nodes: Vec::new(),
        }
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub(crate) fn alloc_leaf(&mut self, content: &[u8]) -> NodeId {
        let hash = self.hasher.hash(content);
        self.alloc(Node::leaf(hash))
    }

    /// Materialize a proof node as an opaque subtree: it carries its hash,
    /// level and leaf count but no children.
    pub(crate) fn alloc_opaque(&mut self, pn: &ProofNode) -> NodeId {
        self.alloc(Node {
            level: pn.level,
            num_of_leaf: pn.num_of_leaf,
            hash: Some(pn.hash.clone()),
            left: None,
            right: None,
        })
    }

    /// Append subtree `d` after the last leaf of `root`, returning the new
    /// root. A perfect subtree pairs with the incoming node as the left
    /// child of a new parent; otherwise the new material descends into the
    /// right spine to land immediately after the last leaf.
    pub(crate) fn lazy_add(
        &mut self,
        root: Option<NodeId>,
        d: NodeId,
    ) -> Result<NodeId, MbtError> {
        match root {
            None => Ok(d),
            Some(p) => self.lazy_add_at(p, d),
        }
    }

    fn lazy_add_at(&mut self, p: NodeId, d: NodeId) -> Result<NodeId, MbtError> {
        let p_nol = self.nodes[p].num_of_leaf;
        if p_nol.is_power_of_two() {
            let d_nol = self.nodes[d].num_of_leaf;
            let nol = p_nol + d_nol;
            return Ok(self.alloc(Node {
                level: number_to_level(nol),
                num_of_leaf: nol,
                hash: None,
                left: Some(p),
                right: Some(d),
            }));
        }
        let right = self.nodes[p].right.ok_or_else(|| {
            // Only adversarially shaped proofs descend into an opaque node.
            MbtError::Verify(format!(
                "cannot place material inside opaque node of {p_nol} leaves"
            ))
        })?;
        let new_right = self.lazy_add_at(right, d)?;
        let d_nol = self.nodes[d].num_of_leaf;
        let node = &mut self.nodes[p];
        node.right = Some(new_right);
        node.num_of_leaf += d_nol;
        node.level = number_to_level(node.num_of_leaf);
        node.hash = None;
        Ok(p)
    }

    /// Bottom-up pass filling in hashes left unset during lazy combination.
    pub(crate) fn ensure_hash(&mut self, id: NodeId) -> Result<(), MbtError> {
        if self.nodes[id].hash.is_some() {
            return Ok(());
        }
        let (left, right) = match (self.nodes[id].left, self.nodes[id].right) {
            (Some(l), Some(r)) => (l, r),
            _ => {
                return Err(MbtError::Verify(
                    "interior node without both children".to_owned(),
                ))
            }
        };
        self.ensure_hash(left)?;
        self.ensure_hash(right)?;
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(self.nodes[left].hash.as_ref().expect("hashed above"));
        buf.extend_from_slice(self.nodes[right].hash.as_ref().expect("hashed above"));
        self.nodes[id].hash = Some(self.hasher.hash(&buf));
        Ok(())
    }

    /// Check the level/leaf-count invariants of every reachable node.
    ///
    /// Childless nodes with more than one leaf are opaque proof subtrees;
    /// their interior cannot be checked, but their advertised level must
    /// still match their leaf count.
    pub(crate) fn verify(&self, id: NodeId) -> Result<(), MbtError> {
        let node = &self.nodes[id];
        if node.hash.is_none() {
            return Err(MbtError::Verify("node without hash".to_owned()));
        }
        if node.num_of_leaf == 0 {
            return Err(MbtError::Verify("node with zero leaves".to_owned()));
        }
        if node.level != number_to_level(node.num_of_leaf) {
            return Err(MbtError::Verify(format!(
                "level {} inconsistent with {} leaves",
                node.level, node.num_of_leaf
            )));
        }
        match (node.left, node.right) {
            (Some(l), Some(r)) => {
                let (ln, rn) = (&self.nodes[l], &self.nodes[r]);
                if ln.num_of_leaf + rn.num_of_leaf != node.num_of_leaf {
                    return Err(MbtError::Verify(
                        "leaf count is not the sum of children".to_owned(),
                    ));
                }
                if !ln.num_of_leaf.is_power_of_two() || rn.num_of_leaf > ln.num_of_leaf {
                    return Err(MbtError::Verify(
                        "children violate the canonical shape".to_owned(),
                    ));
                }
                if node.level != ln.level + 1 {
                    return Err(MbtError::Verify(
                        "level is not one above the left child".to_owned(),
                    ));
                }
                self.verify(l)?;
                self.verify(r)
            }
            (None, None) => Ok(()),
            _ => Err(MbtError::Verify("half-linked node".to_owned())),
        }
    }
}

/// Incrementally built Merkle Binary Tree owning its ordered leaf contents.
///
/// Leaf positions are dense and 1-based.
#[derive(Debug)]
pub struct MerkleBinaryTree {
    hasher: Arc<dyn Hasher>,
    contents: Vec<Bytes>,
    arena: Arena,
    root: Option<NodeId>,
}

impl MerkleBinaryTree {
    /// Create an empty tree.
    pub fn new(hasher: Arc<dyn Hasher>) -> Self {
        MerkleBinaryTree {
            arena: Arena::new(hasher.clone()),
            hasher,
            contents: Vec::new(),
            root: None,
        }
    }

    /// Bulk construction: lazy-add every content, then one hash pass.
    pub fn with_contents<I>(hasher: Arc<dyn Hasher>, contents: I) -> Result<Self, MbtError>
    where
        I: IntoIterator<Item = Bytes>,
    {
        let mut tree = Self::new(hasher);
        for content in contents {
            if content.is_empty() {
                return Err(MbtError::InvalidContent);
            }
            let leaf = tree.arena.alloc_leaf(&content);
            tree.root = Some(tree.arena.lazy_add(tree.root, leaf)?);
            tree.contents.push(content);
        }
        if let Some(root) = tree.root {
            tree.arena.ensure_hash(root)?;
        }
        Ok(tree)
    }

    /// Append one leaf.
    pub fn add(&mut self, content: Bytes) -> Result<(), MbtError> {
        if content.is_empty() {
            return Err(MbtError::InvalidContent);
        }
        let leaf = self.arena.alloc_leaf(&content);
        let root = self.arena.lazy_add(self.root, leaf)?;
        self.root = Some(root);
        self.contents.push(content);
        // Rehash eagerly so root() stays cheap; only the right spine is new.
        self.arena.ensure_hash(root)
    }

    /// Number of leaves.
    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// Root hash, or an empty byte string for the empty tree.
    pub fn root(&self) -> Bytes {
        match self.root {
            Some(id) => self
                .arena
                .node(id)
                .hash
                .clone()
                .unwrap_or_else(Bytes::new),
            None => Bytes::new(),
        }
    }

    /// Range proof over the 1-based inclusive leaf range `[begin, end]`.
    pub fn proof(&self, begin: usize, end: usize) -> Result<MerkleBinaryTreeProof, MbtError> {
        let len = self.len();
        if begin < 1 || end < 1 || end > len {
            return Err(MbtError::OutOfRange { begin, end, len });
        }
        if begin > end {
            return Err(MbtError::InvalidRange { begin, end });
        }
        let contents = self.contents[begin - 1..end].to_vec();
        // Proof of the whole range needs no sibling data.
        if begin == 1 && end == len {
            return Ok(MerkleBinaryTreeProof::new(
                self.hasher.clone(),
                contents,
                Vec::new(),
                Vec::new(),
            ));
        }
        let root = self.root.expect("non-empty tree has a root");
        let mut proof_in_left = Vec::new();
        self.collect_left(root, 1, begin, &mut proof_in_left);
        // Collected leftmost-first; stored innermost-first.
        proof_in_left.reverse();
        let mut proof_in_right = Vec::new();
        self.collect_right(root, 1, end, &mut proof_in_right);
        Ok(MerkleBinaryTreeProof::new(
            self.hasher.clone(),
            contents,
            proof_in_left,
            proof_in_right,
        ))
    }

    fn proof_node(&self, id: NodeId) -> ProofNode {
        let node = self.arena.node(id);
        ProofNode {
            level: node.level,
            num_of_leaf: node.num_of_leaf,
            hash: node.hash.clone().expect("tree is fully hashed"),
        }
    }

    /// Collect the maximal subtrees strictly left of leaf `begin`,
    /// leftmost-first. `lo` is the 1-based position of `id`'s first leaf.
    fn collect_left(&self, id: NodeId, lo: usize, begin: usize, out: &mut Vec<ProofNode>) {
        let node = self.arena.node(id);
        let hi = lo + node.num_of_leaf - 1;
        if hi < begin {
            out.push(self.proof_node(id));
            return;
        }
        if begin <= lo {
            return;
        }
        let left = node.left.expect("begin splits an interior node");
        let right = node.right.expect("begin splits an interior node");
        let split = lo + self.arena.node(left).num_of_leaf;
        self.collect_left(left, lo, begin, out);
        self.collect_left(right, split, begin, out);
    }

    /// Collect the maximal subtrees strictly right of leaf `end`,
    /// rightmost-first (outermost-first, as stored in the proof).
    fn collect_right(&self, id: NodeId, lo: usize, end: usize, out: &mut Vec<ProofNode>) {
        let node = self.arena.node(id);
        let hi = lo + node.num_of_leaf - 1;
        if lo > end {
            out.push(self.proof_node(id));
            return;
        }
        if hi <= end {
            return;
        }
        let left = node.left.expect("end splits an interior node");
        let right = node.right.expect("end splits an interior node");
        let split = lo + self.arena.node(left).num_of_leaf;
        self.collect_right(right, split, end, out);
        self.collect_right(left, lo, end, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::Sha3Hasher;

    fn hasher() -> Arc<dyn Hasher> {
        Arc::new(Sha3Hasher)
    }

    fn words(n: usize) -> Vec<Bytes> {
        (0..n)
            .map(|i| Bytes::from(format!("content-{i}")))
            .collect()
    }

    #[test]
    fn number_to_level_table() {
        assert_eq!(number_to_level(0), 0);
        assert_eq!(number_to_level(1), 1);
        assert_eq!(number_to_level(2), 2);
        assert_eq!(number_to_level(3), 3);
        assert_eq!(number_to_level(4), 3);
        assert_eq!(number_to_level(5), 4);
        assert_eq!(number_to_level(8), 4);
        assert_eq!(number_to_level(9), 5);
        assert_eq!(number_to_level(16), 5);
        assert_eq!(number_to_level(17), 6);
    }

    #[test]
    fn empty_tree_root_is_empty() {
        let tree = MerkleBinaryTree::new(hasher());
        assert_eq!(tree.len(), 0);
        assert!(tree.root().is_empty());
    }

    #[test]
    fn single_leaf_root_is_leaf_hash() {
        let mut tree = MerkleBinaryTree::new(hasher());
        tree.add(Bytes::from_static(b"dog")).unwrap();
        assert_eq!(
            hex::encode(tree.root()),
            "05cd98fdecc74538182a123f3d91e031833da3e9b0a2558d6652e48bf318a1b2"
        );
    }

    #[test]
    fn three_leaf_root_matches_canonical_shape() {
        // ((dog, cat), elephant) under SHA3-256
        let contents = ["dog", "cat", "elephant"]
            .into_iter()
            .map(|w| Bytes::from_static(w.as_bytes()));
        let tree = MerkleBinaryTree::with_contents(hasher(), contents).unwrap();
        assert_eq!(
            hex::encode(tree.root()),
            "4639491c3e6686de4eac3cd946829eaa31fbb3cbb282144a4b82b606784b2b51"
        );
    }

    #[test]
    fn incremental_and_bulk_construction_agree() {
        for n in 1..=33 {
            let contents = words(n);
            let bulk =
                MerkleBinaryTree::with_contents(hasher(), contents.clone()).unwrap();
            let mut incremental = MerkleBinaryTree::new(hasher());
            for content in contents {
                incremental.add(content).unwrap();
            }
            assert_eq!(bulk.root(), incremental.root(), "n = {n}");
            assert_eq!(bulk.len(), n);
        }
    }

    #[test]
    fn add_rejects_empty_content() {
        let mut tree = MerkleBinaryTree::new(hasher());
        assert_eq!(tree.add(Bytes::new()), Err(MbtError::InvalidContent));
    }

    #[test]
    fn proof_range_checks() {
        let tree = MerkleBinaryTree::with_contents(hasher(), words(5)).unwrap();
        assert!(matches!(
            tree.proof(0, 3),
            Err(MbtError::OutOfRange { .. })
        ));
        assert!(matches!(
            tree.proof(1, 6),
            Err(MbtError::OutOfRange { .. })
        ));
        assert!(matches!(
            tree.proof(4, 2),
            Err(MbtError::InvalidRange { .. })
        ));
        assert!(tree.proof(1, 5).is_ok());
    }

    #[test]
    fn proof_of_all_has_no_siblings() {
        let tree = MerkleBinaryTree::with_contents(hasher(), words(6)).unwrap();
        let proof = tree.proof(1, 6).unwrap();
        assert!(proof.proof_in_left.is_empty());
        assert!(proof.proof_in_right.is_empty());
        assert_eq!(proof.contents.len(), 6);
    }
}
