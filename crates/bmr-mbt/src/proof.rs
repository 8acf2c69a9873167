//! Range proofs and proof-to-root reconstruction.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::hasher::Hasher;
use crate::tree::{number_to_level, Arena, MbtError};

/// One sibling subtree carried by a proof: its hash, level and leaf count.
/// The leaf count is what lets reconstruction place it at the right depth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofNode {
    pub level: usize,
    pub num_of_leaf: usize,
    pub hash: Bytes,
}

/// Result of reconstructing a root from a proof. `left` is the number of
/// leaves folded in from the left of the proven range, `total` the leaf
/// count of the whole reconstructed tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofRoot {
    pub hash: Bytes,
    pub left: usize,
    pub total: usize,
}

/// Self-contained range proof: the raw contents of a contiguous leaf slice
/// plus the sibling subtrees covering everything strictly left and strictly
/// right of it. Owns no reference back to the source tree.
///
/// `proof_in_left` is ordered innermost-first (nearest the contents),
/// `proof_in_right` outermost-first (farthest from the contents).
#[derive(Debug, Clone)]
pub struct MerkleBinaryTreeProof {
    pub contents: Vec<Bytes>,
    pub proof_in_left: Vec<ProofNode>,
    pub proof_in_right: Vec<ProofNode>,
    hasher: Arc<dyn Hasher>,
}

impl MerkleBinaryTreeProof {
    pub fn new(
        hasher: Arc<dyn Hasher>,
        contents: Vec<Bytes>,
        proof_in_left: Vec<ProofNode>,
        proof_in_right: Vec<ProofNode>,
    ) -> Self {
        MerkleBinaryTreeProof {
            contents,
            proof_in_left,
            proof_in_right,
            hasher,
        }
    }

    /// Rebuild the full-tree root from the proof's own fields.
    ///
    /// The left siblings, the re-hashed contents, and the right siblings are
    /// lazy-added in leaf order under the same combination rule the tree
    /// uses, then hashed bottom-up in one pass. A forged content or proof
    /// node either changes the returned hash or trips the shape invariants
    /// checked afterwards; no silent structurally-wrong root is returned.
    pub fn root(&self) -> Result<ProofRoot, MbtError> {
        if self.contents.is_empty() {
            return Err(MbtError::Verify("proof without contents".to_owned()));
        }
        let mut arena = Arena::new(self.hasher.clone());
        let mut root = None;
        let mut left = 0usize;
        // Innermost-first storage; leaf order is outermost-first.
        for pn in self.proof_in_left.iter().rev() {
            check_proof_node(pn)?;
            let id = arena.alloc_opaque(pn);
            root = Some(arena.lazy_add(root, id)?);
            left += pn.num_of_leaf;
        }
        for content in &self.contents {
            if content.is_empty() {
                return Err(MbtError::InvalidContent);
            }
            let id = arena.alloc_leaf(content);
            root = Some(arena.lazy_add(root, id)?);
        }
        // Outermost-first storage; leaf order is innermost-first.
        for pn in self.proof_in_right.iter().rev() {
            check_proof_node(pn)?;
            let id = arena.alloc_opaque(pn);
            root = Some(arena.lazy_add(root, id)?);
        }
        let root = root.expect("contents are non-empty");
        arena.ensure_hash(root)?;
        arena.verify(root)?;
        let node = arena.node(root);
        Ok(ProofRoot {
            hash: node.hash.clone().expect("root hashed above"),
            left,
            total: node.num_of_leaf,
        })
    }
}

fn check_proof_node(pn: &ProofNode) -> Result<(), MbtError> {
    if pn.num_of_leaf == 0 || pn.hash.is_empty() {
        return Err(MbtError::Verify("malformed proof node".to_owned()));
    }
    if pn.level != number_to_level(pn.num_of_leaf) {
        return Err(MbtError::Verify(format!(
            "proof node level {} inconsistent with {} leaves",
            pn.level, pn.num_of_leaf
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::Sha3Hasher;
    use crate::tree::MerkleBinaryTree;

    fn hasher() -> Arc<dyn Hasher> {
        Arc::new(Sha3Hasher)
    }

    fn animal_tree() -> MerkleBinaryTree {
        let contents = ["dog", "cat", "elephant", "bird", "monkey", "lion", "tiger"]
            .into_iter()
            .map(|w| Bytes::from_static(w.as_bytes()));
        MerkleBinaryTree::with_contents(hasher(), contents).unwrap()
    }

    #[test]
    fn seven_leaf_range_proof() {
        let tree = animal_tree();
        assert_eq!(
            hex::encode(tree.root()),
            "707a48c7e5bff3726b0ff13084858beda54cc9678fc837343c2f2e3b6c2fa50a"
        );
        let proof = tree.proof(2, 5).unwrap();
        assert_eq!(proof.contents.len(), 4);
        let root = proof.root().unwrap();
        assert_eq!(root.hash, tree.root());
        assert_eq!(root.left, 1);
        assert_eq!(root.total, 7);
    }

    #[test]
    fn round_trip_all_ranges() {
        for n in 1..=16 {
            let contents: Vec<Bytes> = (0..n)
                .map(|i| Bytes::from(format!("leaf-{i}")))
                .collect();
            let tree = MerkleBinaryTree::with_contents(hasher(), contents).unwrap();
            for begin in 1..=n {
                for end in begin..=n {
                    let root = tree.proof(begin, end).unwrap().root().unwrap();
                    assert_eq!(root.hash, tree.root(), "n={n} [{begin},{end}]");
                    assert_eq!(root.left, begin - 1);
                    assert_eq!(root.total, n);
                }
            }
        }
    }

    #[test]
    fn tampered_content_changes_root() {
        let tree = animal_tree();
        let mut proof = tree.proof(2, 5).unwrap();
        proof.contents[1] = Bytes::from_static(b"weasel");
        match proof.root() {
            Ok(root) => assert_ne!(root.hash, tree.root()),
            Err(MbtError::Verify(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn tampered_proof_node_hash_changes_root() {
        let tree = animal_tree();
        let mut proof = tree.proof(2, 5).unwrap();
        let forged = Bytes::from(vec![0u8; proof.proof_in_left[0].hash.len()]);
        proof.proof_in_left[0].hash = forged;
        let root = proof.root().unwrap();
        assert_ne!(root.hash, tree.root());
        // Leaf counts untouched, so the structure still reconstructs.
        assert_eq!(root.left, 1);
        assert_eq!(root.total, 7);
    }

    #[test]
    fn tampered_leaf_count_is_caught() {
        let tree = animal_tree();
        let mut proof = tree.proof(2, 5).unwrap();
        // Claim the left sibling covers two leaves instead of one.
        proof.proof_in_left[0].num_of_leaf = 2;
        assert!(matches!(proof.root(), Err(MbtError::Verify(_))));
    }

    #[test]
    fn tampered_level_is_caught() {
        let tree = animal_tree();
        let mut proof = tree.proof(2, 5).unwrap();
        proof.proof_in_right[0].level += 1;
        assert!(matches!(proof.root(), Err(MbtError::Verify(_))));
    }

    #[test]
    fn proof_of_all_reconstructs_without_siblings() {
        let tree = animal_tree();
        let root = tree.proof(1, 7).unwrap().root().unwrap();
        assert_eq!(root.hash, tree.root());
        assert_eq!(root.left, 0);
        assert_eq!(root.total, 7);
    }
}
