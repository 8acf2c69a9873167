//! Merkle Binary Tree accumulator for relay messages
//!
//! This crate maintains a verifiable, incrementally extensible ordered log of
//! opaque contents and produces range proofs: a contiguous slice of the log
//! plus the sibling hashes needed to rebuild the full root. A verifier that
//! trusts a root can check that a proof's contents belong to that log without
//! seeing the rest of it.

pub mod hasher;
pub mod proof;
pub mod tree;

pub use hasher::{Hasher, Sha3Hasher};
pub use proof::{MerkleBinaryTreeProof, ProofNode, ProofRoot};
pub use tree::{MbtError, MerkleBinaryTree};
