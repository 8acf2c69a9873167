//! Hash function seam for the Merkle Binary Tree.

use bytes::Bytes;
use sha3::{Digest, Sha3_256};

/// Digest function used for leaves and internal nodes.
///
/// The tree treats digests as opaque byte strings, so chains with other
/// digest widths can plug in their own implementation.
pub trait Hasher: Send + Sync + std::fmt::Debug {
    fn hash(&self, data: &[u8]) -> Bytes;
}

/// Default SHA3-256 hasher.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha3Hasher;

impl Hasher for Sha3Hasher {
    fn hash(&self, data: &[u8]) -> Bytes {
        let mut hasher = Sha3_256::new();
        hasher.update(data);
        Bytes::copy_from_slice(&hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha3_known_vector() {
        let hasher = Sha3Hasher;
        // SHA3-256 of the empty string
        assert_eq!(
            hex::encode(hasher.hash(b"")),
            "a7ffc6f8bf1ed76651c14756a061d662f580ff4de43b49fa82d80a4b80f8434a"
        );
        assert_eq!(
            hex::encode(hasher.hash(b"dog")),
            "05cd98fdecc74538182a123f3d91e031833da3e9b0a2558d6652e48bf318a1b2"
        );
    }
}
