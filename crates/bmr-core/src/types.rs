//! Value types exchanged between the relay core and its chain-specific
//! collaborators. Payload fields (`header`, `proof`, `message`) are opaque
//! pre-serialized byte strings; this core never decodes them.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// BTP address in the form `btp://<network>/<contract>`.
///
/// Used as the cursor key and as the destination of an [`Event`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BtpAddress {
    network: String,
    contract: String,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid BTP address: {0}")]
pub struct InvalidBtpAddress(String);

impl BtpAddress {
    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn contract(&self) -> &str {
        &self.contract
    }
}

impl FromStr for BtpAddress {
    type Err = InvalidBtpAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("btp://")
            .ok_or_else(|| InvalidBtpAddress(s.to_owned()))?;
        let (network, contract) = rest
            .split_once('/')
            .ok_or_else(|| InvalidBtpAddress(s.to_owned()))?;
        if network.is_empty() || contract.is_empty() || contract.contains('/') {
            return Err(InvalidBtpAddress(s.to_owned()));
        }
        Ok(BtpAddress {
            network: network.to_owned(),
            contract: contract.to_owned(),
        })
    }
}

impl fmt::Display for BtpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "btp://{}/{}", self.network, self.contract)
    }
}

/// One source-chain block header plus the consensus evidence that extends
/// the destination verifier's trusted view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockUpdate {
    pub height: i64,
    pub block_hash: Bytes,
    pub header: Bytes,
    pub proof: Bytes,
}

/// A single message's inclusion proof within its receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventProof {
    pub index: usize,
    pub proof: Bytes,
}

/// One cross-chain message and its global monotonic sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub next: BtpAddress,
    pub sequence: i64,
    pub message: Bytes,
}

/// All cross-chain messages emitted by one transaction receipt at a given
/// height. `event_proofs` and `events` are parallel lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptProof {
    pub height: i64,
    pub index: usize,
    pub proof: Bytes,
    pub event_proofs: Vec<EventProof>,
    pub events: Vec<Event>,
}

/// Evidence anchoring a block whose update was delivered earlier, so a
/// receipt-only segment remains independently verifiable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockProof {
    pub height: i64,
    pub header: Bytes,
    /// Merkle root over the block's messages, produced by the per-block
    /// accumulator at ingestion.
    pub proof: Bytes,
}

impl BlockProof {
    pub fn size(&self) -> usize {
        self.header.len() + self.proof.len()
    }
}

/// Destination verifier's view of link progress, as reported by the
/// `Sender` collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkStatus {
    /// Sequence of the last event the destination has received.
    pub rx_seq: i64,
    /// Source height the destination verifier currently trusts.
    pub verifier_height: i64,
    /// Destination block height at which this status was observed.
    pub height: i64,
}

/// Persisted recovery checkpoint, one record per source chain address.
/// `src_height` is the last source height ingested; `dst_height` the last
/// destination height observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cursor {
    pub src_height: i64,
    pub dst_height: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn btp_address_round_trip() {
        let addr: BtpAddress = "btp://0x1.icon/cx87ed9048b594b95199f326fc76e76a9d33dd665b"
            .parse()
            .unwrap();
        assert_eq!(addr.network(), "0x1.icon");
        assert_eq!(
            addr.to_string(),
            "btp://0x1.icon/cx87ed9048b594b95199f326fc76e76a9d33dd665b"
        );
    }

    #[test]
    fn btp_address_rejects_malformed() {
        assert!("http://x/y".parse::<BtpAddress>().is_err());
        assert!("btp://netonly".parse::<BtpAddress>().is_err());
        assert!("btp:///contract".parse::<BtpAddress>().is_err());
        assert!("btp://net/a/b".parse::<BtpAddress>().is_err());
    }
}
