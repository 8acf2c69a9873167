//! Relay messages and the segments packed from them.

use bytes::Bytes;

use crate::types::{BlockProof, BlockUpdate, BtpAddress, EventProof, ReceiptProof};

/// Opaque handle for polling a submitted segment's result, produced by the
/// `Sender` collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetResultParam(pub Bytes);

/// Opaque confirmed-transaction result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionResult(pub Bytes);

/// The witness anchoring a segment: either the block updates it carries or
/// a block proof for updates delivered in an earlier segment. An explicit
/// discriminant, so consumers never downcast opaque payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockWitness {
    Updates(Vec<BlockUpdate>),
    Proof(BlockProof),
}

impl BlockWitness {
    pub fn number_of_block_update(&self) -> usize {
        match self {
            BlockWitness::Updates(updates) => updates.len(),
            BlockWitness::Proof(_) => 0,
        }
    }
}

/// The event proofs of one receipt included in a segment. `proof` is the
/// receipt's own inclusion proof, carried once per segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptChunk {
    pub height: i64,
    pub index: usize,
    pub proof: Bytes,
    pub event_proofs: Vec<EventProof>,
}

/// Packed payload of one destination-chain transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPayload {
    pub witness: BlockWitness,
    pub receipts: Vec<ReceiptChunk>,
}

impl SegmentPayload {
    /// Serialized size in bytes, the quantity bounded by the transaction
    /// size limit.
    pub fn size(&self) -> usize {
        let witness = match &self.witness {
            BlockWitness::Updates(updates) => updates
                .iter()
                .map(|bu| bu.header.len() + bu.proof.len())
                .sum(),
            BlockWitness::Proof(bp) => bp.size(),
        };
        let receipts: usize = self
            .receipts
            .iter()
            .map(|rc| {
                rc.proof.len()
                    + rc.event_proofs
                        .iter()
                        .map(|ep| ep.proof.len())
                        .sum::<usize>()
            })
            .sum();
        witness + receipts
    }
}

/// One destination-chain transaction's worth of packed relay payload plus
/// its submission/result handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Orchestrator-assigned identity, stable across backlog mutation.
    pub id: u64,
    pub payload: SegmentPayload,
    pub get_result_param: Option<GetResultParam>,
    pub transaction_result: Option<TransactionResult>,
    /// Height of the last block update (or the block proof) in the payload.
    pub height: i64,
    pub number_of_block_update: usize,
    /// Sequence of the last event included; meaningful only when
    /// `number_of_event > 0`.
    pub event_sequence: i64,
    pub number_of_event: usize,
}

/// The unit of submission: everything pending for one link, aggregated
/// until it is segmented into transaction-sized pieces.
#[derive(Debug, Clone)]
pub struct RelayMessage {
    pub id: u64,
    pub from: BtpAddress,
    pub block_updates: Vec<BlockUpdate>,
    pub block_proof: Option<BlockProof>,
    pub receipt_proofs: Vec<ReceiptProof>,
    /// Sequence of the first event this message carries (next expected by
    /// the destination when the message was assembled).
    pub seq: i64,
    /// Destination height observed when this message was assembled.
    /// Best-effort estimate, never correctness-bearing.
    pub height_of_dst: i64,
    pub segments: Vec<Segment>,
    /// Set once the segmenter has consumed the message's data.
    pub segmented: bool,
}

impl RelayMessage {
    pub fn new(id: u64, from: BtpAddress, seq: i64, height_of_dst: i64) -> Self {
        RelayMessage {
            id,
            from,
            block_updates: Vec::new(),
            block_proof: None,
            receipt_proofs: Vec::new(),
            seq,
            height_of_dst,
            segments: Vec::new(),
            segmented: false,
        }
    }

    /// True while any contained data is unconsumed or any segment's result
    /// is still outstanding.
    pub fn has_wait(&self) -> bool {
        if self.segments.iter().any(|s| s.transaction_result.is_none()) {
            return true;
        }
        !self.segmented && (!self.block_updates.is_empty() || !self.receipt_proofs.is_empty())
    }

    /// Remove the segment at `index`, shifting subsequent entries left.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range. Out-of-range removal is a
    /// programming error; callers must bounds-check.
    pub fn remove_segment(&mut self, index: usize) -> Segment {
        self.segments.remove(index)
    }
}
