//! Size-bounded packing of one relay message into ordered segments.
//!
//! Concatenating the produced segments reproduces the message exactly once,
//! in height order, with no segment's serialized payload exceeding the
//! destination transaction size limit. An atomic element that cannot fit a
//! fresh segment on its own is a terminal packing error.

use std::mem;

use tracing::debug;

use crate::error::RelayError;
use crate::message::{BlockWitness, ReceiptChunk, RelayMessage, Segment, SegmentPayload};
use crate::types::{BlockProof, EventProof, ReceiptProof};

/// Pack `rm` into segments of at most `limit` serialized bytes. Block
/// updates at or below `height_confirmed` are skipped; the verifier
/// already trusts them.
pub fn segment(
    rm: &RelayMessage,
    height_confirmed: i64,
    limit: usize,
) -> Result<Vec<Segment>, RelayError> {
    let mut packer = Packer::new(limit, rm.block_proof.as_ref());

    for bu in &rm.block_updates {
        if bu.height <= height_confirmed {
            continue;
        }
        let size = bu.header.len() + bu.proof.len();
        if size > limit {
            return Err(RelayError::BlockUpdateProofOversize {
                height: bu.height,
                size,
                limit,
            });
        }
        if packer.size + size > limit {
            packer.flush()?;
        }
        packer.size += size;
        packer.height = bu.height;
        packer.updates.push(bu.clone());
    }

    if let Some(bp) = rm.block_proof.as_ref() {
        let size = bp.size();
        if size > limit {
            return Err(RelayError::BlockProofOversize { size, limit });
        }
    }

    // Sequence of the last consumed event; events normally carry their own.
    let mut seq = rm.seq - 1;
    for rp in &rm.receipt_proofs {
        for (i, ep) in rp.event_proofs.iter().enumerate() {
            seq = rp.events.get(i).map(|ev| ev.sequence).unwrap_or(seq + 1);
            packer.add_event(rp, ep, seq)?;
        }
    }

    packer.finish()
}

/// Running accumulator for the segment being packed.
struct Packer<'a> {
    limit: usize,
    block_proof: Option<&'a BlockProof>,
    segments: Vec<Segment>,
    updates: Vec<crate::types::BlockUpdate>,
    receipts: Vec<ReceiptChunk>,
    size: usize,
    height: i64,
    number_of_event: usize,
    event_sequence: i64,
    /// Whether the accumulator carries the block proof as its witness.
    anchored: bool,
}

impl<'a> Packer<'a> {
    fn new(limit: usize, block_proof: Option<&'a BlockProof>) -> Self {
        Packer {
            limit,
            block_proof,
            segments: Vec::new(),
            updates: Vec::new(),
            receipts: Vec::new(),
            size: 0,
            height: 0,
            number_of_event: 0,
            event_sequence: 0,
            anchored: false,
        }
    }

    fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.receipts.is_empty()
    }

    /// A receipt-phase accumulator without block updates needs the block
    /// proof as its witness, so each flushed segment stays independently
    /// verifiable.
    fn ensure_anchor(&mut self) -> Result<(), RelayError> {
        if !self.updates.is_empty() || self.anchored {
            return Ok(());
        }
        let bp = self.block_proof.ok_or(RelayError::MissingBlockWitness)?;
        self.size += bp.size();
        self.height = bp.height;
        self.anchored = true;
        Ok(())
    }

    fn add_event(
        &mut self,
        rp: &ReceiptProof,
        ep: &EventProof,
        sequence: i64,
    ) -> Result<(), RelayError> {
        self.ensure_anchor()?;
        let open = self
            .receipts
            .last()
            .is_some_and(|rc| rc.height == rp.height && rc.index == rp.index);
        let mut size = ep.proof.len() + if open { 0 } else { rp.proof.len() };
        if self.size + size > self.limit {
            // The flush makes room, unless nothing has been packed at all:
            // then the element can never fit and the message is unrelayable.
            if self.segments.is_empty() && self.is_empty() {
                return Err(RelayError::EventProofOversize {
                    size: self.size + size,
                    limit: self.limit,
                });
            }
            self.flush()?;
            self.ensure_anchor()?;
            size = ep.proof.len() + rp.proof.len();
            if self.size + size > self.limit {
                return Err(RelayError::EventProofOversize {
                    size: self.size + size,
                    limit: self.limit,
                });
            }
        }
        self.size += size;
        match self.receipts.last_mut() {
            Some(rc) if rc.height == rp.height && rc.index == rp.index => {
                rc.event_proofs.push(ep.clone());
            }
            _ => self.receipts.push(ReceiptChunk {
                height: rp.height,
                index: rp.index,
                proof: rp.proof.clone(),
                event_proofs: vec![ep.clone()],
            }),
        }
        self.number_of_event += 1;
        self.event_sequence = sequence;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), RelayError> {
        let witness = if !self.updates.is_empty() {
            BlockWitness::Updates(mem::take(&mut self.updates))
        } else if self.anchored {
            let bp = self.block_proof.ok_or(RelayError::MissingBlockWitness)?;
            BlockWitness::Proof(bp.clone())
        } else {
            return Err(RelayError::MissingBlockWitness);
        };
        let payload = SegmentPayload {
            witness,
            receipts: mem::take(&mut self.receipts),
        };
        debug!(
            size = self.size,
            height = self.height,
            events = self.number_of_event,
            "segment flushed"
        );
        self.segments.push(Segment {
            id: self.segments.len() as u64,
            number_of_block_update: payload.witness.number_of_block_update(),
            payload,
            get_result_param: None,
            transaction_result: None,
            height: self.height,
            event_sequence: self.event_sequence,
            number_of_event: self.number_of_event,
        });
        self.size = 0;
        self.number_of_event = 0;
        self.anchored = false;
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<Segment>, RelayError> {
        // The final accumulator, however small, becomes the last segment.
        if !self.is_empty() {
            self.flush()?;
        }
        Ok(self.segments)
    }
}
