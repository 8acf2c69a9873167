//! In-memory relay backlog: pending block data, pending relay messages,
//! and the sequence bookkeeping that ties them to the verifier's progress.
//!
//! The backlog is the one shared structure of the pipeline. It lives behind
//! a single `tokio::sync::Mutex` owned by the orchestrator; the lock is
//! never held across collaborator I/O and never nested.

use bmr_mbt::MerkleBinaryTree;
use bytes::Bytes;
use tracing::debug;

use crate::message::{RelayMessage, Segment};
use crate::traits::SourceBlock;
use crate::types::{BtpAddress, LinkStatus};

/// One ingested source block, retained until the verifier's height passes
/// it so a rewind can rebuild relay messages without re-fetching.
pub(crate) struct BlockData {
    pub block: SourceBlock,
    /// Inclusion tree over the block's event messages, present when the
    /// block carries at least one.
    pub tree: Option<MerkleBinaryTree>,
    /// Best-effort estimate of the destination height at delivery time.
    /// A hint for pacing, never a correctness-bearing value.
    pub height_of_dst: i64,
}

impl BlockData {
    pub fn height(&self) -> i64 {
        self.block.height()
    }

    pub fn message_root(&self) -> Option<Bytes> {
        self.tree.as_ref().map(|t| t.root())
    }
}

pub(crate) struct Backlog {
    from: BtpAddress,
    /// Ascending by height. `blocks[..packaged]` are already inside
    /// `messages`; the rest is the unpackaged tail.
    blocks: Vec<BlockData>,
    packaged: usize,
    pub messages: Vec<RelayMessage>,
    /// Next event sequence to package into a relay message.
    next_seq: i64,
    /// Watermarks established by confirmed segments. A status report
    /// behind these means the verifier diverged and the backlog rewinds.
    confirmed_height: i64,
    confirmed_seq: i64,
    next_message_id: u64,
    next_segment_id: u64,
}

impl Backlog {
    pub fn new(from: BtpAddress, status: &LinkStatus) -> Self {
        Backlog {
            from,
            blocks: Vec::new(),
            packaged: 0,
            messages: Vec::new(),
            next_seq: status.rx_seq + 1,
            confirmed_height: status.verifier_height,
            confirmed_seq: status.rx_seq,
            next_message_id: 1,
            next_segment_id: 1,
        }
    }

    pub fn ingest(&mut self, bd: BlockData) {
        self.blocks.push(bd);
    }

    /// Package the unpackaged tail of block data into a fresh relay
    /// message. Returns false when there is nothing to package.
    pub fn package(&mut self) -> bool {
        if self.packaged == self.blocks.len() {
            return false;
        }
        let mut rm = RelayMessage::new(
            self.next_message_id,
            self.from.clone(),
            self.next_seq,
            self.blocks[self.blocks.len() - 1].height_of_dst,
        );
        self.next_message_id += 1;
        for bd in &self.blocks[self.packaged..] {
            rm.block_updates.push(bd.block.update.clone());
            if !bd.block.receipts.is_empty() {
                // Anchor for receipt-phase segments that flush past the
                // last block update: the newest message-bearing block's
                // header plus its message-tree root.
                rm.block_proof = Some(crate::types::BlockProof {
                    height: bd.height(),
                    header: bd.block.update.header.clone(),
                    proof: bd.message_root().unwrap_or_default(),
                });
            }
            for rp in &bd.block.receipts {
                for ev in &rp.events {
                    self.next_seq = self.next_seq.max(ev.sequence + 1);
                }
                rm.receipt_proofs.push(rp.clone());
            }
        }
        self.packaged = self.blocks.len();
        debug!(id = rm.id, seq = rm.seq, "relay message packaged");
        self.messages.push(rm);
        true
    }

    /// Record freshly produced segments on a message, assigning each a
    /// backlog-unique identity.
    pub fn assign_segments(&mut self, message_id: u64, mut segments: Vec<Segment>) {
        for seg in &mut segments {
            seg.id = self.next_segment_id;
            self.next_segment_id += 1;
        }
        if let Some(rm) = self.messages.iter_mut().find(|rm| rm.id == message_id) {
            rm.segments = segments;
            rm.segmented = true;
        }
    }

    pub fn segment_mut(&mut self, message_id: u64, segment_id: u64) -> Option<&mut Segment> {
        self.messages
            .iter_mut()
            .find(|rm| rm.id == message_id)?
            .segments
            .iter_mut()
            .find(|s| s.id == segment_id)
    }

    /// Mark a segment as accepted by the verifier, advance the confirmed
    /// watermarks, and drop everything fully consumed.
    pub fn confirm(
        &mut self,
        message_id: u64,
        segment_id: u64,
        result: crate::message::TransactionResult,
    ) {
        if let Some(seg) = self.segment_mut(message_id, segment_id) {
            let height = seg.height;
            let events = seg.number_of_event;
            let sequence = seg.event_sequence;
            seg.transaction_result = Some(result);
            self.confirmed_height = self.confirmed_height.max(height);
            if events > 0 {
                self.confirmed_seq = self.confirmed_seq.max(sequence);
            }
        }
        self.prune();
    }

    /// Clear a segment's submission handle so the next relay pass sends
    /// it again.
    pub fn clear_submission(&mut self, message_id: u64, segment_id: u64) {
        if let Some(seg) = self.segment_mut(message_id, segment_id) {
            seg.get_result_param = None;
            seg.transaction_result = None;
        }
    }

    /// True when the verifier's reported progress is behind what confirmed
    /// segments established, meaning the destination diverged.
    pub fn diverged(&self, status: &LinkStatus) -> bool {
        status.verifier_height < self.confirmed_height || status.rx_seq < self.confirmed_seq
    }

    /// Truncate back to the verifier's reported position: drop every relay
    /// message, keep only block data the verifier has not yet covered, and
    /// realign the sequence bookkeeping. Applying the same status twice is
    /// a no-op the second time.
    pub fn rewind(&mut self, status: &LinkStatus) {
        self.messages.clear();
        self.blocks.retain(|bd| bd.height() > status.verifier_height);
        self.packaged = 0;
        self.next_seq = status.rx_seq + 1;
        self.confirmed_height = status.verifier_height;
        self.confirmed_seq = status.rx_seq;
        debug!(
            height = status.verifier_height,
            rx_seq = status.rx_seq,
            retained = self.blocks.len(),
            "backlog rewound"
        );
    }

    /// Drop fully confirmed messages and block data the verifier's height
    /// has passed.
    pub fn prune(&mut self) {
        self.messages.retain(|rm| rm.has_wait());
        let confirmed = self.confirmed_height;
        let before = self.blocks.len();
        self.blocks.retain(|bd| bd.height() > confirmed);
        let removed = before - self.blocks.len();
        self.packaged = self.packaged.saturating_sub(removed);
    }

    pub fn confirmed_height(&self) -> i64 {
        self.confirmed_height
    }

    /// Source-chain address the backlog (and its cursor record) belongs to.
    pub fn link(&self) -> &BtpAddress {
        &self.from
    }

    #[cfg(test)]
    pub fn depth(&self) -> (usize, usize) {
        (self.blocks.len(), self.messages.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockUpdate, Event, ReceiptProof};

    fn address() -> BtpAddress {
        "btp://0x1.icon/cx0000000000000000000000000000000000000000"
            .parse()
            .unwrap()
    }

    fn block(height: i64, sequences: &[i64]) -> BlockData {
        let receipts = if sequences.is_empty() {
            Vec::new()
        } else {
            vec![ReceiptProof {
                height,
                index: 0,
                proof: Bytes::from_static(b"rp"),
                event_proofs: sequences
                    .iter()
                    .map(|_| crate::types::EventProof {
                        index: 0,
                        proof: Bytes::from_static(b"ep"),
                    })
                    .collect(),
                events: sequences
                    .iter()
                    .map(|seq| Event {
                        next: address(),
                        sequence: *seq,
                        message: Bytes::from_static(b"m"),
                    })
                    .collect(),
            }]
        };
        BlockData {
            block: SourceBlock {
                update: BlockUpdate {
                    height,
                    block_hash: Bytes::new(),
                    header: Bytes::from_static(b"h"),
                    proof: Bytes::from_static(b"p"),
                },
                receipts,
            },
            tree: None,
            height_of_dst: height + 100,
        }
    }

    fn status(verifier_height: i64, rx_seq: i64) -> LinkStatus {
        LinkStatus {
            rx_seq,
            verifier_height,
            height: verifier_height + 100,
        }
    }

    #[test]
    fn packages_the_unpackaged_tail_once() {
        let mut backlog = Backlog::new(address(), &status(10, 0));
        backlog.ingest(block(11, &[1]));
        backlog.ingest(block(12, &[2, 3]));

        assert!(backlog.package());
        assert!(!backlog.package());
        assert_eq!(backlog.messages.len(), 1);
        assert_eq!(backlog.messages[0].seq, 1);
        assert_eq!(backlog.messages[0].block_updates.len(), 2);

        backlog.ingest(block(13, &[4]));
        assert!(backlog.package());
        assert_eq!(backlog.messages[1].seq, 4);
    }

    #[test]
    fn rewind_is_idempotent() {
        let mut backlog = Backlog::new(address(), &status(10, 0));
        for h in 11..=15 {
            backlog.ingest(block(h, &[h - 10]));
        }
        backlog.package();

        let st = status(13, 3);
        backlog.rewind(&st);
        let after_first = backlog.depth();
        assert_eq!(after_first, (2, 0));

        backlog.rewind(&st);
        assert_eq!(backlog.depth(), after_first);

        // Retained blocks repackage starting from the verifier's sequence.
        assert!(backlog.package());
        assert_eq!(backlog.messages[0].seq, 4);
        assert_eq!(backlog.messages[0].block_updates[0].height, 14);
    }

    #[test]
    fn confirm_advances_watermarks_and_prunes() {
        let mut backlog = Backlog::new(address(), &status(10, 0));
        backlog.ingest(block(11, &[1]));
        backlog.package();
        let rm_id = backlog.messages[0].id;
        let segments = vec![Segment {
            id: 0,
            payload: crate::message::SegmentPayload {
                witness: crate::message::BlockWitness::Updates(vec![]),
                receipts: vec![],
            },
            get_result_param: None,
            transaction_result: None,
            height: 11,
            number_of_block_update: 1,
            event_sequence: 1,
            number_of_event: 1,
        }];
        backlog.assign_segments(rm_id, segments);
        let seg_id = backlog.messages[0].segments[0].id;

        backlog.confirm(rm_id, seg_id, crate::message::TransactionResult(Bytes::new()));
        assert_eq!(backlog.depth(), (0, 0));
        assert_eq!(backlog.confirmed_height(), 11);
        assert!(backlog.diverged(&status(10, 0)));
        assert!(!backlog.diverged(&status(11, 1)));
    }
}
