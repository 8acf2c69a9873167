//! Seams between the orchestrator and the two chains it connects.
//!
//! A `Receiver` watches the source chain and streams finalized block data;
//! a `Sender` submits segments to the relay contract on the destination
//! chain and reports its link status. Both are long-running: the `*_loop`
//! methods only return on shutdown or unrecoverable failure.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::RelayError;
use crate::message::{GetResultParam, Segment, TransactionResult};
use crate::segmenter;
use crate::types::{BlockUpdate, BtpAddress, Cursor, LinkStatus, ReceiptProof};

/// One finalized source block, as delivered by a [`Receiver`].
#[derive(Debug, Clone)]
pub struct SourceBlock {
    pub update: BlockUpdate,
    pub receipts: Vec<ReceiptProof>,
}

impl SourceBlock {
    pub fn height(&self) -> i64 {
        self.update.height
    }
}

/// Source-chain monitor. Emits every finalized block at or above the
/// requested height, in order, with the receipt proofs for events destined
/// for `dst` filtered by sequence.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Receiver: Send + Sync {
    /// Stream finalized blocks starting at `height` into `blocks`. Events
    /// with sequence below `seq` are dropped from the receipt proofs.
    /// Returns when the channel closes or the source connection is lost
    /// beyond recovery.
    async fn receive_loop(
        &self,
        height: i64,
        seq: i64,
        blocks: mpsc::Sender<SourceBlock>,
    ) -> Result<(), RelayError>;

    /// Ask a running [`receive_loop`](Receiver::receive_loop) to return.
    async fn stop_receive_loop(&self);

    /// Address of the relay contract on the source chain.
    fn source(&self) -> &BtpAddress;
}

/// Destination-chain submitter and status monitor.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Sender: Send + Sync {
    /// Hard upper bound on a submitted payload, in serialized bytes.
    fn tx_size_limit(&self) -> usize;

    /// Split a relay message into payloads no larger than
    /// [`tx_size_limit`](Sender::tx_size_limit). `height_confirmed` is the
    /// verifier height already proven on the destination.
    fn segment(
        &self,
        rm: &crate::message::RelayMessage,
        height_confirmed: i64,
    ) -> Result<Vec<Segment>, RelayError> {
        segmenter::segment(rm, height_confirmed, self.tx_size_limit())
    }

    /// Submit one segment's payload; the returned parameter is the handle
    /// for polling its outcome.
    async fn relay(&self, segment: &Segment) -> Result<GetResultParam, RelayError>;

    /// Poll the outcome of a submitted transaction. `Transport(Pending)`
    /// and `Transport(Executing)` mean ask again later; a `Revert` carries
    /// the relay contract's error code.
    async fn get_result(&self, param: &GetResultParam) -> Result<TransactionResult, RelayError>;

    /// Current link status of the relay contract on the destination.
    async fn get_status(&self) -> Result<LinkStatus, RelayError>;

    /// Stream a status snapshot for every new destination block at or
    /// above `height`. Returns when stopped or the connection is lost.
    async fn monitor_loop(
        &self,
        height: i64,
        statuses: mpsc::Sender<LinkStatus>,
    ) -> Result<(), RelayError>;

    /// Ask a running [`monitor_loop`](Sender::monitor_loop) to return.
    async fn stop_monitor_loop(&self);
}

/// Durable relay progress, keyed by the destination link address.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn get(&self, link: &BtpAddress) -> Result<Option<Cursor>, RelayError>;

    async fn set(&self, link: &BtpAddress, cursor: &Cursor) -> Result<(), RelayError>;
}
