//! The relay orchestrator: ingests source blocks, segments the backlog,
//! submits segments, and reconciles verifier results.
//!
//! One task owns the backlog and drives everything through a select loop;
//! the receiver stream, the destination status stream, and per-segment
//! result polls all feed it over channels. The first unrecoverable error
//! from any task terminates the pipeline.

use std::sync::Arc;
use std::time::Duration;

use bmr_mbt::{Hasher, MerkleBinaryTree};
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::backlog::{Backlog, BlockData};
use crate::error::{RelayError, RevertAction, TransportError};
use crate::message::{GetResultParam, Segment, TransactionResult};
use crate::traits::{CursorStore, Receiver, Sender, SourceBlock};
use crate::types::{Cursor, LinkStatus};

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Source height the verifier trusts from genesis; relaying starts
    /// above it when no cursor exists.
    pub offset: i64,
    /// Average block intervals, used only to estimate the destination
    /// height reached while a source block is in flight.
    pub src_block_interval_ms: i64,
    pub dst_block_interval_ms: i64,
    pub result_poll_interval: Duration,
    pub submit_backoff: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            offset: 0,
            src_block_interval_ms: 1000,
            dst_block_interval_ms: 1000,
            result_poll_interval: Duration::from_secs(1),
            submit_backoff: Duration::from_secs(3),
        }
    }
}

/// Terminal report of one segment's result poll.
#[derive(Debug)]
enum PollOutcome {
    Confirmed {
        message: u64,
        segment: u64,
        result: TransactionResult,
    },
    /// The transaction expired before execution; submit it again.
    Resubmit { message: u64, segment: u64 },
    Reverted {
        message: u64,
        segment: u64,
        code: crate::error::RevertCode,
    },
}

pub struct Relay {
    receiver: Arc<dyn Receiver>,
    sender: Arc<dyn Sender>,
    store: Arc<dyn CursorStore>,
    hasher: Arc<dyn Hasher>,
    cfg: RelayConfig,
}

impl Relay {
    pub fn new(
        receiver: Arc<dyn Receiver>,
        sender: Arc<dyn Sender>,
        store: Arc<dyn CursorStore>,
        hasher: Arc<dyn Hasher>,
        cfg: RelayConfig,
    ) -> Self {
        Relay {
            receiver,
            sender,
            store,
            hasher,
            cfg,
        }
    }

    pub async fn run(self: Arc<Self>, shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let res = self.run_inner(shutdown).await;
        if let Err(err) = &res {
            error!(?err, "relay pipeline terminated");
        }
        res
    }

    async fn run_inner(
        self: Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let link = self.receiver.source().clone();
        let mut cursor = self.store.get(&link).await?.unwrap_or(Cursor {
            src_height: self.cfg.offset,
            dst_height: 0,
        });
        let mut status = self.sender.get_status().await?;
        let mut backlog = Backlog::new(link.clone(), &status);

        let (tx_err, mut rx_err) = mpsc::channel::<RelayError>(4);
        let (tx_blocks, mut rx_blocks) = mpsc::channel::<SourceBlock>(64);
        let (tx_status, mut rx_status) = mpsc::channel::<LinkStatus>(16);
        let (tx_outcome, mut rx_outcome) = mpsc::channel::<PollOutcome>(64);

        let start_height = cursor.src_height + 1;
        let start_seq = status.rx_seq + 1;
        {
            let receiver = self.receiver.clone();
            let err = tx_err.clone();
            tokio::spawn(async move {
                if let Err(e) = receiver.receive_loop(start_height, start_seq, tx_blocks).await {
                    let _ = err.send(e).await;
                }
            });
        }
        {
            let sender = self.sender.clone();
            let from = status.height.max(cursor.dst_height);
            let err = tx_err.clone();
            tokio::spawn(async move {
                if let Err(e) = sender.monitor_loop(from, tx_status).await {
                    let _ = err.send(e).await;
                }
            });
        }
        info!(%link, height = start_height, seq = start_seq, "relay started");

        loop {
            tokio::select! {
                Some(block) = rx_blocks.recv() => {
                    self.on_source_block(&mut backlog, &mut cursor, &status, block).await?;
                    self.relay_pending(&mut backlog, &tx_outcome, &tx_err).await?;
                }
                Some(fresh) = rx_status.recv() => {
                    if backlog.diverged(&fresh) {
                        warn!(
                            verifier_height = fresh.verifier_height,
                            rx_seq = fresh.rx_seq,
                            "verifier behind confirmed progress, rewinding"
                        );
                        backlog.rewind(&fresh);
                        cursor.dst_height = fresh.height;
                        self.store.set(&link, &cursor).await?;
                    }
                    status = fresh;
                    self.relay_pending(&mut backlog, &tx_outcome, &tx_err).await?;
                }
                Some(outcome) = rx_outcome.recv() => {
                    match outcome {
                        PollOutcome::Confirmed { message, segment, result } => {
                            debug!(message, segment, "segment confirmed");
                            backlog.confirm(message, segment, result);
                            cursor.dst_height = status.height;
                            self.store.set(&link, &cursor).await?;
                        }
                        PollOutcome::Resubmit { message, segment } => {
                            warn!(message, segment, "transaction expired, resubmitting");
                            backlog.clear_submission(message, segment);
                        }
                        PollOutcome::Reverted { message, segment, code } => {
                            match code.action() {
                                RevertAction::Rewind => {
                                    let fresh = self.sender.get_status().await?;
                                    warn!(message, segment, %code, "verifier reverted, rewinding");
                                    backlog.rewind(&fresh);
                                    status = fresh;
                                    cursor.dst_height = status.height;
                                    self.store.set(&link, &cursor).await?;
                                }
                                RevertAction::Retry => {
                                    warn!(message, segment, %code, "verifier ahead, retrying");
                                    backlog.clear_submission(message, segment);
                                }
                                RevertAction::Fatal => {
                                    return Err(RelayError::Revert(code).into());
                                }
                            }
                        }
                    }
                    self.relay_pending(&mut backlog, &tx_outcome, &tx_err).await?;
                }
                Some(e) = rx_err.recv() => {
                    return Err(e.into());
                }
                _ = shutdown.recv() => {
                    info!("relay stopping");
                    self.receiver.stop_receive_loop().await;
                    self.sender.stop_monitor_loop().await;
                    return Ok(());
                }
                else => return Ok(()),
            }
        }
    }

    /// Ingest one finalized source block: build the inclusion tree over
    /// its event messages, append it to the backlog, and move the source
    /// cursor forward before any segmentation runs.
    async fn on_source_block(
        &self,
        backlog: &mut Backlog,
        cursor: &mut Cursor,
        status: &LinkStatus,
        block: SourceBlock,
    ) -> Result<(), RelayError> {
        let height = block.height();
        if height <= cursor.src_height {
            // Reconnecting receivers may replay; the cursor only moves forward.
            return Ok(());
        }
        let contents: Vec<Bytes> = block
            .receipts
            .iter()
            .flat_map(|rp| rp.events.iter().map(|ev| ev.message.clone()))
            .collect();
        let tree = if contents.is_empty() {
            None
        } else {
            Some(MerkleBinaryTree::with_contents(
                self.hasher.clone(),
                contents,
            )?)
        };
        let bd = BlockData {
            block,
            tree,
            height_of_dst: self.estimate_dst_height(status, cursor.src_height, height),
        };
        if let Some(root) = bd.message_root() {
            debug!(height, root = %hex::encode(&root), "block ingested");
        } else {
            debug!(height, "block ingested");
        }
        backlog.ingest(bd);
        cursor.src_height = height;
        self.store.set(backlog.link(), cursor).await?;
        Ok(())
    }

    /// Destination height reached while the source advanced from `from`
    /// to `to`, scaled by block intervals. A pacing hint, nothing more.
    fn estimate_dst_height(&self, status: &LinkStatus, from: i64, to: i64) -> i64 {
        if self.cfg.dst_block_interval_ms <= 0 {
            return status.height;
        }
        status.height + (to - from) * self.cfg.src_block_interval_ms / self.cfg.dst_block_interval_ms
    }

    /// Package and segment the unsegmented tail of the backlog, then
    /// submit every segment without an in-flight result poll, in order.
    async fn relay_pending(
        &self,
        backlog: &mut Backlog,
        tx_outcome: &mpsc::Sender<PollOutcome>,
        tx_err: &mpsc::Sender<RelayError>,
    ) -> Result<(), RelayError> {
        backlog.package();

        let mut segmented = Vec::new();
        for rm in &backlog.messages {
            if rm.segmented {
                continue;
            }
            // Packing errors mean an element can never fit a transaction;
            // fatal for the chain pairing.
            let segments = self.sender.segment(rm, backlog.confirmed_height())?;
            segmented.push((rm.id, segments));
        }
        for (id, segments) in segmented {
            backlog.assign_segments(id, segments);
        }
        backlog.prune();

        let pending: Vec<(u64, Segment)> = backlog
            .messages
            .iter()
            .flat_map(|rm| {
                rm.segments
                    .iter()
                    .filter(|s| s.get_result_param.is_none() && s.transaction_result.is_none())
                    .map(move |s| (rm.id, s.clone()))
            })
            .collect();
        for (message, seg) in pending {
            let param = self.submit(&seg).await?;
            if let Some(stored) = backlog.segment_mut(message, seg.id) {
                stored.get_result_param = Some(param.clone());
            }
            debug!(message, segment = seg.id, height = seg.height, "segment submitted");
            self.spawn_poll(message, seg.id, param, tx_outcome.clone(), tx_err.clone());
        }
        Ok(())
    }

    /// Submit one segment, backing off while the destination's transaction
    /// pool is saturated or unreachable.
    async fn submit(&self, seg: &Segment) -> Result<GetResultParam, RelayError> {
        loop {
            match self.sender.relay(seg).await {
                Ok(param) => return Ok(param),
                Err(RelayError::Transport(
                    TransportError::PoolOverflow | TransportError::ConnectionRefused,
                )) => {
                    warn!(segment = seg.id, "submission backed off");
                    tokio::time::sleep(self.cfg.submit_backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn spawn_poll(
        &self,
        message: u64,
        segment: u64,
        param: GetResultParam,
        tx_outcome: mpsc::Sender<PollOutcome>,
        tx_err: mpsc::Sender<RelayError>,
    ) {
        let sender = self.sender.clone();
        let interval = self.cfg.result_poll_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match sender.get_result(&param).await {
                    Ok(result) => {
                        let _ = tx_outcome
                            .send(PollOutcome::Confirmed {
                                message,
                                segment,
                                result,
                            })
                            .await;
                        return;
                    }
                    Err(RelayError::Transport(
                        TransportError::Pending
                        | TransportError::Executing
                        | TransportError::ConnectionRefused,
                    )) => continue,
                    Err(RelayError::Transport(TransportError::Expired)) => {
                        let _ = tx_outcome
                            .send(PollOutcome::Resubmit { message, segment })
                            .await;
                        return;
                    }
                    Err(RelayError::Revert(code)) => {
                        let _ = tx_outcome
                            .send(PollOutcome::Reverted {
                                message,
                                segment,
                                code,
                            })
                            .await;
                        return;
                    }
                    Err(e) => {
                        let _ = tx_err.send(e).await;
                        return;
                    }
                }
            }
        });
    }
}
