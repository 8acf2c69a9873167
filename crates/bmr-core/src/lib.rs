//! Chain-agnostic relay core: data model, size-bounded segmentation, and
//! the orchestration state machine that drives block data from a source
//! chain to a verifier contract on a destination chain.
//!
//! Chain-specific wire clients plug in through the [`Receiver`] and
//! [`Sender`] traits; durable progress goes through [`CursorStore`].

mod backlog;
pub mod error;
pub mod message;
pub mod relay;
pub mod segmenter;
pub mod traits;
pub mod types;

pub use error::{RelayError, RevertAction, RevertCode, TransportError};
pub use message::{
    BlockWitness, GetResultParam, ReceiptChunk, RelayMessage, Segment, SegmentPayload,
    TransactionResult,
};
pub use relay::{Relay, RelayConfig};
pub use segmenter::segment;
pub use traits::{CursorStore, Receiver, Sender, SourceBlock};
pub use types::{
    BlockProof, BlockUpdate, BtpAddress, Cursor, Event, EventProof, LinkStatus, ReceiptProof,
};
