//! Wire-level pieces of the logical-replication COPY-mode sub-protocol:
//! cursor buffers and the control-message structures built on top of them.

pub mod buffer;
pub mod wire;

pub use buffer::{BufferReader, BufferWriter};
pub use wire::{
    HotStandbyFeedbackMessage, KeepaliveMessage, StandbyStatusUpdateMessage, XLogDataMessage,
};
