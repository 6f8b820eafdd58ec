//! Domain types shared by the rekey engine and the key container.
//!
//! Nothing in this module performs I/O.  Field ranges are checked when a
//! value is constructed so that an out-of-range keyset, SLN or RSI can never
//! reach the wire.

pub mod algorithm;
pub mod key_item;
pub mod partition;

pub use algorithm::AlgorithmId;
pub use key_item::{CmdKeyItem, DomainError, KeyStatus, Rsi, RsiItem};
pub use partition::{partition_keys, KeyBatch, PartitionError};
