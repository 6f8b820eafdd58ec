//! # kfd-core
//!
//! Protocol and data core for a P25 key fill device: byte framing, the Key
//! Management Message (KMM) codec, key-load partitioning and the encrypted
//! key container format.
//!
//! Nothing here touches sockets, serial ports or an async runtime.  The
//! `kfd-host` crate drives these pieces over a real transport.
//!
//! # Architecture overview (for beginners)
//!
//! A key fill device (KFD) loads cryptographic keys into P25 radios.  Every
//! exchange with the radio is a KMM: a small binary message with a 10-byte
//! header and a typed body.  On the way to the radio a KMM is wrapped
//! (three-wire frame or DLI preamble) and then byte-framed for the serial
//! adapter.
//!
//! - **`protocol`** – Scheme A / Scheme B byte framing, the three-wire KMM
//!   wrapper and the KMM codec with its closed [`KmmBody`] enum.
//!
//! - **`domain`** – Key-load requests ([`CmdKeyItem`]), per-key results and
//!   the partitioning algorithm that groups keys into KMM-sized batches.
//!
//! - **`container`** – The operator's key/group collection, its encrypted
//!   `.ekc` file format and the key validation rules.

pub mod container;
pub mod domain;
pub mod protocol;

pub use container::ekc::{export_container, export_container_with, import_container, ExportOptions};
pub use container::validate::{fix_parity, is_valid_parity, validate_key, KeyValidationError, KeyWarning};
pub use container::{ContainerError, ContainerKey, KeyContainer, KeyEntry, KeyGroup, KeyType};
pub use domain::{
    partition_keys, AlgorithmId, CmdKeyItem, DomainError, KeyBatch, KeyStatus, PartitionError, Rsi,
    RsiItem,
};
pub use protocol::kmm::{KmmBody, KmmError, KmmMessage, OperationStatus};
pub use protocol::{AdapterModel, FrameDecoder, FrameError, FrameScheme};
