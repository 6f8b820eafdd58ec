//! Wire protocols: byte framing, the three-wire KMM wrapper and the KMM codec.

pub mod framing;
pub mod kmm;
pub mod three_wire;

pub use framing::{encode_frame, AdapterModel, FrameDecoder, FrameError, FrameScheme};
pub use kmm::{KmmBody, KmmError, KmmMessage};
pub use three_wire::{unwrap_kmm, wrap_kmm, ThreeWireError};
