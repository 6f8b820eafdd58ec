//! Infrastructure layer for the key fill host.
//!
//! Contains the adapters that touch the outside world: byte transports to the
//! KFD adapter or the network relay, the session protocols spoken over them,
//! and configuration storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `kfd_core`, but MUST NOT be imported by `kfd_core`.

pub mod relay;
pub mod session;
pub mod storage;
pub mod transport;
