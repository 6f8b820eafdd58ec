//! Application layer: what the operator can ask the key fill device to do.
//!
//! # Layering (for beginners)
//!
//! ```text
//! main.rs (CLI)
//!    │
//!    ▼
//! application::{ManualRekeyApplication, ContainerService}
//!    │                       │
//!    ▼                       ▼
//! SessionProtocol      kfd_core::KeyContainer + .ekc files
//!    │
//!    ▼
//! FrameTransport (serial bridge, TCP, relay)
//! ```
//!
//! The application types depend only on traits from this module
//! ([`session::SessionProtocol`]) and on `kfd-core`; the concrete links
//! live in `crate::infrastructure`.

pub mod container_service;
pub mod manual_rekey;
pub mod session;

pub use container_service::{check_load_item, ContainerService, ContainerServiceError};
pub use manual_rekey::{ManualRekeyApplication, Session};
pub use session::{RecoveryPolicy, RekeyError, SessionProtocol, TransportRecovery};
