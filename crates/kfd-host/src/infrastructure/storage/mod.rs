//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads and writes the host's TOML configuration
//! (timing, relay and adapter settings), falling back to defaults when no
//! file exists yet.  Key containers are not stored here: they are `.ekc`
//! files handled by `application::container_service`.

pub mod config;
