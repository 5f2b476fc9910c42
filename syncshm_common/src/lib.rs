//! SyncShm Common Library
//!
//! Shared constants and configuration loading for the SyncShm workspace.
//! Both handshake roles read the same values from here, so the segment name
//! and payload capacity are agreed upon in one place.
//!
//! # Module Structure
//!
//! - [`consts`] - Segment name, payload capacity and protocol timings
//! - [`config`] - TOML configuration loading and the handshake config sections
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use syncshm_common::consts::*;
//! use syncshm_common::config::{ConfigLoader, HandshakeConfig};
//! ```

pub mod config;
pub mod consts;
pub mod prelude;
