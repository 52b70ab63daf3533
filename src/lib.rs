//! # xsdb
//!
//! An embeddable hierarchical configuration store in the XenStore mold:
//! - Copy-on-write node tree with per-node permissions
//! - Snapshot-isolated transactions with coarse commit-time conflicts
//! - Path-prefix watches with ordered, re-spelled event delivery
//! - Ring-transported wire protocol engine (one session per peer)
//! - Whole-store snapshot codec for save/resume
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Peer Channels                            │
//! │              (one ring pair per domain)                      │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                    WireSession                               │
//! │        (framing, dispatch, event multiplexing)               │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │    Store    │          │   Watches   │
//!   │ (COW tree)  │──fires──▶│ (registry)  │
//!   └──────┬──────┘          └─────────────┘
//!          │
//!          ▼
//!   ┌─────────────┐
//!   │Transactions │
//!   │ (Rc forks)  │
//!   └─────────────┘
//! ```
//!
//! The whole crate is single-threaded by contract: one cooperative event
//! loop owns the store and drives every session.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod path;
pub mod perms;
pub mod store;
pub mod wire;
pub mod snapshot;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, XsError};
pub use config::Config;
pub use perms::{Caller, Perm, PermMode};
pub use store::Store;
pub use wire::WireSession;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of xsdb
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
