//! flotilla: declarative multipass + k3s cluster orchestration.
//!
//! Given a [`config::ClusterDescriptor`] (node counts, sizing, network
//! layout, feature toggles), the engine computes a concrete topology of VM
//! node specs with deterministic static addresses, renders the k3s
//! bootstrap scripts from templates, and drives each node through its
//! lifecycle (launch / start / stop / delete) by composing ordered command
//! chains against the multipass CLI, while polling and caching each node's
//! observed state from `multipass list --format json`.
//!
//! ```text
//! ClusterDescriptor ──► TopologyBuilder ──► NodeSpecs + rendered scripts
//!                                              │
//!                                              ▼
//!                               VmDriver (one per node)
//!                                 ├─ poll()      ← status timer
//!                                 └─ dispatch()  ← operator actions
//! ```

pub mod cluster;
pub mod config;
pub mod errors;
pub mod logging;
pub mod vm;

pub use errors::{Error, Result};
