//! mac-filter: MAC whitelists and blacklists projected onto the iptables
//! `FORWARD` chain.
//!
//! - [`store`] - the two address lists on disk
//! - [`config`] - last applied interface/VLAN/mode
//! - [`rules`] - projection of a list onto an ordered rule plan, and its
//!   reconciling execution
//! - [`platform`] - the [`platform::FilterEngine`] seam and the `iptables` backend
//! - [`app`] - command-line operations wired together

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod logger;
pub mod mac;
pub mod network;
pub mod platform;
pub mod rules;
pub mod store;

pub use error::{FilterError, Result};
pub use mac::MacAddress;
pub use rules::Mode;
