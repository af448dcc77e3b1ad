//! Core library for `linvol`, a Linode Block Storage volume driver for
//! container hosts.
//!
//! The crate resolves volumes by name, moves their attachment to the local
//! node, waits for the block device to appear, formats it on first use and
//! mounts it under a per-volume directory. Teardown runs the same steps in
//! reverse. Remote calls go through the [`Provider`] trait, implemented for
//! the Linode API by [`LinodeProvider`]; local commands go through
//! [`LocalTools`].

pub mod attach;
pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod hostfs;
pub mod identity;
pub mod linode;
pub mod mount;
pub mod poll;
pub mod provider;
pub mod resolve;
pub mod tags;
pub mod test_support;
pub mod tools;

pub use attach::{Attacher, Attachment};
pub use config::{ConfigError, DriverConfig, DriverSettings, WaitPolicies};
pub use driver::{Capabilities, CreateOptions, Scope, VolumeDriver, VolumeInfo, capabilities};
pub use error::VolumeError;
pub use identity::NodeIdentity;
pub use linode::LinodeProvider;
pub use poll::{PollPolicy, WaitKind};
pub use provider::{Provider, ProviderError, Volume, VolumeId};
pub use tools::{LocalToolError, LocalTools, ProcessCommandRunner, SystemTools, ToolPaths};
