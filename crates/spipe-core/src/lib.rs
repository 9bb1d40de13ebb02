//! spipe-core: Core abstractions and configuration for socketpipe
//!
//! This crate provides the data model shared by the rendezvous coordinators,
//! the pipeline launcher and the CLI: role commands, the rendezvous address,
//! the error taxonomy, and the configuration layer.

pub mod config;
pub mod error;
pub mod roles;
pub mod types;

pub use error::{ConfigError, SocketpipeError};
pub use roles::{resolve_roles, RoleSet};
pub use types::{
    exit_code, Direction, PipelineResult, PipelineSpec, RendezvousAddress, Role, RoleCommand,
};
