//! socketpipe CLI
//!
//! Command-line surface for the `socketpipe` binary: client option and role
//! block parsing, the internal `-s` server form, logging setup and error
//! reporting.

pub mod cli;
pub mod output;
