//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod exec;
pub(crate) mod files;
pub(crate) mod info;
pub(crate) mod upgrade;
pub(crate) mod watch;
