//! Subcommand implementations

pub mod call;
pub mod describe;
pub mod info;
pub mod list;
