//! CLI subcommands.

pub mod assets;
pub mod build;
pub mod config;
pub mod dev;
