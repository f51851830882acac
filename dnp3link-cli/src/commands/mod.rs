//! CLI subcommand implementations

pub mod encode;
pub mod scan;
