//! Command handlers: bridge CLI args -> sync core -> output formatting.

pub mod config_cmd;
pub mod plan;
pub mod replay;
