//! CLI command modules.

pub mod http;
pub mod members;
pub mod status;
