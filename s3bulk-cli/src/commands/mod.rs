//! CLI command implementations.

pub mod common;
pub mod download;
pub mod ls;
pub mod upload;
