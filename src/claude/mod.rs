//! Claude Code integration
//!
//! This module handles CLI command building, permission modes,
//! stream-json message decoding and the subprocess agent.

pub mod cli;
pub mod message;
pub mod permissions;
pub mod process;
