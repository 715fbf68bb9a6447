//! Console chat transport
//!
//! Drives the orchestrator from a terminal: parses commands, prints
//! approval prompts and renders session events.

pub mod command;
pub mod display;

pub use command::{parse_command, ConsoleCommand, HELP};
pub use display::{
    format_approval_request, format_status, render_diagnostic_report, ConsoleTransport,
    EventRenderer,
};
