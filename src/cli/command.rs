//! Console command parsing
//!
//! Lines starting with `/` are commands; everything else is user input.

use crate::claude::permissions::PermissionMode;

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Text for the agent
    Input(String),
    /// Abort the running exchange
    Abort,
    /// Print session state and pending approvals
    Status,
    /// Approve a pending tool request
    Approve(String),
    /// Deny a pending tool request
    Deny(String),
    /// Change the session's permission mode
    Mode(PermissionMode),
    /// Forget the session
    Reset,
    /// Print the command list
    Help,
    /// Exit
    Quit,
    /// Blank line
    Empty,
    /// A command that could not be parsed
    Invalid(String),
}

/// Help text listing every command.
pub const HELP: &str = "\
/abort          abort the running exchange
/status         show session state and pending approvals
/approve <id>   allow a pending tool request
/deny <id>      deny a pending tool request
/mode <mode>    set the permission mode for the next exchange
/reset          forget the session
/quit           exit";

/// Parse a console line.
#[must_use]
pub fn parse_command(line: &str) -> ConsoleCommand {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ConsoleCommand::Empty;
    }

    let Some(command) = trimmed.strip_prefix('/') else {
        return ConsoleCommand::Input(trimmed.to_string());
    };

    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let argument = parts.next();
    let extra = parts.next();

    if extra.is_some() {
        return ConsoleCommand::Invalid(format!("/{name} takes at most one argument"));
    }

    match (name, argument) {
        ("abort", None) => ConsoleCommand::Abort,
        ("status", None) => ConsoleCommand::Status,
        ("reset", None) => ConsoleCommand::Reset,
        ("help", None) => ConsoleCommand::Help,
        ("quit" | "exit", None) => ConsoleCommand::Quit,
        ("approve", Some(id)) => ConsoleCommand::Approve(id.to_string()),
        ("deny", Some(id)) => ConsoleCommand::Deny(id.to_string()),
        ("approve" | "deny", None) => {
            ConsoleCommand::Invalid(format!("/{name} needs a request id"))
        }
        ("mode", Some(mode)) => match mode.parse() {
            Ok(mode) => ConsoleCommand::Mode(mode),
            Err(err) => ConsoleCommand::Invalid(err.to_string()),
        },
        ("mode", None) => ConsoleCommand::Invalid("/mode needs a permission mode".to_string()),
        ("abort" | "status" | "reset" | "help" | "quit" | "exit", Some(_)) => {
            ConsoleCommand::Invalid(format!("/{name} takes no argument"))
        }
        _ => ConsoleCommand::Invalid(format!("Unknown command '/{name}', try /help")),
    }
}
