//! Session coordination core
//!
//! Stream channels multiplex user input into a live agent exchange, the
//! permission coordinator turns tool authorization into a wait on a remote
//! human decision, and the orchestrator ties both to persisted sessions.

pub mod agent;
pub mod channel;
pub mod orchestrator;
pub mod permission;
pub mod store;
pub mod tool;
