//! Chat node: the message-delivery core as seen by a UI shell.
//!
//! A [`ChatNode`] runs the direct relay, the queue relay, or both. The
//! UI talks to it only through channels:
//!
//! - UI → core: [`NodeCommand`]s, usually via a [`ChatHandle`] whose
//!   methods never block.
//! - core → UI: [`chatrelay_types::RelayEvent`]s on one bounded
//!   channel that the UI drains on its own thread. The core never calls
//!   UI code.

pub mod command;
mod event_loop;
pub mod node;

pub use command::{ChatHandle, NodeCommand, NodeStatus};
pub use node::{ChatNode, NodeConfig, NodeState};
