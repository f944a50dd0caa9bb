//! Direct relay: point-to-point chat delivery over gRPC.
//!
//! A node is both a server (accepting `MessageSender/Send` calls on its
//! listen port) and a client (issuing `Send` calls to one configured
//! peer). The `Ack` returned by `Send` is a transport formality; the
//! client discards it and never treats it as a delivery receipt.
//!
//! Inbound messages and outbound failures are posted as
//! [`chatrelay_types::RelayEvent`]s on a bounded channel owned by the
//! caller.
//!
//! # Modules
//!
//! - [`config`]: `DirectConfig` (listen address, peer endpoint, retry, timeouts).
//! - [`message_service`]: `MessageSender` gRPC implementation.
//! - [`server`]: `RelayServer` lifecycle (`Unbound → Listening → Stopped`).
//! - [`client`]: `DirectClient` fire-and-forget sender.

pub mod client;
pub mod config;
pub mod message_service;
pub mod server;

// Re-exports for consumers.
pub use client::DirectClient;
pub use config::DirectConfig;
pub use server::{RelayServer, ServerState};
