//! Wire protocol for the chatrelay message-delivery core.
//!
//! Both delivery mechanisms carry the same protobuf `Envelope`: the
//! direct relay as the argument of its single gRPC call, the queue
//! relay as the raw payload of each queued message.
//!
//! # Modules
//!
//! - [`codec`]: `encode` / `decode` between [`chatrelay_types::Envelope`]
//!   and wire bytes.
//! - [`proto`]: prost messages and tonic stubs generated from
//!   `proto/chatrelay.proto`.

pub mod codec;

/// Generated protobuf/gRPC code from `proto/chatrelay.proto`.
pub mod proto {
    tonic::include_proto!("chatrelay");
}

pub use codec::{
    check_size, decode, encode, encode_for_send, from_wire, to_wire, MAX_ENVELOPE_BYTES,
};
