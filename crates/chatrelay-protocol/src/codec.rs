//! Envelope codec.
//!
//! Serializes an [`Envelope`] to protobuf bytes and back. The encoding
//! is deterministic (fields in tag order, no map fields) and lossless
//! for any UTF-8 `user_name` / `message_text`.
//!
//! | Tag | Field          | Type   | Required |
//! |-----|----------------|--------|----------|
//! | 1   | `user_name`    | string | yes, non-blank |
//! | 2   | `message_text` | string | no, defaults to `""` |
//!
//! Unknown tags are skipped so that peers running a schema with extra
//! optional fields can still talk to this one.

use chatrelay_types::{Envelope, RelayError, Result};
use prost::Message;

use crate::proto;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Largest payload `decode` accepts.
///
/// Also used as the gRPC max decoding size on the direct relay.
pub const MAX_ENVELOPE_BYTES: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Serializes an envelope to protobuf bytes. Never fails.
pub fn encode(envelope: &Envelope) -> Vec<u8> {
    to_wire(envelope).encode_to_vec()
}

/// Serializes an envelope for sending, enforcing [`MAX_ENVELOPE_BYTES`].
///
/// Every payload this returns is accepted by [`decode`], so a message
/// that no receiver could read is refused before it leaves the process.
///
/// # Errors
///
/// Returns [`RelayError::SendFailure`] if the encoded envelope exceeds
/// [`MAX_ENVELOPE_BYTES`].
pub fn encode_for_send(envelope: &Envelope) -> Result<Vec<u8>> {
    check_size(envelope)?;
    Ok(encode(envelope))
}

/// Checks that `envelope` encodes within [`MAX_ENVELOPE_BYTES`].
///
/// # Errors
///
/// Returns [`RelayError::SendFailure`] when it does not.
pub fn check_size(envelope: &Envelope) -> Result<()> {
    let len = to_wire(envelope).encoded_len();
    if len > MAX_ENVELOPE_BYTES {
        return Err(RelayError::SendFailure {
            reason: format!("message is {len} bytes encoded, limit is {MAX_ENVELOPE_BYTES}"),
        });
    }
    Ok(())
}

/// Converts an envelope to its generated protobuf message.
pub fn to_wire(envelope: &Envelope) -> proto::Envelope {
    proto::Envelope {
        user_name: envelope.user_name().to_owned(),
        message_text: envelope.message_text().to_owned(),
    }
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Deserializes an envelope from protobuf bytes.
///
/// # Errors
///
/// Returns [`RelayError::MalformedEnvelope`] when:
///
/// - the input exceeds [`MAX_ENVELOPE_BYTES`],
/// - the bytes are not a valid protobuf encoding (truncated varint or
///   length prefix, invalid wire type, non-UTF-8 string),
/// - `user_name` is missing or blank.
pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    if bytes.len() > MAX_ENVELOPE_BYTES {
        return Err(RelayError::MalformedEnvelope {
            reason: format!(
                "payload is {} bytes, limit is {MAX_ENVELOPE_BYTES}",
                bytes.len()
            ),
        });
    }

    let wire = proto::Envelope::decode(bytes).map_err(|e| RelayError::MalformedEnvelope {
        reason: format!("protobuf decode failed: {e}"),
    })?;

    from_wire(wire)
}

/// Validates a generated protobuf message and converts it to an
/// [`Envelope`].
///
/// Used directly by the gRPC service, where tonic has already parsed
/// the bytes.
pub fn from_wire(wire: proto::Envelope) -> Result<Envelope> {
    Envelope::new(wire.user_name, wire.message_text)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
