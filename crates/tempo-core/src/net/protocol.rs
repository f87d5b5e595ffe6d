//! MessagePack encode/decode helpers for the hub wire protocol.

use thiserror::Error;

use super::messages::{ClientMessage, ServerMessage};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum message payload size in bytes. Larger frames are rejected
/// before decode is attempted.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024; // 64 KiB

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message exceeds {MAX_MESSAGE_SIZE} byte limit")]
    TooLarge,
    #[error("failed to decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

pub fn encode_server_message(message: &ServerMessage) -> Result<Vec<u8>, ProtocolError> {
    let bytes = rmp_serde::to_vec_named(message)?;
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge);
    }
    Ok(bytes)
}

pub fn decode_client_message(bytes: &[u8]) -> Result<ClientMessage, ProtocolError> {
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge);
    }
    Ok(rmp_serde::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::RoomUserState;

    #[test]
    fn round_trips_a_server_message() {
        let msg = ServerMessage::UserStateChanged {
            user_id: 1,
            state: RoomUserState::Ready,
        };
        let encoded = encode_server_message(&msg).unwrap();
        // Server->client round trip only needs encode; decode is exercised
        // on the client side, which we don't implement here. We still
        // assert the bytes decode back via the same msgpack layer.
        let decoded: ServerMessage = rmp_serde::from_slice(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn rejects_oversized_messages() {
        let big = vec![0u8; MAX_MESSAGE_SIZE + 1];
        assert!(matches!(decode_client_message(&big), Err(ProtocolError::TooLarge)));
    }
}
