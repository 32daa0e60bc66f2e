//! Binary frame codec for the gateway protocol.
//!
//! A notification frame is a 1-byte command, a 4-byte big-endian length and a
//! sequence of items. Each item is a 1-byte item id, a 2-byte big-endian
//! length and the item data. The gateway only ever answers with a fixed
//! 6-byte error reply, and only when something went wrong.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::status::GatewayStatus;

/// Command byte of a notification frame
pub const FRAME_COMMAND: u8 = 2;
/// Command byte of a gateway error reply
pub const ERROR_REPLY_COMMAND: u8 = 8;
/// Size of a gateway error reply in bytes
pub const ERROR_REPLY_LEN: usize = 6;
/// Size of a binary device token
pub const DEVICE_TOKEN_LEN: usize = 32;
/// Largest payload that fits in a 2-byte item length
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;
/// Priority value asking the gateway to deliver immediately
pub const PRIORITY_IMMEDIATE: u8 = 10;

const FRAME_HEADER_LEN: usize = 5;
const ITEM_HEADER_LEN: usize = 3;

const ITEM_DEVICE_TOKEN: u8 = 1;
const ITEM_PAYLOAD: u8 = 2;
const ITEM_IDENTIFIER: u8 = 3;
const ITEM_EXPIRATION: u8 = 4;
const ITEM_PRIORITY: u8 = 5;

/// Binary device token
pub type DeviceToken = [u8; DEVICE_TOKEN_LEN];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TokenError {
    #[error("device token must be {expected} hex characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("device token is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("payload of {0} bytes exceeds the {MAX_PAYLOAD_LEN} byte item limit")]
    PayloadTooLarge(usize),

    #[error("truncated frame: {0}")]
    Truncated(&'static str),

    #[error("unexpected frame command {0}")]
    UnexpectedCommand(u8),

    #[error("malformed item {id}: {reason}")]
    MalformedItem { id: u8, reason: &'static str },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplyError {
    #[error("expected a {ERROR_REPLY_LEN} byte reply, got {0} bytes")]
    ShortRead(usize),

    #[error("unexpected reply command {0}")]
    UnexpectedCommand(u8),
}

/// Decoded gateway error reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorReply {
    pub status: GatewayStatus,
    /// Identifier of the last notification the gateway resolved
    pub identifier: u32,
}

/// Items carried by a notification frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub device_token: DeviceToken,
    pub payload: Bytes,
    pub identifier: u32,
    /// Expiration epoch seconds, absent when the notification never expires
    pub expiration: Option<u32>,
    pub priority: u8,
}

/// Decode a 64 character hex device token into its binary form.
pub fn decode_token(hex_token: &str) -> Result<DeviceToken, TokenError> {
    let expected = DEVICE_TOKEN_LEN * 2;
    if hex_token.len() != expected {
        return Err(TokenError::InvalidLength {
            expected,
            actual: hex_token.len(),
        });
    }

    let mut token = [0u8; DEVICE_TOKEN_LEN];
    hex::decode_to_slice(hex_token, &mut token)?;
    Ok(token)
}

/// Encode a binary device token as lowercase hex.
pub fn encode_token(token: &DeviceToken) -> String {
    hex::encode(token)
}

/// Build a notification frame.
///
/// `expiration` is an absolute epoch in seconds; zero omits the item so the
/// gateway treats the notification as never expiring.
pub fn encode_frame(
    token: &DeviceToken,
    payload: &[u8],
    identifier: u32,
    expiration: u32,
    priority: u8,
) -> Result<Bytes, FrameError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge(payload.len()));
    }

    let mut items_len = (ITEM_HEADER_LEN + DEVICE_TOKEN_LEN)
        + (ITEM_HEADER_LEN + payload.len())
        + (ITEM_HEADER_LEN + 4)
        + (ITEM_HEADER_LEN + 1);
    if expiration > 0 {
        items_len += ITEM_HEADER_LEN + 4;
    }

    let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + items_len);
    frame.put_u8(FRAME_COMMAND);
    frame.put_u32(items_len as u32);

    put_item(&mut frame, ITEM_DEVICE_TOKEN, token);
    put_item(&mut frame, ITEM_PAYLOAD, payload);
    put_item(&mut frame, ITEM_IDENTIFIER, &identifier.to_be_bytes());
    if expiration > 0 {
        put_item(&mut frame, ITEM_EXPIRATION, &expiration.to_be_bytes());
    }
    put_item(&mut frame, ITEM_PRIORITY, &[priority]);

    Ok(frame.freeze())
}

fn put_item(frame: &mut BytesMut, id: u8, data: &[u8]) {
    frame.put_u8(id);
    frame.put_u16(data.len() as u16);
    frame.put_slice(data);
}

/// Parse a notification frame back into its items.
pub fn decode_frame(raw: &[u8]) -> Result<Frame, FrameError> {
    let mut buf = raw;
    if buf.remaining() < FRAME_HEADER_LEN {
        return Err(FrameError::Truncated("frame header"));
    }
    let command = buf.get_u8();
    if command != FRAME_COMMAND {
        return Err(FrameError::UnexpectedCommand(command));
    }
    let items_len = buf.get_u32() as usize;
    if buf.remaining() != items_len {
        return Err(FrameError::Truncated("frame items"));
    }

    let mut device_token = None;
    let mut payload = None;
    let mut identifier = None;
    let mut expiration = None;
    let mut priority = None;

    while buf.has_remaining() {
        if buf.remaining() < ITEM_HEADER_LEN {
            return Err(FrameError::Truncated("item header"));
        }
        let id = buf.get_u8();
        let len = buf.get_u16() as usize;
        if buf.remaining() < len {
            return Err(FrameError::Truncated("item data"));
        }
        let data = &buf[..len];

        match id {
            ITEM_DEVICE_TOKEN => {
                let token: DeviceToken = data.try_into().map_err(|_| FrameError::MalformedItem {
                    id,
                    reason: "device token must be 32 bytes",
                })?;
                device_token = Some(token);
            }
            ITEM_PAYLOAD => payload = Some(Bytes::copy_from_slice(data)),
            ITEM_IDENTIFIER => identifier = Some(read_u32(id, data)?),
            ITEM_EXPIRATION => expiration = Some(read_u32(id, data)?),
            ITEM_PRIORITY => {
                let [value] = data else {
                    return Err(FrameError::MalformedItem {
                        id,
                        reason: "priority must be 1 byte",
                    });
                };
                priority = Some(*value);
            }
            _ => {
                return Err(FrameError::MalformedItem {
                    id,
                    reason: "unknown item id",
                })
            }
        }
        buf.advance(len);
    }

    Ok(Frame {
        device_token: device_token.ok_or(FrameError::Truncated("missing device token"))?,
        payload: payload.ok_or(FrameError::Truncated("missing payload"))?,
        identifier: identifier.ok_or(FrameError::Truncated("missing identifier"))?,
        expiration,
        priority: priority.ok_or(FrameError::Truncated("missing priority"))?,
    })
}

fn read_u32(id: u8, data: &[u8]) -> Result<u32, FrameError> {
    let bytes: [u8; 4] = data.try_into().map_err(|_| FrameError::MalformedItem {
        id,
        reason: "expected 4 bytes",
    })?;
    Ok(u32::from_be_bytes(bytes))
}

/// Decode a 6-byte gateway error reply.
pub fn decode_error_reply(raw: &[u8]) -> Result<ErrorReply, ReplyError> {
    if raw.len() != ERROR_REPLY_LEN {
        return Err(ReplyError::ShortRead(raw.len()));
    }

    let mut buf = raw;
    let command = buf.get_u8();
    if command != ERROR_REPLY_COMMAND {
        return Err(ReplyError::UnexpectedCommand(command));
    }

    Ok(ErrorReply {
        status: GatewayStatus::from(buf.get_u8()),
        identifier: buf.get_u32(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX_TOKEN: &str = "00a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7eff";

    #[test]
    fn test_decode_token_roundtrip() {
        let token = decode_token(HEX_TOKEN).unwrap();
        assert_eq!(token[0], 0x00);
        assert_eq!(token[1], 0xa1);
        assert_eq!(token[31], 0xff);
        assert_eq!(encode_token(&token), HEX_TOKEN);
    }

    #[test]
    fn test_decode_token_accepts_uppercase() {
        let token = decode_token(&HEX_TOKEN.to_uppercase()).unwrap();
        assert_eq!(encode_token(&token), HEX_TOKEN);
    }

    #[test]
    fn test_decode_token_rejects_wrong_length() {
        let err = decode_token("0123456789").unwrap_err();
        assert_eq!(
            err,
            TokenError::InvalidLength {
                expected: 64,
                actual: 10
            }
        );

        let too_long = format!("{}00", HEX_TOKEN);
        assert!(matches!(
            decode_token(&too_long),
            Err(TokenError::InvalidLength { actual: 66, .. })
        ));
    }

    #[test]
    fn test_decode_token_rejects_invalid_hex() {
        let bad = format!("zz{}", &HEX_TOKEN[2..]);
        assert_eq!(
            decode_token(&bad).unwrap_err(),
            TokenError::InvalidHex(hex::FromHexError::InvalidHexCharacter { c: 'z', index: 0 })
        );
    }

    #[test]
    fn test_hex_is_inverse_for_arbitrary_bytes() {
        let bytes: Vec<u8> = (0..=255u8).collect();
        let encoded = hex::encode(&bytes);
        assert_eq!(hex::decode(encoded).unwrap(), bytes);
    }

    #[test]
    fn test_encode_frame_layout() {
        let token = decode_token(HEX_TOKEN).unwrap();
        let payload = br#"{"aps":{"alert":"hi"}}"#;
        let frame = encode_frame(&token, payload, 1, 0, PRIORITY_IMMEDIATE).unwrap();

        let items_len = 35 + (3 + payload.len()) + 7 + 4;
        assert_eq!(frame.len(), 5 + items_len);
        assert_eq!(frame[0], FRAME_COMMAND);
        assert_eq!(&frame[1..5], &(items_len as u32).to_be_bytes());

        // Item 1: device token
        assert_eq!(frame[5], 1);
        assert_eq!(&frame[6..8], &[0, 32]);
        assert_eq!(&frame[8..40], &token);

        // Item 2: payload
        assert_eq!(frame[40], 2);
        assert_eq!(&frame[41..43], &(payload.len() as u16).to_be_bytes());
        let payload_end = 43 + payload.len();
        assert_eq!(&frame[43..payload_end], payload);

        // Item 3: identifier
        assert_eq!(&frame[payload_end..payload_end + 7], &[3, 0, 4, 0, 0, 0, 1]);

        // Item 5: priority, no expiration item
        assert_eq!(&frame[payload_end + 7..], &[5, 0, 1, 10]);
    }

    #[test]
    fn test_encode_frame_with_expiration() {
        let token = [7u8; DEVICE_TOKEN_LEN];
        let frame = encode_frame(&token, b"{}", 42, 1_700_000_000, PRIORITY_IMMEDIATE).unwrap();

        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.device_token, token);
        assert_eq!(&decoded.payload[..], b"{}");
        assert_eq!(decoded.identifier, 42);
        assert_eq!(decoded.expiration, Some(1_700_000_000));
        assert_eq!(decoded.priority, PRIORITY_IMMEDIATE);
    }

    #[test]
    fn test_encode_frame_rejects_oversized_payload() {
        let token = [0u8; DEVICE_TOKEN_LEN];
        let payload = vec![b'a'; MAX_PAYLOAD_LEN + 1];
        assert_eq!(
            encode_frame(&token, &payload, 1, 0, PRIORITY_IMMEDIATE),
            Err(FrameError::PayloadTooLarge(MAX_PAYLOAD_LEN + 1))
        );
    }

    #[test]
    fn test_decode_frame_rejects_truncated_input() {
        let token = [1u8; DEVICE_TOKEN_LEN];
        let frame = encode_frame(&token, b"{}", 1, 0, PRIORITY_IMMEDIATE).unwrap();
        assert!(decode_frame(&frame[..frame.len() - 1]).is_err());
        assert!(decode_frame(&frame[..3]).is_err());
    }

    #[test]
    fn test_decode_error_reply() {
        let reply = decode_error_reply(&[8, 8, 0, 0, 1, 2]).unwrap();
        assert_eq!(reply.status, GatewayStatus::InvalidToken);
        assert_eq!(reply.identifier, 258);
    }

    #[test]
    fn test_decode_error_reply_shutdown() {
        let reply = decode_error_reply(&[8, 10, 0, 0, 0, 3]).unwrap();
        assert!(reply.status.is_retryable());
        assert_eq!(reply.identifier, 3);
    }

    #[test]
    fn test_decode_error_reply_rejects_wrong_command() {
        assert_eq!(
            decode_error_reply(&[7, 8, 0, 0, 0, 1]),
            Err(ReplyError::UnexpectedCommand(7))
        );
    }

    #[test]
    fn test_decode_error_reply_rejects_short_read() {
        assert_eq!(decode_error_reply(&[8, 8, 0]), Err(ReplyError::ShortRead(3)));
        assert_eq!(decode_error_reply(&[]), Err(ReplyError::ShortRead(0)));
    }
}
