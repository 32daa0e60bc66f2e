//! Gateway protocol and transport.
//!
//! - `codec`: binary frame and error reply encoding
//! - `status`: status codes and their retry classification
//! - `connection`: lifecycle of the single outbound session
//! - `tls`: production TLS connector
//! - `backoff`: reconnect delay calculation

mod backoff;
pub mod codec;
mod connection;
mod status;
mod tls;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use codec::{
    decode_error_reply, decode_frame, decode_token, encode_frame, encode_token, DeviceToken,
    ErrorReply, Frame, FrameError, ReplyError, TokenError, DEVICE_TOKEN_LEN, ERROR_REPLY_LEN,
    MAX_PAYLOAD_LEN, PRIORITY_IMMEDIATE,
};
pub use connection::{ConnectionError, ConnectionManager, ConnectionState, Connector, GatewayStream};
pub use status::GatewayStatus;
pub use tls::TlsConnector;

#[cfg(test)]
pub(crate) use connection::testing;
