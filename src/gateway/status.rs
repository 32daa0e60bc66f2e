//! Gateway status codes carried by error replies.

/// Status reported by the gateway in an error reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    NoError,
    ProcessingError,
    MissingDeviceToken,
    MissingTopic,
    MissingPayload,
    InvalidTokenSize,
    InvalidTopicSize,
    InvalidPayloadSize,
    InvalidToken,
    /// The gateway is recycling the connection; reconnect and resend
    Shutdown,
    ProtocolError,
    Unknown,
    /// A code outside the documented table
    Unrecognized(u8),
}

impl From<u8> for GatewayStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => GatewayStatus::NoError,
            1 => GatewayStatus::ProcessingError,
            2 => GatewayStatus::MissingDeviceToken,
            3 => GatewayStatus::MissingTopic,
            4 => GatewayStatus::MissingPayload,
            5 => GatewayStatus::InvalidTokenSize,
            6 => GatewayStatus::InvalidTopicSize,
            7 => GatewayStatus::InvalidPayloadSize,
            8 => GatewayStatus::InvalidToken,
            10 => GatewayStatus::Shutdown,
            128 => GatewayStatus::ProtocolError,
            255 => GatewayStatus::Unknown,
            other => GatewayStatus::Unrecognized(other),
        }
    }
}

impl GatewayStatus {
    /// Wire value of the status
    pub fn code(&self) -> u8 {
        match self {
            GatewayStatus::NoError => 0,
            GatewayStatus::ProcessingError => 1,
            GatewayStatus::MissingDeviceToken => 2,
            GatewayStatus::MissingTopic => 3,
            GatewayStatus::MissingPayload => 4,
            GatewayStatus::InvalidTokenSize => 5,
            GatewayStatus::InvalidTopicSize => 6,
            GatewayStatus::InvalidPayloadSize => 7,
            GatewayStatus::InvalidToken => 8,
            GatewayStatus::Shutdown => 10,
            GatewayStatus::ProtocolError => 128,
            GatewayStatus::Unknown => 255,
            GatewayStatus::Unrecognized(code) => *code,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            GatewayStatus::NoError => "No error",
            GatewayStatus::ProcessingError => "Processing error",
            GatewayStatus::MissingDeviceToken => "Missing device token",
            GatewayStatus::MissingTopic => "Missing topic",
            GatewayStatus::MissingPayload => "Missing payload",
            GatewayStatus::InvalidTokenSize => "Invalid token size",
            GatewayStatus::InvalidTopicSize => "Invalid topic size",
            GatewayStatus::InvalidPayloadSize => "Invalid payload size",
            GatewayStatus::InvalidToken => "Invalid token",
            GatewayStatus::Shutdown => "Shutdown",
            GatewayStatus::ProtocolError => "Protocol error",
            GatewayStatus::Unknown => "Unknown",
            GatewayStatus::Unrecognized(_) => "Unrecognized status",
        }
    }

    /// Whether the notification should simply be resent on a new connection.
    ///
    /// Every other status is terminal for the identified notification.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayStatus::Shutdown)
    }

    /// Label value used for metrics
    pub fn as_label(&self) -> &'static str {
        match self {
            GatewayStatus::NoError => "no_error",
            GatewayStatus::ProcessingError => "processing_error",
            GatewayStatus::MissingDeviceToken => "missing_device_token",
            GatewayStatus::MissingTopic => "missing_topic",
            GatewayStatus::MissingPayload => "missing_payload",
            GatewayStatus::InvalidTokenSize => "invalid_token_size",
            GatewayStatus::InvalidTopicSize => "invalid_topic_size",
            GatewayStatus::InvalidPayloadSize => "invalid_payload_size",
            GatewayStatus::InvalidToken => "invalid_token",
            GatewayStatus::Shutdown => "shutdown",
            GatewayStatus::ProtocolError => "protocol_error",
            GatewayStatus::Unknown => "unknown",
            GatewayStatus::Unrecognized(_) => "unrecognized",
        }
    }
}
