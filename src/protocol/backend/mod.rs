//! PostgreSQL backend (server → client) messages.
//!
//! Payloads arrive as [`Frame`](crate::protocol::frame::Frame)s borrowed from
//! the read buffer; the types here decode them on demand.

pub mod auth;
pub mod error;
pub mod query;

pub use auth::{
    AuthenticationMessage, BackendKeyData, NotificationResponse, ParameterStatus, ReadyForQuery,
};
pub use error::{ErrorResponse, NoticeResponse};
pub use query::{CommandComplete, DataRow, RowDescription};

/// Backend message type bytes.
pub mod msg_type {
    pub const AUTHENTICATION: u8 = b'R';
    pub const BACKEND_KEY_DATA: u8 = b'K';
    pub const PARAMETER_STATUS: u8 = b'S';
    pub const READY_FOR_QUERY: u8 = b'Z';
    pub const ROW_DESCRIPTION: u8 = b'T';
    pub const DATA_ROW: u8 = b'D';
    pub const COMMAND_COMPLETE: u8 = b'C';
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';
    pub const ERROR_RESPONSE: u8 = b'E';
    pub const NOTICE_RESPONSE: u8 = b'N';
    pub const NOTIFICATION_RESPONSE: u8 = b'A';
    pub const PARSE_COMPLETE: u8 = b'1';
    pub const BIND_COMPLETE: u8 = b'2';
    pub const CLOSE_COMPLETE: u8 = b'3';
    pub const PARAMETER_DESCRIPTION: u8 = b't';
    pub const NO_DATA: u8 = b'n';
    pub const PORTAL_SUSPENDED: u8 = b's';
    pub const NEGOTIATE_PROTOCOL_VERSION: u8 = b'v';
}

/// Frames the engine consumes itself instead of routing them to the
/// response at the head of the queue.
pub fn is_connection_level(tag: u8) -> bool {
    matches!(
        tag,
        msg_type::PARAMETER_STATUS
            | msg_type::BACKEND_KEY_DATA
            | msg_type::READY_FOR_QUERY
            | msg_type::ERROR_RESPONSE
            | msg_type::NOTICE_RESPONSE
            | msg_type::NOTIFICATION_RESPONSE
    )
}

/// Human-readable name of a backend tag, for log and error messages.
pub fn tag_name(tag: u8) -> &'static str {
    match tag {
        msg_type::AUTHENTICATION => "Authentication",
        msg_type::BACKEND_KEY_DATA => "BackendKeyData",
        msg_type::PARAMETER_STATUS => "ParameterStatus",
        msg_type::READY_FOR_QUERY => "ReadyForQuery",
        msg_type::ROW_DESCRIPTION => "RowDescription",
        msg_type::DATA_ROW => "DataRow",
        msg_type::COMMAND_COMPLETE => "CommandComplete",
        msg_type::EMPTY_QUERY_RESPONSE => "EmptyQueryResponse",
        msg_type::ERROR_RESPONSE => "ErrorResponse",
        msg_type::NOTICE_RESPONSE => "NoticeResponse",
        msg_type::NOTIFICATION_RESPONSE => "NotificationResponse",
        msg_type::PARSE_COMPLETE => "ParseComplete",
        msg_type::BIND_COMPLETE => "BindComplete",
        msg_type::CLOSE_COMPLETE => "CloseComplete",
        msg_type::PARAMETER_DESCRIPTION => "ParameterDescription",
        msg_type::NO_DATA => "NoData",
        msg_type::PORTAL_SUSPENDED => "PortalSuspended",
        msg_type::NEGOTIATE_PROTOCOL_VERSION => "NegotiateProtocolVersion",
        _ => "Unknown",
    }
}
