//! Control-channel message envelope
//!
//! Messages are opaque typed envelopes: a content-type tag, a byte body,
//! and optional integer-keyed binary headers. Reply correlation is carried
//! by sequence numbers the way the underlying channel assigns them.

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// A typed message envelope exchanged with routers
#[derive(Debug, Clone)]
pub struct Message {
    pub content_type: u32,
    pub body: Bytes,
    pub headers: HashMap<u32, Vec<u8>>,
    /// Sequence of this message, assigned by the sending channel.
    pub sequence: u64,
    /// Sequence of the message this one replies to, if any.
    pub reply_for: Option<u64>,
}

/// Content types of the control protocol
pub mod content {
    pub const CIRCUIT_REQUEST: u32 = 1000;
    pub const CIRCUIT_SUCCESS: u32 = 1001;
    pub const CIRCUIT_FAILED: u32 = 1016;
    pub const ROUTE: u32 = 1021;
    pub const ROUTE_RESULT: u32 = 1022;
    pub const UNROUTE: u32 = 1023;
    pub const DIAL: u32 = 1024;
    pub const FAULT: u32 = 1025;
    pub const START_EGRESS: u32 = 1026;
}

/// Well-known header keys
pub mod header {
    pub const CIRCUIT_ADDRESS: u32 = 1100;
    pub const ROUTE_ATTEMPT: u32 = 1101;
    pub const ROUTE_SUCCESS: u32 = 1102;
    pub const ROUTE_ERROR: u32 = 1103;
    pub const ROUTE_ERROR_CODE: u32 = 1104;
}

/// Route failure error codes carried in [`header::ROUTE_ERROR_CODE`]
pub mod error_code {
    pub const GENERIC: u8 = 0;
    pub const INVALID_TERMINATOR: u8 = 1;
    pub const DIAL_TIMED_OUT: u8 = 2;
    pub const CONNECTION_REFUSED: u8 = 3;
}

impl Message {
    pub fn new(content_type: u32, body: impl Into<Bytes>) -> Self {
        Self {
            content_type,
            body: body.into(),
            headers: HashMap::new(),
            sequence: 0,
            reply_for: None,
        }
    }

    /// Encode a payload into a new message body.
    pub fn with_payload<T: Serialize>(content_type: u32, payload: &T) -> Result<Self, ChannelError> {
        let body = postcard::to_allocvec(payload)?;
        Ok(Self::new(content_type, body))
    }

    /// Decode the body back into a typed payload.
    pub fn decode<'a, T: Deserialize<'a>>(&'a self) -> Result<T, ChannelError> {
        Ok(postcard::from_bytes(&self.body)?)
    }

    /// Mark this message as a reply to another.
    pub fn reply_to(mut self, other: &Message) -> Self {
        self.reply_for = Some(other.sequence);
        self
    }

    pub fn is_reply_to(&self, other: &Message) -> bool {
        self.reply_for == Some(other.sequence)
    }

    pub fn put_u32_header(&mut self, key: u32, value: u32) {
        self.headers.insert(key, value.to_le_bytes().to_vec());
    }

    pub fn get_u32_header(&self, key: u32) -> Option<u32> {
        let bytes = self.headers.get(&key)?;
        Some(u32::from_le_bytes(bytes.as_slice().try_into().ok()?))
    }

    pub fn put_bool_header(&mut self, key: u32, value: bool) {
        self.headers.insert(key, vec![u8::from(value)]);
    }

    pub fn get_bool_header(&self, key: u32) -> bool {
        self.headers
            .get(&key)
            .is_some_and(|v| v.first() == Some(&1))
    }

    pub fn put_byte_header(&mut self, key: u32, value: u8) {
        self.headers.insert(key, vec![value]);
    }

    pub fn put_string_header(&mut self, key: u32, value: &str) {
        self.headers.insert(key, value.as_bytes().to_vec());
    }

    pub fn get_string_header(&self, key: u32) -> Option<String> {
        self.headers
            .get(&key)
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }
}

/// Build a successful route-result acknowledgement for a circuit attempt.
pub fn new_route_result_success(circuit_id: &str, attempt: u32) -> Message {
    let mut msg = Message::new(content::ROUTE_RESULT, circuit_id.as_bytes().to_vec());
    msg.put_u32_header(header::ROUTE_ATTEMPT, attempt);
    msg.put_bool_header(header::ROUTE_SUCCESS, true);
    msg
}

/// Build a failed route-result acknowledgement for a circuit attempt.
pub fn new_route_result_failed(
    circuit_id: &str,
    attempt: u32,
    reason: &str,
    code: u8,
) -> Message {
    let mut msg = Message::new(content::ROUTE_RESULT, circuit_id.as_bytes().to_vec());
    msg.put_u32_header(header::ROUTE_ATTEMPT, attempt);
    msg.put_string_header(header::ROUTE_ERROR, reason);
    msg.put_byte_header(header::ROUTE_ERROR_CODE, code);
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_round_trip() {
        let mut msg = Message::new(content::ROUTE, vec![]);
        msg.put_u32_header(header::ROUTE_ATTEMPT, 3);
        msg.put_bool_header(header::ROUTE_SUCCESS, true);
        msg.put_string_header(header::ROUTE_ERROR, "nope");

        assert_eq!(msg.get_u32_header(header::ROUTE_ATTEMPT), Some(3));
        assert!(msg.get_bool_header(header::ROUTE_SUCCESS));
        assert_eq!(
            msg.get_string_header(header::ROUTE_ERROR).as_deref(),
            Some("nope")
        );
    }

    #[test]
    fn route_result_failure_carries_no_success_flag() {
        let msg = new_route_result_failed("c1", 1, "resource exhausted", error_code::GENERIC);
        assert!(!msg.get_bool_header(header::ROUTE_SUCCESS));
        assert_eq!(msg.get_u32_header(header::ROUTE_ATTEMPT), Some(1));
    }

    #[test]
    fn reply_correlation() {
        let mut request = Message::new(content::CIRCUIT_REQUEST, vec![]);
        request.sequence = 42;
        let response = Message::new(content::CIRCUIT_SUCCESS, vec![]).reply_to(&request);
        assert!(response.is_reply_to(&request));
    }
}
