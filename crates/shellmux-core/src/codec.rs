//! JSON text framing for the shell socket.
//!
//! Wire format: one JSON object per WebSocket text message.

use crate::error::ShellResult;

/// Encode a serializable frame into a JSON text message.
pub fn encode_frame<T: serde::Serialize>(value: &T) -> ShellResult<String> {
    Ok(serde_json::to_string(value)?)
}

/// Decode a JSON text message into a typed frame.
pub fn decode_frame<T: serde::de::DeserializeOwned>(text: &str) -> ShellResult<T> {
    Ok(serde_json::from_str(text)?)
}
