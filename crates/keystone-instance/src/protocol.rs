//! Line protocol between a launching process and the owning instance
//!
//! Every message is one line holding a JSON document wrapped in `[...]`,
//! so a stray partial write never parses as a valid message.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use keystone_core::prelude::*;

/// Sent by a launching process to the owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchMessage {
    /// `true` only for the process that became the owner; forwarders send `false`
    pub first_launch: bool,
    /// Absolute paths to open, in command-line order
    pub paths: Vec<PathBuf>,
}

/// Owner's reply. Carries no payload beyond the acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub accepted: usize,
}

/// Strip the outer brackets from a protocol line.
pub(crate) fn strip_brackets(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        Some(&trimmed[1..trimmed.len() - 1])
    } else {
        None
    }
}

/// Encode a message as a protocol line (including the trailing newline).
pub fn encode<T: Serialize>(message: &T) -> Result<String> {
    let json = serde_json::to_string(message)?;
    Ok(format!("[{}]\n", json))
}

/// Decode a protocol line.
pub fn decode<T: for<'de> Deserialize<'de>>(line: &str) -> Result<T> {
    let inner = strip_brackets(line)
        .ok_or_else(|| Error::protocol(format!("unframed line: {:?}", line.trim())))?;
    Ok(serde_json::from_str(inner)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_brackets() {
        assert_eq!(strip_brackets("[{\"a\":1}]\n"), Some("{\"a\":1}"));
        assert_eq!(strip_brackets("{\"a\":1}"), None);
    }

    #[test]
    fn test_encode_is_single_framed_line() {
        let line = encode(&LaunchMessage {
            first_launch: false,
            paths: vec![PathBuf::from("/tmp/y.foo")],
        })
        .unwrap();
        assert!(line.starts_with('['));
        assert!(line.ends_with("]\n"));
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn test_decode_launch_message() {
        let msg: LaunchMessage =
            decode("[{\"first_launch\":false,\"paths\":[\"/a\",\"/b\"]}]").unwrap();
        assert!(!msg.first_launch);
        assert_eq!(msg.paths, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }

    #[test]
    fn test_decode_rejects_unframed() {
        let err = decode::<Ack>("{\"accepted\":1}").unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_decode_rejects_garbage_json() {
        let err = decode::<Ack>("[not json]").unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }
}
