//! Wire frames of the multiplexed transport.

use crate::error::{DbError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Request parameters of a logical channel.
pub type QueryParams = BTreeMap<String, Vec<String>>;

/// One frame. `channel` tags every frame; `start`/`end` open and close the
/// logical channel, `data` carries an encoded payload and `error`
/// terminates the channel.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiplexMessage {
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_params: Option<QueryParams>,
    #[serde(default)]
    pub start: bool,
    #[serde(default)]
    pub end: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MultiplexMessage {
    /// Client request to open `channel`.
    pub fn start(channel: impl Into<String>, path: impl Into<String>, params: QueryParams) -> Self {
        Self {
            channel: channel.into(),
            path: Some(path.into()),
            query_params: Some(params),
            start: true,
            ..Default::default()
        }
    }

    /// Server acknowledgement that `channel` is open.
    pub fn opened(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            start: true,
            ..Default::default()
        }
    }

    pub fn end(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            end: true,
            ..Default::default()
        }
    }

    pub fn data(channel: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            data: Some(data.into()),
            ..Default::default()
        }
    }

    pub fn error(channel: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(frame: &str) -> Result<Self> {
        serde_json::from_str(frame).map_err(|e| DbError::InvalidFrame(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names() {
        let mut params = QueryParams::new();
        params.insert("query".to_string(), vec!["{}".to_string()]);
        let frame = MultiplexMessage::start("c1", "/users", params).encode().unwrap();
        assert_eq!(
            frame,
            r#"{"channel":"c1","path":"/users","queryParams":{"query":["{}"]},"start":true,"end":false}"#
        );
    }

    #[test]
    fn test_decode_defaults() {
        let frame = MultiplexMessage::decode(r#"{"channel":"c1","data":"x"}"#).unwrap();
        assert_eq!(frame, MultiplexMessage::data("c1", "x"));
        assert!(!frame.start && !frame.end);
    }

    #[test]
    fn test_malformed_frame() {
        assert!(matches!(MultiplexMessage::decode("{"), Err(DbError::InvalidFrame(_))));
        assert!(matches!(MultiplexMessage::decode(r#"{"start":true}"#), Err(DbError::InvalidFrame(_))));
    }
}
