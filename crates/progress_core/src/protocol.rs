//! Wire shapes exchanged with the streaming endpoint.
//!
//! Inbound frames are validated here, at the transport boundary, into
//! [`InboundMessage`]. Frames whose `type` is not recognized become
//! [`InboundMessage::Unknown`] so newer servers do not break older clients.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Number, Value};
use thiserror::Error;

const KIND_DESIGN_READY: &str = "design_ready";
const KIND_IMAGE_UPDATE: &str = "image_update";
const KIND_CONNECTION_REPLACED: &str = "connection_replaced";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not valid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("frame has no string `type` field")]
    MissingKind,
    #[error("invalid `{kind}` payload: {source}")]
    InvalidPayload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// A finished design announced by the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesignReady {
    pub design_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub images: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub image_urls: BTreeMap<String, String>,
    #[serde(default)]
    pub palette_name: Option<String>,
}

/// One pipeline stage finished for one generated file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageUpdate {
    pub file_name: String,
    pub stage: String,
    #[serde(default)]
    pub image_url: Option<String>,
    /// Unix milliseconds; integral floats are accepted.
    #[serde(default, deserialize_with = "lenient_millis")]
    pub timestamp: Option<i64>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_millis<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let number = Option::<Number>::deserialize(deserializer)?;
    Ok(number.and_then(|number| {
        number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|millis| millis.is_finite())
                .map(|millis| millis.round() as i64)
        })
    }))
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    DesignReady(DesignReady),
    ImageUpdate(ImageUpdate),
    /// A newer connection for the same identity took over.
    ConnectionReplaced,
    Unknown { kind: String },
}

impl InboundMessage {
    /// Parses one text frame.
    pub fn from_frame(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingKind)?
            .to_string();

        match kind.as_str() {
            KIND_DESIGN_READY => serde_json::from_value(value)
                .map(InboundMessage::DesignReady)
                .map_err(|source| ProtocolError::InvalidPayload {
                    kind: KIND_DESIGN_READY,
                    source,
                }),
            KIND_IMAGE_UPDATE => serde_json::from_value(value)
                .map(InboundMessage::ImageUpdate)
                .map_err(|source| ProtocolError::InvalidPayload {
                    kind: KIND_IMAGE_UPDATE,
                    source,
                }),
            KIND_CONNECTION_REPLACED => Ok(InboundMessage::ConnectionReplaced),
            _ => Ok(InboundMessage::Unknown { kind }),
        }
    }

    /// The wire discriminant, for logging.
    pub fn kind(&self) -> &str {
        match self {
            InboundMessage::DesignReady(_) => KIND_DESIGN_READY,
            InboundMessage::ImageUpdate(_) => KIND_IMAGE_UPDATE,
            InboundMessage::ConnectionReplaced => KIND_CONNECTION_REPLACED,
            InboundMessage::Unknown { kind } => kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OutboundMessage {
    Authorize { id_token: String },
}
