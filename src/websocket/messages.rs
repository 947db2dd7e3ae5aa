// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2015-2025 Nautech Systems Pty Ltd. All rights reserved.
//  https://nautechsystems.io
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Data structures for Avanza CometD frames.
//!
//! The transport unit in both directions is a JSON array of frame objects;
//! every frame carries a `channel` and, outbound, a monotonically increasing
//! `id`. Meta channels (`/meta/*`) carry protocol-control replies which are
//! decoded into typed structs; every other channel carries subscribed data and
//! is kept as an opaque payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::AvanzaWsError;
use crate::common::consts::{
    COMETD_CONNECTION_TYPE, COMETD_MINIMUM_VERSION, COMETD_VERSION, HANDSHAKE_ADVICE_INTERVAL_MS,
    HANDSHAKE_ADVICE_TIMEOUT_MS, SUPPORTED_CONNECTION_TYPES,
};

// Meta channel names
pub const META_HANDSHAKE: &str = "/meta/handshake";
pub const META_CONNECT: &str = "/meta/connect";
pub const META_SUBSCRIBE: &str = "/meta/subscribe";
pub const META_DISCONNECT: &str = "/meta/disconnect";

/// Handshake request sent to open (or reopen) a logical session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeRequest {
    pub id: u64,
    pub channel: &'static str,
    pub version: &'static str,
    pub minimum_version: &'static str,
    pub supported_connection_types: Vec<&'static str>,
    pub ext: HandshakeExt,
    pub advice: HandshakeAdvice,
}

/// Extension block carrying the caller-supplied push subscription id.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeExt {
    pub subscription_id: String,
}

/// Advice block sent with every handshake frame.
#[derive(Debug, Clone, Serialize)]
pub struct HandshakeAdvice {
    pub timeout: u64,
    pub interval: u64,
}

impl HandshakeRequest {
    /// Creates a new handshake frame with the given message id.
    #[must_use]
    pub fn new(id: u64, push_subscription_id: &str) -> Self {
        Self {
            id,
            channel: META_HANDSHAKE,
            version: COMETD_VERSION,
            minimum_version: COMETD_MINIMUM_VERSION,
            supported_connection_types: SUPPORTED_CONNECTION_TYPES.to_vec(),
            ext: HandshakeExt {
                subscription_id: push_subscription_id.to_string(),
            },
            advice: HandshakeAdvice {
                timeout: HANDSHAKE_ADVICE_TIMEOUT_MS,
                interval: HANDSHAKE_ADVICE_INTERVAL_MS,
            },
        }
    }
}

/// Connect (long-poll) frame keeping the logical session alive.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub id: u64,
    pub channel: &'static str,
    pub client_id: String,
    pub connection_type: &'static str,
}

impl ConnectRequest {
    #[must_use]
    pub fn new(id: u64, client_id: &str) -> Self {
        Self {
            id,
            channel: META_CONNECT,
            client_id: client_id.to_string(),
            connection_type: COMETD_CONNECTION_TYPE,
        }
    }
}

/// Subscribe frame registering interest in one subscription string.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub id: u64,
    pub channel: &'static str,
    pub client_id: String,
    pub subscription: String,
}

impl SubscribeRequest {
    #[must_use]
    pub fn new(id: u64, client_id: &str, subscription: &str) -> Self {
        Self {
            id,
            channel: META_SUBSCRIBE,
            client_id: client_id.to_string(),
            subscription: subscription.to_string(),
        }
    }
}

/// Server reconnect advice values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectAdvice {
    /// Resend the connect frame (possibly after `interval` ms).
    Retry,
    /// The session is gone; a full re-handshake is required.
    Handshake,
    /// Stop reconnecting.
    None,
}

/// Server-supplied hints guiding retry/keep-alive behavior.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Advice {
    pub timeout: Option<u64>,
    pub interval: Option<i64>,
    pub reconnect: Option<ReconnectAdvice>,
}

/// Reply to a handshake frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeReply {
    #[serde(default)]
    pub successful: bool,
    pub client_id: Option<String>,
    pub advice: Option<Advice>,
    pub error: Option<String>,
}

/// Reply to a connect frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectReply {
    #[serde(default)]
    pub successful: bool,
    pub advice: Option<Advice>,
    pub error: Option<String>,
}

/// Acknowledgement of a subscribe frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeReply {
    #[serde(default = "default_true")]
    pub successful: bool,
    pub subscription: Option<String>,
    pub error: Option<String>,
}

const fn default_true() -> bool {
    true
}

/// Inbound frame on a data (non-meta) channel.
#[derive(Debug, Clone)]
pub struct DataFrame {
    /// The channel string, identical to the subscription string it matches.
    pub channel: String,
    /// The channel-specific payload (`data` field when present, otherwise the
    /// whole frame object).
    pub payload: Value,
    /// Error field carried on the frame, if any.
    pub error: Option<String>,
}

/// Decoded inbound frame variants.
#[derive(Debug, Clone)]
pub enum AvanzaWsMessage {
    /// Reply on `/meta/handshake`.
    Handshake(HandshakeReply),
    /// Reply on `/meta/connect`.
    Connect(ConnectReply),
    /// Acknowledgement on `/meta/subscribe`.
    Subscribe(SubscribeReply),
    /// Server-initiated `/meta/disconnect`.
    Disconnect,
    /// Data frame for a subscribed (or unknown) channel.
    Data(DataFrame),
}

/// Encodes one outbound frame as the wire-level single-element JSON array.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_frame<T: Serialize>(frame: &T) -> Result<String, AvanzaWsError> {
    serde_json::to_string(std::slice::from_ref(frame)).map_err(AvanzaWsError::from)
}

/// Decodes the wire-level JSON array into individual frame values.
///
/// # Errors
///
/// Returns an error if the text is not a JSON array.
pub fn decode_frames(text: &str) -> Result<Vec<Value>, AvanzaWsError> {
    serde_json::from_str(text).map_err(AvanzaWsError::from)
}

/// Parses a single frame value, dispatching on the channel name.
///
/// # Errors
///
/// Returns an error if the frame has no `channel` field or a meta reply does
/// not match its expected shape.
pub fn parse_frame(value: Value) -> Result<AvanzaWsMessage, AvanzaWsError> {
    let channel = value
        .get("channel")
        .and_then(Value::as_str)
        .ok_or_else(|| AvanzaWsError::Protocol("frame missing 'channel' field".to_string()))?
        .to_string();

    match channel.as_str() {
        META_HANDSHAKE => Ok(AvanzaWsMessage::Handshake(serde_json::from_value(value)?)),
        META_CONNECT => Ok(AvanzaWsMessage::Connect(serde_json::from_value(value)?)),
        META_SUBSCRIBE => Ok(AvanzaWsMessage::Subscribe(serde_json::from_value(value)?)),
        META_DISCONNECT => Ok(AvanzaWsMessage::Disconnect),
        _ => {
            let error = value
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_owned);
            let mut value = value;
            let payload = match value.get_mut("data") {
                Some(data) => data.take(),
                None => value,
            };
            Ok(AvanzaWsMessage::Data(DataFrame {
                channel,
                payload,
                error,
            }))
        }
    }
}
