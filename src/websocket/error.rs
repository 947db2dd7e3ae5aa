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

//! Avanza push client error types.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::common::enums::ChannelType;

/// Error types for the Avanza push client.
#[derive(Debug, Clone, Error)]
pub enum AvanzaWsError {
    /// Client is not connected.
    #[error("Not connected")]
    NotConnected,
    /// Connection has been closed.
    #[error("Connection closed")]
    Closed,
    /// Transport-level error during WebSocket communication.
    #[error("Transport error: {0}")]
    Transport(String),
    /// Failed to send a frame over the WebSocket.
    #[error("Send error: {0}")]
    Send(String),
    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),
    /// Malformed or unexpected frame.
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// A subscription for the same channel + ids string already exists.
    #[error("Subscription already exists: {0}")]
    DuplicateSubscription(String),
    /// The channel does not accept multiple ids in one subscription.
    #[error("Channel '{0}' does not support multiple ids")]
    MultipleIdsUnsupported(ChannelType),
    /// A subscription requires at least one id.
    #[error("Subscription requires at least one id")]
    EmptyIds,
    /// Handshake rejected by the server (retries exhausted or non-retryable).
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
    /// Bounded wait expired.
    #[error("Timeout: {0}")]
    Timeout(String),
}

impl From<tungstenite::Error> for AvanzaWsError {
    fn from(error: tungstenite::Error) -> Self {
        Self::Transport(error.to_string())
    }
}

impl From<serde_json::Error> for AvanzaWsError {
    fn from(error: serde_json::Error) -> Self {
        Self::Json(error.to_string())
    }
}

/// Result type alias for Avanza push operations.
pub type AvanzaWsResult<T> = Result<T, AvanzaWsError>;
