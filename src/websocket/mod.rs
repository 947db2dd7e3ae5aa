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

//! WebSocket push-protocol engine for Avanza's CometD endpoint.
//!
//! - [`client`]: the public surface ([`AvanzaPushClient`]) and the
//!   connect-readiness gate.
//! - [`handler`]: the feed handler task owning the socket, the outbound
//!   message counter, and the protocol state machine.
//! - [`subscription`]: the subscription registry and per-subscription
//!   delivery queues.
//! - [`messages`]: the frame envelope codec.
//! - [`error`]: the error taxonomy.

pub mod client;
pub mod error;
pub mod handler;
pub mod messages;
pub mod subscription;

pub use client::AvanzaPushClient;
pub use error::{AvanzaWsError, AvanzaWsResult};
pub use subscription::{PushMessage, SubscriptionHandle};

/// Connection lifecycle state for the push engine.
///
/// Stored in an `AtomicU8` shared between the client and the feed handler.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushConnectionState {
    /// Socket is open, first handshake + connect cycle not yet complete.
    Connecting = 0,
    /// Steady state: connect keep-alive cycle established.
    Active = 1,
    /// Server forced a re-handshake; keep-alive temporarily interrupted.
    Reconnecting = 2,
    /// Connection closed by an explicit `close()`.
    Closed = 3,
    /// Terminal failure (dead socket, exhausted handshake retries).
    Failed = 4,
}

impl PushConnectionState {
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Active,
            2 => Self::Reconnecting,
            3 => Self::Closed,
            _ => Self::Failed,
        }
    }
}

impl std::fmt::Display for PushConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Connecting => "CONNECTING",
            Self::Active => "ACTIVE",
            Self::Reconnecting => "RECONNECTING",
            Self::Closed => "CLOSED",
            Self::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}
