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

//! Client for [Avanza](https://www.avanza.se)'s private push-notification protocol.
//!
//! Avanza delivers account, order, and market events through a Bayeux/CometD-style
//! publish-subscribe transport layered over a single persistent WebSocket connection.
//! This crate implements the push-protocol engine: the session handshake, the
//! continuous connect keep-alive ("long poll" over WebSocket), subscription
//! registration with automatic resubscription after a server-initiated re-handshake,
//! and inbound message dispatch to per-subscription queues.
//!
//! The authenticated HTTP session that produces the `pushSubscriptionId` and the
//! session cookie string is an external collaborator: this crate consumes both at
//! connection time and does not know how they were obtained. A small TOTP helper
//! ([`common::totp`]) is provided for login flows that require a time-based
//! one-time password.
//!
//! # Quick start
//!
//! ```no_run
//! use avanza_push::{common::enums::ChannelType, websocket::AvanzaPushClient};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut client = AvanzaPushClient::connect(None, "push-sub-id", "csid=...", None).await?;
//! let mut quotes = client.subscribe_to_id(ChannelType::Quotes, "19002").await?;
//! while let Some(msg) = quotes.next().await {
//!     println!("{}: {}", msg.subscription, msg.payload);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(rustc::all)]
#![deny(unsafe_code)]
#![deny(nonstandard_style)]
#![deny(missing_debug_implementations)]
#![deny(clippy::missing_errors_doc)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod common;
pub mod websocket;
