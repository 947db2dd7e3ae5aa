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

//! Subscription registry and per-subscription delivery queues.
//!
//! Each subscription string (`/{channel}/{id1},{id2},...`) owns exactly one
//! registry entry and one unbounded delivery queue. The feed handler task is
//! the sole writer of the registry; consumers pull messages through their
//! [`SubscriptionHandle`].

use ahash::AHashMap;
use futures_util::Stream;
use serde_json::Value;
use tokio::sync::mpsc;
use ustr::Ustr;

use crate::{
    common::enums::ChannelType,
    websocket::error::{AvanzaWsError, AvanzaWsResult},
};

/// A push message delivered on a subscribed channel.
#[derive(Clone, Debug)]
pub struct PushMessage {
    /// The subscription string the message arrived on.
    pub subscription: String,
    /// The message payload (the frame's `data` field where present).
    pub payload: Value,
}

/// Consumer side of a subscription: a pull-based queue of [`PushMessage`]s.
///
/// Dropping the handle does not unsubscribe; the server keeps pushing until
/// the connection closes, and undeliverable messages are dropped with a log.
#[derive(Debug)]
pub struct SubscriptionHandle {
    subscription: String,
    rx: mpsc::UnboundedReceiver<PushMessage>,
}

impl SubscriptionHandle {
    pub(crate) fn new(subscription: String, rx: mpsc::UnboundedReceiver<PushMessage>) -> Self {
        Self { subscription, rx }
    }

    /// Returns the subscription string this handle receives messages for.
    #[must_use]
    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    /// Receives the next push message, or `None` once the connection is gone.
    pub async fn next(&mut self) -> Option<PushMessage> {
        self.rx.recv().await
    }

    /// Converts the handle into a [`Stream`] of push messages.
    pub fn into_stream(mut self) -> impl Stream<Item = PushMessage> {
        async_stream::stream! {
            while let Some(msg) = self.rx.recv().await {
                yield msg;
            }
        }
    }
}

/// Registry entry: the delivery queue plus the client id the subscription was
/// last confirmed under (used to detect stale bindings after a re-handshake).
#[derive(Debug)]
pub(crate) struct SubscriptionEntry {
    pub tx: mpsc::UnboundedSender<PushMessage>,
    pub bound_client_id: Option<String>,
}

/// Subscription registry owned by the feed handler task.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionRegistry {
    entries: AHashMap<Ustr, SubscriptionEntry>,
}

impl SubscriptionRegistry {
    /// Inserts a new entry, returning `false` if the subscription already exists.
    pub fn insert(&mut self, subscription: Ustr, tx: mpsc::UnboundedSender<PushMessage>) -> bool {
        if self.entries.contains_key(&subscription) {
            return false;
        }
        self.entries.insert(
            subscription,
            SubscriptionEntry {
                tx,
                bound_client_id: None,
            },
        );
        true
    }

    /// Binds a confirmed subscription to the given client id.
    ///
    /// Returns `false` if the subscription string is unknown.
    pub fn confirm(&mut self, subscription: &str, client_id: &str) -> bool {
        let Some(key) = ustr::existing_ustr(subscription) else {
            return false;
        };
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.bound_client_id = Some(client_id.to_string());
                true
            }
            None => false,
        }
    }

    /// Returns the subscriptions not bound to the given client id, i.e. those
    /// that must be re-sent after a re-handshake produced a new session.
    pub fn stale_subscriptions(&self, client_id: &str) -> Vec<Ustr> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.bound_client_id.as_deref() != Some(client_id))
            .map(|(key, _)| *key)
            .collect()
    }

    /// Delivers a payload to the subscription's queue.
    ///
    /// Returns `false` if the channel string has no entry or the consumer side
    /// has been dropped.
    pub fn deliver(&self, channel: &str, payload: Value) -> bool {
        let Some(key) = ustr::existing_ustr(channel) else {
            return false;
        };
        match self.entries.get(&key) {
            Some(entry) => entry
                .tx
                .send(PushMessage {
                    subscription: channel.to_string(),
                    payload,
                })
                .is_ok(),
            None => false,
        }
    }
}

/// Builds the subscription string for a channel and a set of ids.
#[must_use]
pub fn build_subscription_string(channel: ChannelType, ids: &[String]) -> String {
    format!("/{}/{}", channel.as_str(), ids.join(","))
}

/// Validates a subscription request against the channel's id rules.
///
/// # Errors
///
/// Returns an error if `ids` is empty, or if more than one id is given for a
/// channel outside the multi-id allow-list.
pub fn validate_subscription(channel: ChannelType, ids: &[String]) -> AvanzaWsResult<()> {
    if ids.is_empty() {
        return Err(AvanzaWsError::EmptyIds);
    }
    if ids.len() > 1 && !channel.supports_multiple_ids() {
        return Err(AvanzaWsError::MultipleIdsUnsupported(channel));
    }
    Ok(())
}
