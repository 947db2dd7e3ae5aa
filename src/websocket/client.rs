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

//! Public client for Avanza's CometD push endpoint.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{
    connect_async,
    tungstenite::client::IntoClientRequest,
    tungstenite::http::header::COOKIE,
};
use tracing::{debug, error, warn};
use ustr::Ustr;

use crate::{
    common::{
        consts::{AVANZA_WS_URL, CONNECT_POLL_INTERVAL_MS, DEFAULT_CONNECT_TIMEOUT_SECS},
        enums::ChannelType,
    },
    websocket::{
        PushConnectionState,
        error::AvanzaWsError,
        handler::{HandlerCommand, PushFeedHandler},
        subscription::{
            SubscriptionHandle, build_subscription_string, validate_subscription,
        },
    },
};

/// WebSocket client for Avanza's private CometD push protocol.
///
/// `connect` opens the socket, performs the handshake + connect cycle, and
/// returns once the session is active. Subscriptions are registered with
/// [`subscribe_to_id`](Self::subscribe_to_id) and consumed through the
/// returned [`SubscriptionHandle`]; the session keep-alive and resubscription
/// after server-forced re-handshakes run in a background task.
#[derive(Debug)]
pub struct AvanzaPushClient {
    url: String,
    state: Arc<AtomicU8>,
    failure: Arc<Mutex<Option<AvanzaWsError>>>,
    cmd_tx: mpsc::UnboundedSender<HandlerCommand>,
    subscriptions: Arc<DashMap<Ustr, ()>>,
    read_task: Option<JoinHandle<()>>,
    handler_task: Option<JoinHandle<()>>,
}

impl AvanzaPushClient {
    /// Connects to the push endpoint and waits for the session to become
    /// active.
    ///
    /// `push_subscription_id` comes from the authentication flow and `cookies`
    /// is the raw `Cookie` header value of the authenticated HTTP session.
    /// `timeout_secs` bounds the wait for the first handshake + connect cycle
    /// (default 10s).
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be opened, the connection fails
    /// or closes before becoming active, or the wait times out.
    pub async fn connect(
        url: Option<String>,
        push_subscription_id: &str,
        cookies: &str,
        timeout_secs: Option<f64>,
    ) -> anyhow::Result<Self> {
        let url = url.unwrap_or_else(|| AVANZA_WS_URL.to_string());
        debug!("Connecting to {url}");

        let mut request = url.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert(COOKIE, cookies.parse()?);

        let (ws_stream, _) = connect_async(request).await?;
        let (sink, mut stream) = ws_stream.split();

        let state = Arc::new(AtomicU8::new(PushConnectionState::Connecting.as_u8()));
        let failure = Arc::new(Mutex::new(None));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();

        let read_task = tokio::spawn(async move {
            debug!("Started task 'avanza-push-read'");
            while let Some(result) = stream.next().await {
                match result {
                    Ok(msg) => {
                        if raw_tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Socket read error: {e}");
                        break;
                    }
                }
            }
            debug!("Stopped task 'avanza-push-read'");
        });

        let handler = PushFeedHandler::new(
            state.clone(),
            failure.clone(),
            push_subscription_id.to_string(),
            sink,
            cmd_rx,
            raw_rx,
        );
        let handler_task = tokio::spawn(handler.run());

        let client = Self {
            url,
            state,
            failure,
            cmd_tx,
            subscriptions: Arc::new(DashMap::new()),
            read_task: Some(read_task),
            handler_task: Some(handler_task),
        };

        if let Err(e) = client
            .wait_until_active(timeout_secs.unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS))
            .await
        {
            client.abort_tasks();
            return Err(e.into());
        }

        Ok(client)
    }

    /// Waits until the connection becomes active, polling the shared state.
    async fn wait_until_active(&self, timeout_secs: f64) -> Result<(), AvanzaWsError> {
        let timeout = Duration::from_secs_f64(timeout_secs);
        let poll = Duration::from_millis(CONNECT_POLL_INTERVAL_MS);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match self.connection_state() {
                PushConnectionState::Active => return Ok(()),
                PushConnectionState::Failed => {
                    let stored = self.failure.lock().ok().and_then(|mut slot| slot.take());
                    return Err(stored.unwrap_or_else(|| {
                        AvanzaWsError::Transport(
                            "connection failed before becoming active".to_string(),
                        )
                    }));
                }
                PushConnectionState::Closed => return Err(AvanzaWsError::Closed),
                _ => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AvanzaWsError::Timeout(format!(
                    "connection not active within {timeout_secs}s"
                )));
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn connection_state(&self) -> PushConnectionState {
        PushConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Returns whether the session is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.connection_state() == PushConnectionState::Active
    }

    /// Returns whether the connection is closed or failed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(
            self.connection_state(),
            PushConnectionState::Closed | PushConnectionState::Failed
        )
    }

    /// Returns the endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Subscribes to a channel for a single id.
    ///
    /// # Errors
    ///
    /// Returns an error if an identical subscription already exists or the
    /// connection is gone.
    pub async fn subscribe_to_id(
        &self,
        channel: ChannelType,
        id: &str,
    ) -> Result<SubscriptionHandle, AvanzaWsError> {
        self.subscribe_to_ids(channel, &[id.to_string()]).await
    }

    /// Subscribes to a channel for several ids in one subscription.
    ///
    /// Only the account-scoped channels (`orders`, `deals`, `positions`,
    /// `accounts`) accept more than one id.
    ///
    /// # Errors
    ///
    /// Returns an error if `ids` is empty, the channel does not accept
    /// multiple ids, an identical subscription already exists, or the
    /// connection is gone.
    pub async fn subscribe_to_ids(
        &self,
        channel: ChannelType,
        ids: &[String],
    ) -> Result<SubscriptionHandle, AvanzaWsError> {
        validate_subscription(channel, ids)?;
        if self.is_closed() {
            return Err(AvanzaWsError::Closed);
        }

        let subscription = build_subscription_string(channel, ids);
        let key = Ustr::from(&subscription);

        // Atomic duplicate check; the registry entry itself lives with the
        // handler task.
        if self.subscriptions.insert(key, ()).is_some() {
            return Err(AvanzaWsError::DuplicateSubscription(subscription));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if self
            .cmd_tx
            .send(HandlerCommand::Subscribe {
                subscription: key,
                tx,
            })
            .is_err()
        {
            self.subscriptions.remove(&key);
            return Err(AvanzaWsError::Closed);
        }

        debug!("Subscribing to {subscription}");
        Ok(SubscriptionHandle::new(subscription, rx))
    }

    /// Closes the connection and stops the background tasks.
    pub async fn close(&mut self) {
        debug!("Closing");

        if self.cmd_tx.send(HandlerCommand::Disconnect).is_ok()
            && let Some(task) = self.handler_task.take()
            && tokio::time::timeout(Duration::from_secs(5), task).await.is_err()
        {
            warn!("Timeout waiting for handler task to stop");
        }

        if let Some(task) = self.read_task.take() {
            task.abort();
        }
        self.state
            .store(PushConnectionState::Closed.as_u8(), Ordering::SeqCst);

        debug!("Closed");
    }

    fn abort_tasks(&self) {
        if let Some(task) = &self.read_task {
            task.abort();
        }
        if let Some(task) = &self.handler_task {
            task.abort();
        }
    }
}

impl Drop for AvanzaPushClient {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}
