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

//! Feed handler task: owns the write half of the socket, the outbound message
//! counter, and the CometD session state machine.
//!
//! All protocol state (client id, message counter, subscription registry) is
//! confined to this task; the client talks to it through [`HandlerCommand`]s
//! and observes progress through the shared connection-state atomic.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use futures_util::{SinkExt, stream::SplitSink};
use serde::Serialize;
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};
use tracing::{debug, error, warn};
use ustr::Ustr;

use crate::{
    common::consts::{
        HANDSHAKE_RETRY_DELAY_INITIAL_MS, HANDSHAKE_RETRY_DELAY_MAX_MS,
        HANDSHAKE_RETRY_MAX_ATTEMPTS,
    },
    websocket::{
        PushConnectionState,
        error::{AvanzaWsError, AvanzaWsResult},
        messages::{
            Advice, AvanzaWsMessage, ConnectReply, ConnectRequest, DataFrame, HandshakeReply,
            HandshakeRequest, ReconnectAdvice, SubscribeReply, SubscribeRequest, decode_frames,
            parse_frame,
        },
        subscription::{PushMessage, SubscriptionRegistry},
    },
};

/// Commands sent from the client to the feed handler task.
#[derive(Debug)]
pub(crate) enum HandlerCommand {
    /// Register a subscription and, once the session is active, send the
    /// subscribe frame for it.
    Subscribe {
        subscription: Ustr,
        tx: mpsc::UnboundedSender<PushMessage>,
    },
    /// Close the connection and stop the task.
    Disconnect,
}

/// Task owning the socket write half and all CometD session state.
pub(crate) struct PushFeedHandler {
    state: Arc<AtomicU8>,
    failure: Arc<Mutex<Option<AvanzaWsError>>>,
    push_subscription_id: String,
    sink: SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
    cmd_rx: mpsc::UnboundedReceiver<HandlerCommand>,
    raw_rx: mpsc::UnboundedReceiver<Message>,
    registry: SubscriptionRegistry,
    client_id: Option<String>,
    message_count: u64,
    handshake_attempts: u32,
    /// True from the moment a handshake frame is written until its reply is
    /// processed; connect replies from the superseded session are dropped
    /// while set.
    handshaking: bool,
    /// Deadline of a pending handshake retry, polled by the run loop so a
    /// backoff never blocks command processing.
    handshake_retry_at: Option<tokio::time::Instant>,
}

impl PushFeedHandler {
    pub(crate) fn new(
        state: Arc<AtomicU8>,
        failure: Arc<Mutex<Option<AvanzaWsError>>>,
        push_subscription_id: String,
        sink: SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
        cmd_rx: mpsc::UnboundedReceiver<HandlerCommand>,
        raw_rx: mpsc::UnboundedReceiver<Message>,
    ) -> Self {
        Self {
            state,
            failure,
            push_subscription_id,
            sink,
            cmd_rx,
            raw_rx,
            registry: SubscriptionRegistry::default(),
            client_id: None,
            // Outbound message ids start at 1
            message_count: 1,
            handshake_attempts: 0,
            handshaking: false,
            handshake_retry_at: None,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!("Started task 'avanza-push-feed-handler'");

        if let Err(e) = self.send_handshake().await {
            self.fail(e);
            return;
        }

        loop {
            let retry_at = self.handshake_retry_at;
            tokio::select! {
                Some(cmd) = self.cmd_rx.recv() => {
                    if self.process_command(cmd).await {
                        break;
                    }
                }
                msg = self.raw_rx.recv() => match msg {
                    Some(msg) => {
                        if self.process_raw(msg).await {
                            break;
                        }
                    }
                    None => {
                        if self.connection_state() != PushConnectionState::Closed {
                            self.fail(AvanzaWsError::Transport(
                                "socket read stream ended".to_string(),
                            ));
                        }
                        break;
                    }
                },
                () = tokio::time::sleep_until(
                    retry_at.unwrap_or_else(tokio::time::Instant::now),
                ), if retry_at.is_some() => {
                    self.handshake_retry_at = None;
                    if let Err(e) = self.send_handshake().await {
                        self.fail(e);
                        break;
                    }
                }
            }
        }

        debug!("Stopped task 'avanza-push-feed-handler'");
    }

    fn connection_state(&self) -> PushConnectionState {
        PushConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn transition(&self, state: PushConnectionState) {
        debug!("Connection state -> {state}");
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    fn fail(&self, error: AvanzaWsError) {
        error!("Push connection failed: {error}");
        if let Ok(mut slot) = self.failure.lock()
            && slot.is_none()
        {
            *slot = Some(error);
        }
        self.transition(PushConnectionState::Failed);
    }

    /// Writes one frame, incrementing the message counter only after the
    /// write succeeded.
    async fn write_frame<T: Serialize>(&mut self, frame: &T) -> AvanzaWsResult<()> {
        let text = crate::websocket::messages::encode_frame(frame)?;
        self.sink
            .send(Message::text(text))
            .await
            .map_err(|e| AvanzaWsError::Send(e.to_string()))?;
        self.message_count += 1;
        Ok(())
    }

    async fn send_handshake(&mut self) -> AvanzaWsResult<()> {
        let frame = HandshakeRequest::new(self.message_count, &self.push_subscription_id);
        self.write_frame(&frame).await?;
        self.handshaking = true;
        Ok(())
    }

    async fn send_connect(&mut self) -> AvanzaWsResult<()> {
        let client_id = self
            .client_id
            .clone()
            .ok_or(AvanzaWsError::NotConnected)?;
        let frame = ConnectRequest::new(self.message_count, &client_id);
        self.write_frame(&frame).await
    }

    async fn send_subscribe(&mut self, subscription: &str) -> AvanzaWsResult<()> {
        let client_id = self
            .client_id
            .clone()
            .ok_or(AvanzaWsError::NotConnected)?;
        let frame = SubscribeRequest::new(self.message_count, &client_id, subscription);
        self.write_frame(&frame).await
    }

    /// Returns `true` when the run loop should stop.
    async fn process_command(&mut self, cmd: HandlerCommand) -> bool {
        match cmd {
            HandlerCommand::Subscribe { subscription, tx } => {
                if !self.registry.insert(subscription, tx) {
                    warn!("Subscription already registered: {subscription}");
                    return false;
                }
                debug!("Registered subscription: {subscription}");
                // Before the session is active the subscribe frame is
                // deferred; the first connect cycle flushes it.
                if self.connection_state() == PushConnectionState::Active
                    && self.client_id.is_some()
                    && let Err(e) = self.send_subscribe(subscription.as_str()).await
                {
                    self.fail(e);
                    return true;
                }
                false
            }
            HandlerCommand::Disconnect => {
                self.transition(PushConnectionState::Closed);
                if let Err(e) = self.sink.close().await {
                    debug!("Error closing socket: {e}");
                }
                true
            }
        }
    }

    /// Returns `true` when the run loop should stop.
    async fn process_raw(&mut self, msg: Message) -> bool {
        match msg {
            Message::Text(text) => {
                if let Err(e) = self.process_text(&text).await {
                    self.fail(e);
                    return true;
                }
                false
            }
            Message::Ping(data) => {
                if let Err(e) = self.sink.send(Message::Pong(data)).await {
                    self.fail(AvanzaWsError::Send(e.to_string()));
                    return true;
                }
                false
            }
            Message::Pong(_) => false,
            Message::Close(frame) => {
                if self.connection_state() != PushConnectionState::Closed {
                    self.fail(AvanzaWsError::Transport(format!(
                        "server closed connection: {frame:?}"
                    )));
                }
                true
            }
            msg => {
                warn!("Unexpected websocket message: {msg:?}");
                false
            }
        }
    }

    /// Processes one wire-level text payload (a JSON array of frames).
    ///
    /// Malformed frames are logged and skipped; an `Err` here is fatal for the
    /// connection (dead socket, exhausted handshake retries).
    async fn process_text(&mut self, text: &str) -> AvanzaWsResult<()> {
        let values = match decode_frames(text) {
            Ok(values) => values,
            Err(e) => {
                warn!("Failed to decode frame batch: {e}");
                return Ok(());
            }
        };

        for value in values {
            let msg = match parse_frame(value) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("Failed to parse frame: {e}");
                    continue;
                }
            };
            match msg {
                AvanzaWsMessage::Handshake(reply) => self.handle_handshake(reply).await?,
                AvanzaWsMessage::Connect(reply) => self.handle_connect(reply).await?,
                AvanzaWsMessage::Subscribe(reply) => self.handle_subscribe_ack(reply),
                AvanzaWsMessage::Disconnect => self.handle_disconnect().await?,
                AvanzaWsMessage::Data(frame) => self.dispatch_data(frame),
            }
        }
        Ok(())
    }

    async fn handle_handshake(&mut self, reply: HandshakeReply) -> AvanzaWsResult<()> {
        if reply.successful {
            let client_id = reply
                .client_id
                .filter(|id| !id.is_empty())
                .ok_or_else(|| {
                    AvanzaWsError::HandshakeFailed("successful reply missing clientId".to_string())
                })?;
            debug!("Handshake complete, clientId={client_id}");
            self.client_id = Some(client_id);
            self.handshake_attempts = 0;
            self.handshaking = false;
            return self.send_connect().await;
        }

        let error = reply.error.unwrap_or_else(|| "unknown".to_string());
        let advice_rehandshake = matches!(
            reply.advice.as_ref().and_then(|a| a.reconnect),
            Some(ReconnectAdvice::Handshake)
        );
        if !advice_rehandshake {
            return Err(AvanzaWsError::HandshakeFailed(error));
        }
        if self.handshake_attempts >= HANDSHAKE_RETRY_MAX_ATTEMPTS {
            return Err(AvanzaWsError::HandshakeFailed(format!(
                "retries exhausted after {HANDSHAKE_RETRY_MAX_ATTEMPTS} attempts: {error}"
            )));
        }

        self.handshake_attempts += 1;
        let delay = handshake_retry_delay(self.handshake_attempts);
        warn!(
            "Handshake rejected ({error}), retrying in {delay:?} (attempt {}/{HANDSHAKE_RETRY_MAX_ATTEMPTS})",
            self.handshake_attempts,
        );
        self.handshake_retry_at = Some(tokio::time::Instant::now() + delay);
        Ok(())
    }

    async fn handle_connect(&mut self, reply: ConnectReply) -> AvanzaWsResult<()> {
        // A reply to a connect from the previous session can still be in
        // flight while the re-handshake is pending. Acting on it would send a
        // connect mid-handshake and burn the Active transition (and with it
        // the resubscription pass) on the stale client id.
        if self.handshaking {
            debug!("Dropping connect reply from superseded session");
            return Ok(());
        }

        if reply.successful && connect_should_continue(reply.advice.as_ref()) {
            if let Some(interval) = reply.advice.as_ref().and_then(|a| a.interval)
                && interval > 0
            {
                tokio::time::sleep(Duration::from_millis(interval as u64)).await;
            }
            self.send_connect().await?;
            if self.connection_state() != PushConnectionState::Active {
                self.transition(PushConnectionState::Active);
                self.resubscribe_stale().await?;
            }
            return Ok(());
        }

        if matches!(
            reply.advice.as_ref().and_then(|a| a.reconnect),
            Some(ReconnectAdvice::Handshake)
        ) {
            warn!("Server requested re-handshake on connect");
            self.transition(PushConnectionState::Reconnecting);
            return self.send_handshake().await;
        }

        if self.client_id.is_some() {
            // Keep the long-poll alive even through an unsuccessful reply, as
            // long as the server has not told us the session is gone.
            warn!(
                "Connect reply unsuccessful (error={:?}), resending connect",
                reply.error
            );
            return self.send_connect().await;
        }

        Err(AvanzaWsError::Protocol(
            "connect rejected before session was established".to_string(),
        ))
    }

    fn handle_subscribe_ack(&mut self, reply: SubscribeReply) {
        let Some(subscription) = reply.subscription.filter(|s| !s.is_empty()) else {
            warn!("Subscribe ack missing subscription field");
            return;
        };
        if !reply.successful {
            warn!(
                "Subscription rejected: {subscription} (error={:?})",
                reply.error
            );
            return;
        }
        let Some(client_id) = self.client_id.clone() else {
            warn!("Subscribe ack before session established: {subscription}");
            return;
        };
        if self.registry.confirm(&subscription, &client_id) {
            debug!("Subscription confirmed: {subscription}");
        } else {
            warn!("Subscribe ack for unknown subscription: {subscription}");
        }
    }

    async fn handle_disconnect(&mut self) -> AvanzaWsResult<()> {
        warn!("Server sent disconnect, re-handshaking");
        self.transition(PushConnectionState::Reconnecting);
        self.send_handshake().await
    }

    fn dispatch_data(&mut self, frame: DataFrame) {
        if let Some(error) = frame.error {
            warn!("Dropping errored frame on {}: {error}", frame.channel);
            return;
        }
        if self.registry.deliver(&frame.channel, frame.payload) {
            debug!("Delivered message on {}", frame.channel);
        } else {
            debug!("No live subscription for channel {}", frame.channel);
        }
    }

    /// Re-sends subscribe frames for every registry entry not yet bound to the
    /// current client id. Runs once per established session, so each
    /// subscription is re-sent exactly once per re-handshake.
    async fn resubscribe_stale(&mut self) -> AvanzaWsResult<()> {
        let Some(client_id) = self.client_id.clone() else {
            return Err(AvanzaWsError::NotConnected);
        };
        let stale = self.registry.stale_subscriptions(&client_id);
        if stale.is_empty() {
            return Ok(());
        }
        debug!("Resubscribing {} subscription(s)", stale.len());
        for subscription in stale {
            self.send_subscribe(subscription.as_str()).await?;
        }
        Ok(())
    }
}

/// Decides whether the connect keep-alive cycle should continue, following
/// the server's advice block: absent advice (or advice without a reconnect
/// field) means carry on, `retry` carries on unless the interval is negative,
/// anything else stops the cycle.
pub(crate) fn connect_should_continue(advice: Option<&Advice>) -> bool {
    match advice {
        None => true,
        Some(advice) => match advice.reconnect {
            None => true,
            Some(ReconnectAdvice::Retry) => advice.interval.unwrap_or(0) >= 0,
            Some(_) => false,
        },
    }
}

/// Exponential backoff for handshake retries: 250ms doubling up to 5s.
pub(crate) const fn handshake_retry_delay(attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1);
    let ms = if shift >= 32 {
        HANDSHAKE_RETRY_DELAY_MAX_MS
    } else {
        let raw = HANDSHAKE_RETRY_DELAY_INITIAL_MS << shift;
        if raw > HANDSHAKE_RETRY_DELAY_MAX_MS {
            HANDSHAKE_RETRY_DELAY_MAX_MS
        } else {
            raw
        }
    };
    Duration::from_millis(ms)
}
