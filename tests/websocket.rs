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

//! Integration tests for the push client against a local mock CometD server.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use avanza_push::{
    common::enums::ChannelType,
    websocket::{AvanzaPushClient, AvanzaWsError, PushConnectionState},
};
use futures_util::{SinkExt, StreamExt};
use rstest::rstest;
use serde_json::{Value, json};
use tokio::{net::TcpListener, sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{accept_async, tungstenite::Message};

#[derive(Default)]
struct ServerState {
    received: Mutex<Vec<Value>>,
    subscribe_count: Mutex<HashMap<String, usize>>,
    handshake_count: AtomicUsize,
    client_counter: AtomicUsize,
    inject: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    /// When false, handshake frames are silently ignored.
    respond_handshake: AtomicBool,
    /// When true, every handshake yields the same client id.
    reuse_client_id: AtomicBool,
    /// When true, handshakes are rejected outright (no retry advice).
    reject_handshakes: AtomicBool,
    /// Number of handshakes to reject (with retry advice) before succeeding.
    fail_handshakes: AtomicUsize,
}

struct TestServer {
    port: u16,
    state: Arc<ServerState>,
    task: JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Self {
        let state = Arc::new(ServerState {
            respond_handshake: AtomicBool::new(true),
            ..ServerState::default()
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server_state = state.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let ws = match accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(_) => continue,
                };
                run_connection(ws, server_state.clone()).await;
            }
        });

        Self { port, state, task }
    }

    fn url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    /// Sends a server-initiated frame to the current connection.
    fn inject(&self, frame: Value) {
        let text = serde_json::to_string(&json!([frame])).unwrap();
        let guard = self.state.inject.lock().unwrap();
        guard
            .as_ref()
            .expect("no active connection")
            .send(Message::text(text))
            .unwrap();
    }

    fn subscribe_count(&self, subscription: &str) -> usize {
        self.state
            .subscribe_count
            .lock()
            .unwrap()
            .get(subscription)
            .copied()
            .unwrap_or(0)
    }

    fn handshake_count(&self) -> usize {
        self.state.handshake_count.load(Ordering::SeqCst)
    }

    fn received_ids(&self) -> Vec<u64> {
        self.state
            .received
            .lock()
            .unwrap()
            .iter()
            .filter_map(|frame| frame["id"].as_u64())
            .collect()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_connection(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    state: Arc<ServerState>,
) {
    let (mut sink, mut stream) = ws.split();
    let (inject_tx, mut inject_rx) = mpsc::unbounded_channel();
    *state.inject.lock().unwrap() = Some(inject_tx);

    loop {
        tokio::select! {
            Some(msg) = inject_rx.recv() => {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            msg = stream.next() => {
                let Some(Ok(msg)) = msg else { break };
                let Message::Text(text) = msg else { continue };
                let frames: Vec<Value> = match serde_json::from_str(&text) {
                    Ok(frames) => frames,
                    Err(_) => continue,
                };
                for frame in frames {
                    state.received.lock().unwrap().push(frame.clone());
                    let reply = build_reply(&frame, &state).await;
                    if let Some(reply) = reply {
                        let text = serde_json::to_string(&json!([reply])).unwrap();
                        if sink.send(Message::text(text)).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

async fn build_reply(frame: &Value, state: &ServerState) -> Option<Value> {
    let channel = frame["channel"].as_str()?;
    match channel {
        "/meta/handshake" => {
            state.handshake_count.fetch_add(1, Ordering::SeqCst);
            if !state.respond_handshake.load(Ordering::SeqCst) {
                return None;
            }
            if state.reject_handshakes.load(Ordering::SeqCst) {
                return Some(json!({
                    "channel": "/meta/handshake",
                    "successful": false,
                    "error": "403::forbidden",
                }));
            }
            if state
                .fail_handshakes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Some(json!({
                    "channel": "/meta/handshake",
                    "successful": false,
                    "error": "402::unauthorized",
                    "advice": {"reconnect": "handshake", "interval": 0},
                }));
            }
            let client_id = if state.reuse_client_id.load(Ordering::SeqCst) {
                "client-1".to_string()
            } else {
                format!(
                    "client-{}",
                    state.client_counter.fetch_add(1, Ordering::SeqCst) + 1
                )
            };
            Some(json!({
                "channel": "/meta/handshake",
                "successful": true,
                "clientId": client_id,
            }))
        }
        "/meta/connect" => {
            // Mimic the server holding the long-poll briefly
            tokio::time::sleep(Duration::from_millis(25)).await;
            Some(json!({
                "channel": "/meta/connect",
                "successful": true,
                "advice": {"reconnect": "retry", "interval": 0, "timeout": 30_000},
            }))
        }
        "/meta/subscribe" => {
            let subscription = frame["subscription"].as_str()?.to_string();
            *state
                .subscribe_count
                .lock()
                .unwrap()
                .entry(subscription.clone())
                .or_insert(0) += 1;
            Some(json!({
                "channel": "/meta/subscribe",
                "successful": true,
                "subscription": subscription,
            }))
        }
        _ => None,
    }
}

async fn wait_until<F: Fn() -> bool>(predicate: F, timeout_ms: u64) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    predicate()
}

async fn connect(server: &TestServer) -> AvanzaPushClient {
    AvanzaPushClient::connect(Some(server.url()), "push-sub-1", "csid=test", Some(2.0))
        .await
        .unwrap()
}

#[rstest]
#[tokio::test]
async fn test_connect_establishes_session() {
    let server = TestServer::start().await;
    let mut client = connect(&server).await;

    assert!(client.is_active());
    assert_eq!(client.connection_state(), PushConnectionState::Active);
    assert_eq!(server.handshake_count(), 1);

    client.close().await;
    assert!(client.is_closed());
}

#[rstest]
#[tokio::test]
async fn test_connect_times_out_without_handshake_reply() {
    let server = TestServer::start().await;
    server
        .state
        .respond_handshake
        .store(false, Ordering::SeqCst);

    let result =
        AvanzaPushClient::connect(Some(server.url()), "push-sub-1", "csid=test", Some(0.5)).await;
    assert!(result.is_err());

    // Timeout tears down the background tasks: no further frames arrive
    let count = server.handshake_count();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.handshake_count(), count);
}

#[rstest]
#[tokio::test]
async fn test_connect_surfaces_handshake_rejection() {
    let server = TestServer::start().await;
    server.state.reject_handshakes.store(true, Ordering::SeqCst);

    let result =
        AvanzaPushClient::connect(Some(server.url()), "push-sub-1", "csid=test", Some(2.0)).await;
    let err = result.unwrap_err().downcast::<AvanzaWsError>().unwrap();
    assert!(matches!(err, AvanzaWsError::HandshakeFailed(_)));
}

#[rstest]
#[tokio::test]
async fn test_handshake_retried_after_rejection() {
    let server = TestServer::start().await;
    server.state.fail_handshakes.store(1, Ordering::SeqCst);

    let mut client = connect(&server).await;
    assert!(client.is_active());
    assert_eq!(server.handshake_count(), 2);

    client.close().await;
}

#[rstest]
#[tokio::test]
async fn test_subscribe_and_dispatch() {
    let server = TestServer::start().await;
    let mut client = connect(&server).await;

    let mut handle = client
        .subscribe_to_id(ChannelType::Quotes, "19002")
        .await
        .unwrap();
    assert_eq!(handle.subscription(), "/quotes/19002");
    assert!(wait_until(|| server.subscribe_count("/quotes/19002") == 1, 1_000).await);

    // A frame for a channel nobody subscribed to is dropped
    server.inject(json!({
        "channel": "/quotes/99999",
        "data": {"lastPrice": 1.0},
    }));
    server.inject(json!({
        "channel": "/quotes/19002",
        "data": {"lastPrice": 123.45, "orderbookId": "19002"},
    }));

    let msg = tokio::time::timeout(Duration::from_secs(1), handle.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.subscription, "/quotes/19002");
    assert_eq!(msg.payload["lastPrice"], 123.45);

    client.close().await;
}

#[rstest]
#[tokio::test]
async fn test_errored_data_frame_is_dropped() {
    let server = TestServer::start().await;
    let mut client = connect(&server).await;

    let mut handle = client
        .subscribe_to_id(ChannelType::Quotes, "19002")
        .await
        .unwrap();
    assert!(wait_until(|| server.subscribe_count("/quotes/19002") == 1, 1_000).await);

    server.inject(json!({
        "channel": "/quotes/19002",
        "error": "500::internal",
        "data": {"lastPrice": 1.0},
    }));
    server.inject(json!({
        "channel": "/quotes/19002",
        "data": {"lastPrice": 2.0},
    }));

    let msg = tokio::time::timeout(Duration::from_secs(1), handle.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.payload["lastPrice"], 2.0);

    client.close().await;
}

#[rstest]
#[tokio::test]
async fn test_duplicate_subscription_rejected() {
    let server = TestServer::start().await;
    let mut client = connect(&server).await;

    let _handle = client
        .subscribe_to_id(ChannelType::Quotes, "19002")
        .await
        .unwrap();
    let result = client.subscribe_to_id(ChannelType::Quotes, "19002").await;
    assert!(matches!(
        result,
        Err(AvanzaWsError::DuplicateSubscription(s)) if s == "/quotes/19002"
    ));

    client.close().await;
}

#[rstest]
#[tokio::test]
async fn test_multi_id_subscription_rules() {
    let server = TestServer::start().await;
    let mut client = connect(&server).await;

    let ids = vec!["111".to_string(), "222".to_string()];
    let handle = client
        .subscribe_to_ids(ChannelType::Orders, &ids)
        .await
        .unwrap();
    assert_eq!(handle.subscription(), "/orders/111,222");

    let result = client.subscribe_to_ids(ChannelType::Quotes, &ids).await;
    assert!(matches!(
        result,
        Err(AvanzaWsError::MultipleIdsUnsupported(ChannelType::Quotes))
    ));

    let result = client.subscribe_to_ids(ChannelType::Quotes, &[]).await;
    assert!(matches!(result, Err(AvanzaWsError::EmptyIds)));

    client.close().await;
}

#[rstest]
#[tokio::test]
async fn test_server_disconnect_triggers_rehandshake_and_resubscribe() {
    let server = TestServer::start().await;
    let mut client = connect(&server).await;

    let mut handle = client
        .subscribe_to_id(ChannelType::Orders, "111")
        .await
        .unwrap();
    assert!(wait_until(|| server.subscribe_count("/orders/111") == 1, 1_000).await);

    server.inject(json!({"channel": "/meta/disconnect"}));

    // New session (client-2) forces the subscription to be re-sent once
    assert!(wait_until(|| server.subscribe_count("/orders/111") == 2, 2_000).await);
    assert_eq!(server.handshake_count(), 2);
    assert!(wait_until(|| client.is_active(), 1_000).await);

    // Give the keep-alive a few more cycles: no further resubscribes
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.subscribe_count("/orders/111"), 2);

    // Delivery still works under the new session
    server.inject(json!({
        "channel": "/orders/111",
        "data": {"orderId": "o-1"},
    }));
    let msg = tokio::time::timeout(Duration::from_secs(1), handle.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.payload["orderId"], "o-1");

    client.close().await;
}

#[rstest]
#[tokio::test]
async fn test_rehandshake_with_same_client_id_skips_resubscribe() {
    let server = TestServer::start().await;
    server.state.reuse_client_id.store(true, Ordering::SeqCst);
    let mut client = connect(&server).await;

    let _handle = client
        .subscribe_to_id(ChannelType::Orders, "111")
        .await
        .unwrap();
    assert!(wait_until(|| server.subscribe_count("/orders/111") == 1, 1_000).await);

    server.inject(json!({"channel": "/meta/disconnect"}));
    assert!(wait_until(|| server.handshake_count() == 2, 1_000).await);
    assert!(wait_until(|| client.is_active(), 1_000).await);

    // Session id did not change, so the binding is still valid
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.subscribe_count("/orders/111"), 1);

    client.close().await;
}

#[rstest]
#[tokio::test]
async fn test_close_is_prompt_during_handshake_backoff() {
    let server = TestServer::start().await;
    let mut client = connect(&server).await;

    // Session dies and every re-handshake is rejected with retry advice,
    // putting the handler into its backoff schedule
    server.state.fail_handshakes.store(usize::MAX, Ordering::SeqCst);
    server.inject(json!({"channel": "/meta/disconnect"}));
    assert!(wait_until(|| server.handshake_count() >= 2, 1_000).await);

    // Let the backoff grow well past the promptness bound below
    tokio::time::sleep(Duration::from_millis(2_000)).await;

    let start = tokio::time::Instant::now();
    client.close().await;
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(client.is_closed());
}

#[rstest]
#[tokio::test]
async fn test_outbound_message_ids_are_monotonic() {
    let server = TestServer::start().await;
    let mut client = connect(&server).await;

    let _handle = client
        .subscribe_to_id(ChannelType::Quotes, "19002")
        .await
        .unwrap();
    assert!(wait_until(|| server.subscribe_count("/quotes/19002") == 1, 1_000).await);

    // Let a few connect cycles run
    tokio::time::sleep(Duration::from_millis(200)).await;
    client.close().await;

    let ids = server.received_ids();
    assert!(ids.len() >= 3);
    assert_eq!(ids[0], 1);
    for pair in ids.windows(2) {
        assert_eq!(pair[1], pair[0] + 1);
    }
}

#[rstest]
#[tokio::test]
async fn test_subscribe_after_close_fails() {
    let server = TestServer::start().await;
    let mut client = connect(&server).await;
    client.close().await;

    let result = client.subscribe_to_id(ChannelType::Quotes, "19002").await;
    assert!(matches!(result, Err(AvanzaWsError::Closed)));
}
