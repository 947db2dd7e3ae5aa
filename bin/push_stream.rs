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

//! Streams live quote updates from Avanza's push endpoint.
//!
//! Requires an authenticated session:
//! - `AVANZA_PUSH_SUBSCRIPTION_ID`: push subscription id from the login reply.
//! - `AVANZA_COOKIES`: raw `Cookie` header value of the HTTP session.
//! - `AVANZA_ORDERBOOK_ID` (optional): orderbook to stream, defaults to 19002.

use avanza_push::{
    common::enums::ChannelType,
    websocket::AvanzaPushClient,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .init();

    let push_subscription_id = std::env::var("AVANZA_PUSH_SUBSCRIPTION_ID")?;
    let cookies = std::env::var("AVANZA_COOKIES")?;
    let orderbook_id =
        std::env::var("AVANZA_ORDERBOOK_ID").unwrap_or_else(|_| "19002".to_string());

    let mut client =
        AvanzaPushClient::connect(None, &push_subscription_id, &cookies, None).await?;
    info!("Connected to {}", client.url());

    let mut quotes = client
        .subscribe_to_id(ChannelType::Quotes, &orderbook_id)
        .await?;
    info!("Subscribed to {}", quotes.subscription());

    loop {
        tokio::select! {
            msg = quotes.next() => match msg {
                Some(msg) => info!("{}: {}", msg.subscription, msg.payload),
                None => {
                    error!("Push stream ended");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    client.close().await;
    Ok(())
}
