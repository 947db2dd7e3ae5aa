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

//! Core constants for the Avanza push client.

/// Venue identifier string.
pub const AVANZA: &str = "AVANZA";

// Production URLs
pub const AVANZA_HTTP_URL: &str = "https://www.avanza.se";
pub const AVANZA_WS_URL: &str = "wss://www.avanza.se/_push/cometd";

// CometD protocol constants
pub const COMETD_VERSION: &str = "1.0";
pub const COMETD_MINIMUM_VERSION: &str = "1.0";
pub const COMETD_CONNECTION_TYPE: &str = "websocket";
pub const SUPPORTED_CONNECTION_TYPES: [&str; 3] =
    ["websocket", "long-polling", "callback-polling"];

// Advice sent with every handshake frame
pub const HANDSHAKE_ADVICE_TIMEOUT_MS: u64 = 60_000;
pub const HANDSHAKE_ADVICE_INTERVAL_MS: u64 = 0;

// Connect-readiness gate: poll interval and default bound on the wait for the
// first successful handshake + connect cycle.
pub const CONNECT_POLL_INTERVAL_MS: u64 = 100;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: f64 = 10.0;

// Bounded handshake retry (server advice `reconnect: "handshake"`)
pub const HANDSHAKE_RETRY_MAX_ATTEMPTS: u32 = 5;
pub const HANDSHAKE_RETRY_DELAY_INITIAL_MS: u64 = 250;
pub const HANDSHAKE_RETRY_DELAY_MAX_MS: u64 = 5_000;
