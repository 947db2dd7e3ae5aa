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

//! Enumerations for Avanza push channels.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter, EnumString};

/// Avanza push data channels.
///
/// Subscription strings follow the format `/{channel}/{id1},{id2},...`.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    AsRefStr,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChannelType {
    /// Account balance and summary updates: `/accounts/{accountId}`.
    Accounts,
    /// Orderbook quote updates: `/quotes/{orderbookId}`.
    Quotes,
    /// Order depth (level 2) updates: `/orderdepths/{orderbookId}`.
    OrderDepths,
    /// Public trade prints: `/trades/{orderbookId}`.
    Trades,
    /// Broker trade summaries: `/brokertradesummary/{orderbookId}`.
    BrokerTradeSummary,
    /// Position updates: `/positions/{accountId}`.
    Positions,
    /// Own order updates: `/orders/{accountId}`.
    Orders,
    /// Own deal (fill) updates: `/deals/{accountId}`.
    Deals,
}

impl ChannelType {
    /// Returns the lowercase channel segment used in subscription strings.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Accounts => "accounts",
            Self::Quotes => "quotes",
            Self::OrderDepths => "orderdepths",
            Self::Trades => "trades",
            Self::BrokerTradeSummary => "brokertradesummary",
            Self::Positions => "positions",
            Self::Orders => "orders",
            Self::Deals => "deals",
        }
    }

    /// Returns whether the channel accepts a comma-joined list of ids in a
    /// single subscription (the account-scoped fan-out channels do, the
    /// orderbook-scoped channels do not).
    #[must_use]
    pub const fn supports_multiple_ids(&self) -> bool {
        matches!(
            self,
            Self::Orders | Self::Deals | Self::Positions | Self::Accounts
        )
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
