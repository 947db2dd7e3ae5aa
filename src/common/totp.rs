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

//! Time-based one-time password (TOTP) generation for the Avanza login flow.
//!
//! Avanza's two-factor login accepts standard TOTP codes: HMAC-SHA1, 6 digits,
//! 30 second time step, with the shared secret distributed as a base32 string.
//! This is a stateless helper consumed once at authentication time; it is not
//! part of the push engine.

use anyhow::anyhow;
use totp_rs::{Algorithm, Secret, TOTP};

/// Number of digits in a generated code.
pub const TOTP_DIGITS: usize = 6;

/// Time step in seconds.
pub const TOTP_STEP_SECS: u64 = 30;

fn build_totp(secret: &str) -> anyhow::Result<TOTP> {
    // Avanza hands out secrets in mixed case, sometimes padded
    let normalized = secret.trim().trim_end_matches('=').to_uppercase();
    let secret_bytes = Secret::Encoded(normalized)
        .to_bytes()
        .map_err(|e| anyhow!("invalid base32 TOTP secret: {e:?}"))?;

    TOTP::new(Algorithm::SHA1, TOTP_DIGITS, 1, TOTP_STEP_SECS, secret_bytes)
        .map_err(|e| anyhow!("invalid TOTP configuration: {e}"))
}

/// Generates a TOTP code for the given base32-encoded secret at the current time.
///
/// # Errors
///
/// Returns an error if the secret is not valid base32 or is too short.
pub fn generate_totp_code(secret: &str) -> anyhow::Result<String> {
    let totp = build_totp(secret)?;
    totp.generate_current()
        .map_err(|e| anyhow!("system clock error: {e}"))
}

/// Generates a TOTP code for the given secret at a fixed Unix timestamp.
///
/// # Errors
///
/// Returns an error if the secret is not valid base32 or is too short.
pub fn totp_code_at(secret: &str, unix_time: u64) -> anyhow::Result<String> {
    let totp = build_totp(secret)?;
    Ok(totp.generate(unix_time))
}
