// SPDX-License-Identifier: Apache-2.0

//! Connectivity Probe (C5): a single freshly-issued reachability check
//! against the remote backend (spec §4.5).

use reqwest::Client;

/// Issue a lightweight `GET` against `/students/next-ids`, the same
/// endpoint the original probes (`app/utils/internet_check.py`) since the
/// remote contract has no dedicated health route. Treats HTTP 200 or 401
/// as "remote reachable"; any other outcome (DNS failure, connection
/// refused, timeout, transport error, or any other status) is treated as
/// offline. Never cached — every caller probes freshly.
pub async fn is_online(base_url: &str, timeout: std::time::Duration) -> bool {
    let client = match Client::builder().timeout(timeout).build() {
        Ok(c) => c,
        Err(_) => return false,
    };

    let url = format!("{}/students/next-ids", base_url.trim_end_matches('/'));
    match client.get(&url).send().await {
        Ok(resp) => matches!(resp.status().as_u16(), 200 | 401),
        Err(_) => false,
    }
}
