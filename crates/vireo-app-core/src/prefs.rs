// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Persisted server preferences.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Config key under which [`ServerPrefs`] are stored.
pub const SERVER_PREFS_KEY: &str = "server";

/// Tunables for one Vireo server. Missing fields take their defaults, so
/// older config files keep loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerPrefs {
    /// Socket address to listen on.
    pub listen: String,
    /// Session time-to-live, refreshed on activity.
    pub session_ttl_secs: u64,
    /// Interval between registry sweeps.
    pub sweep_interval_secs: u64,
    /// Message bound of the SSR buffered transport.
    pub ssr_buffer_limit: usize,
    /// Outbound channel capacity per live connection.
    pub live_channel_capacity: usize,
    /// Unacknowledged events kept per live connection.
    pub live_pending_limit: usize,
    /// Largest accepted or produced wire frame, in bytes.
    pub max_frame_bytes: usize,
    /// Ask clients to enable debug tooling.
    pub debug: bool,
}

impl Default for ServerPrefs {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:4000".to_string(),
            session_ttl_secs: 300,
            sweep_interval_secs: 30,
            ssr_buffer_limit: 256,
            live_channel_capacity: 64,
            live_pending_limit: 256,
            max_frame_bytes: 1 << 20,
            debug: false,
        }
    }
}

impl ServerPrefs {
    /// Session TTL as a [`Duration`].
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Sweep interval as a [`Duration`] (at least one second).
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}
