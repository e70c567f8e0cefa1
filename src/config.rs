// SPDX-License-Identifier: Apache-2.0

/// Configuration for the edge attendance coordinator.
#[derive(Debug, Clone, clap::Parser)]
pub struct EdgeConfig {
    /// Host to bind the edge HTTP surface on.
    #[arg(long, default_value = "0.0.0.0", env = "EDGE_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8000, env = "EDGE_PORT")]
    pub port: u16,

    /// Bearer token required on the authorized edge endpoints. If unset,
    /// authorization is disabled (credential checking itself is an
    /// out-of-scope external collaborator — see `transport::auth`).
    #[arg(long, env = "EDGE_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Document-store connection string, passed through to whatever
    /// `LocalStore` implementation is wired in production; the core never
    /// dereferences it (the document-database driver is out of scope).
    #[arg(long, env = "MONGO_URI")]
    pub mongo_uri: Option<String>,

    /// Document-store database name.
    #[arg(long, env = "DATABASE_NAME")]
    pub database_name: Option<String>,

    /// Base URL of the remote central backend.
    #[arg(long, env = "HOST_REMOTE_URL")]
    pub host_remote_url: String,

    /// Path to the device config JSON file (spec §6). Missing file falls
    /// back to a single default device rather than failing startup.
    #[arg(long, default_value = "devices_config.json", env = "EDGE_DEVICE_CONFIG")]
    pub device_config: std::path::PathBuf,

    /// Timeout for a single remote backend call, in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "EDGE_REMOTE_TIMEOUT_MS")]
    pub remote_timeout_ms: u64,

    /// Timeout for the connectivity probe, in milliseconds.
    #[arg(long, default_value_t = 5_000, env = "EDGE_PROBE_TIMEOUT_MS")]
    pub probe_timeout_ms: u64,

    /// Sync worker sleep interval between passes, in seconds.
    #[arg(long, default_value_t = 60, env = "EDGE_SYNC_INTERVAL_SECS")]
    pub sync_interval_secs: u64,

    /// Maximum `sync_attempts` before a `MissingStudent` row stops being
    /// retried by the sync worker (spec §4.10).
    #[arg(long, default_value_t = 3, env = "EDGE_SYNC_MAX_ATTEMPTS")]
    pub sync_max_attempts: u32,

    /// IANA timezone used to stamp offline capture timestamps (spec §11
    /// supplement — generalizes the original's hardcoded Africa/Cairo).
    #[arg(long, default_value = "UTC", env = "EDGE_TIMESTAMP_TZ")]
    pub timestamp_tz: String,
}

impl EdgeConfig {
    pub fn remote_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn probe_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn sync_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sync_interval_secs)
    }

    /// Parse [`Self::timestamp_tz`], falling back to UTC and logging a
    /// `warn!` on an unrecognized IANA name rather than failing startup.
    pub fn timestamp_tz(&self) -> chrono_tz::Tz {
        match self.timestamp_tz.parse() {
            Ok(tz) => tz,
            Err(_) => {
                tracing::warn!(tz = %self.timestamp_tz, "unrecognized timestamp_tz, falling back to UTC");
                chrono_tz::UTC
            }
        }
    }
}
