//! Settings structs with compiled defaults.

use serde::{Deserialize, Serialize};

/// Root settings document.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CulvertSettings {
    /// Settings schema version.
    pub version: String,
    pub server: ServerSettings,
    pub enrichment: EnrichmentSettings,
    pub storage: StorageSettings,
}

impl Default for CulvertSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            server: ServerSettings::default(),
            enrichment: EnrichmentSettings::default(),
            storage: StorageSettings::default(),
        }
    }
}

/// Server network and connection-supervision settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// HTTP/WebSocket listen port.
    pub port: u16,
    /// Bind address.
    pub host: String,
    /// Liveness probe interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Idle disconnect threshold in milliseconds.
    pub idle_timeout_ms: u64,
    /// Connection id that receives forwarded capture requests.
    pub forward_target: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
            heartbeat_interval_ms: 20_000,
            idle_timeout_ms: 1_800_000,
            forward_target: "android_rc".to_string(),
        }
    }
}

/// Enrichment pipeline settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnrichmentSettings {
    /// Number of worker tasks draining the job queue.
    pub workers: usize,
    /// Bounded job queue depth.
    pub queue_capacity: usize,
    /// Per-connection conversation memory depth.
    pub memory_capacity: usize,
    /// Chat/vision model identifier.
    pub model: String,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 32,
            memory_capacity: 12,
            model: "gpt-4o-mini".to_string(),
        }
    }
}

/// Blob storage settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Bucket for uploaded photos. Empty disables upload-url issuance.
    pub bucket: String,
    /// Shared key for URL signing.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub signing_key: String,
    /// Public host the signed URLs point at.
    pub signing_host: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            signing_key: String::new(),
            signing_host: "https://storage.googleapis.com".to_string(),
        }
    }
}
