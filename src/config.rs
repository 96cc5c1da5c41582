//! Configuration handed over by the host app when opening the core.
//!
//! ```json
//! {
//!   "dbPath": "/data/user/0/app/files/vending_cache",
//!   "mapSizeMb": 64,
//!   "backend": { "supabase": { "url": "https://xyz.supabase.co", "anonKey": "..." } }
//! }
//! ```
//!
//! Omitting `backend` selects the in-memory backend seeded with sample data.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::remote::{InMemoryRemote, RemoteSource, SupabaseRemote};

fn default_map_size_mb() -> usize {
    64
}

fn default_timeout_secs() -> u64 {
    15
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreConfig {
    /// Directory holding the LMDB environment.
    pub db_path: String,
    #[serde(default = "default_map_size_mb")]
    pub map_size_mb: usize,
    #[serde(default)]
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackendConfig {
    #[default]
    Mock,
    Supabase(SupabaseConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl CoreConfig {
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            map_size_mb: default_map_size_mb(),
            backend: BackendConfig::default(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl BackendConfig {
    pub fn build(&self) -> Result<Arc<dyn RemoteSource>, RemoteError> {
        match self {
            BackendConfig::Mock => Ok(Arc::new(InMemoryRemote::default())),
            BackendConfig::Supabase(cfg) => Ok(Arc::new(SupabaseRemote::new(
                &cfg.url,
                &cfg.anon_key,
                Duration::from_secs(cfg.timeout_secs),
            )?)),
        }
    }
}
