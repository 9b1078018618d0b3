//! Shared, immutable manager configuration.
//!
//! Loading is deliberately kept external to the dispatcher core: `ManagerConfig` is a plain data
//! struct the core depends on through a constructor, never through a trait the core itself has to
//! satisfy. `load` layers a TOML file under environment variable overrides via `figment`, the same
//! way the rest of the stack prefers an ecosystem crate over hand-rolling a parser.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_REQUEST_SOCKET_PATH: &str = "/queue/ossec/request";
pub const DEFAULT_CONFIG_PATH: &str = "/var/ossec/etc/upgrade_dispatcher.toml";

/// Upper bound on a single reply from the remote-request daemon, matching the original `OS_MAXSTR`.
pub const OS_MAXSTR: usize = 65536;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub chunk_size: usize,
    pub max_threads: usize,
    pub wpk_repository_path: String,
    pub request_socket_path: String,
    pub queue_capacity: usize,
    #[serde(with = "humantime_secs")]
    pub pop_timeout: Duration,
    pub legacy_version_threshold: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            chunk_size: 4096,
            max_threads: 4,
            wpk_repository_path: "/var/ossec/var/upgrade".to_string(),
            request_socket_path: DEFAULT_REQUEST_SOCKET_PATH.to_string(),
            queue_capacity: 1024,
            pop_timeout: Duration::from_secs(5),
            legacy_version_threshold: "v4.0.0".to_string(),
        }
    }
}

impl ManagerConfig {
    /// Loads configuration from `path` (TOML), layered under `UPGRADE_DISPATCHER_*` environment
    /// variables, falling back to [`ManagerConfig::default`] for anything neither source sets.
    pub fn load(path: &str) -> figment::Result<ManagerConfig> {
        Figment::from(Serialized::defaults(ManagerConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("UPGRADE_DISPATCHER_"))
            .extract()
    }
}

mod humantime_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = ManagerConfig::default();
        assert!(cfg.chunk_size > 0);
        assert!(cfg.max_threads > 0);
        assert_eq!(cfg.request_socket_path, DEFAULT_REQUEST_SOCKET_PATH);
    }

    #[test]
    fn load_falls_back_to_defaults_when_file_missing() {
        let cfg = ManagerConfig::load("/nonexistent/path/does-not-exist.toml").unwrap();
        assert_eq!(cfg.max_threads, ManagerConfig::default().max_threads);
    }

    #[test]
    fn load_applies_toml_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_threads = 16\nchunk_size = 1024\n").unwrap();

        let cfg = ManagerConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.max_threads, 16);
        assert_eq!(cfg.chunk_size, 1024);
    }
}
