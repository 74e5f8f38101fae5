//! App configuration: `charla.toml` with serde defaults.

use std::path::{Path, PathBuf};

use {serde::Deserialize, tracing::debug};

/// Standard config file name, looked up in the working directory.
const CONFIG_FILENAME: &str = "charla.toml";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub session: SessionSettings,
    pub cache: CacheSettings,
    pub dispatch: DispatchSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSettings {
    pub auth_dir: PathBuf,
    pub qr_png_path: PathBuf,
    pub max_qr_attempts: u32,
    pub retry_budget: u32,
    pub sidecar_port: u16,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            auth_dir: PathBuf::from("auth_info"),
            qr_png_path: PathBuf::from("qr-code.png"),
            max_qr_attempts: 5,
            retry_budget: 10,
            sidecar_port: charla_session::sidecar::DEFAULT_SIDECAR_PORT,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { ttl_secs: 60 * 60 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchSettings {
    pub timestamp_tolerance_secs: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            timestamp_tolerance_secs: 5 * 60,
        }
    }
}

/// Load config from an explicit path, or from `./charla.toml`, falling back
/// to defaults when no file exists.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<AppConfig> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let local = PathBuf::from(CONFIG_FILENAME);
            local.exists().then_some(local)
        },
    };

    match path {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
            let config = toml::from_str(&raw)
                .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;
            Ok(config)
        },
        None => {
            debug!("no config file found, using defaults");
            Ok(AppConfig::default())
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_tunables() {
        let config = AppConfig::default();
        assert_eq!(config.session.max_qr_attempts, 5);
        assert_eq!(config.session.retry_budget, 10);
        assert_eq!(config.cache.ttl_secs, 3600);
        assert_eq!(config.dispatch.timestamp_tolerance_secs, 300);
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("charla.toml");
        std::fs::write(&path, "[session]\nmax_qr_attempts = 3\n").unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.session.max_qr_attempts, 3);
        assert_eq!(config.session.retry_budget, 10);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("charla.toml");
        std::fs::write(&path, "[session]\nmax_qr_atempts = 3\n").unwrap();

        assert!(load(Some(&path)).is_err());
    }
}
