use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::AppError;

pub const ENV_CONFIG: &str = "DUEBELL_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub server_url: String,
    /// Resync cadence. Acks queued between ticks are flushed here too.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Ask for elevated privileges on startup. Refusal is not fatal.
    #[serde(default)]
    pub require_admin: bool,
    /// When set, logs additionally go to a daily-rolling file in this directory.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_poll_interval() -> u64 {
    300
}

impl ClientConfig {
    pub fn find_and_load(cli_value: Option<PathBuf>) -> Result<(PathBuf, ClientConfig), AppError> {
        let path = resolve_config_path(cli_value)?;
        let cfg = load_config(&path)?;
        Ok((path, cfg))
    }
}

pub fn resolve_config_path(cli_value: Option<PathBuf>) -> Result<PathBuf, AppError> {
    if let Some(p) = cli_value {
        return Ok(p);
    }
    if let Ok(p) = std::env::var(ENV_CONFIG) {
        return Ok(PathBuf::from(p));
    }
    default_config_path().ok_or_else(|| AppError::Config("could not determine config dir".into()))
}

pub fn default_config_path() -> Option<PathBuf> {
    let pd = ProjectDirs::from("dev", "duebell", "duebell")?;
    Some(pd.config_dir().join("client.yaml"))
}

pub fn load_config(path: &PathBuf) -> Result<ClientConfig, AppError> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("read {} failed: {e}", path.display())))?;
    let cfg: ClientConfig = serde_yaml::from_str(&data)
        .map_err(|e| AppError::Config(format!("parse {} failed: {e}", path.display())))?;
    Ok(cfg)
}

pub fn save_config(path: &PathBuf, cfg: &ClientConfig) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let data = serde_yaml::to_string(cfg)
        .map_err(|e| AppError::Config(format!("serialize config failed: {e}")))?;
    std::fs::write(path, data)
        .map_err(|e| AppError::Config(format!("write {} failed: {e}", path.display())))
}

pub fn normalize_server_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", trimmed.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_wins_over_everything() {
        let p = resolve_config_path(Some(PathBuf::from("/tmp/duebell.yaml"))).unwrap();
        assert_eq!(p, PathBuf::from("/tmp/duebell.yaml"));
    }

    #[test]
    fn normalize_adds_scheme_and_strips_trailing_slash() {
        assert_eq!(normalize_server_url("example.org:8080/"), "http://example.org:8080");
        assert_eq!(normalize_server_url("https://example.org/"), "https://example.org");
        assert_eq!(normalize_server_url(" http://h "), "http://h");
    }

    #[test]
    fn missing_optional_fields_take_defaults() {
        let cfg: ClientConfig = serde_yaml::from_str("server_url: http://h\n").unwrap();
        assert_eq!(cfg.poll_interval_secs, 300);
        assert!(!cfg.require_admin);
        assert!(cfg.log_dir.is_none());
    }

    #[test]
    fn config_round_trips_through_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.yaml");
        let cfg = ClientConfig {
            server_url: "http://h:8080".into(),
            poll_interval_secs: 60,
            require_admin: true,
            log_dir: Some(PathBuf::from("/var/log/duebell")),
        };
        save_config(&path, &cfg).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.server_url, cfg.server_url);
        assert_eq!(loaded.poll_interval_secs, 60);
        assert!(loaded.require_admin);
        assert_eq!(loaded.log_dir, cfg.log_dir);
    }

    #[test]
    fn unreadable_config_is_a_config_error() {
        let err = load_config(&PathBuf::from("/nonexistent/duebell/client.yaml")).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
