use std::path::Path;

use tracing::info;

pub mod agent;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod platform;
pub mod sched;
pub mod sse;
pub mod state;
pub mod store;
#[cfg(not(target_os = "windows"))]
pub mod tray;
pub mod window;

pub use cli::Cli;
pub use config::{ClientConfig, load_config, resolve_config_path};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("dbus error: {0}")]
    Dbus(String),
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("state error: {0}")]
    State(String),
}

fn init_tracing(log_dir: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    match log_dir {
        Some(dir) => {
            let file = tracing_appender::rolling::daily(dir, "duebell-client.log");
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(writer.and(std::io::stdout))
                .with_ansi(false)
                .compact()
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .compact()
                .init();
            None
        }
    }
}

fn keyring_entry(server_url: &str) -> Result<keyring::Entry, AppError> {
    let service = "duebell-client";
    keyring::Entry::new(service, &crate::config::normalize_server_url(server_url))
        .map_err(|e| AppError::Keyring(e.to_string()))
}

pub async fn run(cli: Cli) -> Result<(), AppError> {
    let (cfg_path, cfg) = ClientConfig::find_and_load(cli.config)?;
    // The log guard must outlive the agent so buffered lines are flushed on exit.
    let _log_guard = init_tracing(cfg.log_dir.as_deref());
    info!(path=?cfg_path, "loaded config");
    agent::run(cfg_path, cfg).await
}
