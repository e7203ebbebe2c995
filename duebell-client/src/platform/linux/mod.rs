pub mod power;
pub mod window;

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use duebell_shared::domain::{Reminder, ReminderId};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::info;

use super::{InhibitGuard, Platform, SystemEvent};
use crate::AppError;
use crate::window::WindowEvent;

/// Linux implementation of the cross-platform interface.
pub struct LinuxPlatform {
    windows: window::WindowBackend,
}

impl LinuxPlatform {
    pub fn new() -> Self {
        Self {
            windows: window::WindowBackend::new(),
        }
    }
}

impl Default for LinuxPlatform {
    fn default() -> Self {
        Self::new()
    }
}

pub fn ensure_console_dbus_env() {
    if std::env::var_os("DBUS_SESSION_BUS_ADDRESS").is_some() {
        return;
    }

    let Some(runtime_dir) = find_runtime_dir_with_bus() else {
        return;
    };

    export_runtime_dir(&runtime_dir);
    if let Some(addr) = build_bus_address(&runtime_dir) {
        // SAFETY: we provide owned UTF-8 data, so setting the process env var is fine.
        unsafe {
            std::env::set_var("DBUS_SESSION_BUS_ADDRESS", addr);
        }
    }
}

fn find_runtime_dir_with_bus() -> Option<PathBuf> {
    runtime_dir_from_env()
        .and_then(runtime_dir_if_bus_exists)
        .or_else(|| runtime_dir_if_bus_exists(default_runtime_dir()))
}

fn runtime_dir_if_bus_exists(dir: PathBuf) -> Option<PathBuf> {
    dir.join("bus").exists().then_some(dir)
}

fn runtime_dir_from_env() -> Option<PathBuf> {
    std::env::var_os("XDG_RUNTIME_DIR").map(PathBuf::from)
}

fn default_runtime_dir() -> PathBuf {
    let uid = nix::unistd::geteuid().as_raw();
    PathBuf::from(format!("/run/user/{uid}"))
}

fn export_runtime_dir(runtime: &Path) {
    if std::env::var_os("XDG_RUNTIME_DIR").is_none() {
        // SAFETY: runtime originates from a valid PathBuf and remains owned for the program lifetime.
        unsafe {
            std::env::set_var("XDG_RUNTIME_DIR", runtime.as_os_str());
        }
    }
}

fn build_bus_address(runtime: &Path) -> Option<String> {
    let bus = runtime.join("bus");
    bus.exists().then(|| format!("unix:path={}", bus.display()))
}

#[async_trait]
impl Platform for LinuxPlatform {
    fn initialize_process(&self) {
        // An agent started from a console session may miss the session
        // bus address; notifications and the tray need it.
        ensure_console_dbus_env();
    }

    fn client_id(&self) -> String {
        let user = current_username();
        let machine_id = read_machine_id().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        format!("{user}-{machine_id}")
    }

    fn hostname(&self) -> String {
        nix::unistd::gethostname()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string())
    }

    async fn is_elevated(&self) -> bool {
        nix::unistd::geteuid().is_root()
    }

    async fn request_elevation(&self) -> Result<(), AppError> {
        // pkexec puts up the polkit authentication dialog; a zero exit
        // means the user authenticated as an administrator.
        info!("requesting administrator confirmation via polkit");
        let status = Command::new("pkexec")
            .arg("true")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;
        if status.success() {
            Ok(())
        } else {
            Err(AppError::Io(std::io::Error::other(format!(
                "pkexec declined with status {status}"
            ))))
        }
    }

    async fn open_window(
        &self,
        reminder: &Reminder,
        events: mpsc::Sender<WindowEvent>,
    ) -> Result<(), AppError> {
        self.windows.open(reminder, events).await
    }

    async fn close_window(&self, id: &ReminderId) {
        self.windows.close(id).await;
    }

    async fn inhibit_shutdown(&self, reason: &str) -> Result<Box<dyn InhibitGuard>, AppError> {
        power::acquire_delay_inhibitor(reason).await
    }

    async fn subscribe_system_events(&self) -> mpsc::Receiver<SystemEvent> {
        power::subscribe_system_events().await
    }
}

fn current_username() -> String {
    let uid = nix::unistd::getuid();
    match nix::unistd::User::from_uid(uid) {
        Ok(Some(user)) => user.name,
        _ => format!("uid{}", uid.as_raw()),
    }
}

fn read_machine_id() -> Option<String> {
    let paths = ["/etc/machine-id", "/var/lib/dbus/machine-id"];
    for p in paths {
        if let Ok(s) = std::fs::read_to_string(p) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}
