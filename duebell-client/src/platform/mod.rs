#[cfg(not(target_os = "windows"))]
pub mod linux;
#[cfg(target_os = "windows")]
pub mod windows;

use std::sync::Arc;

use async_trait::async_trait;
use duebell_shared::domain::{Reminder, ReminderId};
use tokio::sync::mpsc;

use crate::window::WindowEvent;
use crate::{AppError, config::ClientConfig};

/// Power/session transitions the shell reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEvent {
    /// The OS announced an impending shutdown or reboot.
    ShutdownRequested,
    /// The machine is about to suspend.
    Suspending,
    /// The machine woke up; deadlines may have drifted past.
    Resumed,
}

/// Keeps a shutdown/sleep delay lease alive for as long as it is held.
pub trait InhibitGuard: Send {}

struct NoopInhibit;
impl InhibitGuard for NoopInhibit {}

/// Cross-platform interface for OS-level actions we need.
#[async_trait]
pub trait Platform: Send + Sync {
    /// One-time process setup before anything touches the session bus.
    fn initialize_process(&self) {}

    /// Stable identity of this user on this machine.
    fn client_id(&self) -> String;

    fn hostname(&self) -> String;

    async fn is_elevated(&self) -> bool;

    /// Asks the OS to confirm elevated privileges. Modal; may block on
    /// user input. Refusal comes back as an error.
    async fn request_elevation(&self) -> Result<(), AppError>;

    /// Puts a reminder window on screen. Outcomes are reported through
    /// `events`; the window stays up until `close_window` or an action.
    async fn open_window(
        &self,
        reminder: &Reminder,
        events: mpsc::Sender<WindowEvent>,
    ) -> Result<(), AppError>;

    async fn close_window(&self, id: &ReminderId);

    /// Takes a delay lease on shutdown/sleep so pending state can be
    /// flushed first. Dropping the guard releases the lease.
    async fn inhibit_shutdown(&self, _reason: &str) -> Result<Box<dyn InhibitGuard>, AppError> {
        Ok(Box::new(NoopInhibit))
    }

    /// Stream of power/session transitions. The default never yields.
    async fn subscribe_system_events(&self) -> mpsc::Receiver<SystemEvent> {
        let (tx, rx) = mpsc::channel(1);
        // Park the sender until the receiver goes away so recv() pends
        // instead of returning None immediately.
        tokio::spawn(async move { tx.closed().await });
        rx
    }
}

/// Detect the current platform and return an implementation.
pub async fn detect(_cfg: &ClientConfig) -> Result<Arc<dyn Platform>, AppError> {
    #[cfg(target_os = "windows")]
    {
        Ok(Arc::new(windows::WindowsPlatform::new()))
    }
    #[cfg(not(target_os = "windows"))]
    {
        Ok(Arc::new(linux::LinuxPlatform::new()))
    }
}
