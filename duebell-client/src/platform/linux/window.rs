use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use duebell_shared::domain::{Reminder, ReminderAction, ReminderId};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::AppError;
use crate::window::{WINDOW_ACTIONS, WindowEvent, WindowOutcome, button_label};

/// Reminder windows rendered as persistent desktop notifications.
///
/// Critical urgency plus `Timeout::Never` keeps them on screen until a
/// button is pressed. Closing goes through the replace-id trick: the
/// live notification is swapped for one that expires after 1ms, since
/// the handle is parked in a blocking wait and cannot be closed
/// directly.
pub struct WindowBackend {
    live: Arc<Mutex<HashMap<ReminderId, u32>>>,
    next_replace_id: AtomicU32,
}

impl WindowBackend {
    pub fn new() -> Self {
        Self {
            live: Arc::new(Mutex::new(HashMap::new())),
            next_replace_id: AtomicU32::new(2001),
        }
    }

    pub async fn open(
        &self,
        reminder: &Reminder,
        events: mpsc::Sender<WindowEvent>,
    ) -> Result<(), AppError> {
        {
            let live = self.live.lock().await;
            if live.contains_key(&reminder.id) {
                debug!(id=%reminder.id, "window backend: already showing");
                return Ok(());
            }
        }

        let replace_id = self.next_replace_id.fetch_add(1, Ordering::Relaxed);
        let mut n = notify_rust::Notification::new();
        n.appname("DueBell")
            .summary("Reminder")
            .body(&reminder.message)
            .id(replace_id)
            .urgency(notify_rust::Urgency::Critical)
            .timeout(notify_rust::Timeout::Never);
        for action in WINDOW_ACTIONS {
            n.action(action.wire_key(), button_label(action));
        }

        match n.show_async().await {
            Ok(handle) => {
                self.live.lock().await.insert(reminder.id.clone(), replace_id);
                debug!(id=%reminder.id, replace_id, "window backend: notification shown");
                self.spawn_action_wait(reminder.id.clone(), handle, events);
                Ok(())
            }
            Err(e) => {
                // Degrade to a log line standing in for the window; the
                // reminder stays tracked and reappears on the next restart.
                warn!(error=%e, "notify-rust failed while showing reminder");
                info!(id=%reminder.id, "[REMINDER] {}", reminder.message);
                Ok(())
            }
        }
    }

    /// Blocks a worker thread on the notification's action signal and
    /// forwards the outcome to the shell.
    fn spawn_action_wait(
        &self,
        id: ReminderId,
        handle: notify_rust::NotificationHandle,
        events: mpsc::Sender<WindowEvent>,
    ) {
        let live = self.live.clone();
        tokio::task::spawn_blocking(move || {
            let mut chosen: Option<ReminderAction> = None;
            handle.wait_for_action(|key| {
                // "__closed" and "__timeout" fall through to None
                chosen = ReminderAction::from_key(key);
            });
            let outcome = match chosen {
                Some(action) => WindowOutcome::Action(action),
                None => WindowOutcome::Dismissed,
            };
            if matches!(outcome, WindowOutcome::Dismissed) && !live.blocking_lock().contains_key(&id)
            {
                // Retired by the shell itself; not a user dismissal.
                return;
            }
            if let Err(e) = events.blocking_send(WindowEvent { id, outcome }) {
                debug!(error=%e, "window backend: event receiver gone");
            }
        });
    }

    pub async fn close(&self, id: &ReminderId) {
        let Some(replace_id) = self.live.lock().await.remove(id) else {
            return;
        };
        debug!(id=%id, replace_id, "window backend: replacing with short-timeout notification");
        let mut n = notify_rust::Notification::new();
        let _ = n
            .appname("DueBell")
            .summary("Reminder closed")
            .id(replace_id)
            .urgency(notify_rust::Urgency::Low)
            .timeout(notify_rust::Timeout::Milliseconds(1))
            .show_async()
            .await;
    }
}

impl Default for WindowBackend {
    fn default() -> Self {
        Self::new()
    }
}
