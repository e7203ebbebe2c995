//! Status notifier item with a pending-reminder count and a Quit entry.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// How often the updater thread re-checks the pending counter.
const REFRESH_PERIOD: Duration = Duration::from_millis(500);

pub struct ReminderTray {
    pending: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

impl ksni::Tray for ReminderTray {
    fn id(&self) -> String {
        "duebell".into()
    }

    fn title(&self) -> String {
        "DueBell".into()
    }

    fn icon_name(&self) -> String {
        // Freedesktop icon available in every stock theme.
        "appointment-soon".into()
    }

    fn menu(&self) -> Vec<ksni::MenuItem<Self>> {
        let label = match self.pending.load(Ordering::Relaxed) {
            0 => "No reminders due".to_string(),
            1 => "1 reminder due".to_string(),
            n => format!("{n} reminders due"),
        };
        vec![
            ksni::menu::StandardItem {
                label,
                enabled: false,
                ..Default::default()
            }
            .into(),
            ksni::menu::MenuItem::Separator,
            ksni::menu::StandardItem {
                label: "Quit".into(),
                icon_name: "application-exit".into(),
                activate: Box::new(|this: &mut Self| {
                    info!("quit requested from tray menu");
                    this.cancel.cancel();
                }),
                ..Default::default()
            }
            .into(),
        ]
    }
}

/// Starts the tray service plus a thread that refreshes the menu whenever
/// the pending count changes. Quit cancels `cancel`; the agent loop owns
/// the actual shutdown.
pub fn spawn(pending: Arc<AtomicUsize>, cancel: CancellationToken) {
    let tray = ReminderTray {
        pending: Arc::clone(&pending),
        cancel: cancel.clone(),
    };
    let service = ksni::TrayService::new(tray);
    let handle = service.handle();
    service.spawn();
    debug!("tray service started");

    std::thread::spawn(move || {
        let mut last = pending.load(Ordering::Relaxed);
        while !cancel.is_cancelled() {
            let now = pending.load(Ordering::Relaxed);
            if now != last {
                last = now;
                // menu() re-reads the counter; an empty update forces a rebuild.
                let _ = handle.update(|_t: &mut ReminderTray| {});
            }
            std::thread::sleep(REFRESH_PERIOD);
        }
        debug!("tray updater stopped");
    });
}
