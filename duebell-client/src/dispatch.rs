use std::collections::HashSet;
use std::sync::Arc;

use duebell_shared::domain::{Reminder, ReminderId};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::platform::Platform;
use crate::window::WindowEvent;

/// Tracks which reminders currently have a window on screen and keeps
/// that set free of duplicates: dispatching an id that is already up is
/// a logged no-op.
pub struct Dispatcher {
    platform: Arc<dyn Platform>,
    events: mpsc::Sender<WindowEvent>,
    open: HashSet<ReminderId>,
}

impl Dispatcher {
    pub fn new(platform: Arc<dyn Platform>, events: mpsc::Sender<WindowEvent>) -> Self {
        Dispatcher {
            platform,
            events,
            open: HashSet::new(),
        }
    }

    /// Returns true when a window was actually opened.
    pub async fn dispatch(&mut self, reminder: &Reminder) -> bool {
        if self.open.contains(&reminder.id) {
            debug!(id=%reminder.id, "window already open; ignoring dispatch");
            return false;
        }
        match self
            .platform
            .open_window(reminder, self.events.clone())
            .await
        {
            Ok(()) => {
                self.open.insert(reminder.id.clone());
                true
            }
            Err(e) => {
                warn!(id=%reminder.id, error=%e, "window open failed");
                false
            }
        }
    }

    /// Closes the window and forgets it. Safe to call for ids that have
    /// no window.
    pub async fn retire(&mut self, id: &ReminderId) {
        if self.open.remove(id) {
            self.platform.close_window(id).await;
        }
    }

    /// Forgets a window the toolkit already tore down itself.
    pub fn mark_closed(&mut self, id: &ReminderId) {
        self.open.remove(id);
    }

    pub fn is_open(&self, id: &ReminderId) -> bool {
        self.open.contains(id)
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub async fn close_all(&mut self) {
        let ids: Vec<ReminderId> = self.open.drain().collect();
        for id in ids {
            self.platform.close_window(&id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AppError;
    use async_trait::async_trait;
    use duebell_shared::domain::now_utc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct StubPlatform {
        opened: AtomicUsize,
        closed: Mutex<Vec<ReminderId>>,
        fail_open: bool,
    }

    #[async_trait]
    impl Platform for StubPlatform {
        fn client_id(&self) -> String {
            "stub".into()
        }
        fn hostname(&self) -> String {
            "stub-host".into()
        }
        async fn is_elevated(&self) -> bool {
            false
        }
        async fn request_elevation(&self) -> Result<(), AppError> {
            Ok(())
        }
        async fn open_window(
            &self,
            _reminder: &Reminder,
            _events: mpsc::Sender<WindowEvent>,
        ) -> Result<(), AppError> {
            if self.fail_open {
                return Err(AppError::Dbus("no notification service".into()));
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn close_window(&self, id: &ReminderId) {
            self.closed.lock().unwrap().push(id.clone());
        }
    }

    fn reminder(id: &str) -> Reminder {
        Reminder::new(id.into(), "msg", now_utc())
    }

    #[tokio::test]
    async fn rapid_dispatch_opens_one_window() {
        let plat = Arc::new(StubPlatform::default());
        let (tx, _rx) = mpsc::channel(4);
        let mut d = Dispatcher::new(plat.clone(), tx);

        let r = reminder("n1");
        assert!(d.dispatch(&r).await);
        for _ in 0..5 {
            assert!(!d.dispatch(&r).await);
        }
        assert_eq!(plat.opened.load(Ordering::SeqCst), 1);
        assert_eq!(d.open_count(), 1);
    }

    #[tokio::test]
    async fn retire_allows_a_later_redispatch() {
        let plat = Arc::new(StubPlatform::default());
        let (tx, _rx) = mpsc::channel(4);
        let mut d = Dispatcher::new(plat.clone(), tx);

        let r = reminder("n1");
        assert!(d.dispatch(&r).await);
        d.retire(&r.id).await;
        assert_eq!(d.open_count(), 0);
        assert_eq!(*plat.closed.lock().unwrap(), vec![r.id.clone()]);
        assert!(d.dispatch(&r).await);
        assert_eq!(plat.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retire_of_unknown_id_does_not_touch_platform() {
        let plat = Arc::new(StubPlatform::default());
        let (tx, _rx) = mpsc::channel(4);
        let mut d = Dispatcher::new(plat.clone(), tx);

        d.retire(&"ghost".into()).await;
        assert!(plat.closed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_open_is_not_tracked_as_a_window() {
        let plat = Arc::new(StubPlatform {
            fail_open: true,
            ..Default::default()
        });
        let (tx, _rx) = mpsc::channel(4);
        let mut d = Dispatcher::new(plat, tx);

        assert!(!d.dispatch(&reminder("n1")).await);
        assert_eq!(d.open_count(), 0);
    }
}
