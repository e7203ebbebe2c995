use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use duebell_client::AppError;
use duebell_client::agent::{AgentDeps, main_loop};
use duebell_client::config::ClientConfig;
use duebell_client::platform::{Platform, SystemEvent};
use duebell_client::store::StateStore;
use duebell_client::window::{WindowEvent, WindowOutcome};
use duebell_shared::api::{ReminderDto, ReminderStateDto, ServerEvent};
use duebell_shared::domain::{Reminder, ReminderAction, ReminderId, ReminderState, now_utc};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Platform stub that records window traffic and lets the test inject
/// window and system events instead of a real desktop.
#[derive(Default)]
struct MockPlatform {
    opened: Mutex<Vec<ReminderId>>,
    closed: Mutex<Vec<ReminderId>>,
    events: Mutex<Option<mpsc::Sender<WindowEvent>>>,
    system_rx: Mutex<Option<mpsc::Receiver<SystemEvent>>>,
}

#[async_trait]
impl Platform for MockPlatform {
    fn client_id(&self) -> String {
        "user-mock".into()
    }

    fn hostname(&self) -> String {
        "mockbox".into()
    }

    async fn is_elevated(&self) -> bool {
        false
    }

    async fn request_elevation(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn open_window(
        &self,
        reminder: &Reminder,
        events: mpsc::Sender<WindowEvent>,
    ) -> Result<(), AppError> {
        self.opened.lock().unwrap().push(reminder.id.clone());
        *self.events.lock().unwrap() = Some(events);
        Ok(())
    }

    async fn close_window(&self, id: &ReminderId) {
        self.closed.lock().unwrap().push(id.clone());
    }

    async fn subscribe_system_events(&self) -> mpsc::Receiver<SystemEvent> {
        match self.system_rx.lock().unwrap().take() {
            Some(rx) => rx,
            None => {
                let (tx, rx) = mpsc::channel(1);
                tokio::spawn(async move { tx.closed().await });
                rx
            }
        }
    }
}

impl MockPlatform {
    fn opens_of(&self, id: &str) -> usize {
        self.opened.lock().unwrap().iter().filter(|r| r.0 == id).count()
    }

    fn closes_of(&self, id: &str) -> usize {
        self.closed.lock().unwrap().iter().filter(|r| r.0 == id).count()
    }

    fn window_sender(&self) -> mpsc::Sender<WindowEvent> {
        self.events
            .lock()
            .unwrap()
            .clone()
            .expect("no window opened yet")
    }
}

struct TestAgent {
    platform: Arc<MockPlatform>,
    cancel: CancellationToken,
    system_tx: mpsc::Sender<SystemEvent>,
    push_tx: broadcast::Sender<ServerEvent>,
    pending: Arc<AtomicUsize>,
    handle: tokio::task::JoinHandle<Result<(), AppError>>,
}

impl TestAgent {
    /// Boots a main loop over the snapshot at `store_path`, with push and
    /// system events wired to test-held channels. No token and an unused
    /// local port keep the loop offline: registration fails fast and the
    /// agent runs on its local state.
    fn spawn(store_path: &Path) -> Self {
        let store = StateStore::at(store_path);
        let snapshot = store.load().expect("snapshot");

        let platform = Arc::new(MockPlatform::default());
        let (system_tx, system_rx) = mpsc::channel(8);
        *platform.system_rx.lock().unwrap() = Some(system_rx);
        let (push_tx, push_rx) = broadcast::channel(16);
        let pending = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let deps = AgentDeps {
            cfg: ClientConfig {
                server_url: "http://127.0.0.1:9".into(),
                // Longer than any scenario so ticks never interfere.
                poll_interval_secs: 100_000,
                require_admin: false,
                log_dir: None,
            },
            platform: platform.clone(),
            store,
            token: None,
            push: Some(push_rx),
            pending: pending.clone(),
            elevated: false,
        };
        let handle = tokio::spawn(main_loop(cancel.child_token(), deps, snapshot));

        Self {
            platform,
            cancel,
            system_tx,
            push_tx,
            pending,
            handle,
        }
    }

    async fn expect_opens(&self, id: &str, n: usize) {
        wait_until(&format!("{n} opens of {id}"), || {
            self.platform.opens_of(id) == n
        })
        .await;
    }

    async fn window_action(&self, id: &str, action: ReminderAction) {
        self.platform
            .window_sender()
            .send(WindowEvent {
                id: id.into(),
                outcome: WindowOutcome::Action(action),
            })
            .await
            .expect("agent gone");
    }

    async fn window_dismissed(&self, id: &str) {
        self.platform
            .window_sender()
            .send(WindowEvent {
                id: id.into(),
                outcome: WindowOutcome::Dismissed,
            })
            .await
            .expect("agent gone");
    }

    fn push(&self, ev: ServerEvent) {
        self.push_tx.send(ev).expect("push channel");
    }

    async fn system(&self, ev: SystemEvent) {
        self.system_tx.send(ev).await.expect("system channel");
    }

    async fn join(&mut self) {
        tokio::time::timeout(Duration::from_secs(30), &mut self.handle)
            .await
            .expect("main loop did not stop")
            .expect("main loop panicked")
            .expect("main loop errored");
    }

    async fn quit(&mut self) {
        self.cancel.cancel();
        self.join().await;
    }
}

impl Drop for TestAgent {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Polls `cond` every couple of virtual milliseconds; the paused clock
/// auto-advances, so ready work always drains between checks.
async fn wait_until<F: FnMut() -> bool>(what: &str, mut cond: F) {
    for _ in 0..2000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("timed out waiting for {what}");
}

/// One sleep is enough for the loop to drain everything already queued.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn seed(path: &Path, reminders: &[Reminder]) {
    StateStore::at(path).save(reminders).expect("seed snapshot");
}

fn pending_reminder(id: &str, message: &str) -> Reminder {
    Reminder::new(id.into(), message, now_utc())
}

fn snoozed_reminder(id: &str, message: &str, until_in_secs: i64) -> Reminder {
    let now = now_utc();
    let mut r = Reminder::new(id.into(), message, now);
    r.state = ReminderState::Snoozed {
        until: now + time::Duration::seconds(until_in_secs),
    };
    r
}

fn pending_dto(id: &str, message: &str) -> ReminderDto {
    ReminderDto {
        id: id.into(),
        message: message.into(),
        created_at: now_utc().unix_timestamp(),
        state: ReminderStateDto::Pending,
        until: None,
    }
}

#[tokio::test(start_paused = true)]
async fn snoozed_reminder_returns_at_its_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pending.json");
    seed(&path, &[pending_reminder("n1", "Take medication")]);

    let mut agent = TestAgent::spawn(&path);
    agent.expect_opens("n1", 1).await;
    assert_eq!(agent.pending.load(Ordering::Relaxed), 1);

    agent.window_action("n1", ReminderAction::Snooze15).await;
    wait_until("window retired", || agent.platform.closes_of("n1") == 1).await;
    settle().await;

    // The snooze hit the disk before any deadline passed.
    let snap = StateStore::at(&path).load().unwrap();
    assert_eq!(snap.len(), 1);
    assert!(snap[0].snoozed_until().is_some(), "snooze not persisted");
    assert_eq!(agent.pending.load(Ordering::Relaxed), 1);

    // Nothing reappears before the deadline.
    tokio::time::sleep(Duration::from_secs(14 * 60)).await;
    assert_eq!(agent.platform.opens_of("n1"), 1);

    // Past it, the same reminder is back on screen.
    tokio::time::sleep(Duration::from_secs(90)).await;
    agent.expect_opens("n1", 2).await;

    agent.quit().await;
}

#[tokio::test(start_paused = true)]
async fn dismissal_reshows_the_window() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pending.json");
    seed(&path, &[pending_reminder("n1", "Stand up")]);

    let mut agent = TestAgent::spawn(&path);
    agent.expect_opens("n1", 1).await;

    // The desktop closed the window without any button press.
    agent.window_dismissed("n1").await;
    agent.expect_opens("n1", 2).await;

    // The shell never asked the platform to close it.
    assert_eq!(agent.platform.closes_of("n1"), 0);
    agent.quit().await;
}

#[tokio::test(start_paused = true)]
async fn pushed_reminders_open_once_and_cancellation_retires() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pending.json");

    let mut agent = TestAgent::spawn(&path);
    settle().await;

    agent.push(ServerEvent::ReminderNew {
        reminder: pending_dto("n1", "Submit report"),
    });
    agent.expect_opens("n1", 1).await;

    // A duplicate push for a tracked id changes nothing.
    agent.push(ServerEvent::ReminderNew {
        reminder: pending_dto("n1", "Submit report"),
    });
    agent.push(ServerEvent::ReminderNew {
        reminder: pending_dto("n2", "Water plants"),
    });
    agent.expect_opens("n2", 1).await;
    assert_eq!(agent.platform.opens_of("n1"), 1);
    assert_eq!(agent.pending.load(Ordering::Relaxed), 2);

    // Server-side cancellation closes the window and forgets the item.
    agent.push(ServerEvent::ReminderCancelled { id: "n1".into() });
    wait_until("n1 closed", || agent.platform.closes_of("n1") == 1).await;
    settle().await;
    let ids: Vec<String> = StateStore::at(&path)
        .load()
        .unwrap()
        .into_iter()
        .map(|r| r.id.0)
        .collect();
    assert_eq!(ids, vec!["n2".to_string()]);
    assert_eq!(agent.pending.load(Ordering::Relaxed), 1);

    agent.quit().await;
}

#[tokio::test(start_paused = true)]
async fn completing_a_reminder_is_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pending.json");
    seed(&path, &[pending_reminder("n1", "Pay rent")]);

    let mut agent = TestAgent::spawn(&path);
    agent.expect_opens("n1", 1).await;

    agent.window_action("n1", ReminderAction::Complete).await;
    wait_until("n1 closed", || agent.platform.closes_of("n1") == 1).await;
    settle().await;
    assert!(StateStore::at(&path).load().unwrap().is_empty());
    assert_eq!(agent.pending.load(Ordering::Relaxed), 0);

    // A stray dismissal arriving after completion must not resurrect it.
    agent.window_dismissed("n1").await;
    settle().await;
    assert_eq!(agent.platform.opens_of("n1"), 1);

    agent.quit().await;
}

#[tokio::test(start_paused = true)]
async fn restart_restores_pending_windows_and_snoozed_deadlines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pending.json");
    seed(
        &path,
        &[
            pending_reminder("n1", "Take medication"),
            pending_reminder("n2", "Stand up"),
            snoozed_reminder("n3", "Call back", 3600),
        ],
    );

    let mut agent = TestAgent::spawn(&path);
    agent.expect_opens("n1", 1).await;
    agent.expect_opens("n2", 1).await;
    assert_eq!(agent.platform.opens_of("n3"), 0);
    assert_eq!(agent.pending.load(Ordering::Relaxed), 3);
    agent.quit().await;

    // Everything non-completed survived the stop.
    assert_eq!(StateStore::at(&path).load().unwrap().len(), 3);

    // A fresh process picks up where the last one left off.
    let mut agent = TestAgent::spawn(&path);
    agent.expect_opens("n1", 1).await;
    agent.expect_opens("n2", 1).await;
    assert_eq!(agent.platform.opens_of("n3"), 0);

    // The snoozed deadline was re-armed, not forgotten.
    tokio::time::sleep(Duration::from_secs(3700)).await;
    agent.expect_opens("n3", 1).await;

    agent.quit().await;
}

#[tokio::test(start_paused = true)]
async fn os_shutdown_flushes_state_for_the_next_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pending.json");
    seed(&path, &[pending_reminder("n1", "Backup laptop")]);

    let mut agent = TestAgent::spawn(&path);
    agent.expect_opens("n1", 1).await;

    agent.system(SystemEvent::ShutdownRequested).await;
    agent.join().await;

    assert_eq!(agent.platform.closes_of("n1"), 1);
    let snap = StateStore::at(&path).load().unwrap();
    assert_eq!(snap.len(), 1);
    assert_eq!(snap[0].state, ReminderState::Pending);

    // Next boot puts the same reminder back on screen.
    let mut agent = TestAgent::spawn(&path);
    agent.expect_opens("n1", 1).await;
    agent.quit().await;
}
