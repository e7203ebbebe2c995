//! Application shell: owns the reminder table and drives every event
//! source (windows, scheduler, push, system, poll tick) from one loop.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use duebell_shared::api::{self, AckReq, RegisterReq, ServerEvent};
use duebell_shared::domain::{Reminder, ReminderAction, ReminderId, ReminderState, now_utc};
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::AppError;
use crate::config::ClientConfig;
use crate::dispatch::Dispatcher;
use crate::platform::{self, Platform, SystemEvent};
use crate::sched::SnoozeScheduler;
use crate::sse::EventHub;
use crate::state::ReminderTable;
use crate::store::StateStore;
use crate::window::{WindowEvent, WindowOutcome};

pub async fn run(cfg_path: PathBuf, cfg: ClientConfig) -> Result<(), AppError> {
    let plat = platform::detect(&cfg).await?;
    plat.initialize_process();
    #[cfg(target_os = "windows")]
    info!("platform selected: windows");
    #[cfg(not(target_os = "windows"))]
    info!("platform selected: linux");

    let elevated = check_privileges(&cfg, plat.as_ref()).await;

    let base = crate::config::normalize_server_url(&cfg.server_url);
    let token = match read_token_from_keyring(&cfg.server_url) {
        Ok(t) => {
            debug!("found existing token in keyring");
            Some(t)
        }
        Err(e) => {
            info!(error=%e, "no stored token; registering with server");
            match register_client(&base, plat.as_ref()).await {
                Ok(t) => {
                    // First run: write the config back with the normalized URL
                    // so later runs resolve the same keyring account.
                    let mut written = cfg.clone();
                    written.server_url = base.clone();
                    if let Err(e) = crate::config::save_config(&cfg_path, &written) {
                        warn!(error=%e, "config write-back failed");
                    }
                    Some(t)
                }
                Err(e) => {
                    warn!(error=%e, "registration failed; starting offline");
                    None
                }
            }
        }
    };

    let store = StateStore::open_default()?;
    let snapshot = match store.load() {
        Ok(s) => s,
        Err(e) => {
            warn!(error=%e, "snapshot unreadable; starting empty");
            Vec::new()
        }
    };

    // Push is an optimization; the agent runs fine on polling alone.
    let hub = token.as_ref().and_then(|t| match EventHub::new(&base, t) {
        Ok(h) => Some(h),
        Err(e) => {
            warn!(error=%e, "SSE hub init failed; continuing without push");
            None
        }
    });

    // Delay lease on shutdown/sleep: gives the loop time to flush the
    // snapshot before the OS proceeds. Held until after the loop exits.
    let inhibitor = match plat.inhibit_shutdown("flushing pending reminders").await {
        Ok(g) => Some(g),
        Err(e) => {
            warn!(error=%e, "shutdown inhibitor unavailable");
            None
        }
    };

    let pending = Arc::new(AtomicUsize::new(0));
    let cancel = CancellationToken::new();
    #[cfg(not(target_os = "windows"))]
    crate::tray::spawn(pending.clone(), cancel.clone());

    let deps = AgentDeps {
        cfg,
        platform: plat,
        store,
        token,
        push: hub.as_ref().map(|h| h.subscribe()),
        pending,
        elevated,
    };
    let cancel_child = cancel.child_token();
    let mut handle = tokio::spawn(async move {
        if let Err(e) = main_loop(cancel_child, deps, snapshot).await {
            error!(error=%e, "main loop failed");
        }
    });

    // Race signal vs. tray quit vs. main loop termination
    tokio::select! {
        _ = shutdown_signal() => {
            info!("shutdown signal received; requesting main loop to stop");
            cancel.cancel();
        }
        _ = cancel.cancelled() => {
            info!("quit requested; stopping main loop");
        }
        _ = &mut handle => {
            info!("main loop finished");
        }
    }

    // Give the loop some time to flush state, then release the lease.
    if !handle.is_finished() {
        let _ = tokio::time::timeout(Duration::from_secs(3), handle).await;
    }
    if let Some(h) = &hub {
        h.shutdown();
    }
    drop(inhibitor);
    Ok(())
}

/// Everything the main loop needs, bundled so the integration tests can
/// assemble an agent around a mock platform and a temp store.
pub struct AgentDeps {
    pub cfg: ClientConfig,
    pub platform: Arc<dyn Platform>,
    pub store: StateStore,
    pub token: Option<String>,
    /// Subscription to the push stream; `None` runs on polling alone.
    pub push: Option<broadcast::Receiver<ServerEvent>>,
    /// Gauge mirrored into the tray menu.
    pub pending: Arc<AtomicUsize>,
    pub elevated: bool,
}

pub async fn main_loop(
    cancel: CancellationToken,
    deps: AgentDeps,
    snapshot: Vec<Reminder>,
) -> Result<(), AppError> {
    let AgentDeps {
        cfg,
        platform,
        store,
        token,
        push,
        pending,
        elevated,
    } = deps;

    let (win_tx, mut win_rx) = mpsc::channel::<WindowEvent>(32);
    let (sched, mut due_rx) = SnoozeScheduler::spawn();
    let mut system_rx = platform.subscribe_system_events().await;
    let mut system_open = true;
    let (mut sse_rx, mut sse_open) = match push {
        Some(rx) => (rx, true),
        // Receiver of a dropped sender; the arm below stays disabled.
        None => (broadcast::channel(1).1, false),
    };

    let mut shell = Shell {
        base: crate::config::normalize_server_url(&cfg.server_url),
        platform: platform.clone(),
        table: ReminderTable::restore(snapshot),
        dispatcher: Dispatcher::new(platform, win_tx.clone()),
        store,
        sched,
        token,
        acks: VecDeque::new(),
        pending,
    };
    info!(
        restored = shell.table.pending_count(),
        elevated, "agent ready"
    );

    // Startup: fold in the server's pending list, re-arm every snoozed
    // wake-up, put everything already due on screen.
    shell.resync().await;
    for (id, until) in shell.table.snoozed() {
        shell.sched.schedule(id, until).await;
    }
    shell.dispatch_due().await;
    shell.update_gauge();

    let period = Duration::from_secs(cfg.poll_interval_secs);
    // First tick after one full period; startup already resynced.
    let mut poll = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("cancellation requested; stopping main loop");
                break;
            }
            ev = win_rx.recv() => {
                let Some(ev) = ev else { break };
                shell.handle_window_event(ev).await;
            }
            id = due_rx.recv() => {
                let Some(id) = id else { break };
                shell.handle_due(id).await;
            }
            ev = sse_rx.recv(), if sse_open => {
                match ev {
                    Ok(ev) => shell.handle_server_event(ev).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed=%n, "push subscriber lagged; resyncing");
                        shell.resync().await;
                        shell.dispatch_due().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("push stream gone; polling only from here on");
                        sse_open = false;
                    }
                }
            }
            ev = system_rx.recv(), if system_open => {
                match ev {
                    Some(SystemEvent::ShutdownRequested) => {
                        info!("OS shutdown announced; stopping main loop");
                        break;
                    }
                    Some(SystemEvent::Suspending) => {
                        debug!("system suspending");
                    }
                    Some(SystemEvent::Resumed) => {
                        info!("resumed from sleep; resyncing");
                        shell.flush_acks().await;
                        shell.resync().await;
                        shell.dispatch_due().await;
                    }
                    None => {
                        debug!("system event stream ended");
                        system_open = false;
                    }
                }
            }
            _ = poll.tick() => {
                debug!("poll tick");
                shell.flush_acks().await;
                shell.resync().await;
                shell.dispatch_due().await;
            }
        }
        shell.update_gauge();
    }

    // Graceful cleanup: windows down, queued acks out, snapshot flushed.
    shell.dispatcher.close_all().await;
    shell.flush_acks().await;
    shell.persist();
    shell.update_gauge();
    Ok(())
}

/// A snooze/complete waiting to be told to the server.
#[derive(Clone)]
struct PendingAck {
    id: ReminderId,
    req: AckReq,
}

struct Shell {
    base: String,
    platform: Arc<dyn Platform>,
    table: ReminderTable,
    dispatcher: Dispatcher,
    store: StateStore,
    sched: SnoozeScheduler,
    token: Option<String>,
    acks: VecDeque<PendingAck>,
    pending: Arc<AtomicUsize>,
}

impl Shell {
    async fn handle_window_event(&mut self, ev: WindowEvent) {
        match ev.outcome {
            WindowOutcome::Action(action) => self.apply_action(ev.id, action).await,
            WindowOutcome::Dismissed => {
                // Only the four buttons retire a window. Anything else the
                // desktop does to it puts it right back on screen.
                self.dispatcher.mark_closed(&ev.id);
                match self.table.get(&ev.id).cloned() {
                    Some(r) if r.due(now_utc()) => {
                        info!(id=%ev.id, "window dismissed without an action; re-showing");
                        self.dispatcher.dispatch(&r).await;
                    }
                    _ => debug!(id=%ev.id, "dismissal for a retired window; ignoring"),
                }
            }
        }
    }

    async fn apply_action(&mut self, id: ReminderId, action: ReminderAction) {
        let state = match self.table.apply(&id, action, now_utc()) {
            Ok(s) => s,
            Err(e) => {
                warn!(id=%id, error=%e, "ignoring window action");
                self.dispatcher.retire(&id).await;
                return;
            }
        };
        self.dispatcher.retire(&id).await;
        let until = match state {
            ReminderState::Snoozed { until } => {
                info!(id=%id, action=%action, until=%until, "reminder snoozed");
                self.sched.schedule(id.clone(), until).await;
                Some(until.unix_timestamp())
            }
            ReminderState::Completed => {
                info!(id=%id, "reminder completed");
                self.sched.cancel(&id).await;
                self.table.archive(&id);
                None
            }
            ReminderState::Pending => None,
        };
        self.acks.push_back(PendingAck {
            id,
            req: AckReq { action, until },
        });
        self.persist();
    }

    async fn handle_due(&mut self, id: ReminderId) {
        // A deadline can only move through a window action and a snoozed
        // reminder has no window, so a tracked id here is due as armed.
        match self.table.get(&id) {
            Some(r) if !r.is_completed() => {
                let r = r.clone();
                self.dispatcher.dispatch(&r).await;
            }
            _ => debug!(%id, "wake-up for a reminder no longer tracked; ignoring"),
        }
    }

    async fn handle_server_event(&mut self, ev: ServerEvent) {
        match ev {
            ServerEvent::ReminderNew { reminder } => {
                let r = match reminder.into_domain() {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(error=%e, "ignoring malformed pushed reminder");
                        return;
                    }
                };
                if !self.table.insert_new(r.clone()) {
                    debug!(id=%r.id, "pushed reminder already tracked");
                    return;
                }
                info!(id=%r.id, "reminder pushed from server");
                self.persist();
                match r.snoozed_until() {
                    Some(until) if !r.due(now_utc()) => {
                        self.sched.schedule(r.id.clone(), until).await;
                    }
                    _ => {
                        self.dispatcher.dispatch(&r).await;
                    }
                }
            }
            ServerEvent::ReminderCancelled { id } => {
                let id = ReminderId(id);
                info!(%id, "reminder cancelled by server");
                self.dispatcher.retire(&id).await;
                self.sched.cancel(&id).await;
                if self.table.archive(&id).is_some() {
                    self.persist();
                }
            }
        }
    }

    /// Puts a window up for everything due right now.
    async fn dispatch_due(&mut self) {
        for r in self.table.due_now(now_utc()) {
            self.dispatcher.dispatch(&r).await;
        }
    }

    /// Pulls the server's pending list and folds it into the table.
    /// Fresh snoozed items get wake-ups here; due ones are handled by
    /// the dispatch pass that follows every resync.
    async fn resync(&mut self) {
        let Some(token) = self.ensure_token().await else {
            return;
        };
        let client_id = self.platform.client_id();
        let dtos = match api::rest::fetch_pending(&self.base, &client_id, &token).await {
            Ok(d) => d,
            Err(e) if e.is_unauthorized() => {
                // Token expired or the server forgot us: register once, retry once.
                info!("pending fetch unauthorized; re-registering");
                self.token = None;
                let Some(token) = self.ensure_token().await else {
                    return;
                };
                match api::rest::fetch_pending(&self.base, &client_id, &token).await {
                    Ok(d) => d,
                    Err(e) => {
                        warn!(error=%e, "pending fetch failed after re-registration");
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(error=%e, "pending fetch failed");
                return;
            }
        };

        let mut items = Vec::with_capacity(dtos.len());
        for dto in dtos {
            match dto.into_domain() {
                Ok(r) => items.push(r),
                Err(e) => warn!(error=%e, "skipping malformed reminder from server"),
            }
        }
        let fresh = self.table.merge_server(items);
        if fresh.is_empty() {
            return;
        }
        info!(count = fresh.len(), "new reminders from server");
        self.persist();
        for (id, until) in self.table.snoozed() {
            if fresh.contains(&id) {
                self.sched.schedule(id, until).await;
            }
        }
    }

    /// Sends queued acks in order, one attempt each. The first failure
    /// keeps that ack and everything behind it queued for the next tick.
    async fn flush_acks(&mut self) {
        if self.acks.is_empty() {
            return;
        }
        let Some(token) = self.token.clone() else {
            debug!(queued = self.acks.len(), "no token yet; acks stay queued");
            return;
        };
        let client_id = self.platform.client_id();
        while let Some(ack) = self.acks.front().cloned() {
            match api::rest::ack(&self.base, &client_id, &ack.id.0, &token, &ack.req).await {
                Ok(()) => {
                    debug!(id=%ack.id, action=%ack.req.action, "ack delivered");
                    self.acks.pop_front();
                }
                Err(e) if e.is_unauthorized() => {
                    warn!(error=%e, "ack unauthorized; re-registering on next resync");
                    self.token = None;
                    break;
                }
                Err(e) => {
                    warn!(error=%e, queued = self.acks.len(), "ack delivery failed; will retry");
                    break;
                }
            }
        }
    }

    /// Returns the bearer token, registering first when we have none.
    /// Registration failure leaves the agent offline until the next tick.
    async fn ensure_token(&mut self) -> Option<String> {
        if let Some(t) = &self.token {
            return Some(t.clone());
        }
        match register_client(&self.base, self.platform.as_ref()).await {
            Ok(t) => {
                self.token = Some(t.clone());
                Some(t)
            }
            Err(e) => {
                warn!(error=%e, "registration failed; staying offline");
                None
            }
        }
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.table.snapshot()) {
            warn!(error=%e, "snapshot write failed");
        }
    }

    fn update_gauge(&self) {
        self.pending
            .store(self.table.pending_count(), Ordering::Relaxed);
    }
}

async fn check_privileges(cfg: &ClientConfig, plat: &dyn Platform) -> bool {
    let elevated = plat.is_elevated().await;
    if !cfg.require_admin || elevated {
        return elevated;
    }
    info!("admin required by config; requesting elevation");
    match plat.request_elevation().await {
        Ok(()) => {
            info!("elevation confirmed");
            true
        }
        Err(e) => {
            warn!(error=%e, "elevation declined; continuing without admin");
            false
        }
    }
}

async fn register_client(base: &str, plat: &dyn Platform) -> Result<String, AppError> {
    let req = RegisterReq {
        client_id: plat.client_id(),
        hostname: plat.hostname(),
    };
    let resp = api::rest::register(base, &req)
        .await
        .map_err(|e| AppError::Http(format!("register error: {e}")))?;
    let entry = crate::keyring_entry(base)?;
    entry
        .set_password(&resp.token)
        .map_err(|e| AppError::Keyring(e.to_string()))?;
    info!(client_id=%req.client_id, "registered with server");
    Ok(resp.token)
}

fn read_token_from_keyring(server_url: &str) -> Result<String, AppError> {
    let entry = crate::keyring_entry(server_url)?;
    entry
        .get_password()
        .map_err(|e| AppError::Keyring(e.to_string()))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigint = signal(SignalKind::interrupt()).expect("listen SIGINT");
        let mut sigterm = signal(SignalKind::terminate()).expect("listen SIGTERM");
        tokio::select! {
            _ = sigint.recv() => {
                info!("shutdown: received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("shutdown: received SIGTERM");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown: received Ctrl+C");
    }
}
