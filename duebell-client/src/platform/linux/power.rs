use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use zbus::proxy::Proxy;
use zbus_names::OwnedBusName;

use crate::AppError;
use crate::platform::{InhibitGuard, SystemEvent};

const LOGIN1_DEST: &str = "org.freedesktop.login1";
const LOGIN1_PATH: &str = "/org/freedesktop/login1";
const LOGIN1_IFACE: &str = "org.freedesktop.login1.Manager";

/// Holds the login1 delay lease; the fd closing on drop releases it.
struct DelayInhibitor {
    _fd: zbus::zvariant::OwnedFd,
}

impl InhibitGuard for DelayInhibitor {}

/// Takes a login1 delay inhibitor for shutdown and sleep. systemd
/// grants a bounded window (InhibitDelayMaxSec, typically 5s) in which
/// pending state can be flushed.
pub async fn acquire_delay_inhibitor(reason: &str) -> Result<Box<dyn InhibitGuard>, AppError> {
    let conn = zbus::Connection::system()
        .await
        .map_err(|e| AppError::Dbus(e.to_string()))?;
    let proxy = Proxy::new(&conn, LOGIN1_DEST, LOGIN1_PATH, LOGIN1_IFACE)
        .await
        .map_err(|e| AppError::Dbus(e.to_string()))?;
    let reply = proxy
        .call_method("Inhibit", &("shutdown:sleep", "DueBell", reason, "delay"))
        .await
        .map_err(|e| AppError::Dbus(e.to_string()))?;
    let fd: zbus::zvariant::OwnedFd = reply
        .body()
        .deserialize()
        .map_err(|e| AppError::Dbus(e.to_string()))?;
    debug!("acquired login1 delay inhibitor");
    Ok(Box::new(DelayInhibitor { _fd: fd }))
}

/// Streams PrepareForShutdown/PrepareForSleep as shell-level events.
pub async fn subscribe_system_events() -> mpsc::Receiver<SystemEvent> {
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(watch_login1_signals(tx));
    rx
}

async fn watch_login1_signals(tx: mpsc::Sender<SystemEvent>) {
    let conn = match zbus::Connection::system().await {
        Ok(c) => c,
        Err(e) => {
            warn!(error=%e, "system bus unavailable; shutdown interception disabled");
            return park(tx).await;
        }
    };
    if !login1_present(&conn).await {
        warn!("login1 not on the system bus; shutdown interception disabled");
        return park(tx).await;
    }
    let proxy = match Proxy::new(&conn, LOGIN1_DEST, LOGIN1_PATH, LOGIN1_IFACE).await {
        Ok(p) => p,
        Err(e) => {
            warn!(error=%e, "login1 proxy failed; shutdown interception disabled");
            return park(tx).await;
        }
    };
    let mut shutdown_stream = match proxy.receive_signal("PrepareForShutdown").await {
        Ok(s) => s,
        Err(e) => {
            warn!(error=%e, "PrepareForShutdown subscription failed");
            return park(tx).await;
        }
    };
    let mut sleep_stream = match proxy.receive_signal("PrepareForSleep").await {
        Ok(s) => s,
        Err(e) => {
            warn!(error=%e, "PrepareForSleep subscription failed");
            return park(tx).await;
        }
    };

    loop {
        tokio::select! {
            msg = shutdown_stream.next() => {
                let Some(msg) = msg else { break };
                match msg.body().deserialize::<bool>() {
                    Ok(true) => {
                        if tx.send(SystemEvent::ShutdownRequested).await.is_err() {
                            break;
                        }
                    }
                    // false would mean a cancelled shutdown; nothing to do
                    Ok(false) => {}
                    Err(e) => debug!(error=%e, "bad PrepareForShutdown payload"),
                }
            }
            msg = sleep_stream.next() => {
                let Some(msg) = msg else { break };
                match msg.body().deserialize::<bool>() {
                    Ok(start) => {
                        let ev = if start {
                            SystemEvent::Suspending
                        } else {
                            SystemEvent::Resumed
                        };
                        if tx.send(ev).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!(error=%e, "bad PrepareForSleep payload"),
                }
            }
        }
    }
    debug!("login1 signal watcher exiting");
}

async fn login1_present(conn: &zbus::Connection) -> bool {
    let Ok(proxy) = zbus::fdo::DBusProxy::new(conn).await else {
        return false;
    };
    proxy
        .name_has_owner(OwnedBusName::try_from(LOGIN1_DEST).unwrap().into())
        .await
        .unwrap_or(false)
}

// Keeps the channel open but silent so the shell's recv() pends instead
// of seeing a closed channel.
async fn park(tx: mpsc::Sender<SystemEvent>) {
    tx.closed().await;
}
