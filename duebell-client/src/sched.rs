use std::collections::HashMap;
use std::time::Duration;

use duebell_shared::domain::{ReminderId, now_utc};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

enum SchedCmd {
    Schedule { id: ReminderId, at: Instant },
    Cancel { id: ReminderId },
}

/// Wakes the main loop when a snoozed reminder falls due.
///
/// One background task owns all deadlines; scheduling the same id again
/// replaces its previous deadline. With nothing scheduled the task
/// sleeps toward a far-future sentinel.
pub struct SnoozeScheduler {
    cmd_tx: mpsc::Sender<SchedCmd>,
}

impl SnoozeScheduler {
    pub fn spawn() -> (Self, mpsc::Receiver<ReminderId>) {
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<SchedCmd>(32);
        let (due_tx, due_rx) = mpsc::channel::<ReminderId>(32);

        tokio::spawn(async move {
            let mut deadlines: HashMap<ReminderId, Instant> = HashMap::new();
            loop {
                let next = deadlines
                    .iter()
                    .min_by_key(|(_, at)| **at)
                    .map(|(id, at)| (id.clone(), *at));
                let wake_at = next.as_ref().map(|(_, at)| *at).unwrap_or_else(far_future);

                tokio::select! {
                    cmd = cmd_rx.recv() => {
                        let Some(cmd) = cmd else {
                            debug!("snooze scheduler: channel closed; exiting");
                            break;
                        };
                        match cmd {
                            SchedCmd::Schedule { id, at } => {
                                deadlines.insert(id, at);
                            }
                            SchedCmd::Cancel { id } => {
                                deadlines.remove(&id);
                            }
                        }
                    }
                    _ = sleep_until(wake_at) => {
                        if let Some((id, _)) = next {
                            deadlines.remove(&id);
                            if due_tx.send(id).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        });

        (Self { cmd_tx }, due_rx)
    }

    /// Arms (or re-arms) the wake-up for `id`. A deadline already in the
    /// past fires on the next scheduler turn.
    pub async fn schedule(&self, id: ReminderId, until: OffsetDateTime) {
        let wait = until - now_utc();
        let wait: Duration = wait.try_into().unwrap_or(Duration::ZERO);
        let at = Instant::now() + wait;
        if let Err(e) = self.cmd_tx.send(SchedCmd::Schedule { id, at }).await {
            warn!(error=%e, "snooze scheduler: failed to schedule deadline");
        }
    }

    pub async fn cancel(&self, id: &ReminderId) {
        let _ = self.cmd_tx.send(SchedCmd::Cancel { id: id.clone() }).await;
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(60 * 60 * 24 * 365)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration as TimeDuration;
    use tokio::time::timeout;

    #[tokio::test(start_paused = true)]
    async fn fires_at_deadline_not_before() {
        let (sched, mut due) = SnoozeScheduler::spawn();
        sched
            .schedule("n1".into(), now_utc() + TimeDuration::seconds(30))
            .await;

        assert!(
            timeout(Duration::from_secs(29), due.recv()).await.is_err(),
            "woke before the deadline"
        );
        let id = timeout(Duration::from_secs(5), due.recv())
            .await
            .expect("deadline missed")
            .expect("scheduler gone");
        assert_eq!(id, "n1".into());
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_the_deadline() {
        let (sched, mut due) = SnoozeScheduler::spawn();
        sched
            .schedule("n1".into(), now_utc() + TimeDuration::seconds(10))
            .await;
        sched
            .schedule("n1".into(), now_utc() + TimeDuration::seconds(60))
            .await;

        assert!(timeout(Duration::from_secs(30), due.recv()).await.is_err());
        let id = timeout(Duration::from_secs(40), due.recv())
            .await
            .expect("replacement deadline missed")
            .expect("scheduler gone");
        assert_eq!(id, "n1".into());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_deadline_never_fires() {
        let (sched, mut due) = SnoozeScheduler::spawn();
        sched
            .schedule("n1".into(), now_utc() + TimeDuration::seconds(5))
            .await;
        sched.cancel(&"n1".into()).await;

        assert!(timeout(Duration::from_secs(60), due.recv()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn deadlines_fire_in_order() {
        let (sched, mut due) = SnoozeScheduler::spawn();
        sched
            .schedule("late".into(), now_utc() + TimeDuration::seconds(20))
            .await;
        sched
            .schedule("early".into(), now_utc() + TimeDuration::seconds(5))
            .await;

        let first = timeout(Duration::from_secs(10), due.recv())
            .await
            .expect("first deadline missed")
            .unwrap();
        let second = timeout(Duration::from_secs(20), due.recv())
            .await
            .expect("second deadline missed")
            .unwrap();
        assert_eq!(first, "early".into());
        assert_eq!(second, "late".into());
    }

    #[tokio::test(start_paused = true)]
    async fn past_deadline_fires_immediately() {
        let (sched, mut due) = SnoozeScheduler::spawn();
        sched
            .schedule("n1".into(), now_utc() - TimeDuration::minutes(3))
            .await;
        let id = timeout(Duration::from_secs(1), due.recv())
            .await
            .expect("past deadline did not fire")
            .unwrap();
        assert_eq!(id, "n1".into());
    }
}
