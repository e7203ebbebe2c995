use std::collections::HashMap;

use duebell_shared::domain::{
    Reminder, ReminderAction, ReminderId, ReminderState, TransitionError,
};
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TableError {
    #[error("unknown reminder: {0}")]
    Unknown(ReminderId),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// All reminders the agent currently owns, keyed by id.
///
/// Local state wins over the server list: an item we already track is
/// never overwritten by a resync, otherwise a snooze or completion that
/// has not been acked yet would be undone.
#[derive(Debug, Default)]
pub struct ReminderTable {
    items: HashMap<ReminderId, Reminder>,
}

impl ReminderTable {
    pub fn restore(snapshot: Vec<Reminder>) -> Self {
        let items = snapshot
            .into_iter()
            .filter(|r| !r.is_completed())
            .map(|r| (r.id.clone(), r))
            .collect();
        ReminderTable { items }
    }

    pub fn get(&self, id: &ReminderId) -> Option<&Reminder> {
        self.items.get(id)
    }

    /// Inserts a reminder the agent has not seen before. Returns false
    /// and leaves the table untouched when the id is already known.
    pub fn insert_new(&mut self, reminder: Reminder) -> bool {
        if self.items.contains_key(&reminder.id) {
            return false;
        }
        self.items.insert(reminder.id.clone(), reminder);
        true
    }

    /// Folds a server pending list into the table and returns the ids
    /// that were actually new.
    pub fn merge_server(&mut self, items: Vec<Reminder>) -> Vec<ReminderId> {
        let mut fresh = Vec::new();
        for r in items {
            if r.is_completed() {
                continue;
            }
            if self.insert_new(r.clone()) {
                fresh.push(r.id);
            }
        }
        fresh
    }

    pub fn apply(
        &mut self,
        id: &ReminderId,
        action: ReminderAction,
        now: OffsetDateTime,
    ) -> Result<ReminderState, TableError> {
        let reminder = self
            .items
            .get_mut(id)
            .ok_or_else(|| TableError::Unknown(id.clone()))?;
        Ok(reminder.apply(action, now)?)
    }

    pub fn archive(&mut self, id: &ReminderId) -> Option<Reminder> {
        self.items.remove(id)
    }

    /// Reminders whose window should be on screen at `now`.
    pub fn due_now(&self, now: OffsetDateTime) -> Vec<Reminder> {
        let mut due: Vec<Reminder> = self
            .items
            .values()
            .filter(|r| r.due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.0.cmp(&b.id.0)));
        due
    }

    /// Snoozed reminders with their wake-up times, due or not.
    pub fn snoozed(&self) -> Vec<(ReminderId, OffsetDateTime)> {
        self.items
            .values()
            .filter_map(|r| r.snoozed_until().map(|until| (r.id.clone(), until)))
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.items.values().filter(|r| !r.is_completed()).count()
    }

    /// Everything worth persisting, in a stable order.
    pub fn snapshot(&self) -> Vec<Reminder> {
        let mut items: Vec<Reminder> = self
            .items
            .values()
            .filter(|r| !r.is_completed())
            .cloned()
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.0.cmp(&b.id.0)));
        items
    }
}
