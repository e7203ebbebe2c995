use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime, UtcOffset};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReminderId(pub String);

impl std::fmt::Display for ReminderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ReminderId {
    fn from(s: &str) -> Self {
        ReminderId(s.to_string())
    }
}

impl std::str::FromStr for ReminderId {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ReminderId(s.to_string()))
    }
}

/// Lifecycle state of a reminder on this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderState {
    Pending,
    Snoozed { until: OffsetDateTime },
    Completed,
}

/// The four controls a reminder window offers. Nothing else closes one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReminderAction {
    #[serde(rename = "snooze-5")]
    Snooze5,
    #[serde(rename = "snooze-15")]
    Snooze15,
    #[serde(rename = "snooze-30")]
    Snooze30,
    #[serde(rename = "complete")]
    Complete,
}

impl ReminderAction {
    pub fn snooze_minutes(&self) -> Option<i64> {
        match self {
            ReminderAction::Snooze5 => Some(5),
            ReminderAction::Snooze15 => Some(15),
            ReminderAction::Snooze30 => Some(30),
            ReminderAction::Complete => None,
        }
    }

    /// Stable key used on the wire and as the notification action id.
    pub fn wire_key(&self) -> &'static str {
        match self {
            ReminderAction::Snooze5 => "snooze-5",
            ReminderAction::Snooze15 => "snooze-15",
            ReminderAction::Snooze30 => "snooze-30",
            ReminderAction::Complete => "complete",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "snooze-5" => Some(ReminderAction::Snooze5),
            "snooze-15" => Some(ReminderAction::Snooze15),
            "snooze-30" => Some(ReminderAction::Snooze30),
            "complete" => Some(ReminderAction::Complete),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReminderAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_key())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransitionError {
    #[error("reminder is completed; no further transitions")]
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: ReminderId,
    pub message: String,
    pub created_at: OffsetDateTime,
    pub state: ReminderState,
}

impl Reminder {
    pub fn new(id: ReminderId, message: impl Into<String>, created_at: OffsetDateTime) -> Self {
        Reminder {
            id,
            message: message.into(),
            created_at,
            state: ReminderState::Pending,
        }
    }

    /// Applies a window action and returns the resulting state.
    ///
    /// Completed is terminal: any action on a completed reminder is
    /// rejected. Snoozing from any live state re-baselines `until` to
    /// `now` plus the chosen span.
    pub fn apply(
        &mut self,
        action: ReminderAction,
        now: OffsetDateTime,
    ) -> Result<ReminderState, TransitionError> {
        if matches!(self.state, ReminderState::Completed) {
            return Err(TransitionError::Completed);
        }
        self.state = match action.snooze_minutes() {
            Some(minutes) => ReminderState::Snoozed {
                until: now + Duration::minutes(minutes),
            },
            None => ReminderState::Completed,
        };
        Ok(self.state)
    }

    /// Whether the reminder should have a window on screen at `now`.
    pub fn due(&self, now: OffsetDateTime) -> bool {
        match self.state {
            ReminderState::Pending => true,
            ReminderState::Snoozed { until } => until <= now,
            ReminderState::Completed => false,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.state, ReminderState::Completed)
    }

    pub fn snoozed_until(&self) -> Option<OffsetDateTime> {
        match self.state {
            ReminderState::Snoozed { until } => Some(until),
            _ => None,
        }
    }
}

pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}
