use serde::{Deserialize, Serialize};

use crate::domain::{Reminder, ReminderId, ReminderState};

pub mod endpoints;
#[cfg(feature = "rest-client")]
pub mod rest;

pub use crate::domain::ReminderAction;

pub const API_V1_PREFIX: &str = "/api/v1";

/// Path of the server-sent event stream, relative to the server base URL.
pub const EVENTS_PATH: &str = "/api/v1/events";

// Client registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterReq {
    pub client_id: String,
    pub hostname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResp {
    pub token: String,
}

// Reminders (timestamps are UTC epoch seconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStateDto {
    Pending,
    Snoozed,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderDto {
    pub id: String,
    pub message: String,
    pub created_at: i64,
    pub state: ReminderStateDto,
    pub until: Option<i64>,
}

// Acknowledgement of a window action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckReq {
    pub action: ReminderAction,
    pub until: Option<i64>,
}

/// Push payloads fanned out on the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    ReminderNew { reminder: ReminderDto },
    ReminderCancelled { id: String },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DtoError {
    #[error("timestamp out of range: {0}")]
    Timestamp(i64),
    #[error("snoozed reminder without an until timestamp")]
    MissingUntil,
}

fn epoch(ts: time::OffsetDateTime) -> i64 {
    ts.unix_timestamp()
}

fn from_epoch(secs: i64) -> Result<time::OffsetDateTime, DtoError> {
    time::OffsetDateTime::from_unix_timestamp(secs).map_err(|_| DtoError::Timestamp(secs))
}

impl ReminderDto {
    pub fn from_domain(r: &Reminder) -> Self {
        let (state, until) = match r.state {
            ReminderState::Pending => (ReminderStateDto::Pending, None),
            ReminderState::Snoozed { until } => (ReminderStateDto::Snoozed, Some(epoch(until))),
            ReminderState::Completed => (ReminderStateDto::Completed, None),
        };
        ReminderDto {
            id: r.id.0.clone(),
            message: r.message.clone(),
            created_at: epoch(r.created_at),
            state,
            until,
        }
    }

    pub fn into_domain(self) -> Result<Reminder, DtoError> {
        let state = match self.state {
            ReminderStateDto::Pending => ReminderState::Pending,
            ReminderStateDto::Snoozed => ReminderState::Snoozed {
                until: from_epoch(self.until.ok_or(DtoError::MissingUntil)?)?,
            },
            ReminderStateDto::Completed => ReminderState::Completed,
        };
        Ok(Reminder {
            id: ReminderId(self.id),
            message: self.message,
            created_at: from_epoch(self.created_at)?,
            state,
        })
    }
}
