use duebell_shared::domain::{ReminderAction, ReminderId};
use serde::{Deserialize, Serialize};

/// How a reminder window went away.
///
/// `Action` is the only sanctioned path. `Dismissed` covers everything
/// else the desktop can do to a window (close button, notification
/// daemon timeout, Expire); the shell answers it by showing the window
/// again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WindowOutcome {
    Action(ReminderAction),
    Dismissed,
}

/// Message sent from a platform window back to the shell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowEvent {
    pub id: ReminderId,
    pub outcome: WindowOutcome,
}

pub fn button_label(action: ReminderAction) -> &'static str {
    match action {
        ReminderAction::Snooze5 => "Snooze 5 minutes",
        ReminderAction::Snooze15 => "Snooze 15 minutes",
        ReminderAction::Snooze30 => "Snooze 30 minutes",
        ReminderAction::Complete => "Complete",
    }
}

/// The buttons every reminder window carries, in display order.
pub const WINDOW_ACTIONS: [ReminderAction; 4] = [
    ReminderAction::Snooze5,
    ReminderAction::Snooze15,
    ReminderAction::Snooze30,
    ReminderAction::Complete,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_button_maps_back_to_its_action() {
        for action in WINDOW_ACTIONS {
            assert_eq!(ReminderAction::from_key(action.wire_key()), Some(action));
        }
    }

    #[test]
    fn window_event_serializes_with_reminder_id_inline() {
        let ev = WindowEvent {
            id: "n1".into(),
            outcome: WindowOutcome::Action(ReminderAction::Complete),
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains(r#""id":"n1""#), "{json}");
        let back: WindowEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ev);
    }
}
