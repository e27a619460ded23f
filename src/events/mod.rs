//! Events published by the dialogue machine
//!
//! These are a side channel for UIs and logs; nothing here feeds back
//! into the dialogue.

use serde::{Deserialize, Serialize};

use crate::dialogue::Session;

/// Notifications emitted as the dialogue progresses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DialogueEvent {
    /// A handled event changed the state or the session
    Transition {
        from: String,
        to: String,
        /// Session as it stands after the transition
        session: Session,
    },

    /// The user confirmed the appointment
    AppointmentCreated {
        person: String,
        day: String,
        /// `None` for whole-day meetings
        time: Option<String>,
    },
}

impl std::fmt::Display for DialogueEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DialogueEvent::Transition { from, to, .. } => {
                write!(f, "TRANSITION ({} -> {})", from, to)
            }
            DialogueEvent::AppointmentCreated { person, day, time } => match time {
                Some(time) => write!(f, "APPOINTMENT_CREATED ({} on {} at {})", person, day, time),
                None => write!(f, "APPOINTMENT_CREATED ({} on {}, whole day)", person, day),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = DialogueEvent::Transition {
            from: "ListenPerson".into(),
            to: "CheckPerson".into(),
            session: Session {
                person: Some("Vladislav Maraev".into()),
                ..Session::default()
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"transition""#));
        assert!(json.contains("Vladislav Maraev"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"appointment_created","person":"Rasmus Blanck","day":"Friday","time":null}"#;
        let event: DialogueEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.to_string(), "APPOINTMENT_CREATED (Rasmus Blanck on Friday, whole day)");
    }
}
