//! Transition observers
//!
//! Observers are called synchronously after every handled event and have
//! no way to influence the machine.

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::events::DialogueEvent;

use super::machine::DialogueState;
use super::session::{Session, Slot};

/// Receives every transition of the dialogue machine
pub trait TransitionObserver: Send {
    fn on_transition(&self, from: DialogueState, to: DialogueState, session: &Session);
}

/// Writes one structured log line per transition
#[derive(Debug, Default)]
pub struct LogObserver;

impl TransitionObserver for LogObserver {
    fn on_transition(&self, from: DialogueState, to: DialogueState, session: &Session) {
        info!(
            from = %from,
            to = %to,
            person = ?session.person,
            day = ?session.day,
            whole_day = ?session.whole_day,
            time = ?session.time,
            last_utterance = ?session.last_utterance,
            confirmation = ?session.confirmation,
            "dialogue transition"
        );
    }
}

/// Publishes transitions as [`DialogueEvent`]s on a broadcast channel
pub struct BroadcastObserver {
    event_tx: broadcast::Sender<DialogueEvent>,
}

impl BroadcastObserver {
    pub fn new(event_tx: broadcast::Sender<DialogueEvent>) -> Self {
        Self { event_tx }
    }

    fn emit(&self, event: DialogueEvent) {
        debug!(%event, "emitting dialogue event");
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}

impl TransitionObserver for BroadcastObserver {
    fn on_transition(&self, from: DialogueState, to: DialogueState, session: &Session) {
        self.emit(DialogueEvent::Transition {
            from: from.to_string(),
            to: to.to_string(),
            session: session.clone(),
        });

        if from != to && to == DialogueState::Check(Slot::Confirmation) && session.confirmation == Some(true) {
            let time = match session.whole_day {
                Some(true) => None,
                _ => session.time.clone(),
            };
            self.emit(DialogueEvent::AppointmentCreated {
                person: session.person.clone().unwrap_or_default(),
                day: session.day.clone().unwrap_or_default(),
                time,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_transition() {
        let (tx, mut rx) = broadcast::channel(16);
        let observer = BroadcastObserver::new(tx);

        observer.on_transition(DialogueState::Greeting, DialogueState::Ask(Slot::Person), &Session::new());

        match rx.try_recv().unwrap() {
            DialogueEvent::Transition { from, to, session } => {
                assert_eq!(from, "Greeting");
                assert_eq!(to, "AskPerson");
                assert!(session.is_empty());
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_appointment_created() {
        let (tx, mut rx) = broadcast::channel(16);
        let observer = BroadcastObserver::new(tx);
        let session = Session {
            person: Some("Vladislav Maraev".into()),
            day: Some("Monday".into()),
            whole_day: Some(true),
            time: None,
            last_utterance: Some("yes".into()),
            confirmation: Some(true),
        };

        observer.on_transition(
            DialogueState::Listen(Slot::Confirmation),
            DialogueState::Check(Slot::Confirmation),
            &session,
        );

        assert!(matches!(rx.try_recv().unwrap(), DialogueEvent::Transition { .. }));
        assert_eq!(
            rx.try_recv().unwrap(),
            DialogueEvent::AppointmentCreated {
                person: "Vladislav Maraev".into(),
                day: "Monday".into(),
                time: None,
            }
        );
    }

    #[test]
    fn test_broadcast_without_subscribers() {
        let (tx, rx) = broadcast::channel(4);
        drop(rx);
        let observer = BroadcastObserver::new(tx);
        observer.on_transition(DialogueState::Prepare, DialogueState::WaitToStart, &Session::new());
    }
}
