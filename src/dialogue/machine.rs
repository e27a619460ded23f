//! Appointment dialogue state machine
//!
//! Sequences speak/listen turns for each slot (person, day, whole-day flag,
//! time) and the final confirmation. Every slot follows the same
//! sub-protocol:
//!
//! - `Ask`: speak a prompt, move to `Listen` once it has been spoken
//! - `Listen`: request a listen turn, record what was recognized, then on
//!   listen-complete move to `Check` (something was heard) or back to `Ask`
//! - `Check`: speak back what was understood, then advance or reprompt
//!
//! Inputs that the current state does not handle are ignored.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::adapter::{AdapterEvent, Directive};

use super::observer::TransitionObserver;
use super::session::{Session, SessionDelta, Slot};
use super::vocabulary::Vocabulary;

const GREETING: &str = "Let's create an appointment.";

/// Everything the machine can receive
#[derive(Debug, Clone, PartialEq)]
pub enum DialogueInput {
    /// A reply from the speech subsystem
    Adapter(AdapterEvent),
    /// The UI start button
    Click,
    /// Park an idle machine in `Done`
    Stop,
}

impl From<AdapterEvent> for DialogueInput {
    fn from(event: AdapterEvent) -> Self {
        Self::Adapter(event)
    }
}

/// One conversational step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialogueState {
    /// Waiting for the speech subsystem to come up
    Prepare,
    /// Ready, waiting for the user to click start
    WaitToStart,
    Greeting,
    Ask(Slot),
    Listen(Slot),
    Check(Slot),
    /// Parked; a click starts a new attempt
    Done,
}

impl std::fmt::Display for DialogueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn slot_name(slot: Slot) -> &'static str {
            match slot {
                Slot::Person => "Person",
                Slot::Day => "Day",
                Slot::WholeDay => "FullDay",
                Slot::Time => "Time",
                Slot::Confirmation => "Confirm",
            }
        }

        match self {
            DialogueState::Prepare => write!(f, "Prepare"),
            DialogueState::WaitToStart => write!(f, "WaitToStart"),
            DialogueState::Greeting => write!(f, "Greeting"),
            DialogueState::Ask(Slot::Confirmation) => write!(f, "ConfirmAppointment"),
            DialogueState::Check(Slot::Confirmation) => write!(f, "CheckConfirmation"),
            DialogueState::Ask(slot) => write!(f, "Ask{}", slot_name(*slot)),
            DialogueState::Listen(slot) => write!(f, "Listen{}", slot_name(*slot)),
            DialogueState::Check(slot) => write!(f, "Check{}", slot_name(*slot)),
            DialogueState::Done => write!(f, "Done"),
        }
    }
}

/// Outcome of handling one input: where to go and how the session changes
#[derive(Debug)]
struct Step {
    target: Option<DialogueState>,
    delta: Option<SessionDelta>,
}

impl Step {
    fn to(target: DialogueState) -> Self {
        Self { target: Some(target), delta: None }
    }

    fn stay() -> Self {
        Self { target: None, delta: None }
    }

    fn with(mut self, delta: SessionDelta) -> Self {
        self.delta = Some(delta);
        self
    }
}

/// The dialogue controller for one active session
pub struct DialogueMachine {
    state: DialogueState,
    session: Session,
    vocabulary: Arc<Vocabulary>,
    /// Whether anything was recognized since the current listen turn began
    heard_this_turn: bool,
    state_entered_at: Instant,
    observers: Vec<Box<dyn TransitionObserver>>,
}

impl DialogueMachine {
    /// Create a machine in `Prepare` with an empty session
    pub fn new(vocabulary: Arc<Vocabulary>) -> Self {
        Self {
            state: DialogueState::Prepare,
            session: Session::new(),
            vocabulary,
            heard_this_turn: false,
            state_entered_at: Instant::now(),
            observers: Vec::new(),
        }
    }

    /// Attach an observer
    pub fn with_observer(mut self, observer: impl TransitionObserver + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn state(&self) -> DialogueState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The directive that kicks off the machine
    pub fn start(&mut self) -> Option<Directive> {
        info!(state = %self.state, "dialogue machine starting");
        self.entry_directive()
    }

    /// Run the machine, processing inputs one at a time and forwarding
    /// directives to the speech subsystem
    pub async fn run(
        &mut self,
        mut input_rx: mpsc::Receiver<DialogueInput>,
        directive_tx: mpsc::Sender<Directive>,
    ) {
        if let Some(directive) = self.start() {
            if directive_tx.send(directive).await.is_err() {
                warn!("directive channel closed before start");
                return;
            }
        }

        while let Some(input) = input_rx.recv().await {
            if let Some(directive) = self.handle_input(input) {
                debug!(?directive, "issuing directive");
                if directive_tx.send(directive).await.is_err() {
                    warn!("directive channel closed");
                    break;
                }
            }
        }

        info!(state = %self.state, "dialogue machine stopped");
    }

    /// Handle one input. Returns the entry directive of the state entered,
    /// if a transition happened and that state has one.
    pub fn handle_input(&mut self, input: DialogueInput) -> Option<Directive> {
        let Some(step) = self.step(&input) else {
            debug!(state = %self.state, ?input, "input ignored");
            return None;
        };

        let from = self.state;

        if let Some(delta) = step.delta {
            match delta {
                SessionDelta::Recognised { .. } => self.heard_this_turn = true,
                SessionDelta::NoInput => self.heard_this_turn = false,
                SessionDelta::Reset => {}
            }
            self.session.reduce(delta);
        }

        let directive = step.target.and_then(|target| {
            self.transition_to(target);
            self.entry_directive()
        });

        for observer in &self.observers {
            observer.on_transition(from, self.state, &self.session);
        }

        directive
    }

    /// Decide what an input does in the current state. `None` means the
    /// state has no handler for it.
    fn step(&self, input: &DialogueInput) -> Option<Step> {
        use DialogueState::{Ask, Check, Done, Greeting, Listen, Prepare, WaitToStart};

        match (self.state, input) {
            (Prepare, DialogueInput::Adapter(AdapterEvent::Ready)) => Some(Step::to(WaitToStart)),

            (WaitToStart | Done, DialogueInput::Click) => Some(Step::to(Greeting)),
            (WaitToStart, DialogueInput::Stop) => Some(Step::to(Done)),

            (Greeting, DialogueInput::Adapter(AdapterEvent::SpeakComplete)) => {
                Some(Step::to(Ask(Slot::Person)))
            }

            (Ask(slot), DialogueInput::Adapter(AdapterEvent::SpeakComplete)) => {
                Some(Step::to(Listen(slot)))
            }

            (Listen(slot), DialogueInput::Adapter(AdapterEvent::Recognised { hypotheses })) => {
                let best = hypotheses.first()?;
                let value = self
                    .vocabulary
                    .resolve(&best.utterance)
                    .and_then(|entry| entry.value_for(slot));
                debug!(utterance = %best.utterance, confidence = best.confidence, ?value, "recognised");
                Some(Step::stay().with(SessionDelta::Recognised {
                    utterance: best.utterance.clone(),
                    slot,
                    value,
                }))
            }

            (Listen(slot), DialogueInput::Adapter(AdapterEvent::NoInput)) => {
                let step = if slot.reprompts_on_no_input() {
                    Step::to(Ask(slot))
                } else {
                    Step::stay()
                };
                Some(step.with(SessionDelta::NoInput))
            }

            (Listen(slot), DialogueInput::Adapter(AdapterEvent::ListenComplete)) => {
                if self.session.is_filled(slot) || self.heard_this_turn {
                    Some(Step::to(Check(slot)))
                } else {
                    Some(Step::to(Ask(slot)))
                }
            }

            (Check(slot), DialogueInput::Adapter(AdapterEvent::SpeakComplete)) => Some(self.after_check(slot)),

            _ => None,
        }
    }

    /// Where a check state leads once its grounding utterance is spoken
    fn after_check(&self, slot: Slot) -> Step {
        use DialogueState::{Ask, Greeting};

        let session = &self.session;
        match slot {
            Slot::Person if session.is_filled(Slot::Person) => Step::to(Ask(Slot::Day)),
            Slot::Day if session.is_filled(Slot::Day) => Step::to(Ask(Slot::WholeDay)),
            Slot::WholeDay => match session.whole_day {
                Some(true) => Step::to(Ask(Slot::Confirmation)),
                Some(false) => Step::to(Ask(Slot::Time)),
                None => Step::to(Ask(Slot::WholeDay)),
            },
            Slot::Time if session.is_filled(Slot::Time) => Step::to(Ask(Slot::Confirmation)),
            // Every outcome ends the attempt
            Slot::Confirmation => Step::to(Greeting).with(SessionDelta::Reset),
            unfilled => Step::to(Ask(unfilled)),
        }
    }

    fn transition_to(&mut self, new_state: DialogueState) {
        let old_state = self.state;
        let duration_ms = self.state_entered_at.elapsed().as_millis() as u64;

        debug!(
            from = %old_state,
            to = %new_state,
            duration_ms = duration_ms,
            "state transition"
        );

        self.state = new_state;
        self.state_entered_at = Instant::now();

        if matches!(new_state, DialogueState::Listen(_)) {
            self.heard_this_turn = false;
        }
    }

    /// The directive issued on entering the current state
    fn entry_directive(&self) -> Option<Directive> {
        match self.state {
            DialogueState::Prepare => Some(Directive::Prepare),
            DialogueState::WaitToStart | DialogueState::Done => None,
            DialogueState::Greeting => Some(Directive::speak(GREETING)),
            DialogueState::Ask(slot) => Some(Directive::speak(self.prompt(slot))),
            DialogueState::Listen(_) => Some(Directive::Listen),
            DialogueState::Check(slot) => Some(Directive::speak(self.grounding(slot))),
        }
    }

    fn prompt(&self, slot: Slot) -> String {
        match slot {
            Slot::Person => "Who are you meeting with?".to_string(),
            Slot::Day => "On which day is your meeting?".to_string(),
            Slot::WholeDay => "Will it take the whole day?".to_string(),
            Slot::Time => "What time is your meeting?".to_string(),
            Slot::Confirmation => {
                format!("Do you want me to create an appointment {}?", self.session.summary())
            }
        }
    }

    /// What a check state says back to the user
    fn grounding(&self, slot: Slot) -> String {
        let session = &self.session;
        match slot {
            Slot::Person => match &session.person {
                Some(person) => format!("You will meet {person}."),
                None => "I didn't understand the person's name.".to_string(),
            },
            Slot::Day => match &session.day {
                Some(day) => format!("On {day}."),
                None => "I didn't understand the day.".to_string(),
            },
            Slot::WholeDay => match session.whole_day {
                Some(true) => "It will take the whole day.".to_string(),
                Some(false) => "It will not take the whole day.".to_string(),
                None => "I didn't understand whether it will take the whole day.".to_string(),
            },
            Slot::Time => match &session.time {
                Some(time) => format!("At {time}."),
                None => "I didn't understand the time.".to_string(),
            },
            Slot::Confirmation => match session.confirmation {
                Some(true) => "Your appointment has been created!".to_string(),
                Some(false) => "Let's start over.".to_string(),
                None => "I didn't understand. Let's start over.".to_string(),
            },
        }
    }
}
