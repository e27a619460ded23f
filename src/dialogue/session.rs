//! Per-attempt dialogue record
//!
//! The session only changes through [`Session::reduce`], which applies one
//! explicit [`SessionDelta`] and carries every other field over untouched.

use serde::{Deserialize, Serialize};

use super::vocabulary::SlotValue;

/// A piece of information the dialogue collects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Person,
    Day,
    WholeDay,
    Time,
    /// The final yes/no on the whole appointment
    Confirmation,
}

impl Slot {
    /// Whether a no-input timeout sends the dialogue straight back to the
    /// prompt instead of waiting for the listen-complete signal
    pub fn reprompts_on_no_input(self) -> bool {
        matches!(self, Slot::WholeDay | Slot::Confirmation)
    }
}

/// The only ways a session may change
#[derive(Debug, Clone, PartialEq)]
pub enum SessionDelta {
    /// An utterance was recognized while collecting `slot`
    Recognised {
        utterance: String,
        slot: Slot,
        value: Option<SlotValue>,
    },
    /// The recognizer timed out without input
    NoInput,
    /// The attempt concluded
    Reset,
}

/// What has been filled so far in one dialogue attempt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub person: Option<String>,
    pub day: Option<String>,
    pub whole_day: Option<bool>,
    pub time: Option<String>,
    pub last_utterance: Option<String>,
    pub confirmation: Option<bool>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the given slot holds a value
    pub fn is_filled(&self, slot: Slot) -> bool {
        match slot {
            Slot::Person => self.person.is_some(),
            Slot::Day => self.day.is_some(),
            Slot::WholeDay => self.whole_day.is_some(),
            Slot::Time => self.time.is_some(),
            Slot::Confirmation => self.confirmation.is_some(),
        }
    }

    /// True when every field is absent
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply one delta
    pub fn reduce(&mut self, delta: SessionDelta) {
        match delta {
            SessionDelta::Recognised { utterance, slot, value } => {
                self.last_utterance = Some(utterance);
                match (slot, value) {
                    (Slot::Person, Some(SlotValue::Person(person))) => self.person = Some(person),
                    (Slot::Day, Some(SlotValue::Day(day))) => self.day = Some(day),
                    (Slot::Time, Some(SlotValue::Time(time))) => self.time = Some(time),
                    (Slot::WholeDay, Some(SlotValue::Confirmed(flag))) => self.whole_day = Some(flag),
                    (Slot::Confirmation, Some(SlotValue::Confirmed(flag))) => {
                        self.confirmation = Some(flag)
                    }
                    // Unresolved, or a value for a different slot
                    _ => {}
                }
            }
            SessionDelta::NoInput => {
                self.last_utterance = None;
            }
            SessionDelta::Reset => {
                *self = Self::default();
            }
        }
    }

    /// Spoken summary of the appointment, used by the confirmation prompt
    pub fn summary(&self) -> String {
        let person = self.person.as_deref().unwrap_or("someone");
        let day = self.day.as_deref().unwrap_or("some day");
        match self.whole_day {
            Some(true) => format!("with {person} on {day} for the whole day"),
            _ => {
                let time = self.time.as_deref().unwrap_or("some time");
                format!("with {person} on {day} at {time}")
            }
        }
    }
}
