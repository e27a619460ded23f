//! Closed vocabulary lookup
//!
//! Maps a whole recognized utterance to the slot values it stands for.
//! Matching is exact after case-folding: there is no fuzzy or partial
//! matching, and multi-word phrases are single keys.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::session::Slot;

/// A semantic value produced from a matched vocabulary entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SlotValue {
    Person(String),
    Day(String),
    Time(String),
    Confirmed(bool),
}

/// One vocabulary entry. Any subset of the fields may be present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Entry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed: Option<bool>,
}

impl Entry {
    fn person(name: &str) -> Self {
        Self { person: Some(name.to_string()), ..Self::default() }
    }

    fn day(name: &str) -> Self {
        Self { day: Some(name.to_string()), ..Self::default() }
    }

    fn time(value: String) -> Self {
        Self { time: Some(value), ..Self::default() }
    }

    fn confirmed(value: bool) -> Self {
        Self { confirmed: Some(value), ..Self::default() }
    }

    /// All slot values carried by this entry
    #[cfg(test)]
    pub fn values(&self) -> Vec<SlotValue> {
        let mut values = Vec::new();
        if let Some(person) = &self.person {
            values.push(SlotValue::Person(person.clone()));
        }
        if let Some(day) = &self.day {
            values.push(SlotValue::Day(day.clone()));
        }
        if let Some(time) = &self.time {
            values.push(SlotValue::Time(time.clone()));
        }
        if let Some(confirmed) = self.confirmed {
            values.push(SlotValue::Confirmed(confirmed));
        }
        values
    }

    /// The value this entry contributes to the given slot, if any.
    ///
    /// `confirmed` answers both yes/no questions: the whole-day flag and
    /// the final confirmation.
    pub fn value_for(&self, slot: Slot) -> Option<SlotValue> {
        match slot {
            Slot::Person => self.person.clone().map(SlotValue::Person),
            Slot::Day => self.day.clone().map(SlotValue::Day),
            Slot::Time => self.time.clone().map(SlotValue::Time),
            Slot::WholeDay | Slot::Confirmation => self.confirmed.map(SlotValue::Confirmed),
        }
    }

    fn is_empty(&self) -> bool {
        self.person.is_none() && self.day.is_none() && self.time.is_none() && self.confirmed.is_none()
    }
}

/// Errors raised while building a vocabulary
#[derive(Debug, thiserror::Error)]
pub enum VocabularyError {
    #[error("failed to read vocabulary file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid vocabulary JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("vocabulary contains an empty phrase")]
    EmptyPhrase,

    #[error("phrase {0:?} carries no slot value")]
    EmptyEntry(String),
}

/// Immutable phrase table shared by every dialogue attempt
#[derive(Debug, Clone)]
pub struct Vocabulary {
    entries: HashMap<String, Entry>,
}

impl Vocabulary {
    /// Build a vocabulary from phrase/entry pairs
    pub fn new<I, S>(entries: I) -> Result<Self, VocabularyError>
    where
        I: IntoIterator<Item = (S, Entry)>,
        S: AsRef<str>,
    {
        let mut table = HashMap::new();
        for (phrase, entry) in entries {
            let key = normalize(phrase.as_ref());
            if key.is_empty() {
                return Err(VocabularyError::EmptyPhrase);
            }
            if entry.is_empty() {
                return Err(VocabularyError::EmptyEntry(key));
            }
            table.insert(key, entry);
        }
        Ok(Self { entries: table })
    }

    /// The vocabulary the daemon ships with
    pub fn builtin() -> Self {
        let mut entries: HashMap<String, Entry> = HashMap::new();

        for (phrase, name) in [
            ("vlad", "Vladislav Maraev"),
            ("aya", "Nayat Astaiza Soriano"),
            ("rasmus", "Rasmus Blanck"),
            ("staffan", "Staffan Larsson"),
        ] {
            entries.insert(phrase.to_string(), Entry::person(name));
        }

        for name in ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday"] {
            entries.insert(name.to_lowercase(), Entry::day(name));
        }

        for hour in 8..=18 {
            entries.insert(hour.to_string(), Entry::time(format!("{hour:02}:00")));
        }

        for phrase in ["yes", "yeah", "yep", "sure", "of course", "absolutely"] {
            entries.insert(phrase.to_string(), Entry::confirmed(true));
        }
        for phrase in ["no", "nope", "nah", "no way", "not at all"] {
            entries.insert(phrase.to_string(), Entry::confirmed(false));
        }

        Self { entries }
    }

    /// Parse a JSON object of `phrase -> entry`
    pub fn from_json(json: &str) -> Result<Self, VocabularyError> {
        let raw: HashMap<String, Entry> = serde_json::from_str(json)?;
        Self::new(raw)
    }

    /// Load a JSON vocabulary file
    pub fn load(path: &Path) -> Result<Self, VocabularyError> {
        let json = std::fs::read_to_string(path)?;
        let vocabulary = Self::from_json(&json)?;
        debug!(?path, phrases = vocabulary.len(), "vocabulary loaded");
        Ok(vocabulary)
    }

    /// Look up a whole utterance
    pub fn resolve(&self, utterance: &str) -> Option<&Entry> {
        self.entries.get(&normalize(utterance))
    }

    /// Number of phrases
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

fn normalize(utterance: &str) -> String {
    utterance.trim().to_lowercase()
}
