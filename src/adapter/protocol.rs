//! Event contract between the dialogue machine and the speech subsystem
//!
//! Directives flow from the machine to the adapter; adapter events flow
//! back. Both are JSON-encodable with a `type` tag using the wire names
//! of the speech service.

use serde::{Deserialize, Serialize};

/// Requests from the dialogue machine to the speech subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Directive {
    /// Initialize recognizer and synthesizer; answered by `ASRTTS_READY`
    #[serde(rename = "PREPARE")]
    Prepare,

    /// Synthesize and play text; answered by `SPEAK_COMPLETE`
    #[serde(rename = "SPEAK")]
    Speak { utterance: String },

    /// Capture one user turn
    #[serde(rename = "LISTEN")]
    Listen,
}

impl Directive {
    pub fn speak(utterance: impl Into<String>) -> Self {
        Self::Speak {
            utterance: utterance.into(),
        }
    }
}

/// One recognition hypothesis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub utterance: String,
    pub confidence: f32,
}

/// Replies from the speech subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AdapterEvent {
    #[serde(rename = "ASRTTS_READY")]
    Ready,

    #[serde(rename = "SPEAK_COMPLETE")]
    SpeakComplete,

    /// Hypotheses ordered by descending confidence
    #[serde(rename = "RECOGNISED")]
    Recognised { hypotheses: Vec<Hypothesis> },

    #[serde(rename = "ASR_NOINPUT")]
    NoInput,

    #[serde(rename = "LISTEN_COMPLETE")]
    ListenComplete,
}

impl AdapterEvent {
    /// A recognition with a single hypothesis
    pub fn recognised(utterance: impl Into<String>, confidence: f32) -> Self {
        Self::Recognised {
            hypotheses: vec![Hypothesis {
                utterance: utterance.into(),
                confidence,
            }],
        }
    }
}

impl std::fmt::Display for AdapterEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterEvent::Ready => write!(f, "ASRTTS_READY"),
            AdapterEvent::SpeakComplete => write!(f, "SPEAK_COMPLETE"),
            AdapterEvent::Recognised { hypotheses } => {
                write!(f, "RECOGNISED ({} hypotheses)", hypotheses.len())
            }
            AdapterEvent::NoInput => write!(f, "ASR_NOINPUT"),
            AdapterEvent::ListenComplete => write!(f, "LISTEN_COMPLETE"),
        }
    }
}
