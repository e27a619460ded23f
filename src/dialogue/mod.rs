//! Dialogue core for scheduling a meeting
//!
//! - `vocabulary`: closed phrase table mapping utterances to slot values
//! - `session`: what has been collected in the current attempt
//! - `machine`: the finite-state controller sequencing speak/listen turns
//! - `observer`: side-channel reporting of transitions

mod machine;
mod observer;
mod session;
mod vocabulary;

pub use machine::{DialogueInput, DialogueMachine};
pub use observer::{BroadcastObserver, LogObserver};
pub use session::Session;
pub use vocabulary::Vocabulary;
