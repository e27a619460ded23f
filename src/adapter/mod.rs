//! Turn-taking adapter: the speech side of the dialogue
//!
//! `protocol` defines the directive/event contract; `console` is a text
//! implementation of it.

mod console;
mod protocol;

pub use console::ConsoleAdapter;
pub use protocol::{AdapterEvent, Directive};

#[cfg(test)]
pub use protocol::Hypothesis;
