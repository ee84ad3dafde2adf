//! The `TaskComplete` control signal (spec §4.4 step 4, §7).
//!
//! Not an error: a tool that wants to end the current turn returns this
//! from `execute` instead of an ordinary result. The agent loop converts it
//! into a `final` event carrying `final_message` (or the joined assistant
//! texts if none was given) rather than treating it as a failure.

/// Signals that the current turn is done. `0` is the optional final
/// message text the tool wants surfaced in place of the assistant's own
/// running text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskComplete(pub Option<String>);

impl TaskComplete {
    pub fn new(message: Option<String>) -> Self {
        Self(message)
    }

    pub fn message(&self) -> Option<&str> {
        self.0.as_deref()
    }
}
