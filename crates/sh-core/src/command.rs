//! Commands routed to a channel's handler

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A command sent to a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Ask the handler to publish the channel's current state
    Refresh,
    On,
    Off,
    /// Arbitrary value, e.g. a number or a string
    Value(Value),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Refresh => f.write_str("REFRESH"),
            Command::On => f.write_str("ON"),
            Command::Off => f.write_str("OFF"),
            Command::Value(value) => write!(f, "{}", value),
        }
    }
}

impl From<Value> for Command {
    fn from(value: Value) -> Self {
        Command::Value(value)
    }
}
