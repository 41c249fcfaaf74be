//! Chain-independent view of a block and its actions.
//!
//! Every chain adapter decodes its own wire format into a type implementing
//! [`Block`]. Aggregators only ever see this trait, so they work unchanged
//! across chains.

use crate::{ActionsCount, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One state-changing operation inside a block.
///
/// Any field may be empty when the chain has no equivalent concept for the
/// given operation (e.g. a ledger amendment has no receiver).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    pub sender: String,
    pub receiver: String,
}

impl Action {
    pub fn new(
        name: impl Into<String>,
        sender: impl Into<String>,
        receiver: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            sender: sender.into(),
            receiver: receiver.into(),
        }
    }
}

/// The property of an [`Action`] used as a grouping key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionProperty {
    #[default]
    Name,
    Sender,
    Receiver,
}

impl ActionProperty {
    /// Return the value of this property for `action`.
    pub fn of<'a>(&self, action: &'a Action) -> &'a str {
        match self {
            Self::Name => &action.name,
            Self::Sender => &action.sender,
            Self::Receiver => &action.receiver,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Sender => "sender",
            Self::Receiver => "receiver",
        }
    }
}

impl FromStr for ActionProperty {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "name" => Ok(Self::Name),
            "sender" => Ok(Self::Sender),
            "receiver" => Ok(Self::Receiver),
            _ => Err(Error::UnknownActionProperty(s.to_string())),
        }
    }
}

impl fmt::Display for ActionProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded block (or ledger) of any chain.
///
/// Blocks are immutable once decoded. `list_actions` may compute its result
/// lazily but must return the same slice on every call.
pub trait Block: Send {
    /// Monotonically increasing block identifier.
    fn number(&self) -> u64;

    /// Time at which the block was produced.
    fn time(&self) -> DateTime<Utc>;

    /// Number of transactions in the block.
    fn transactions_count(&self) -> usize;

    /// All actions contained in the block.
    fn list_actions(&self) -> &[Action];

    /// Count the actions of this block keyed by `by`.
    fn actions_count(&self, by: ActionProperty) -> ActionsCount {
        let mut counts = ActionsCount::new();
        for action in self.list_actions() {
            counts.increment(by.of(action));
        }
        counts
    }
}
