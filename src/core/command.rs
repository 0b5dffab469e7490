// src/core/command.rs

//! The text command protocol spoken by clients.
//!
//! One command per frame, verb matched case-insensitively:
//!
//! ```text
//! publish <channel> <payload...>
//! subscribe <channel> [<channel> ...]
//! psubscribe <pattern> [<pattern> ...]
//! unsubscribe <channel> [<channel> ...]
//! punsubscribe <pattern> [<pattern> ...]
//! ```
//!
//! The publish payload is the raw remainder of the line and may contain spaces.
//! Subscribe-family arguments are split on spaces.

use crate::core::BridgeError;
use std::str::FromStr;

/// The verb of a command.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum_macros::EnumString,
    strum_macros::AsRefStr,
    strum_macros::Display,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CommandKind {
    Publish,
    Subscribe,
    PSubscribe,
    Unsubscribe,
    PUnsubscribe,
}

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Publish { channel: String, payload: String },
    Subscribe(Vec<String>),
    PSubscribe(Vec<String>),
    Unsubscribe(Vec<String>),
    PUnsubscribe(Vec<String>),
}

impl Command {
    /// Parses one raw frame into a `Command`.
    ///
    /// Embedded newlines are collapsed to spaces and surrounding whitespace is
    /// trimmed before the verb is split off at the first space.
    pub fn parse(raw: &[u8]) -> Result<Self, BridgeError> {
        let text = String::from_utf8_lossy(raw).replace('\n', " ");
        let line = text.trim();

        let Some((verb, rest)) = line.split_once(' ') else {
            // A bare subscribe-family verb is a request without channels.
            return match CommandKind::from_str(line) {
                Ok(kind) if kind != CommandKind::Publish => {
                    Err(BridgeError::EmptyChannelList(kind.to_string()))
                }
                _ => Err(BridgeError::MalformedCommand(line.to_string())),
            };
        };

        let kind = CommandKind::from_str(verb)
            .map_err(|_| BridgeError::UnknownVerb(verb.to_string()))?;

        match kind {
            CommandKind::Publish => {
                let (channel, payload) = rest.split_once(' ').ok_or_else(|| {
                    BridgeError::MalformedCommand(format!("publish to '{rest}' without payload"))
                })?;
                Ok(Command::Publish {
                    channel: channel.to_string(),
                    payload: payload.to_string(),
                })
            }
            CommandKind::Subscribe => split_channels(kind, rest).map(Command::Subscribe),
            CommandKind::PSubscribe => split_channels(kind, rest).map(Command::PSubscribe),
            CommandKind::Unsubscribe => split_channels(kind, rest).map(Command::Unsubscribe),
            CommandKind::PUnsubscribe => split_channels(kind, rest).map(Command::PUnsubscribe),
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Publish { .. } => CommandKind::Publish,
            Command::Subscribe(_) => CommandKind::Subscribe,
            Command::PSubscribe(_) => CommandKind::PSubscribe,
            Command::Unsubscribe(_) => CommandKind::Unsubscribe,
            Command::PUnsubscribe(_) => CommandKind::PUnsubscribe,
        }
    }

    /// The channels or patterns the command targets. Never empty.
    pub fn channels(&self) -> &[String] {
        match self {
            Command::Publish { channel, .. } => std::slice::from_ref(channel),
            Command::Subscribe(c)
            | Command::PSubscribe(c)
            | Command::Unsubscribe(c)
            | Command::PUnsubscribe(c) => c,
        }
    }

    /// The payload of a publish command.
    pub fn payload(&self) -> Option<&str> {
        match self {
            Command::Publish { payload, .. } => Some(payload),
            _ => None,
        }
    }
}

impl FromStr for Command {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::parse(s.as_bytes())
    }
}

/// Splits subscribe-family arguments into channel or pattern tokens.
fn split_channels(kind: CommandKind, rest: &str) -> Result<Vec<String>, BridgeError> {
    let channels: Vec<String> = rest
        .split(' ')
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect();
    if channels.is_empty() {
        return Err(BridgeError::EmptyChannelList(kind.to_string()));
    }
    Ok(channels)
}
