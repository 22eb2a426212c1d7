//! Channel names and chat commands.
//!
//! Outgoing text is trimmed. Text starting with `/` is a command rather
//! than a message: `/leave` leaves the current channel and
//! `/create <name>` creates a channel.

use thiserror::Error;

/// Longest accepted channel name, in bytes.
pub const MAX_CHANNEL_NAME: usize = 16;

/// Rejected channel names and commands.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
    /// Empty after trimming.
    #[error("no channel name specified")]
    NoChannelName,

    /// Characters outside `a-z`, `0-9` and `-`.
    #[error("invalid channel name")]
    InvalidChannelName,

    /// Longer than [`MAX_CHANNEL_NAME`].
    #[error("channel name too long (max 16)")]
    ChannelNameTooLong,

    /// A lone `/`.
    #[error("no command")]
    NoCommand,

    /// Not a known command.
    #[error("unrecognized command: {0}")]
    UnknownCommand(String),
}

/// Validate a channel name. Returns it trimmed.
pub fn channel_name(raw: &str) -> Result<&str, ComposeError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ComposeError::NoChannelName);
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return Err(ComposeError::InvalidChannelName);
    }
    if name.len() > MAX_CHANNEL_NAME {
        return Err(ComposeError::ChannelNameTooLong);
    }
    Ok(name)
}

/// A chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Leave the channel the command was sent to.
    Leave,
    /// Create a channel in the team.
    Create {
        /// Validated channel name.
        name: String,
    },
}

impl Command {
    /// Parse `/<command> [args]`.
    pub fn parse(text: &str) -> Result<Self, ComposeError> {
        let mut fields = text.split_whitespace();
        let Some(command) = fields.next().filter(|c| *c != "/") else {
            return Err(ComposeError::NoCommand);
        };
        match command {
            "/leave" => Ok(Self::Leave),
            "/create" => {
                let name = channel_name(fields.next().unwrap_or_default())?;
                Ok(Self::Create {
                    name: name.to_string(),
                })
            }
            other => Err(ComposeError::UnknownCommand(other.to_string())),
        }
    }
}

/// What a piece of outgoing text turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// A message with trimmed text.
    Text(String),
    /// A command.
    Command(Command),
}

impl Outgoing {
    /// Classify outgoing text.
    pub fn parse(raw: &str) -> Result<Self, ComposeError> {
        let text = raw.trim();
        if text.starts_with('/') {
            Command::parse(text).map(Self::Command)
        } else {
            Ok(Self::Text(text.to_string()))
        }
    }
}
