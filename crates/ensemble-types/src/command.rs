//! [`ActionCommand`] – typed goal commands.
//!
//! A goal's `action` string has the shape `verb` or `verb_<service>`:
//!
//! | Action | Command |
//! |---|---|
//! | `do`, `do_<service>` | [`ActionCommand::Do`] |
//! | `request`, `request_<service>` | [`ActionCommand::Request`] |
//! | `start_<service>` | [`ActionCommand::Start`], rate taken from `optional_data` |
//! | `pause_<service>` | [`ActionCommand::Pause`] |
//! | `stop_<service>` | [`ActionCommand::Stop`] |
//!
//! Verbs are matched case-insensitively.  A `<service>` suffix naming a
//! different service is rejected rather than silently ignored.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ActionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ActionCommand {
    /// Perform a hardware action with the goal's payload.
    Do,
    /// Send the goal's payload to an external service.
    Request,
    /// Start an internal processing service, optionally at `rate` Hz.
    Start { rate: Option<u32> },
    Pause,
    Stop,
}

impl ActionCommand {
    /// Resolve `action` for the service named `service`.
    ///
    /// # Errors
    ///
    /// - [`ActionError::UnknownCommand`] – unrecognised verb, or a suffix
    ///   addressing another service.
    /// - [`ActionError::MalformedGoal`] – a `start` rate that is not an
    ///   unsigned integer.
    pub fn parse(action: &str, optional_data: &str, service: &str) -> Result<Self, ActionError> {
        let (verb, target) = match action.split_once('_') {
            Some((verb, target)) => (verb, Some(target)),
            None => (action, None),
        };

        if let Some(target) = target
            && target != service
        {
            return Err(ActionError::UnknownCommand(format!(
                "{action} (addressed to '{target}', this is '{service}')"
            )));
        }

        match verb.to_ascii_lowercase().as_str() {
            "do" => Ok(ActionCommand::Do),
            "request" => Ok(ActionCommand::Request),
            "start" => Ok(ActionCommand::Start {
                rate: parse_rate(optional_data)?,
            }),
            "pause" => Ok(ActionCommand::Pause),
            "stop" => Ok(ActionCommand::Stop),
            _ => Err(ActionError::UnknownCommand(action.to_string())),
        }
    }

    pub const fn verb(self) -> &'static str {
        match self {
            ActionCommand::Do => "do",
            ActionCommand::Request => "request",
            ActionCommand::Start { .. } => "start",
            ActionCommand::Pause => "pause",
            ActionCommand::Stop => "stop",
        }
    }
}

impl fmt::Display for ActionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionCommand::Start { rate: Some(rate) } => write!(f, "start@{rate}Hz"),
            other => f.write_str(other.verb()),
        }
    }
}

fn parse_rate(optional_data: &str) -> Result<Option<u32>, ActionError> {
    let raw = optional_data.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<u32>()
        .map(Some)
        .map_err(|_| ActionError::MalformedGoal(format!("start rate '{raw}' is not an integer")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_verbs_resolve() {
        assert_eq!(ActionCommand::parse("do", "", "speaker").unwrap(), ActionCommand::Do);
        assert_eq!(
            ActionCommand::parse("REQUEST", "hi", "chat").unwrap(),
            ActionCommand::Request
        );
    }

    #[test]
    fn suffix_must_name_this_service() {
        assert_eq!(
            ActionCommand::parse("stop_stt_default", "", "stt_default").unwrap(),
            ActionCommand::Stop
        );
        let err = ActionCommand::parse("stop_camera", "", "stt_default").unwrap_err();
        assert!(matches!(err, ActionError::UnknownCommand(_)));
    }

    #[test]
    fn start_reads_rate_from_payload() {
        assert_eq!(
            ActionCommand::parse("start_mic", "16", "mic").unwrap(),
            ActionCommand::Start { rate: Some(16) }
        );
        assert_eq!(
            ActionCommand::parse("start_mic", "  ", "mic").unwrap(),
            ActionCommand::Start { rate: None }
        );
    }

    #[test]
    fn non_numeric_rate_is_malformed() {
        let err = ActionCommand::parse("start_mic", "fast", "mic").unwrap_err();
        assert!(matches!(err, ActionError::MalformedGoal(_)));
    }

    #[test]
    fn unknown_verb_is_rejected() {
        let err = ActionCommand::parse("dance", "", "gesture").unwrap_err();
        assert_eq!(err, ActionError::UnknownCommand("dance".into()));
    }
}
