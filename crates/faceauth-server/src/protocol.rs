//! Newline-delimited JSON request/response messages.

use faceauth_core::errors::{AppError, AppResult};
use faceauth_core::faces::matcher::MatchScore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Ping,
    Register { name: String },
    Authenticate,
}

impl Request {
    pub fn command(&self) -> &'static str {
        match self {
            Request::Ping => "ping",
            Request::Register { .. } => "register",
            Request::Authenticate => "authenticate",
        }
    }
}

/// Request lines that cannot be dispatched. None of these close the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("Invalid JSON format")]
    InvalidJson,
    #[error("Missing command")]
    MissingCommand,
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Name is required")]
    NameRequired,
}

pub fn parse_request(line: &str) -> Result<Request, RequestError> {
    let value: Value = serde_json::from_str(line).map_err(|_| RequestError::InvalidJson)?;
    let Value::Object(fields) = value else {
        return Err(RequestError::MissingCommand);
    };

    let command = match fields.get("command") {
        None | Some(Value::Null) => return Err(RequestError::MissingCommand),
        Some(Value::String(command)) => command.as_str(),
        Some(other) => return Err(RequestError::UnknownCommand(other.to_string())),
    };

    match command {
        "ping" => Ok(Request::Ping),
        "authenticate" => Ok(Request::Authenticate),
        "register" => match fields.get("name") {
            Some(Value::String(name)) if !name.is_empty() => Ok(Request::Register {
                name: name.clone(),
            }),
            _ => Err(RequestError::NameRequired),
        },
        other => Err(RequestError::UnknownCommand(other.to_string())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl Response {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: Status::Success,
            message: message.into(),
            user: None,
            confidence: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: message.into(),
            user: None,
            confidence: None,
        }
    }

    pub fn pong() -> Self {
        Self::success("pong")
    }

    pub fn registered(name: &str) -> Self {
        Self::success(format!("registration successful for {name}"))
    }

    pub fn authenticated(score: &MatchScore) -> Self {
        Self {
            user: Some(score.name.clone()),
            confidence: Some(score.confidence),
            ..Self::success("authentication successful")
        }
    }

    /// `cause` is set when no probe could be matched at all.
    pub fn authentication_failed(cause: Option<&AppError>) -> Self {
        match cause {
            Some(err) => Self::error(format!("authentication failed: {}", err.human_message())),
            None => Self::error("authentication failed"),
        }
    }

    pub fn request_too_large() -> Self {
        Self::error("Request too large")
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// Serialized form including the trailing newline.
    pub fn to_line(&self) -> AppResult<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_commands() {
        assert_eq!(parse_request(r#"{"command":"ping"}"#), Ok(Request::Ping));
        assert_eq!(
            parse_request(r#"{"command":"authenticate","extra":1}"#),
            Ok(Request::Authenticate)
        );
        assert_eq!(
            parse_request(r#"{"command":"register","name":"alice"}"#),
            Ok(Request::Register {
                name: "alice".into()
            })
        );
    }

    #[test]
    fn malformed_requests_map_to_protocol_errors() {
        assert_eq!(parse_request("{not json"), Err(RequestError::InvalidJson));
        assert_eq!(parse_request("[1,2]"), Err(RequestError::MissingCommand));
        assert_eq!(parse_request(r#"{"name":"x"}"#), Err(RequestError::MissingCommand));
        assert_eq!(
            parse_request(r#"{"command":"dance"}"#),
            Err(RequestError::UnknownCommand("dance".into()))
        );
        assert_eq!(
            parse_request(r#"{"command":"register"}"#),
            Err(RequestError::NameRequired)
        );
        assert_eq!(
            parse_request(r#"{"command":"register","name":""}"#),
            Err(RequestError::NameRequired)
        );
        assert_eq!(
            RequestError::UnknownCommand("dance".into()).to_string(),
            "Unknown command: dance"
        );
    }

    #[test]
    fn optional_fields_are_omitted() {
        let line = Response::pong().to_line().unwrap();
        assert_eq!(line, "{\"status\":\"success\",\"message\":\"pong\"}\n");

        let score = MatchScore {
            name: "alice".into(),
            distance: 0.0,
            confidence: 1.0,
        };
        let value: Value = serde_json::from_str(&Response::authenticated(&score).to_line().unwrap())
            .unwrap();
        assert_eq!(value["user"], "alice");
        assert_eq!(value["confidence"], 1.0);
        assert_eq!(value["message"], "authentication successful");
    }

    #[test]
    fn failed_capture_is_reported_with_reason() {
        let response = Response::authentication_failed(Some(&AppError::NoFaceDetected));
        assert_eq!(response.message, "authentication failed: no face detected");
        assert_eq!(
            Response::authentication_failed(None).message,
            "authentication failed"
        );
    }
}
