//! Outbound reply envelopes.

use serde::Serialize;
use serde_json::Value;
use switchboard_core::CommandError;

/// Reply to one command, correlated to the request by `uuid`.
///
/// Wire format: `{ uuid, command, success, result?, error?: { code, message } }`
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Reply {
    pub uuid: Option<Value>,
    pub command: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReplyError {
    pub code: String,
    pub message: String,
}

impl Reply {
    pub fn success(uuid: Option<Value>, command: impl Into<String>, result: Value) -> Self {
        Self {
            uuid,
            command: command.into(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(uuid: Option<Value>, command: impl Into<String>, err: &CommandError) -> Self {
        Self {
            uuid,
            command: command.into(),
            success: false,
            result: None,
            error: Some(ReplyError {
                code: err.code().to_owned(),
                message: err.to_string(),
            }),
        }
    }

    pub fn from_outcome(
        uuid: Option<Value>,
        command: impl Into<String>,
        outcome: &Result<Value, CommandError>,
    ) -> Self {
        match outcome {
            Ok(result) => Self::success(uuid, command, result.clone()),
            Err(err) => Self::failure(uuid, command, err),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
