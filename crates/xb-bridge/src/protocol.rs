//! Wire format of the stdio protocol: one JSON object per line each way.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ActionError;

/// Written once, before any result, when the bridge is ready to serve.
pub const READY_LINE: &str = r#"{"status":"ready"}"#;

/// A parsed input line.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Echoed back verbatim on the result.
    pub id: Value,
    pub action: String,
    pub args: Map<String, Value>,
}

/// One output line. `data` is present only on success, `error` only on
/// failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResult {
    pub id: Value,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    pub fn success(id: Value, data: Value) -> Self {
        Self {
            id,
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(id: Value, error: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Serialize to a single line, without the trailing newline.
    pub fn to_line(&self) -> String {
        // Only `Value`s, strings and bools; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"id":null,"success":false,"error":"internal error"}"#.to_string()
        })
    }
}

/// Parse one input line.
///
/// On failure returns the id to answer with (null when the line is not a
/// JSON object) together with the error.
pub fn parse_command(line: &str) -> Result<Command, (Value, ActionError)> {
    let value: Value =
        serde_json::from_str(line).map_err(|_| (Value::Null, ActionError::InvalidCommand))?;
    let Value::Object(mut obj) = value else {
        return Err((Value::Null, ActionError::InvalidCommand));
    };

    let id = obj.remove("id").unwrap_or(Value::Null);

    let action = match obj.remove("action") {
        Some(Value::String(action)) => action,
        _ => return Err((id, ActionError::MissingAction)),
    };

    let args = match obj.remove("args") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(args)) => args,
        Some(_) => return Err((id, ActionError::invalid("args", "must be an object"))),
    };

    Ok(Command { id, action, args })
}
