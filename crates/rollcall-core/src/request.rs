//! Validation of incoming capture batches.

use crate::marking::MarkError;
use crate::types::{Encoding, SessionId};
use serde_json::Value;

/// A validated batch submitted by the capture device.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkRequest {
    pub subject_code: String,
    pub encodings: Vec<Encoding>,
    /// Caller-chosen session; the marker assigns one when absent.
    pub session_id: Option<SessionId>,
}

impl MarkRequest {
    pub fn new(subject_code: impl Into<String>, encodings: Vec<Encoding>) -> Self {
        Self {
            subject_code: subject_code.into(),
            encodings,
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<SessionId>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Parse and validate a raw JSON body.
    pub fn from_slice(body: &[u8]) -> Result<Self, MarkError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| MarkError::Validation(format!("malformed JSON body: {e}")))?;
        Self::from_value(&value)
    }

    /// Validate a decoded JSON body. The whole batch is rejected if any
    /// encoding is not an array of finite numbers.
    pub fn from_value(value: &Value) -> Result<Self, MarkError> {
        let obj = value
            .as_object()
            .ok_or_else(|| invalid("request body must be a JSON object"))?;

        let subject_code = match obj.get("subject_code") {
            Some(Value::String(s)) => s.trim(),
            Some(Value::Null) | None => return Err(invalid("subject_code is required")),
            Some(_) => return Err(invalid("subject_code must be a string")),
        };
        if subject_code.is_empty() {
            return Err(invalid("subject_code must not be empty"));
        }
        if subject_code.chars().any(char::is_control) {
            return Err(invalid("subject_code contains control characters"));
        }

        let raw = match obj.get("encodings") {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => return Err(invalid("encodings is required")),
            Some(_) => return Err(invalid("encodings must be an array")),
        };
        let encodings = raw
            .iter()
            .enumerate()
            .map(|(i, item)| parse_encoding(i, item))
            .collect::<Result<Vec<_>, _>>()?;

        let session_id = match obj.get("session_id") {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(Value::Null) | None => None,
            Some(_) => return Err(invalid("session_id must be a non-empty string")),
        };

        Ok(Self {
            subject_code: subject_code.to_string(),
            encodings,
            session_id,
        })
    }
}

fn parse_encoding(index: usize, item: &Value) -> Result<Encoding, MarkError> {
    let values = item
        .as_array()
        .ok_or_else(|| invalid(format!("encodings[{index}] must be an array of numbers")))?;

    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|x| x as f32)
                .filter(|x| x.is_finite())
                .ok_or_else(|| invalid(format!("encodings[{index}] contains a non-numeric value")))
        })
        .collect::<Result<Vec<f32>, _>>()
        .map(Encoding::new)
}

fn invalid(msg: impl Into<String>) -> MarkError {
    MarkError::Validation(msg.into())
}
