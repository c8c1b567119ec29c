use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One entry of an envelope's `errors` list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

impl ErrorItem {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }

    pub fn for_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }
}

/// Legitimate reasons for a handler to bypass the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfHandledReason {
    Stream,
    File,
    Redirect,
}

/// What a handler hands back to the dispatcher
pub enum HandlerResult {
    Success {
        data: Value,
        code: Option<u16>,
    },
    ValidationFailure {
        errors: Vec<ErrorItem>,
        code: Option<u16>,
    },
    Failure {
        message: String,
        code: Option<u16>,
    },
    /// The handler built its own response; it is sent untouched
    SelfHandled {
        reason: SelfHandledReason,
        response: Response,
    },
}

impl HandlerResult {
    pub fn ok(data: Value) -> Self {
        HandlerResult::Success { data, code: None }
    }

    pub fn created(data: Value) -> Self {
        HandlerResult::Success {
            data,
            code: Some(201),
        }
    }

    pub fn fail(message: impl Into<String>, code: u16) -> Self {
        HandlerResult::Failure {
            message: message.into(),
            code: Some(code),
        }
    }

    pub fn invalid(errors: Vec<ErrorItem>) -> Self {
        HandlerResult::ValidationFailure { errors, code: None }
    }

    /// Interpret a loosely shaped result object: `{errors}` and `{error}`
    /// mark failures, an optional numeric `code` overrides the status and
    /// anything else is success data.
    pub fn from_loose(value: Value) -> Self {
        let code = value
            .get("code")
            .and_then(Value::as_u64)
            .and_then(|c| u16::try_from(c).ok());

        if let Some(errors) = value.get("errors") {
            return HandlerResult::ValidationFailure {
                errors: normalize_errors(errors),
                code,
            };
        }

        if let Some(error) = value.get("error") {
            let message = match error {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return HandlerResult::Failure { message, code };
        }

        HandlerResult::Success { data: value, code }
    }
}

impl std::fmt::Debug for HandlerResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerResult::Success { data, code } => f
                .debug_struct("Success")
                .field("data", data)
                .field("code", code)
                .finish(),
            HandlerResult::ValidationFailure { errors, code } => f
                .debug_struct("ValidationFailure")
                .field("errors", errors)
                .field("code", code)
                .finish(),
            HandlerResult::Failure { message, code } => f
                .debug_struct("Failure")
                .field("message", message)
                .field("code", code)
                .finish(),
            HandlerResult::SelfHandled { reason, response } => f
                .debug_struct("SelfHandled")
                .field("reason", reason)
                .field("status", &response.status())
                .finish(),
        }
    }
}

/// The one wire shape every client receives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub ok: bool,
    pub code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ErrorItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: String,
}

impl ResponseEnvelope {
    pub fn success(data: Value, code: u16) -> Self {
        Self {
            ok: true,
            code,
            data: Some(data),
            errors: None,
            message: None,
            timestamp: timestamp(),
        }
    }

    pub fn failure(code: u16, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            code,
            data: None,
            errors: None,
            message: Some(message.into()),
            timestamp: timestamp(),
        }
    }

    pub fn invalid(code: u16, errors: Vec<ErrorItem>) -> Self {
        Self {
            ok: false,
            code,
            data: None,
            errors: Some(errors),
            message: None,
            timestamp: timestamp(),
        }
    }

    /// Generic 500 that never carries internal detail
    pub fn internal() -> Self {
        Self::failure(500, "Internal server error")
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for ResponseEnvelope {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A normalized handler result, ready to send
#[derive(Debug)]
pub enum Normalized {
    Envelope(ResponseEnvelope),
    SelfHandled(SelfHandledReason, Response),
}

impl IntoResponse for Normalized {
    fn into_response(self) -> Response {
        match self {
            Normalized::Envelope(envelope) => envelope.into_response(),
            Normalized::SelfHandled(reason, response) => {
                tracing::debug!("Handler answered on its own ({:?})", reason);
                response
            }
        }
    }
}

/// Map a handler result onto the envelope. Total over all variants.
pub fn normalize(result: HandlerResult) -> Normalized {
    match result {
        HandlerResult::SelfHandled { reason, response } => Normalized::SelfHandled(reason, response),
        HandlerResult::ValidationFailure { errors, code } => {
            Normalized::Envelope(ResponseEnvelope::invalid(code.unwrap_or(400), errors))
        }
        HandlerResult::Failure { message, code } => {
            Normalized::Envelope(ResponseEnvelope::failure(code.unwrap_or(400), message))
        }
        HandlerResult::Success { data, code } => {
            Normalized::Envelope(ResponseEnvelope::success(data, code.unwrap_or(200)))
        }
    }
}

impl From<Value> for HandlerResult {
    fn from(value: Value) -> Self {
        HandlerResult::from_loose(value)
    }
}

/// Coerce a loose `errors` value into a list of `{field?, message}`
pub fn normalize_errors(value: &Value) -> Vec<ErrorItem> {
    match value {
        Value::Array(items) => items.iter().map(normalize_error_item).collect(),
        Value::Null => Vec::new(),
        other => vec![normalize_error_item(other)],
    }
}

fn normalize_error_item(value: &Value) -> ErrorItem {
    match value {
        Value::String(message) => ErrorItem::new(message.clone()),
        Value::Object(map) => match map.get("message") {
            Some(message) => ErrorItem {
                field: map.get("field").and_then(Value::as_str).map(str::to_string),
                message: match message {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                },
            },
            None => ErrorItem::new(Value::Object(Map::clone(map)).to_string()),
        },
        other => ErrorItem::new(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(result: HandlerResult) -> ResponseEnvelope {
        match normalize(result) {
            Normalized::Envelope(envelope) => envelope,
            Normalized::SelfHandled(..) => panic!("expected an envelope"),
        }
    }

    #[test]
    fn success_defaults_to_200() {
        let env = envelope(HandlerResult::from_loose(json!({"name": "Foo"})));
        assert!(env.ok);
        assert_eq!(env.code, 200);
        assert_eq!(env.data, Some(json!({"name": "Foo"})));
        assert!(env.errors.is_none());
        assert!(!env.timestamp.is_empty());
    }

    #[test]
    fn string_errors_become_messages() {
        let env = envelope(HandlerResult::from_loose(json!({"errors": ["x"]})));
        assert!(!env.ok);
        assert_eq!(env.code, 400);
        assert_eq!(env.errors, Some(vec![ErrorItem::new("x")]));
        assert!(env.data.is_none());
    }

    #[test]
    fn singular_error_keeps_code() {
        let env = envelope(HandlerResult::from_loose(json!({"error": "nope", "code": 403})));
        assert!(!env.ok);
        assert_eq!(env.code, 403);
        assert_eq!(env.message.as_deref(), Some("nope"));
    }

    #[test]
    fn error_shapes_are_normalized() {
        assert_eq!(normalize_errors(&json!("bad")), vec![ErrorItem::new("bad")]);
        assert_eq!(
            normalize_errors(&json!({"field": "name", "message": "required"})),
            vec![ErrorItem::for_field("name", "required")]
        );
        assert_eq!(
            normalize_errors(&json!(["a", {"message": "b"}, {"field": "c", "message": "d"}])),
            vec![
                ErrorItem::new("a"),
                ErrorItem::new("b"),
                ErrorItem::for_field("c", "d"),
            ]
        );
    }

    #[test]
    fn self_handled_passes_through() {
        let response = (StatusCode::FOUND, "moved").into_response();
        let normalized = normalize(HandlerResult::SelfHandled {
            reason: SelfHandledReason::Redirect,
            response,
        });
        match normalized {
            Normalized::SelfHandled(reason, response) => {
                assert_eq!(reason, SelfHandledReason::Redirect);
                assert_eq!(response.status(), StatusCode::FOUND);
            }
            Normalized::Envelope(_) => panic!("self-handled result was wrapped"),
        }
    }

    #[test]
    fn envelope_serializes_without_empty_fields() {
        let env = ResponseEnvelope::failure(404, "module ghost not found");
        let wire = serde_json::to_value(&env).unwrap();
        assert_eq!(wire["ok"], json!(false));
        assert_eq!(wire["message"], json!("module ghost not found"));
        assert!(wire.get("data").is_none());
        assert!(wire.get("errors").is_none());
        assert!(wire["timestamp"].is_string());
    }
}
