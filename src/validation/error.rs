use std::fmt::Write;

use http::StatusCode;

use super::Violation;
use crate::proxy::HasStatusCode;

/// A request body rejected by validation. Always a client error.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("could not validate an empty body")]
    EmptyBody,

    #[error("invalid JSON body: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{}", describe_violations(.0))]
    Schema(Vec<Violation>),
}

impl ValidationError {
    /// Machine-readable code for error responses.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::EmptyBody => "empty_body",
            ValidationError::Parse(_) => "invalid_json",
            ValidationError::Schema(_) => "schema_violation",
        }
    }
}

impl HasStatusCode for ValidationError {
    fn status_code(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }
}

fn describe_violations(violations: &[Violation]) -> String {
    let mut out = format!(
        "jsonschema validation failed with {} violation(s)",
        violations.len()
    );
    for violation in violations {
        let _ = write!(out, "\n- {violation}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_body_message() {
        let err = ValidationError::EmptyBody;
        assert_eq!(err.to_string(), "could not validate an empty body");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_schema_message_lists_every_violation() {
        let err = ValidationError::Schema(vec![
            Violation {
                instance_path: "/name".into(),
                message: "7 is not of type \"string\"".into(),
            },
            Violation {
                instance_path: String::new(),
                message: "\"email\" is a required property".into(),
            },
        ]);

        assert_eq!(
            err.to_string(),
            "jsonschema validation failed with 2 violation(s)\n\
             - at '/name': 7 is not of type \"string\"\n\
             - at '': \"email\" is a required property"
        );
        assert_eq!(err.code(), "schema_violation");
    }

    #[test]
    fn test_parse_error_keeps_position() {
        let parse = serde_json::from_slice::<serde_json::Value>(b"{\"a\": \"x\ny\"}").unwrap_err();
        let err = ValidationError::from(parse);
        let message = err.to_string();
        assert!(message.starts_with("invalid JSON body: "));
        assert!(message.contains("line ") && message.contains("column "));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
