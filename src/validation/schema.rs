//! Schema compilation.
//!
//! The JSON Schema algorithm itself lives behind [`SchemaEngine`]; the
//! default engine is backed by the `jsonschema` crate. Resolution is purely
//! in-memory: nothing is fetched from the network or the filesystem.

use std::{collections::HashMap, fmt, sync::Arc};

use serde_json::Value;

/// Name the configured definition is registered under before compiling.
pub const RESOURCE_NAME: &str = "schema";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompilationError {
    #[error("schema resource '{0}' is already registered")]
    DuplicateResource(String),

    #[error("schema resource '{0}' is not registered")]
    UnknownResource(String),

    #[error("invalid schema: {0}")]
    Invalid(String),
}

/// A JSON Schema engine: named resources in, compiled validators out.
pub trait SchemaEngine {
    fn add_resource(&mut self, name: &str, definition: Value) -> Result<(), CompilationError>;

    fn compile(&self, name: &str) -> Result<CompiledSchema, CompilationError>;
}

/// Checks a decoded document, reporting every violation found.
pub trait DocumentValidator: Send + Sync {
    fn violations(&self, document: &Value) -> Vec<Violation>;
}

impl DocumentValidator for jsonschema::Validator {
    fn violations(&self, document: &Value) -> Vec<Violation> {
        self.iter_errors(document)
            .map(|e| Violation {
                instance_path: e.instance_path.to_string(),
                message: e.to_string(),
            })
            .collect()
    }
}

/// One schema violation: where in the document, and what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// JSON pointer into the instance; empty for the document root.
    pub instance_path: String,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at '{}': {}", self.instance_path, self.message)
    }
}

/// An immutable compiled schema, cheap to clone and safe to share between
/// concurrent requests.
#[derive(Clone)]
pub struct CompiledSchema(Arc<dyn DocumentValidator>);

impl CompiledSchema {
    pub fn new(validator: impl DocumentValidator + 'static) -> Self {
        Self(Arc::new(validator))
    }

    /// Validate `document`; on failure every violation is returned, in the
    /// order the engine reports them.
    pub fn validate(&self, document: &Value) -> Result<(), Vec<Violation>> {
        let violations = self.0.violations(document);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

impl fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSchema").finish_non_exhaustive()
    }
}

/// [`SchemaEngine`] backed by `jsonschema`. The draft is detected from
/// `$schema`, and definitions are checked against their meta-schema.
#[derive(Debug, Default)]
pub struct JsonSchemaEngine {
    resources: HashMap<String, Value>,
}

impl JsonSchemaEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SchemaEngine for JsonSchemaEngine {
    fn add_resource(&mut self, name: &str, definition: Value) -> Result<(), CompilationError> {
        if self.resources.contains_key(name) {
            return Err(CompilationError::DuplicateResource(name.to_string()));
        }
        self.resources.insert(name.to_string(), definition);
        Ok(())
    }

    fn compile(&self, name: &str) -> Result<CompiledSchema, CompilationError> {
        let definition = self
            .resources
            .get(name)
            .ok_or_else(|| CompilationError::UnknownResource(name.to_string()))?;

        let validator = jsonschema::options()
            .build(definition)
            .map_err(|e| CompilationError::Invalid(e.to_string()))?;

        Ok(CompiledSchema::new(validator))
    }
}

/// Compile `definition` with a fresh [`JsonSchemaEngine`].
pub fn compile(definition: &Value) -> Result<CompiledSchema, CompilationError> {
    compile_with(&mut JsonSchemaEngine::new(), definition)
}

/// Register `definition` with `engine` under [`RESOURCE_NAME`] and compile it.
pub fn compile_with(
    engine: &mut impl SchemaEngine,
    definition: &Value,
) -> Result<CompiledSchema, CompilationError> {
    engine.add_resource(RESOURCE_NAME, definition.clone())?;
    engine.compile(RESOURCE_NAME)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_compile_and_validate() {
        let schema = compile(&json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        }))
        .unwrap();

        assert!(schema.validate(&json!({"name": "ada"})).is_ok());
        assert!(schema.validate(&json!({"name": 1})).is_err());
    }

    #[test]
    fn test_invalid_type_keyword() {
        let err = compile(&json!({"type": "not a valid type"})).unwrap_err();
        assert!(matches!(err, CompilationError::Invalid(_)));
    }

    #[test]
    fn test_structurally_invalid_schema() {
        let err = compile(&json!({"properties": "should be an object"})).unwrap_err();
        assert!(matches!(err, CompilationError::Invalid(_)));
    }

    #[test]
    fn test_all_violations_reported() {
        let schema = compile(&json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "age": {"type": "integer", "minimum": 0}
            },
            "required": ["name", "email"]
        }))
        .unwrap();

        let violations = schema
            .validate(&json!({"name": 7, "age": -1}))
            .unwrap_err();
        assert_eq!(violations.len(), 3);

        let paths: Vec<&str> = violations.iter().map(|v| v.instance_path.as_str()).collect();
        assert!(paths.contains(&"/name"));
        assert!(paths.contains(&"/age"));
        assert!(paths.contains(&""));
    }

    #[test]
    fn test_violation_display() {
        let violation = Violation {
            instance_path: "/name".into(),
            message: "7 is not of type \"string\"".into(),
        };
        assert_eq!(violation.to_string(), "at '/name': 7 is not of type \"string\"");
    }

    #[test]
    fn test_engine_rejects_duplicate_resource() {
        let mut engine = JsonSchemaEngine::new();
        engine.add_resource(RESOURCE_NAME, json!({})).unwrap();
        let err = engine.add_resource(RESOURCE_NAME, json!({})).unwrap_err();
        assert_eq!(err, CompilationError::DuplicateResource("schema".into()));
    }

    #[test]
    fn test_engine_unknown_resource() {
        let err = JsonSchemaEngine::new().compile("missing").unwrap_err();
        assert_eq!(err, CompilationError::UnknownResource("missing".into()));
    }

    #[test]
    fn test_compile_with_custom_engine() {
        struct RejectAll;

        impl DocumentValidator for RejectAll {
            fn violations(&self, _document: &Value) -> Vec<Violation> {
                vec![Violation {
                    instance_path: String::new(),
                    message: "rejected".into(),
                }]
            }
        }

        #[derive(Default)]
        struct StubEngine {
            registered: Vec<String>,
        }

        impl SchemaEngine for StubEngine {
            fn add_resource(&mut self, name: &str, _: Value) -> Result<(), CompilationError> {
                self.registered.push(name.to_string());
                Ok(())
            }

            fn compile(&self, _name: &str) -> Result<CompiledSchema, CompilationError> {
                Ok(CompiledSchema::new(RejectAll))
            }
        }

        let mut engine = StubEngine::default();
        let schema = compile_with(&mut engine, &json!(true)).unwrap();
        assert_eq!(engine.registered, vec!["schema"]);
        assert_eq!(schema.validate(&json!({})).unwrap_err()[0].message, "rejected");
    }
}
