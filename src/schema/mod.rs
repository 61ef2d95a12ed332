//! Schema capability: `validate(schema, data) -> {ok, data'} | {err, e}`.
//!
//! Two backends are supported, matching §6: a composable/transforming
//! nested-schema backend (`JsonSchemaValidator`, backed by the `jsonschema`
//! crate) and a keyword-option flat backend (`FlatSchema`). Both are
//! open-schema: only declared keys are validated, everything else passes
//! through unchanged, which is what makes Chain merging (§4.8) safe.

use serde_json::{Map, Value};

use crate::error::ExecutionError;

/// Capability every action's `validate_input`/`validate_output` is built on.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, data: &Map<String, Value>) -> Result<Map<String, Value>, ExecutionError>;

    /// The JSON-Schema document this validator enforces, for `ToolDescriptor`'s
    /// `parameters_schema` (§6). Defaults to an empty object schema for
    /// backends that have nothing better to offer.
    fn describe(&self) -> Value {
        serde_json::json!({ "type": "object" })
    }
}

/// Composable/transforming nested-schema backend, backed by the `jsonschema`
/// crate. Declared keys are validated against a compiled JSON Schema
/// document; undeclared keys are copied through unchanged since `jsonschema`
/// only reports errors, it never strips fields.
pub struct JsonSchemaValidator {
    compiled: jsonschema::JSONSchema,
    schema: Value,
}

impl JsonSchemaValidator {
    pub fn compile(schema: &Value) -> Result<Self, ExecutionError> {
        let compiled = jsonschema::JSONSchema::compile(schema)
            .map_err(|e| ExecutionError::configuration(format!("invalid schema: {e}")))?;
        Ok(Self {
            compiled,
            schema: schema.clone(),
        })
    }
}

impl SchemaValidator for JsonSchemaValidator {
    fn validate(&self, data: &Map<String, Value>) -> Result<Map<String, Value>, ExecutionError> {
        let instance = Value::Object(data.clone());
        let result = self.compiled.validate(&instance);
        if let Err(errors) = result {
            let message = errors
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ExecutionError::invalid_input(message));
        }
        Ok(data.clone())
    }

    fn describe(&self) -> Value {
        self.schema.clone()
    }
}

/// A single declared field in a `FlatSchema`.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub required: bool,
    pub type_tag: TypeTag,
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    String,
    Number,
    Bool,
    Object,
    Array,
    Any,
}

impl TypeTag {
    fn matches(self, value: &Value) -> bool {
        match self {
            TypeTag::String => value.is_string(),
            TypeTag::Number => value.is_number(),
            TypeTag::Bool => value.is_boolean(),
            TypeTag::Object => value.is_object(),
            TypeTag::Array => value.is_array(),
            TypeTag::Any => true,
        }
    }

    fn name(self) -> &'static str {
        match self {
            TypeTag::String => "string",
            TypeTag::Number => "number",
            TypeTag::Bool => "bool",
            TypeTag::Object => "object",
            TypeTag::Array => "array",
            TypeTag::Any => "any",
        }
    }

    /// The JSON-Schema `type` keyword value for this tag, for `describe()`.
    /// `Any` has no single JSON-Schema type, so it is left unconstrained.
    fn json_type(self) -> Value {
        match self {
            TypeTag::String => Value::String("string".into()),
            TypeTag::Number => Value::String("number".into()),
            TypeTag::Bool => Value::String("boolean".into()),
            TypeTag::Object => Value::String("object".into()),
            TypeTag::Array => Value::String("array".into()),
            TypeTag::Any => Value::Array(vec![
                Value::String("string".into()),
                Value::String("number".into()),
                Value::String("boolean".into()),
                Value::String("object".into()),
                Value::String("array".into()),
                Value::String("null".into()),
            ]),
        }
    }
}

/// Keyword-option flat schema: a small list of `(name, required, type,
/// default)` tuples, validated field by field. Declared fields missing a
/// value fall back to `default` when present; otherwise a required field
/// missing entirely is `InvalidInput`.
#[derive(Debug, Clone, Default)]
pub struct FlatSchema {
    fields: Vec<FieldSpec>,
}

impl FlatSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, required: bool, type_tag: TypeTag) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            required,
            type_tag,
            default: None,
        });
        self
    }

    pub fn optional_with_default(
        mut self,
        name: impl Into<String>,
        type_tag: TypeTag,
        default: Value,
    ) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            required: false,
            type_tag,
            default: Some(default),
        });
        self
    }
}

impl SchemaValidator for FlatSchema {
    fn validate(&self, data: &Map<String, Value>) -> Result<Map<String, Value>, ExecutionError> {
        let mut out = data.clone();
        for field in &self.fields {
            match out.get(&field.name) {
                Some(value) => {
                    if !field.type_tag.matches(value) {
                        return Err(ExecutionError::invalid_input(format!(
                            "field '{}' must be {}",
                            field.name,
                            field.type_tag.name()
                        )));
                    }
                }
                None => {
                    if let Some(default) = &field.default {
                        out.insert(field.name.clone(), default.clone());
                    } else if field.required {
                        return Err(ExecutionError::invalid_input(format!(
                            "missing required field '{}'",
                            field.name
                        )));
                    }
                }
            }
        }
        Ok(out)
    }

    fn describe(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in &self.fields {
            properties.insert(
                field.name.clone(),
                serde_json::json!({ "type": field.type_tag.json_type() }),
            );
            if field.required {
                required.push(Value::String(field.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flat_schema_passes_through_unknown_keys() {
        let schema = FlatSchema::new().field("amount", true, TypeTag::Number);
        let data = json!({"amount": 5, "extra": "kept"}).as_object().unwrap().clone();
        let validated = schema.validate(&data).unwrap();
        assert_eq!(validated.get("extra").unwrap(), "kept");
    }

    #[test]
    fn flat_schema_rejects_missing_required() {
        let schema = FlatSchema::new().field("amount", true, TypeTag::Number);
        let data = Map::new();
        let err = schema.validate(&data).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidInput);
    }

    #[test]
    fn flat_schema_applies_default() {
        let schema =
            FlatSchema::new().optional_with_default("amount", TypeTag::Number, json!(1));
        let data = Map::new();
        let validated = schema.validate(&data).unwrap();
        assert_eq!(validated.get("amount").unwrap(), 1);
    }

    #[test]
    fn json_schema_validator_open_schema() {
        let schema = json!({
            "type": "object",
            "properties": { "value": { "type": "number" } },
            "required": ["value"]
        });
        let validator = JsonSchemaValidator::compile(&schema).unwrap();
        let data = json!({"value": 5, "extra": true}).as_object().unwrap().clone();
        let validated = validator.validate(&data).unwrap();
        assert!(validated.contains_key("extra"));
    }

    #[test]
    fn json_schema_validator_rejects_invalid() {
        let schema = json!({
            "type": "object",
            "properties": { "value": { "type": "number" } },
            "required": ["value"]
        });
        let validator = JsonSchemaValidator::compile(&schema).unwrap();
        let data = Map::new();
        let err = validator.validate(&data).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidInput);
    }
}
