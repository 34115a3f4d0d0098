//! Option schema validation
//!
//! [`SchemaValidator`] is the seam; [`JsonSchemaValidator`] compiles option
//! schemas with `jsonschema` and fills in declared defaults before checking
//! the bag.

use crate::builder::OptionSchema;
use crate::error::{HarnessError, Result};
use crate::JsonObject;
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which schema defaults are applied to an option bag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DefaultsMode {
    /// Every declared property with a default
    #[default]
    AllProperties,
    /// Only object-typed properties; an absent object without a default
    /// becomes an empty object
    ObjectsOnly,
}

/// Validates option bags against builder schemas
pub trait SchemaValidator: Send + Sync {
    /// Return the validated (defaulted) options
    ///
    /// # Errors
    /// `Validation` when the bag violates the schema, `Schema` when the
    /// schema itself does not compile.
    fn validate(&self, builder: &str, schema: &OptionSchema, options: JsonObject)
        -> Result<JsonObject>;
}

/// [`SchemaValidator`] backed by the `jsonschema` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSchemaValidator {
    defaults: DefaultsMode,
}

impl JsonSchemaValidator {
    /// Create validator
    #[inline]
    #[must_use]
    pub fn new(defaults: DefaultsMode) -> Self {
        Self { defaults }
    }

    /// Defaults mode in use
    #[inline]
    #[must_use]
    pub fn defaults(&self) -> DefaultsMode {
        self.defaults
    }
}

impl SchemaValidator for JsonSchemaValidator {
    fn validate(
        &self,
        builder: &str,
        schema: &OptionSchema,
        options: JsonObject,
    ) -> Result<JsonObject> {
        match schema.as_value() {
            Value::Bool(true) => return Ok(options),
            Value::Bool(false) => {
                return Err(HarnessError::Validation {
                    builder: builder.to_string(),
                    errors: vec!["/: schema does not accept any options".to_string()],
                })
            }
            _ => {}
        }

        let compiled = JSONSchema::compile(schema.as_value()).map_err(|e| HarnessError::Schema {
            builder: builder.to_string(),
            message: e.to_string(),
        })?;

        let mut options = options;
        apply_defaults(schema.as_value(), &mut options, self.defaults);

        let instance = Value::Object(options);
        if let Err(errors) = compiled.validate(&instance) {
            let errors = errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    let path = if path.is_empty() { "/".to_string() } else { path };
                    format!("{path}: {e}")
                })
                .collect();
            return Err(HarnessError::Validation {
                builder: builder.to_string(),
                errors,
            });
        }

        match instance {
            Value::Object(options) => Ok(options),
            _ => unreachable!("instance is built from an object"),
        }
    }
}

fn is_object_schema(schema: &Value) -> bool {
    match schema.get("type") {
        Some(Value::String(kind)) => kind == "object",
        Some(Value::Array(kinds)) => kinds.iter().any(|k| k == "object"),
        _ => schema.get("properties").is_some(),
    }
}

/// Object built purely from nested defaults, if any apply
fn defaults_object(schema: &Value, mode: DefaultsMode) -> Option<JsonObject> {
    let mut object = JsonObject::new();
    apply_defaults(schema, &mut object, mode);
    (!object.is_empty()).then_some(object)
}

fn apply_defaults(schema: &Value, options: &mut JsonObject, mode: DefaultsMode) {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return;
    };

    for (name, property) in properties {
        let object_typed = is_object_schema(property);
        match options.get_mut(name) {
            Some(Value::Object(nested)) if object_typed => apply_defaults(property, nested, mode),
            Some(_) => {}
            None => {
                if mode == DefaultsMode::ObjectsOnly && !object_typed {
                    continue;
                }
                if let Some(default) = property.get("default") {
                    options.insert(name.clone(), default.clone());
                } else if object_typed {
                    let nested = defaults_object(property, mode);
                    match (nested, mode) {
                        (Some(nested), _) => {
                            options.insert(name.clone(), Value::Object(nested));
                        }
                        (None, DefaultsMode::ObjectsOnly) => {
                            options.insert(name.clone(), Value::Object(JsonObject::new()));
                        }
                        (None, DefaultsMode::AllProperties) => {}
                    }
                }
            }
        }
    }
}
