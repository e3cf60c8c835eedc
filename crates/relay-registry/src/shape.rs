use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

/// Typed input-schema shape used by the downstream server
///
/// Built by a recursive walk over the upstream's raw JSON Schema; no
/// strings are ever executed. Anything outside the supported subset
/// becomes [`SchemaShape::Opaque`], which accepts any value.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaShape {
    String,
    Number,
    Integer,
    Boolean,
    /// Homogeneous array of one element shape
    Array(Box<SchemaShape>),
    /// Recursive object; properties carry their own shapes
    Object {
        properties: BTreeMap<String, ObjectProperty>,
    },
    /// Unsupported construct; passes validation unconditionally
    Opaque,
}

/// One property of an object shape
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectProperty {
    pub shape: SchemaShape,
    /// Listed in the parent schema's `required`
    pub required: bool,
    pub description: Option<String>,
}

impl SchemaShape {
    /// Convert a raw JSON Schema into a typed shape
    pub fn convert(schema: &Value) -> Self {
        let Some(object) = schema.as_object() else {
            return Self::Opaque;
        };

        match object.get("type").and_then(Value::as_str) {
            Some("string") => Self::String,
            Some("number") => Self::Number,
            Some("integer") => Self::Integer,
            Some("boolean") => Self::Boolean,
            Some("array") => {
                let items = object.get("items").map_or(Self::Opaque, Self::convert);
                match items {
                    Self::String
                    | Self::Number
                    | Self::Integer
                    | Self::Boolean
                    | Self::Object { .. } => Self::Array(Box::new(items)),
                    _ => Self::Opaque,
                }
            }
            Some("object") => {
                let required: Vec<&str> = object
                    .get("required")
                    .and_then(Value::as_array)
                    .map(|r| r.iter().filter_map(Value::as_str).collect())
                    .unwrap_or_default();

                let mut properties = BTreeMap::new();
                if let Some(props) = object.get("properties").and_then(Value::as_object) {
                    for (name, prop_schema) in props {
                        properties.insert(
                            name.clone(),
                            ObjectProperty {
                                shape: Self::convert(prop_schema),
                                required: required.contains(&name.as_str()),
                                description: prop_schema
                                    .get("description")
                                    .and_then(Value::as_str)
                                    .map(str::to_owned),
                            },
                        );
                    }
                }

                Self::Object { properties }
            }
            _ => Self::Opaque,
        }
    }

    /// Render the shape back into normalized JSON Schema
    ///
    /// Property order is deterministic, making the serialized form a
    /// canonical representation suitable for equality checks.
    pub fn to_schema(&self) -> Value {
        match self {
            Self::String => json!({ "type": "string" }),
            Self::Number => json!({ "type": "number" }),
            Self::Integer => json!({ "type": "integer" }),
            Self::Boolean => json!({ "type": "boolean" }),
            Self::Array(items) => json!({ "type": "array", "items": items.to_schema() }),
            Self::Object { properties } => {
                let mut props = Map::new();
                let mut required = Vec::new();
                for (name, property) in properties {
                    let mut schema = property.shape.to_schema();
                    if let (Some(obj), Some(description)) =
                        (schema.as_object_mut(), &property.description)
                    {
                        obj.insert("description".to_owned(), json!(description));
                    }
                    props.insert(name.clone(), schema);
                    if property.required {
                        required.push(json!(name));
                    }
                }

                let mut out = Map::new();
                out.insert("type".to_owned(), json!("object"));
                out.insert("properties".to_owned(), Value::Object(props));
                if !required.is_empty() {
                    out.insert("required".to_owned(), Value::Array(required));
                }
                Value::Object(out)
            }
            Self::Opaque => json!({}),
        }
    }

    /// Canonical serialized form used for schema-change detection
    pub fn canonical(&self) -> String {
        self.to_schema().to_string()
    }

    /// Structural validation of a candidate value
    ///
    /// Extra object properties are allowed; only declared shapes and
    /// `required` membership are enforced.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array(items) => value
                .as_array()
                .is_some_and(|a| a.iter().all(|v| items.accepts(v))),
            Self::Object { properties } => {
                let Some(object) = value.as_object() else {
                    return false;
                };
                properties.iter().all(|(name, property)| match object.get(name) {
                    Some(v) => property.shape.accepts(v),
                    None => !property.required,
                })
            }
            Self::Opaque => true,
        }
    }
}
